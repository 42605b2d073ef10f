// src/boot.rs
//! Concrete boot-time collaborators, wired up only by `main.rs`.
//!
//! `kernel::collab` defines the contracts the core depends on and
//! deliberately stops there; this module is the one place a concrete
//! physical/virtual memory manager and tag filesystem exist, keeping the
//! `BootInfoFrameAllocator`-style bump allocator and `OffsetPageTable`
//! wiring out of the generic kernel modules and into boot-specific code.
//!
//! The virtual memory manager here runs a single shared kernel address
//! space rather than one page table per process: `AddressSpace` ids beyond
//! the kernel context are bookkeeping only. Real per-process isolation would
//! need a page table per context switch, which this core does not build.

use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use bootloader_api::info::{MemoryRegionKind, MemoryRegions};
use spin::Mutex;
use x86_64::registers::control::Cr3;
use x86_64::structures::paging::{FrameAllocator, Mapper, OffsetPageTable, Page, PageTable, PageTableFlags, PhysFrame, Size4KiB};
use x86_64::{PhysAddr, VirtAddr};

use crate::errors::{ErrorCode, KernelError};
use crate::kernel::collab::fs::{InodeId, InodeStat, TagFilesystem};
use crate::kernel::collab::mm::{AddressSpace, MapFlags, PhysicalAllocator, VirtualMemoryManager};

const PAGE_SIZE: u64 = 0x1000;
const SAFE_MEMORY_START: u64 = 0x0010_0000;

/// Returns the currently active level-4 page table, given the offset the
/// bootloader mapped all physical memory at.
///
/// # Safety
///
/// `physical_memory_offset` must be the offset the bootloader actually used,
/// and this must be called at most once per boot (aliased `&mut` otherwise).
unsafe fn active_level_4_table(physical_memory_offset: VirtAddr) -> &'static mut PageTable {
    let (level_4_frame, _) = Cr3::read();
    let phys = level_4_frame.start_address();
    let virt = physical_memory_offset + phys.as_u64();
    let page_table_ptr: *mut PageTable = virt.as_mut_ptr();
    // Safety: forwarded from the caller's contract above.
    unsafe { &mut *page_table_ptr }
}

/// Bump-with-freelist physical frame allocator over the bootloader's usable
/// memory regions. Ownership is tracked at the `PhysicalAllocator` call
/// site (one allocation per process resource) rather than by reference
/// counting in the allocator itself.
pub struct BumpFrameAllocator {
    inner: Mutex<BumpInner>,
}

struct BumpInner {
    regions: &'static MemoryRegions,
    next: usize,
    free: VecDeque<u64>,
}

impl BumpFrameAllocator {
    /// `reserved_pages` is how many leading frames (in `usable_frames`
    /// iteration order) are already claimed by something outside this
    /// allocator — the kernel heap, mapped directly through the
    /// bootloader's physical-memory window rather than through `map` — and
    /// must therefore never be handed out again.
    ///
    /// # Safety
    ///
    /// `regions` must describe memory this kernel actually owns for the
    /// rest of its lifetime, and must be the only frame allocator live over
    /// that memory.
    #[must_use]
    pub unsafe fn init(regions: &'static MemoryRegions, reserved_pages: usize) -> Self {
        Self { inner: Mutex::new(BumpInner { regions, next: reserved_pages, free: VecDeque::new() }) }
    }

    fn usable_frames(regions: &MemoryRegions) -> impl Iterator<Item = u64> + '_ {
        regions
            .iter()
            .filter(|r| r.kind == MemoryRegionKind::Usable)
            .filter(|r| r.end > SAFE_MEMORY_START)
            .flat_map(|r| {
                let start = r.start.max(SAFE_MEMORY_START) & !(PAGE_SIZE - 1);
                let end = r.end & !(PAGE_SIZE - 1);
                (start..end).step_by(PAGE_SIZE as usize)
            })
    }
}

impl PhysicalAllocator for BumpFrameAllocator {
    fn alloc(&self, n_pages: usize) -> Option<u64> {
        if n_pages == 0 {
            return None;
        }
        let mut inner = self.inner.lock();
        if n_pages == 1 {
            if let Some(phys) = inner.free.pop_front() {
                return Some(phys);
            }
        }
        let mut frames = Self::usable_frames(inner.regions).skip(inner.next);
        let first = frames.next()?;
        let mut expected = first + PAGE_SIZE;
        for _ in 1..n_pages {
            let next = frames.next()?;
            if next != expected {
                // crossed into a non-contiguous region; this allocator only
                // serves the single-page and trivially-contiguous cases.
                return None;
            }
            expected = next + PAGE_SIZE;
        }
        inner.next += n_pages;
        Some(first)
    }

    fn free(&self, phys: u64, n_pages: usize) {
        let mut inner = self.inner.lock();
        for i in 0..n_pages {
            inner.free.push_back(phys + (i as u64) * PAGE_SIZE);
        }
    }
}

/// Adapts a `&dyn PhysicalAllocator` into the `x86_64` crate's
/// `FrameAllocator` so `Mapper::map_to` can draw page-table frames from it.
struct FrameAllocatorAdapter<'a>(&'a dyn PhysicalAllocator);

unsafe impl FrameAllocator<Size4KiB> for FrameAllocatorAdapter<'_> {
    fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
        self.0.alloc(1).map(|phys| PhysFrame::containing_address(PhysAddr::new(phys)))
    }
}

/// `VirtualMemoryManager` over a single live page table, active for kernel
/// and every process context alike.
pub struct OffsetVmm {
    mapper: Mutex<OffsetPageTable<'static>>,
    allocator: &'static dyn PhysicalAllocator,
    next_ctx: AtomicU64,
}

impl OffsetVmm {
    /// # Safety
    ///
    /// `physical_memory_offset` must be the offset the bootloader mapped all
    /// physical memory at, and this must run at most once per boot.
    #[must_use]
    pub unsafe fn init(physical_memory_offset: u64, allocator: &'static dyn PhysicalAllocator) -> Self {
        let offset = VirtAddr::new(physical_memory_offset);
        // Safety: forwarded from the caller's contract above.
        let level4 = unsafe { active_level_4_table(offset) };
        // Safety: `level4` is the live, currently-installed table.
        let mapper = unsafe { OffsetPageTable::new(level4, offset) };
        Self { mapper: Mutex::new(mapper), allocator, next_ctx: AtomicU64::new(1) }
    }

    fn flags_of(flags: MapFlags) -> PageTableFlags {
        let mut table_flags = PageTableFlags::PRESENT;
        if flags.writable {
            table_flags |= PageTableFlags::WRITABLE;
        }
        if flags.user_accessible {
            table_flags |= PageTableFlags::USER_ACCESSIBLE;
        }
        if !flags.executable {
            table_flags |= PageTableFlags::NO_EXECUTE;
        }
        table_flags
    }
}

impl VirtualMemoryManager for OffsetVmm {
    fn create_context(&self) -> AddressSpace {
        AddressSpace(self.next_ctx.fetch_add(1, Ordering::Relaxed))
    }

    fn map(&self, _ctx: AddressSpace, vaddr: u64, phys: u64, n_pages: usize, flags: MapFlags) -> Result<(), KernelError> {
        let table_flags = Self::flags_of(flags);
        let mut mapper = self.mapper.lock();
        let mut adapter = FrameAllocatorAdapter(self.allocator);
        for i in 0..n_pages {
            let page = Page::<Size4KiB>::containing_address(VirtAddr::new(vaddr + (i as u64) * PAGE_SIZE));
            let frame = PhysFrame::<Size4KiB>::containing_address(PhysAddr::new(phys + (i as u64) * PAGE_SIZE));
            // Safety: `phys` was handed out by the same allocator backing
            // `adapter`, so it is not aliased by any other live mapping.
            let result = unsafe { mapper.map_to(page, frame, table_flags, &mut adapter) };
            match result {
                Ok(flush) => flush.flush(),
                Err(_) => return Err(KernelError::new(ErrorCode::OutOfMemory)),
            }
        }
        Ok(())
    }

    fn unmap(&self, _ctx: AddressSpace, vaddr: u64, n_pages: usize) -> Result<(), KernelError> {
        let mut mapper = self.mapper.lock();
        for i in 0..n_pages {
            let page = Page::<Size4KiB>::containing_address(VirtAddr::new(vaddr + (i as u64) * PAGE_SIZE));
            let (_, flush) = mapper.unmap(page).map_err(|_| KernelError::new(ErrorCode::InvalidParameter))?;
            flush.flush();
        }
        Ok(())
    }

    fn destroy(&self, _ctx: AddressSpace) {
        // Single shared kernel address space: nothing to tear down per
        // context. A real per-process table would free its own frames here.
    }

    fn handle_page_fault(&self, _ctx: AddressSpace, _addr: u64, _error_code: u64) -> Result<(), KernelError> {
        Err(KernelError::new(ErrorCode::HardwareDeviceNotImplemented))
    }

    fn kernel_context(&self) -> AddressSpace {
        AddressSpace(0)
    }
}

/// In-memory tag filesystem: every file is a growable byte buffer plus a tag
/// set, indexed by `InodeId`. The on-disk tagged store the Storage deck's
/// contract describes is out of scope here the same way paging is; this is
/// the honest RAM-backed stand-in so the deck has a real collaborator to
/// drive rather than the test-only `NoFs`.
pub struct RamTagFilesystem {
    inner: Mutex<RamFsInner>,
}

struct RamFsInner {
    files: BTreeMap<InodeId, RamFile>,
    next_inode: u64,
}

struct RamFile {
    data: Vec<u8>,
    tags: BTreeSet<String>,
}

impl RamTagFilesystem {
    #[must_use]
    pub const fn new() -> Self {
        Self { inner: Mutex::new(RamFsInner { files: BTreeMap::new(), next_inode: 1 }) }
    }
}

impl Default for RamTagFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl TagFilesystem for RamTagFilesystem {
    fn create_tagged_file(&self, initial_tag: &str) -> Result<InodeId, KernelError> {
        let mut inner = self.inner.lock();
        let inode = InodeId(inner.next_inode);
        inner.next_inode += 1;
        let mut tags = BTreeSet::new();
        tags.insert(String::from(initial_tag));
        inner.files.insert(inode, RamFile { data: Vec::new(), tags });
        Ok(inode)
    }

    fn add_tag(&self, inode: InodeId, tag: &str) -> Result<(), KernelError> {
        let mut inner = self.inner.lock();
        let file = inner.files.get_mut(&inode).ok_or_else(|| KernelError::new(ErrorCode::StorageFileNotFound))?;
        file.tags.insert(String::from(tag));
        Ok(())
    }

    fn remove_tag(&self, inode: InodeId, tag: &str) -> Result<(), KernelError> {
        let mut inner = self.inner.lock();
        let file = inner.files.get_mut(&inode).ok_or_else(|| KernelError::new(ErrorCode::StorageFileNotFound))?;
        file.tags.remove(tag);
        Ok(())
    }

    fn query_by_tag(&self, tag: &str) -> Vec<InodeId> {
        let inner = self.inner.lock();
        inner.files.iter().filter(|(_, f)| f.tags.contains(tag)).map(|(id, _)| *id).collect()
    }

    fn read(&self, inode: InodeId, offset: u64, buf: &mut [u8]) -> Result<usize, KernelError> {
        let inner = self.inner.lock();
        let file = inner.files.get(&inode).ok_or_else(|| KernelError::new(ErrorCode::StorageFileNotFound))?;
        let offset = offset as usize;
        if offset >= file.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(file.data.len() - offset);
        buf[..n].copy_from_slice(&file.data[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, inode: InodeId, offset: u64, data: &[u8]) -> Result<usize, KernelError> {
        let mut inner = self.inner.lock();
        let file = inner.files.get_mut(&inode).ok_or_else(|| KernelError::new(ErrorCode::StorageFileNotFound))?;
        let offset = offset as usize;
        if file.data.len() < offset + data.len() {
            file.data.resize(offset + data.len(), 0);
        }
        file.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn stat(&self, inode: InodeId) -> Result<InodeStat, KernelError> {
        let inner = self.inner.lock();
        let file = inner.files.get(&inode).ok_or_else(|| KernelError::new(ErrorCode::StorageFileNotFound))?;
        Ok(InodeStat { inode, size_bytes: file.data.len() as u64, tag_count: file.tags.len() as u32 })
    }

    fn sync(&self, inode: InodeId) -> Result<(), KernelError> {
        let inner = self.inner.lock();
        if inner.files.contains_key(&inode) {
            Ok(())
        } else {
            Err(KernelError::new(ErrorCode::StorageFileNotFound))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ram_fs_round_trips_a_write_then_read() {
        let fs = RamTagFilesystem::new();
        let inode = fs.create_tagged_file("scratch").unwrap();
        fs.write(inode, 0, b"hello").unwrap();

        let mut buf = [0u8; 5];
        let n = fs.read(inode, 0, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn ram_fs_queries_by_tag() {
        let fs = RamTagFilesystem::new();
        let a = fs.create_tagged_file("workflow").unwrap();
        let _b = fs.create_tagged_file("scratch").unwrap();
        fs.add_tag(a, "important").unwrap();

        assert_eq!(fs.query_by_tag("important"), alloc::vec![a]);
        assert_eq!(fs.query_by_tag("workflow"), alloc::vec![a]);
    }

    #[test]
    fn ram_fs_unknown_inode_reports_not_found() {
        let fs = RamTagFilesystem::new();
        assert_eq!(fs.stat(InodeId(999)).unwrap_err().code(), ErrorCode::StorageFileNotFound);
    }
}
