// src/kernel/collab/mm.rs
//! Physical and virtual memory manager contracts.
//!
//! The physical/virtual memory managers are boot machinery outside this
//! core (built atop `bootloader_api`'s memory map and `x86_64`'s page-table
//! types). The Storage and Hardware decks only ever see them through these
//! two traits, so the core itself never depends on a concrete allocator or
//! page-table layout.

use crate::errors::KernelError;

/// Physical page-frame allocator. `alloc`/`free` operate in units of 4 KiB
/// pages.
pub trait PhysicalAllocator: Send + Sync {
    /// Allocates `n_pages` contiguous physical pages, or `None` if exhausted.
    fn alloc(&self, n_pages: usize) -> Option<u64>;

    /// Returns `n_pages` contiguous physical pages starting at `phys` to the
    /// free pool.
    fn free(&self, phys: u64, n_pages: usize);
}

/// Opaque handle to a virtual address space, returned by
/// [`VirtualMemoryManager::create_context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace(pub u64);

/// Mapping permission flags, independent of the underlying page-table format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapFlags {
    pub writable: bool,
    pub user_accessible: bool,
    pub executable: bool,
}

impl MapFlags {
    /// Read-only, kernel-only, non-executable.
    pub const KERNEL_RO: Self = Self { writable: false, user_accessible: false, executable: false };
    /// Read-write, user-accessible, non-executable — the common case for a
    /// process's mapped event/result rings.
    pub const USER_RW: Self = Self { writable: true, user_accessible: true, executable: false };
}

/// Virtual memory manager, consumed by the Storage deck for `mmap`-style
/// requests and by process lifecycle for creating/tearing down address
/// spaces and mapping the per-process ring pages.
pub trait VirtualMemoryManager: Send + Sync {
    /// Creates a fresh, empty address space.
    fn create_context(&self) -> AddressSpace;

    /// Maps `n_pages` physical pages at `phys` into `ctx` starting at `vaddr`.
    fn map(
        &self,
        ctx: AddressSpace,
        vaddr: u64,
        phys: u64,
        n_pages: usize,
        flags: MapFlags,
    ) -> Result<(), KernelError>;

    /// Unmaps `n_pages` starting at `vaddr` from `ctx`.
    fn unmap(&self, ctx: AddressSpace, vaddr: u64, n_pages: usize) -> Result<(), KernelError>;

    /// Tears down an address space and returns its physical pages.
    fn destroy(&self, ctx: AddressSpace);

    /// Handles a page fault raised while `ctx` was active. Returns `Ok(())`
    /// if the fault was resolved (e.g. demand paging), or the error to
    /// surface to the faulting process otherwise.
    fn handle_page_fault(&self, ctx: AddressSpace, addr: u64, error_code: u64) -> Result<(), KernelError>;

    /// The kernel's own address space, active before any process runs.
    fn kernel_context(&self) -> AddressSpace;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_flags_user_rw_is_writable_and_user_accessible() {
        assert!(MapFlags::USER_RW.writable);
        assert!(MapFlags::USER_RW.user_accessible);
        assert!(!MapFlags::KERNEL_RO.user_accessible);
    }
}
