// src/kernel/decks/storage.rs
//! Storage deck: memory allocation, memory-mapping and tag-filesystem
//! operations, event types 200-299.
//!
//! Owns a 256-slot file-descriptor table behind a single spinlock; every
//! actual byte of file content lives in the external [`TagFilesystem`]
//! collaborator, never here.

use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use super::{limits, validate_step, Collaborators, Deck, DeckCounters, DeckOutcome, DeckStats, PREFIX_STORAGE};
use crate::errors::ErrorCode;
use crate::kernel::collab::fs::InodeId;
use crate::kernel::collab::mm::MapFlags;
use crate::kernel::routing::{DeckResult, MappedRegion, RoutingEntry};

/// Storage deck event types.
pub mod event_type {
    pub const FILE_OPEN: u32 = 200;
    pub const FILE_CLOSE: u32 = 201;
    pub const FILE_READ: u32 = 202;
    pub const FILE_WRITE: u32 = 203;
    pub const FILE_STAT: u32 = 204;
    pub const TAG_ADD: u32 = 205;
    pub const TAG_REMOVE: u32 = 206;
    pub const TAG_QUERY: u32 = 207;
    pub const TAGGED_FILE_CREATE: u32 = 208;
    pub const MEM_ALLOC: u32 = 209;
    pub const MEM_MAP: u32 = 210;
}

const FD_TABLE_SIZE: usize = 256;

/// File-descriptor table: a fixed slot array, index doubles as the fd.
struct FdTable {
    slots: Mutex<[Option<InodeId>; FD_TABLE_SIZE]>,
}

impl FdTable {
    const fn new() -> Self {
        Self { slots: Mutex::new([None; FD_TABLE_SIZE]) }
    }

    fn open(&self, inode: InodeId) -> Result<u32, ErrorCode> {
        let mut slots = self.slots.lock();
        for (fd, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(inode);
                return Ok(fd as u32);
            }
        }
        Err(ErrorCode::StorageTableFull)
    }

    fn close(&self, fd: u32) -> Result<(), ErrorCode> {
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(fd as usize).ok_or(ErrorCode::StorageDescriptorInvalid)?;
        if slot.take().is_none() {
            return Err(ErrorCode::StorageDescriptorInvalid);
        }
        Ok(())
    }

    fn lookup(&self, fd: u32) -> Result<InodeId, ErrorCode> {
        self.slots.lock().get(fd as usize).copied().flatten().ok_or(ErrorCode::StorageDescriptorInvalid)
    }
}

fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    buf.get(offset..offset + 4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u64(buf: &[u8], offset: usize) -> Option<u64> {
    buf.get(offset..offset + 8).map(|b| u64::from_le_bytes(b.try_into().unwrap()))
}

fn read_tag(buf: &[u8], offset: usize) -> Option<String> {
    let bytes = buf.get(offset..)?;
    if bytes.len() > limits::MAX_NAME_LEN {
        return None;
    }
    core::str::from_utf8(bytes).ok().map(String::from)
}

/// Storage deck implementation.
pub struct StorageDeck {
    counters: DeckCounters,
    fds: FdTable,
}

impl StorageDeck {
    /// A fresh deck with an empty fd table.
    #[must_use]
    pub const fn new() -> Self {
        Self { counters: DeckCounters::new(), fds: FdTable::new() }
    }
}

impl Default for StorageDeck {
    fn default() -> Self {
        Self::new()
    }
}

impl Deck for StorageDeck {
    fn prefix(&self) -> u8 {
        PREFIX_STORAGE
    }

    fn accepts(&self, event_type: u32) -> bool {
        (200..300).contains(&event_type)
    }

    fn process(&self, entry: &mut RoutingEntry, collab: &Collaborators) -> DeckOutcome {
        let outcome = self.process_inner(entry, collab);
        self.counters.record(&outcome);
        outcome
    }

    fn stats(&self) -> DeckStats {
        self.counters.snapshot()
    }
}

impl StorageDeck {
    fn process_inner(&self, entry: &mut RoutingEntry, collab: &Collaborators) -> DeckOutcome {
        if let Err(code) = validate_step(entry, PREFIX_STORAGE) {
            return DeckOutcome::Error(code);
        }
        let event_type = entry.event_copy.event_type;
        if !self.accepts(event_type) {
            return DeckOutcome::Error(ErrorCode::NotImplemented);
        }
        let payload = entry.event_copy.payload().to_vec();
        let timestamp = entry.event_copy.timestamp;

        let result = match self.dispatch(event_type, &payload, collab) {
            Ok(r) => r,
            Err(code) => return DeckOutcome::Error(code),
        };
        entry.record_success(result, timestamp);
        DeckOutcome::Completed
    }

    fn dispatch(&self, event_type: u32, payload: &[u8], collab: &Collaborators) -> Result<DeckResult, ErrorCode> {
        match event_type {
            event_type::TAGGED_FILE_CREATE => {
                let tag = read_tag(payload, 0).ok_or(ErrorCode::OperationsInvalidInput)?;
                let inode = collab.fs.create_tagged_file(&tag).map_err(|_| ErrorCode::StorageIoError)?;
                let fd = self.fds.open(inode)?;
                Ok(DeckResult::Value(u64::from(fd)))
            }
            event_type::FILE_OPEN => {
                let tag = read_tag(payload, 0).ok_or(ErrorCode::OperationsInvalidInput)?;
                let inode = *collab.fs.query_by_tag(&tag).first().ok_or(ErrorCode::StorageFileNotFound)?;
                let fd = self.fds.open(inode)?;
                Ok(DeckResult::Value(u64::from(fd)))
            }
            event_type::FILE_CLOSE => {
                let fd = read_u32(payload, 0).ok_or(ErrorCode::OperationsInvalidInput)?;
                self.fds.close(fd)?;
                Ok(DeckResult::Value(0))
            }
            event_type::FILE_READ => {
                let fd = read_u32(payload, 0).ok_or(ErrorCode::OperationsInvalidInput)?;
                let offset = read_u64(payload, 4).ok_or(ErrorCode::OperationsInvalidInput)?;
                let len = read_u32(payload, 12).ok_or(ErrorCode::OperationsInvalidInput)? as usize;
                if len > limits::MAX_FILE_READ_BYTES {
                    return Err(ErrorCode::OperationsInvalidInput);
                }
                let inode = self.fds.lookup(fd)?;
                let mut buf = alloc::vec![0u8; len];
                let n = collab.fs.read(inode, offset, &mut buf).map_err(|_| ErrorCode::StorageIoError)?;
                buf.truncate(n);
                Ok(DeckResult::Heap(buf))
            }
            event_type::FILE_WRITE => {
                let fd = read_u32(payload, 0).ok_or(ErrorCode::OperationsInvalidInput)?;
                let offset = read_u64(payload, 4).ok_or(ErrorCode::OperationsInvalidInput)?;
                let data = payload.get(12..).ok_or(ErrorCode::OperationsInvalidInput)?;
                let inode = self.fds.lookup(fd)?;
                let n = collab.fs.write(inode, offset, data).map_err(|_| ErrorCode::StorageIoError)?;
                Ok(DeckResult::Value(n as u64))
            }
            event_type::FILE_STAT => {
                let fd = read_u32(payload, 0).ok_or(ErrorCode::OperationsInvalidInput)?;
                let inode = self.fds.lookup(fd)?;
                let stat = collab.fs.stat(inode).map_err(|_| ErrorCode::StorageFileNotFound)?;
                Ok(DeckResult::Value(stat.size_bytes))
            }
            event_type::TAG_ADD => {
                let fd = read_u32(payload, 0).ok_or(ErrorCode::OperationsInvalidInput)?;
                let tag = read_tag(payload, 4).ok_or(ErrorCode::OperationsInvalidInput)?;
                let inode = self.fds.lookup(fd)?;
                collab.fs.add_tag(inode, &tag).map_err(|_| ErrorCode::StorageIoError)?;
                Ok(DeckResult::Value(0))
            }
            event_type::TAG_REMOVE => {
                let fd = read_u32(payload, 0).ok_or(ErrorCode::OperationsInvalidInput)?;
                let tag = read_tag(payload, 4).ok_or(ErrorCode::OperationsInvalidInput)?;
                let inode = self.fds.lookup(fd)?;
                collab.fs.remove_tag(inode, &tag).map_err(|_| ErrorCode::StorageIoError)?;
                Ok(DeckResult::Value(0))
            }
            event_type::TAG_QUERY => {
                let tag = read_tag(payload, 0).ok_or(ErrorCode::OperationsInvalidInput)?;
                let inodes = collab.fs.query_by_tag(&tag);
                let bytes: Vec<u8> = inodes.iter().flat_map(|i| i.0.to_le_bytes()).collect();
                Ok(DeckResult::Heap(bytes))
            }
            event_type::MEM_ALLOC => {
                let n_pages = read_u32(payload, 0).ok_or(ErrorCode::OperationsInvalidInput)? as usize;
                if n_pages * 4096 > limits::MAX_MMAP_BYTES {
                    return Err(ErrorCode::OperationsInvalidInput);
                }
                let phys = collab.allocator.alloc(n_pages).ok_or(ErrorCode::OutOfMemory)?;
                Ok(DeckResult::Value(phys))
            }
            event_type::MEM_MAP => {
                let n_pages = read_u32(payload, 0).ok_or(ErrorCode::OperationsInvalidInput)? as usize;
                let vaddr = read_u64(payload, 4).ok_or(ErrorCode::OperationsInvalidInput)?;
                if n_pages * 4096 > limits::MAX_MMAP_BYTES {
                    return Err(ErrorCode::OperationsInvalidInput);
                }
                let phys = collab.allocator.alloc(n_pages).ok_or(ErrorCode::OutOfMemory)?;
                let ctx = collab.vmm.kernel_context();
                collab
                    .vmm
                    .map(ctx, vaddr, phys, n_pages, MapFlags::USER_RW)
                    .map_err(|_| ErrorCode::StorageIoError)?;
                Ok(DeckResult::Mapped(MappedRegion { ctx, vaddr, n_pages }))
            }
            _ => Err(ErrorCode::NotImplemented),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::decks::test_support::stub_collaborators;

    fn entry_for(event_type: u32, payload: &[u8]) -> RoutingEntry {
        RoutingEntry::new(1, crate::abi::ring::RingEvent::new(1, event_type, [2, 0, 0, 0, 0, 0, 0, 0], payload), 0)
    }

    #[test]
    fn fd_table_reuses_closed_slots() {
        let fds = FdTable::new();
        let fd = fds.open(InodeId(1)).unwrap();
        fds.close(fd).unwrap();
        let fd2 = fds.open(InodeId(2)).unwrap();
        assert_eq!(fd, fd2);
    }

    #[test]
    fn reading_a_closed_descriptor_is_invalid() {
        let fds = FdTable::new();
        assert_eq!(fds.lookup(0), Err(ErrorCode::StorageDescriptorInvalid));
    }

    #[test]
    fn tagged_file_create_then_open_assigns_a_descriptor() {
        let deck = StorageDeck::new();
        let collab = stub_collaborators();
        let mut create = entry_for(event_type::TAGGED_FILE_CREATE, b"notes");
        assert!(matches!(deck.process(&mut create, &collab), DeckOutcome::Completed));
        assert!(matches!(create.last_result(), DeckResult::Value(_)));
    }

    #[test]
    fn mem_alloc_over_limit_is_rejected() {
        let deck = StorageDeck::new();
        let collab = stub_collaborators();
        let too_many_pages = (limits::MAX_MMAP_BYTES / 4096 + 1) as u32;
        let mut payload = Vec::new();
        payload.extend_from_slice(&too_many_pages.to_le_bytes());
        let mut entry = entry_for(event_type::MEM_ALLOC, &payload);
        assert!(matches!(
            deck.process(&mut entry, &collab),
            DeckOutcome::Error(ErrorCode::OperationsInvalidInput)
        ));
    }
}
