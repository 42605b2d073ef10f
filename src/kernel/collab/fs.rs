// src/kernel/collab/fs.rs
//! Tag-based filesystem contract.
//!
//! The tag filesystem itself (on-disk layout, tag index, inode table) is
//! external to this core — the Storage deck only ever calls through
//! [`TagFilesystem`]. Modeled as a trait for the same reason
//! [`super::mm::PhysicalAllocator`] is: the decks are generic over the
//! collaborator, not over its implementation.

use alloc::vec::Vec;

use crate::errors::KernelError;

/// Opaque tagged-file identity, stable across tag add/remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct InodeId(pub u64);

/// Metadata returned by [`TagFilesystem::stat`].
#[derive(Debug, Clone, Copy)]
pub struct InodeStat {
    pub inode: InodeId,
    pub size_bytes: u64,
    pub tag_count: u32,
}

/// Tag-based file store consumed by the Storage deck. A file is identified
/// by [`InodeId`] and may carry any number of string tags; lookups are by
/// tag rather than by hierarchical path.
pub trait TagFilesystem: Send + Sync {
    /// Creates a new empty tagged file, returning its inode id.
    fn create_tagged_file(&self, initial_tag: &str) -> Result<InodeId, KernelError>;

    /// Adds a tag to an existing file.
    fn add_tag(&self, inode: InodeId, tag: &str) -> Result<(), KernelError>;

    /// Removes a tag from a file. Not an error if the tag was absent.
    fn remove_tag(&self, inode: InodeId, tag: &str) -> Result<(), KernelError>;

    /// Returns every inode currently carrying `tag`.
    fn query_by_tag(&self, tag: &str) -> Vec<InodeId>;

    /// Reads up to `buf.len()` bytes starting at `offset`, returning the
    /// number of bytes actually read.
    fn read(&self, inode: InodeId, offset: u64, buf: &mut [u8]) -> Result<usize, KernelError>;

    /// Writes `data` starting at `offset`, returning the number of bytes
    /// actually written.
    fn write(&self, inode: InodeId, offset: u64, data: &[u8]) -> Result<usize, KernelError>;

    /// Returns metadata for a file.
    fn stat(&self, inode: InodeId) -> Result<InodeStat, KernelError>;

    /// Flushes pending writes to the backing store.
    fn sync(&self, inode: InodeId) -> Result<(), KernelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_ids_are_ordered_by_value() {
        assert!(InodeId(1) < InodeId(2));
    }
}
