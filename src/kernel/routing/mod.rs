// src/kernel/routing/mod.rs
//! The routing table: a fixed array of buckets holding in-flight routing
//! entries, keyed by event id.
//!
//! Each bucket is guarded by its own spinlock (bucket-local locking, not one
//! table-wide lock) so two events hashing to different buckets never
//! contend. Per the redesign notes, a bucket is a slab-like map rather than
//! an intrusive linked list: entries are owned by value and found by key,
//! with no raw `next` pointers anywhere in this core.

pub mod entry;

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use spin::Mutex;

pub use entry::{DeckResult, MappedRegion, ResultTypeTag, RoutingEntry, RoutingState, MAX_ROUTE_STEPS};

use crate::abi::ring::RingEvent;

/// Bucket count. Power of two so `event_id mod N` is a mask.
pub const BUCKET_COUNT: usize = 64;
const BUCKET_MASK: u64 = (BUCKET_COUNT as u64) - 1;

struct Bucket {
    entries: Mutex<BTreeMap<u64, RoutingEntry>>,
}

impl Bucket {
    const fn new() -> Self {
        Self { entries: Mutex::new(BTreeMap::new()) }
    }
}

/// The process-wide routing table.
pub struct RoutingTable {
    buckets: [Bucket; BUCKET_COUNT],
    next_event_id: AtomicU64,
    entry_count: AtomicU32,
}

impl RoutingTable {
    /// An empty table with event ids starting at 1.
    #[must_use]
    pub const fn new() -> Self {
        const EMPTY: Bucket = Bucket::new();
        Self {
            buckets: [EMPTY; BUCKET_COUNT],
            next_event_id: AtomicU64::new(1),
            entry_count: AtomicU32::new(0),
        }
    }

    fn bucket_for(&self, event_id: u64) -> &Bucket {
        &self.buckets[(event_id & BUCKET_MASK) as usize]
    }

    /// Validates, assigns an id and timestamp, and inserts `event` as a new
    /// routing entry. Returns the assigned event id directly — resolving the
    /// ambiguity of reading the id back out of a local copy of `event`,
    /// since the caller's copy was never the one the table stamped.
    pub fn insert(&self, event: RingEvent, timestamp: u64) -> u64 {
        let id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        let bucket = self.bucket_for(id);
        bucket.entries.lock().insert(id, RoutingEntry::new(id, event, timestamp));
        self.entry_count.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Runs `f` against the entry for `event_id`, if it is still present.
    pub fn with_entry_mut<R>(&self, event_id: u64, f: impl FnOnce(&mut RoutingEntry) -> R) -> Option<R> {
        let bucket = self.bucket_for(event_id);
        bucket.entries.lock().get_mut(&event_id).map(f)
    }

    /// Removes and returns the entry for `event_id`, if present. Called
    /// exactly once per event, by the Execution deck.
    pub fn remove(&self, event_id: u64) -> Option<RoutingEntry> {
        let bucket = self.bucket_for(event_id);
        let removed = bucket.entries.lock().remove(&event_id);
        if removed.is_some() {
            self.entry_count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    /// Runs `f` over every bucket's entries. Each bucket is locked only for
    /// the duration of its own slice of the walk — never the whole table at
    /// once — so `f` holds no lock once it returns for a given bucket.
    pub fn for_each_entry_id(&self, mut f: impl FnMut(u64, &RoutingState)) {
        for bucket in &self.buckets {
            let guard = bucket.entries.lock();
            for (id, entry) in guard.iter() {
                f(*id, &entry.state);
            }
        }
    }

    /// Total entries currently resident across every bucket.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.entry_count.load(Ordering::Relaxed)
    }

    /// Whether the table currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> RingEvent {
        RingEvent::new(1, 101, [1, 0, 0, 0, 0, 0, 0, 0], b"hi")
    }

    #[test]
    fn insert_assigns_monotonically_increasing_ids() {
        let table = RoutingTable::new();
        let a = table.insert(sample_event(), 0);
        let b = table.insert(sample_event(), 0);
        assert!(b > a);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn inserted_event_is_reachable_by_assigned_id() {
        let table = RoutingTable::new();
        let id = table.insert(sample_event(), 77);
        let found = table.with_entry_mut(id, |entry| entry.event_copy.timestamp);
        assert_eq!(found, Some(77));
    }

    #[test]
    fn remove_drops_entry_and_decrements_count() {
        let table = RoutingTable::new();
        let id = table.insert(sample_event(), 0);
        assert!(table.remove(id).is_some());
        assert!(table.remove(id).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn distinct_ids_land_in_distinct_or_shared_buckets_without_loss() {
        let table = RoutingTable::new();
        let ids: alloc::vec::Vec<u64> = (0..200).map(|_| table.insert(sample_event(), 0)).collect();
        assert_eq!(table.len() as usize, ids.len());
        for id in ids {
            assert!(table.with_entry_mut(id, |_| ()).is_some());
        }
    }
}
