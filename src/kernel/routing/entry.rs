// src/kernel/routing/entry.rs
//! The routing entry: per-event bookkeeping as it traverses its route.
//!
//! Replaces the raw "deck-result pointer plus kind tag" pattern with a
//! proper tagged union ([`DeckResult`]) and the coroutine-like suspension
//! pattern with an explicit `Suspended { resume_token }` state, per the
//! redesign this core follows.

use crate::abi::ring::RingEvent;
use crate::errors::ErrorCode;
use alloc::vec::Vec;

/// A deck's per-step output, tagged by ownership so freeing a
/// [`RoutingEntry`] knows exactly what to release.
#[derive(Debug)]
pub enum DeckResult {
    /// No result recorded at this step yet.
    None,
    /// A small inline scalar (e.g. a CRC32, a tick count).
    Value(u64),
    /// A reference to process-lifetime static data; nothing to free.
    Static(&'static [u8]),
    /// A heap-allocated buffer, owned by this slot until transferred or freed.
    Heap(Vec<u8>),
    /// A memory-mapped region, released by unmapping at free time.
    Mapped(MappedRegion),
}

/// A mapped virtual region produced by the Storage deck's mmap operation.
#[derive(Debug, Clone, Copy)]
pub struct MappedRegion {
    pub ctx: crate::kernel::collab::mm::AddressSpace,
    pub vaddr: u64,
    pub n_pages: usize,
}

/// The classifier tag invariant 2 refers to, independent of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultTypeTag {
    None,
    Value,
    Static,
    Heap,
    MemoryMapped,
}

impl DeckResult {
    /// This result's classifier tag.
    #[must_use]
    pub fn type_tag(&self) -> ResultTypeTag {
        match self {
            Self::None => ResultTypeTag::None,
            Self::Value(_) => ResultTypeTag::Value,
            Self::Static(_) => ResultTypeTag::Static,
            Self::Heap(_) => ResultTypeTag::Heap,
            Self::Mapped(_) => ResultTypeTag::MemoryMapped,
        }
    }

    /// Borrows the bytes this result carries, for copying into a `RingResult`.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::None => &[],
            Self::Value(_) => &[],
            Self::Static(bytes) => bytes,
            Self::Heap(bytes) => bytes,
            Self::Mapped(_) => &[],
        }
    }

    /// Takes this slot, leaving [`DeckResult::None`] behind. Used when
    /// ownership transfers to a workflow node.
    #[must_use]
    pub fn take(&mut self) -> Self {
        core::mem::replace(self, Self::None)
    }
}

/// A routing entry's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingState {
    /// Awaiting (or being processed by) the deck at `current_index`.
    Processing,
    /// Parked by a deck awaiting an external event; carries the token the
    /// suspending agent must present back to resume it.
    Suspended { resume_token: u64 },
    /// Route exhausted successfully; picked up by the Execution deck.
    Completed,
    /// A deck reported an unrecoverable error; routed directly to Execution.
    Aborted,
}

/// Maximum route length / deck result slots, per event.
pub const MAX_ROUTE_STEPS: usize = 8;

/// Per-event kernel bookkeeping, alive in the routing table from
/// `notify(Submit)` until the Execution deck frees it.
#[derive(Debug)]
pub struct RoutingEntry {
    pub event_id: u64,
    pub event_copy: RingEvent,
    pub prefixes: [u8; MAX_ROUTE_STEPS],
    pub current_index: usize,
    pub state: RoutingState,
    pub deck_results: [DeckResult; MAX_ROUTE_STEPS],
    pub deck_timestamps: [u64; MAX_ROUTE_STEPS],
    pub abort_flag: bool,
    pub error_code: Option<ErrorCode>,
}

impl RoutingEntry {
    /// Builds a fresh entry for `event`, already assigned `event_id` and
    /// stamped with `timestamp` by the routing table at insert time.
    #[must_use]
    pub fn new(event_id: u64, mut event: RingEvent, timestamp: u64) -> Self {
        event.id = event_id;
        event.timestamp = timestamp;
        let prefixes = event.route;
        Self {
            event_id,
            event_copy: event,
            prefixes,
            current_index: 0,
            state: RoutingState::Processing,
            deck_results: [
                DeckResult::None,
                DeckResult::None,
                DeckResult::None,
                DeckResult::None,
                DeckResult::None,
                DeckResult::None,
                DeckResult::None,
                DeckResult::None,
            ],
            deck_timestamps: [0; MAX_ROUTE_STEPS],
            abort_flag: false,
            error_code: None,
        }
    }

    /// The deck prefix awaited next, or `None` if the route is exhausted.
    #[must_use]
    pub fn next_prefix(&self) -> Option<u8> {
        if self.current_index >= MAX_ROUTE_STEPS {
            return None;
        }
        match self.prefixes[self.current_index] {
            0 => None,
            p => Some(p),
        }
    }

    /// Whether this entry's route is exhausted (belongs on the Execution queue).
    #[must_use]
    pub fn is_route_complete(&self) -> bool {
        self.next_prefix().is_none()
    }

    /// Records a successful deck step: stores the result, advances
    /// `current_index`, and clears the now-consumed prefix so the Guide
    /// re-routes on the next scan.
    pub fn record_success(&mut self, result: DeckResult, timestamp: u64) {
        let i = self.current_index;
        self.deck_results[i] = result;
        self.deck_timestamps[i] = timestamp;
        self.prefixes[i] = 0;
        self.current_index += 1;
    }

    /// Records a deck failure: sets the abort flag and error code so the
    /// Guide routes this entry straight to Execution.
    pub fn record_failure(&mut self, code: ErrorCode) {
        self.abort_flag = true;
        self.error_code = Some(code);
        self.state = RoutingState::Aborted;
    }

    /// Suspends this entry pending an external event, returning the token
    /// the suspending agent must present to [`Self::resume`].
    pub fn suspend(&mut self, resume_token: u64) {
        self.state = RoutingState::Suspended { resume_token };
    }

    /// Resumes a suspended entry if `token` matches the one it was parked
    /// with. Returns `false` on mismatch (stale or wrong caller).
    #[must_use]
    pub fn resume(&mut self, token: u64) -> bool {
        match self.state {
            RoutingState::Suspended { resume_token } if resume_token == token => {
                self.state = RoutingState::Processing;
                true
            }
            _ => false,
        }
    }

    /// The last non-`None` deck result, the payload Execution builds the
    /// final `RingResult` from.
    #[must_use]
    pub fn last_result(&self) -> &DeckResult {
        self.deck_results
            .iter()
            .rev()
            .find(|r| !matches!(r, DeckResult::None))
            .unwrap_or(&DeckResult::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(route: [u8; 8]) -> RingEvent {
        RingEvent::new(1, 101, route, b"payload")
    }

    #[test]
    fn new_entry_stamps_event_id_and_timestamp() {
        let entry = RoutingEntry::new(42, sample_event([1, 0, 0, 0, 0, 0, 0, 0]), 99);
        assert_eq!(entry.event_copy.id, 42);
        assert_eq!(entry.event_copy.timestamp, 99);
    }

    #[test]
    fn next_prefix_none_when_route_exhausted() {
        let entry = RoutingEntry::new(1, sample_event([0; 8]), 0);
        assert!(entry.is_route_complete());
        assert_eq!(entry.next_prefix(), None);
    }

    #[test]
    fn record_success_advances_index_and_clears_prefix() {
        let mut entry = RoutingEntry::new(1, sample_event([1, 0, 0, 0, 0, 0, 0, 0]), 0);
        assert_eq!(entry.next_prefix(), Some(1));
        entry.record_success(DeckResult::Value(7), 10);
        assert_eq!(entry.current_index, 1);
        assert_eq!(entry.prefixes[0], 0);
        assert!(entry.is_route_complete());
    }

    #[test]
    fn suspend_then_resume_with_matching_token_restores_processing() {
        let mut entry = RoutingEntry::new(1, sample_event([3, 0, 0, 0, 0, 0, 0, 0]), 0);
        entry.suspend(1234);
        assert!(!entry.resume(1));
        assert!(entry.resume(1234));
        assert_eq!(entry.state, RoutingState::Processing);
    }

    #[test]
    fn record_failure_sets_abort_flag_and_aborted_state() {
        let mut entry = RoutingEntry::new(1, sample_event([2, 0, 0, 0, 0, 0, 0, 0]), 0);
        entry.record_failure(ErrorCode::StorageFileNotFound);
        assert!(entry.abort_flag);
        assert_eq!(entry.state, RoutingState::Aborted);
        assert_eq!(entry.error_code, Some(ErrorCode::StorageFileNotFound));
    }

    #[test]
    fn last_result_finds_most_recent_non_none_slot() {
        let mut entry = RoutingEntry::new(1, sample_event([1, 2, 0, 0, 0, 0, 0, 0]), 0);
        entry.record_success(DeckResult::Value(1), 1);
        entry.record_success(DeckResult::Value(2), 2);
        assert!(matches!(entry.last_result(), DeckResult::Value(2)));
    }
}
