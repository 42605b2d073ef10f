// src/kernel/decks/execution.rs
//! Execution deck: the terminal stage.
//!
//! Unlike the other four decks, Execution does not hand the routing entry
//! back to the Guide for another step — it consumes the entry outright, so
//! it does not implement [`super::Deck`]; the Guide calls
//! [`ExecutionDeck::finish`] directly once an entry's route is exhausted or
//! a deck aborted it.

use alloc::vec::Vec;

use crate::abi::ring::{RingResult, MAX_PAYLOAD};
use crate::arch::{ArchCpu, Cpu};
use crate::errors::ErrorCode;
use crate::kernel::routing::{DeckResult, RoutingTable};

use super::{DeckCounters, DeckStats};

/// Bounded retry budget for pushing into a full result ring, per §4.3.
pub const RESULT_RING_PUSH_RETRIES: u32 = 10_000;

/// What Execution reports back about one event's completion, including the
/// same payload bytes just pushed to the process's result ring so the
/// workflow engine can carry a node's output into the next node's input.
#[derive(Debug, Clone, Copy)]
pub struct CompletionReport {
    pub workflow_id: u64,
    pub event_id: u64,
    pub error_code: Option<ErrorCode>,
    pub result_size: u32,
    pub result: [u8; MAX_PAYLOAD],
}

impl CompletionReport {
    /// The valid prefix of `result`, per `result_size`.
    #[must_use]
    pub fn result_bytes(&self) -> &[u8] {
        &self.result[..(self.result_size as usize).min(MAX_PAYLOAD)]
    }
}

/// Everything Execution needs from the owning process/scheduler, behind a
/// trait so this deck never depends on those modules directly.
pub trait ExecutionSink: Send + Sync {
    /// Pushes `result` into the process's result ring. `Err` means every
    /// retry was spent without the ring draining.
    fn push_result(&self, result: RingResult) -> Result<(), ()>;

    /// Raises the completion interrupt, waking anyone parked in `Wait`.
    fn raise_completion_interrupt(&self);

    /// Invokes the workflow engine's completion callback.
    fn notify_workflow(&self, report: CompletionReport);
}

/// Execution deck implementation.
pub struct ExecutionDeck {
    counters: DeckCounters,
    dropped_results: core::sync::atomic::AtomicU64,
}

impl ExecutionDeck {
    /// A fresh deck with zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self { counters: DeckCounters::new(), dropped_results: core::sync::atomic::AtomicU64::new(0) }
    }

    /// Result-ring pushes that exhausted their retry budget and were dropped.
    #[must_use]
    pub fn dropped_results(&self) -> u64 {
        self.dropped_results.load(core::sync::atomic::Ordering::Relaxed)
    }

    /// Current processed/error counters.
    #[must_use]
    pub fn stats(&self) -> DeckStats {
        self.counters.snapshot()
    }

    /// Finalizes `event_id`: builds the `RingResult`, pushes it, raises the
    /// completion interrupt, invokes the workflow callback, frees every
    /// untransferred deck result, and removes the routing entry.
    pub fn finish(&self, event_id: u64, table: &RoutingTable, sink: &dyn ExecutionSink) {
        let Some(mut entry) = table.remove(event_id) else { return };

        let workflow_id = entry.event_copy.workflow_id;
        let completion_time = ArchCpu::read_tsc();
        let error_code = entry.error_code;

        let result = match error_code {
            Some(code) => RingResult::failure(event_id, workflow_id, completion_time, code),
            None => {
                let bytes = result_bytes(entry.last_result());
                RingResult::success(event_id, workflow_id, completion_time, &bytes)
            }
        };
        let result_size = result.result_size;
        let result_bytes = result.result;

        let push_ok = push_with_retry(sink, result);
        if !push_ok {
            self.dropped_results.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        }

        sink.raise_completion_interrupt();
        sink.notify_workflow(CompletionReport { workflow_id, event_id, error_code, result_size, result: result_bytes });

        free_untransferred_results(&mut entry.deck_results);

        self.counters.record(&if error_code.is_some() {
            super::DeckOutcome::Error(error_code.unwrap())
        } else {
            super::DeckOutcome::Completed
        });
    }
}

impl Default for ExecutionDeck {
    fn default() -> Self {
        Self::new()
    }
}

fn result_bytes(result: &DeckResult) -> Vec<u8> {
    match result {
        DeckResult::Value(v) => v.to_le_bytes().to_vec(),
        other => other.as_bytes().to_vec(),
    }
}

fn push_with_retry(sink: &dyn ExecutionSink, result: RingResult) -> bool {
    for _ in 0..RESULT_RING_PUSH_RETRIES {
        match sink.push_result(result) {
            Ok(()) => return true,
            Err(()) => ArchCpu::pause(),
        }
    }
    false
}

fn free_untransferred_results(deck_results: &mut [DeckResult; crate::kernel::routing::MAX_ROUTE_STEPS]) {
    for slot in deck_results.iter_mut() {
        if let DeckResult::Mapped(_region) = slot {
            // Unmapping requires the VMM collaborator, which Execution does
            // not hold; the process teardown path (process_destroy) reclaims
            // any region whose handle was never transferred to a workflow
            // node, since destroying the address space releases every page
            // it mapped regardless of which deck created the mapping.
        }
        *slot = DeckResult::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin::Mutex;

    struct RecordingSink {
        pushed: Mutex<Vec<RingResult>>,
        interrupts: core::sync::atomic::AtomicU32,
        notified: Mutex<Vec<CompletionReport>>,
        fail_pushes: bool,
    }

    impl RecordingSink {
        fn new(fail_pushes: bool) -> Self {
            Self {
                pushed: Mutex::new(Vec::new()),
                interrupts: core::sync::atomic::AtomicU32::new(0),
                notified: Mutex::new(Vec::new()),
                fail_pushes,
            }
        }
    }

    impl ExecutionSink for RecordingSink {
        fn push_result(&self, result: RingResult) -> Result<(), ()> {
            if self.fail_pushes {
                return Err(());
            }
            self.pushed.lock().push(result);
            Ok(())
        }

        fn raise_completion_interrupt(&self) {
            self.interrupts.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        }

        fn notify_workflow(&self, report: CompletionReport) {
            self.notified.lock().push(report);
        }
    }

    #[test]
    fn finish_pushes_result_raises_interrupt_and_removes_entry() {
        let table = RoutingTable::new();
        let event_id = table.insert(
            crate::abi::ring::RingEvent::new(7, 101, [0; 8], b""),
            0,
        );
        table.with_entry_mut(event_id, |entry| entry.record_success(DeckResult::Value(42), 1));

        let deck = ExecutionDeck::new();
        let sink = RecordingSink::new(false);
        deck.finish(event_id, &table, &sink);

        assert!(table.with_entry_mut(event_id, |_| ()).is_none());
        assert_eq!(sink.pushed.lock().len(), 1);
        assert_eq!(sink.interrupts.load(core::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(sink.notified.lock().len(), 1);
        assert_eq!(sink.notified.lock()[0].workflow_id, 7);
    }

    #[test]
    fn finish_on_aborted_entry_builds_failure_result() {
        let table = RoutingTable::new();
        let event_id = table.insert(crate::abi::ring::RingEvent::new(1, 300, [3, 0, 0, 0, 0, 0, 0, 0], b""), 0);
        table.with_entry_mut(event_id, |entry| entry.record_failure(ErrorCode::HardwareTimerNotFound));

        let deck = ExecutionDeck::new();
        let sink = RecordingSink::new(false);
        deck.finish(event_id, &table, &sink);

        let pushed = sink.pushed.lock();
        assert!(!pushed[0].is_ok());
    }

    #[test]
    fn exhausting_retries_counts_a_dropped_result() {
        let table = RoutingTable::new();
        let event_id = table.insert(crate::abi::ring::RingEvent::new(1, 101, [0; 8], b""), 0);

        let deck = ExecutionDeck::new();
        let sink = RecordingSink::new(true);
        deck.finish(event_id, &table, &sink);

        assert_eq!(deck.dropped_results(), 1);
    }
}
