// src/kernel/guide.rs
//! The Guide: the single dispatcher scan that drives every deck.
//!
//! One scan pass does three things in order: poll expired timers (so a
//! `TIMER_SLEEP` resumed this tick is routed in the same pass), assign every
//! in-flight entry to the queue matching its next route prefix (or to
//! Execution if its route is exhausted or it aborted), then drain each
//! deck's queue synchronously. No deck is ever invoked outside a Guide scan.

use alloc::vec::Vec;

use crate::kernel::decks::{
    Collaborators, Deck, DeckOutcome, DeckQueue, ExecutionDeck, ExecutionSink, HardwareDeck, NetworkDeck,
    OperationsDeck, StorageDeck, PREFIX_EXECUTION, PREFIX_HARDWARE, PREFIX_NETWORK, PREFIX_OPERATIONS,
    PREFIX_STORAGE,
};
use crate::kernel::routing::{RoutingState, RoutingTable};

/// Owns one instance of each deck and the queues the scan feeds them through.
pub struct Guide {
    operations: OperationsDeck,
    storage: StorageDeck,
    hardware: HardwareDeck,
    network: NetworkDeck,
    execution: ExecutionDeck,
    operations_queue: DeckQueue,
    storage_queue: DeckQueue,
    hardware_queue: DeckQueue,
    network_queue: DeckQueue,
    execution_queue: DeckQueue,
}

impl Guide {
    /// A fresh Guide with empty queues and zeroed deck counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            operations: OperationsDeck::new(),
            storage: StorageDeck::new(),
            hardware: HardwareDeck::new(),
            network: NetworkDeck::new(),
            execution: ExecutionDeck::new(),
            operations_queue: DeckQueue::new(),
            storage_queue: DeckQueue::new(),
            hardware_queue: DeckQueue::new(),
            network_queue: DeckQueue::new(),
            execution_queue: DeckQueue::new(),
        }
    }

    /// The Hardware deck's timer table, for process lifecycle or diagnostics
    /// that need to reach into it directly.
    #[must_use]
    pub fn hardware(&self) -> &HardwareDeck {
        &self.hardware
    }

    /// Runs one scan pass over `table`.
    pub fn scan(&self, table: &RoutingTable, collab: &Collaborators, sink: &dyn ExecutionSink, now_tick: u64) {
        self.hardware.poll_timers(table, now_tick);

        let mut ids = Vec::new();
        table.for_each_entry_id(|id, _state| ids.push(id));

        for id in ids {
            self.route_one(table, id);
        }

        self.drain(&self.operations_queue, &self.operations, table, collab);
        self.drain(&self.storage_queue, &self.storage, table, collab);
        self.drain(&self.hardware_queue, &self.hardware, table, collab);
        self.drain(&self.network_queue, &self.network, table, collab);

        while let Some(id) = self.execution_queue.pop() {
            self.execution.finish(id, table, sink);
        }
    }

    /// Assigns one entry to the queue matching its next step, or to
    /// Execution if it is done (route exhausted or aborted).
    fn route_one(&self, table: &RoutingTable, id: u64) {
        table.with_entry_mut(id, |entry| match entry.state {
            RoutingState::Suspended { .. } => {}
            RoutingState::Aborted | RoutingState::Completed => self.execution_queue.push(id),
            RoutingState::Processing => {
                if entry.is_route_complete() {
                    self.execution_queue.push(id);
                    return;
                }
                match entry.next_prefix() {
                    Some(PREFIX_OPERATIONS) => self.operations_queue.push(id),
                    Some(PREFIX_STORAGE) => self.storage_queue.push(id),
                    Some(PREFIX_HARDWARE) => self.hardware_queue.push(id),
                    Some(PREFIX_NETWORK) => self.network_queue.push(id),
                    Some(PREFIX_EXECUTION) | None => self.execution_queue.push(id),
                    Some(_) => {
                        entry.record_failure(crate::errors::ErrorCode::InvalidParameter);
                        self.execution_queue.push(id);
                    }
                }
            }
        });
    }

    /// Pops every queued id for `deck` and runs its step, routing a reported
    /// error onto the entry so the next scan carries it to Execution.
    fn drain(&self, queue: &DeckQueue, deck: &dyn Deck, table: &RoutingTable, collab: &Collaborators) {
        while let Some(id) = queue.pop() {
            table.with_entry_mut(id, |entry| {
                if let DeckOutcome::Error(code) = deck.process(entry, collab) {
                    entry.record_failure(code);
                }
            });
        }
    }
}

impl Default for Guide {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::ring::RingEvent;
    use crate::kernel::decks::execution::CompletionReport;
    use crate::kernel::decks::test_support::stub_collaborators;
    use alloc::vec::Vec;
    use spin::Mutex;

    struct RecordingSink {
        completed: Mutex<Vec<CompletionReport>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { completed: Mutex::new(Vec::new()) }
        }
    }

    impl ExecutionSink for RecordingSink {
        fn push_result(&self, _result: crate::abi::ring::RingResult) -> Result<(), ()> {
            Ok(())
        }
        fn raise_completion_interrupt(&self) {}
        fn notify_workflow(&self, report: CompletionReport) {
            self.completed.lock().push(report);
        }
    }

    #[test]
    fn single_step_route_completes_after_two_scans() {
        let table = RoutingTable::new();
        let collab = stub_collaborators();
        let sink = RecordingSink::new();
        let guide = Guide::new();

        let id = table.insert(RingEvent::new(1, 101, [PREFIX_OPERATIONS, 0, 0, 0, 0, 0, 0, 0], b"abc"), 0);

        guide.scan(&table, &collab, &sink, 0);
        guide.scan(&table, &collab, &sink, 0);

        assert!(table.with_entry_mut(id, |_| ()).is_none());
        assert_eq!(sink.completed.lock().len(), 1);
    }

    #[test]
    fn multi_step_route_advances_one_deck_per_scan() {
        let table = RoutingTable::new();
        let collab = stub_collaborators();
        let sink = RecordingSink::new();
        let guide = Guide::new();

        let id = table.insert(
            RingEvent::new(
                1,
                crate::kernel::decks::hardware::event_type::TIMER_GET_TICKS,
                [PREFIX_HARDWARE, PREFIX_OPERATIONS, 0, 0, 0, 0, 0, 0],
                b"",
            ),
            0,
        );

        guide.scan(&table, &collab, &sink, 0);
        table.with_entry_mut(id, |entry| assert_eq!(entry.current_index, 1));
        assert!(sink.completed.lock().is_empty());
    }

    #[test]
    fn unknown_route_prefix_aborts_to_execution() {
        let table = RoutingTable::new();
        let collab = stub_collaborators();
        let sink = RecordingSink::new();
        let guide = Guide::new();

        let id = table.insert(RingEvent::new(1, 999, [9, 0, 0, 0, 0, 0, 0, 0], b""), 0);
        let _ = id;

        guide.scan(&table, &collab, &sink, 0);
        guide.scan(&table, &collab, &sink, 0);

        assert_eq!(sink.completed.lock().len(), 1);
        assert!(sink.completed.lock()[0].error_code.is_some());
    }
}
