// src/kernel/decks/hardware.rs
//! Hardware deck: timers and device stubs, event types 300-399.
//!
//! The timer table is a fixed 64-slot array with monotonically increasing
//! ids, independent of slot index. [`HardwareDeck::poll_timers`] is called
//! once per Guide scan to detect expiry and resume the routing entries
//! parked by `TIMER_SLEEP`.

use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::{limits, validate_step, Collaborators, Deck, DeckCounters, DeckOutcome, DeckStats, PREFIX_HARDWARE};
use crate::arch::Cpu;
use crate::errors::ErrorCode;
use crate::kernel::routing::{DeckResult, RoutingEntry, RoutingTable};

/// Hardware deck event types.
pub mod event_type {
    pub const TIMER_CREATE: u32 = 300;
    pub const TIMER_CANCEL: u32 = 301;
    pub const TIMER_SLEEP: u32 = 302;
    pub const TIMER_GET_TICKS: u32 = 303;
    pub const DEVICE_OPEN: u32 = 304;
    pub const DEVICE_IOCTL: u32 = 305;
    pub const DEVICE_READ: u32 = 306;
    pub const DEVICE_WRITE: u32 = 307;
}

const TIMER_TABLE_SIZE: usize = 64;

#[derive(Clone, Copy)]
struct TimerEntry {
    id: u64,
    expires_at_tick: u64,
    event_id: u64,
}

struct TimerTable {
    slots: Mutex<[Option<TimerEntry>; TIMER_TABLE_SIZE]>,
    next_id: AtomicU64,
}

impl TimerTable {
    const fn new() -> Self {
        Self { slots: Mutex::new([None; TIMER_TABLE_SIZE]), next_id: AtomicU64::new(1) }
    }

    fn create(&self, expires_at_tick: u64, event_id: u64) -> Result<u64, ErrorCode> {
        let mut slots = self.slots.lock();
        let slot = slots.iter_mut().find(|s| s.is_none()).ok_or(ErrorCode::HardwareTimerTableFull)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *slot = Some(TimerEntry { id, expires_at_tick, event_id });
        Ok(id)
    }

    fn cancel(&self, id: u64) -> Result<(), ErrorCode> {
        let mut slots = self.slots.lock();
        let slot = slots.iter_mut().find(|s| matches!(s, Some(t) if t.id == id));
        match slot {
            Some(slot) => {
                *slot = None;
                Ok(())
            }
            None => Err(ErrorCode::HardwareTimerNotFound),
        }
    }

    /// Removes and returns every timer expired as of `now_tick`.
    fn drain_expired(&self, now_tick: u64) -> alloc::vec::Vec<TimerEntry> {
        let mut slots = self.slots.lock();
        let mut expired = alloc::vec::Vec::new();
        for slot in slots.iter_mut() {
            if let Some(timer) = slot {
                if timer.expires_at_tick <= now_tick {
                    expired.push(*timer);
                    *slot = None;
                }
            }
        }
        expired
    }
}

/// Hardware deck implementation.
pub struct HardwareDeck {
    counters: DeckCounters,
    timers: TimerTable,
}

impl HardwareDeck {
    /// A fresh deck with an empty timer table.
    #[must_use]
    pub const fn new() -> Self {
        Self { counters: DeckCounters::new(), timers: TimerTable::new() }
    }

    /// Resumes every routing entry whose `TIMER_SLEEP` has expired as of
    /// `now_tick`. Called once per Guide scan, before the bucket walk.
    pub fn poll_timers(&self, table: &RoutingTable, now_tick: u64) {
        for timer in self.timers.drain_expired(now_tick) {
            table.with_entry_mut(timer.event_id, |entry| {
                if entry.resume(timer.id) {
                    entry.record_success(DeckResult::Value(now_tick), now_tick);
                }
            });
        }
    }
}

impl Default for HardwareDeck {
    fn default() -> Self {
        Self::new()
    }
}

impl Deck for HardwareDeck {
    fn prefix(&self) -> u8 {
        PREFIX_HARDWARE
    }

    fn accepts(&self, event_type: u32) -> bool {
        (300..400).contains(&event_type)
    }

    fn process(&self, entry: &mut RoutingEntry, _collab: &Collaborators) -> DeckOutcome {
        let outcome = self.process_inner(entry);
        self.counters.record(&outcome);
        outcome
    }

    fn stats(&self) -> DeckStats {
        self.counters.snapshot()
    }
}

impl HardwareDeck {
    fn process_inner(&self, entry: &mut RoutingEntry) -> DeckOutcome {
        if let Err(code) = validate_step(entry, PREFIX_HARDWARE) {
            return DeckOutcome::Error(code);
        }
        let event_type = entry.event_copy.event_type;
        if !self.accepts(event_type) {
            return DeckOutcome::Error(ErrorCode::NotImplemented);
        }
        let payload = entry.event_copy.payload();
        let timestamp = entry.event_copy.timestamp;
        let event_id = entry.event_id;

        match event_type {
            event_type::TIMER_GET_TICKS => {
                let ticks = crate::arch::ArchCpu::read_tsc();
                entry.record_success(DeckResult::Value(ticks), timestamp);
                DeckOutcome::Completed
            }
            event_type::TIMER_CREATE => {
                let Some(delay_ms) = read_delay_ms(payload) else {
                    return DeckOutcome::Error(ErrorCode::OperationsInvalidInput);
                };
                let expires_at = timestamp + crate::arch::ms_to_tsc_ticks(delay_ms);
                match self.timers.create(expires_at, event_id) {
                    Ok(id) => {
                        entry.record_success(DeckResult::Value(id), timestamp);
                        DeckOutcome::Completed
                    }
                    Err(code) => DeckOutcome::Error(code),
                }
            }
            event_type::TIMER_CANCEL => {
                let Some(id) = payload.get(0..8).map(|b| u64::from_le_bytes(b.try_into().unwrap())) else {
                    return DeckOutcome::Error(ErrorCode::OperationsInvalidInput);
                };
                match self.timers.cancel(id) {
                    Ok(()) => {
                        entry.record_success(DeckResult::Value(0), timestamp);
                        DeckOutcome::Completed
                    }
                    Err(code) => DeckOutcome::Error(code),
                }
            }
            event_type::TIMER_SLEEP => {
                let Some(delay_ms) = read_delay_ms(payload) else {
                    return DeckOutcome::Error(ErrorCode::OperationsInvalidInput);
                };
                let expires_at = timestamp + crate::arch::ms_to_tsc_ticks(delay_ms);
                match self.timers.create(expires_at, event_id) {
                    Ok(id) => {
                        entry.suspend(id);
                        DeckOutcome::Suspended { resume_token: id }
                    }
                    Err(code) => DeckOutcome::Error(code),
                }
            }
            event_type::DEVICE_OPEN | event_type::DEVICE_IOCTL | event_type::DEVICE_READ | event_type::DEVICE_WRITE => {
                DeckOutcome::Error(ErrorCode::HardwareDeviceNotImplemented)
            }
            _ => DeckOutcome::Error(ErrorCode::NotImplemented),
        }
    }
}

fn read_delay_ms(payload: &[u8]) -> Option<u64> {
    let ms = payload.get(0..8).map(|b| u64::from_le_bytes(b.try_into().unwrap()))?;
    if ms > limits::MAX_TIMER_DELAY_MS {
        None
    } else {
        Some(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::decks::test_support::stub_collaborators;

    fn sleep_entry(delay_ms: u64) -> RoutingEntry {
        RoutingEntry::new(
            1,
            crate::abi::ring::RingEvent::new(
                1,
                event_type::TIMER_SLEEP,
                [3, 0, 0, 0, 0, 0, 0, 0],
                &delay_ms.to_le_bytes(),
            ),
            0,
        )
    }

    #[test]
    fn timer_get_ticks_completes_immediately() {
        let deck = HardwareDeck::new();
        let collab = stub_collaborators();
        let mut entry = RoutingEntry::new(
            1,
            crate::abi::ring::RingEvent::new(1, event_type::TIMER_GET_TICKS, [3, 0, 0, 0, 0, 0, 0, 0], b""),
            0,
        );
        assert!(matches!(deck.process(&mut entry, &collab), DeckOutcome::Completed));
    }

    #[test]
    fn timer_sleep_over_the_limit_is_rejected() {
        let deck = HardwareDeck::new();
        let collab = stub_collaborators();
        let mut entry = sleep_entry(limits::MAX_TIMER_DELAY_MS + 1);
        assert!(matches!(
            deck.process(&mut entry, &collab),
            DeckOutcome::Error(ErrorCode::OperationsInvalidInput)
        ));
    }

    #[test]
    fn poll_timers_resumes_and_completes_after_expiry() {
        let deck = HardwareDeck::new();
        let collab = stub_collaborators();
        let table = RoutingTable::new();
        let event_id = table.insert(
            crate::abi::ring::RingEvent::new(1, event_type::TIMER_SLEEP, [3, 0, 0, 0, 0, 0, 0, 0], &10u64.to_le_bytes()),
            0,
        );

        table.with_entry_mut(event_id, |entry| {
            assert!(matches!(deck.process(entry, &collab), DeckOutcome::Suspended { .. }));
        });

        deck.poll_timers(&table, u64::MAX);

        table.with_entry_mut(event_id, |entry| {
            assert!(entry.is_route_complete());
        });
    }

    #[test]
    fn cancel_unknown_timer_is_not_found() {
        let table = TimerTable::new();
        assert_eq!(table.cancel(999), Err(ErrorCode::HardwareTimerNotFound));
    }
}
