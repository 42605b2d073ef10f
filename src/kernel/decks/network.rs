// src/kernel/decks/network.rs
//! Network deck: sockets and datagram/stream operations, event types
//! 400-499. A placeholder parallel to the Hardware deck — socket handles are
//! tracked, but no actual network device backs send/receive in this core.

use spin::Mutex;

use super::{validate_step, Collaborators, Deck, DeckCounters, DeckOutcome, DeckStats, PREFIX_NETWORK};
use crate::errors::ErrorCode;
use crate::kernel::routing::{DeckResult, RoutingEntry};

/// Network deck event types.
pub mod event_type {
    pub const SOCKET_OPEN: u32 = 400;
    pub const SOCKET_CLOSE: u32 = 401;
    pub const SOCKET_SEND_DATAGRAM: u32 = 402;
    pub const SOCKET_RECV_DATAGRAM: u32 = 403;
    pub const SOCKET_SEND_STREAM: u32 = 404;
    pub const SOCKET_RECV_STREAM: u32 = 405;
}

const SOCKET_TABLE_SIZE: usize = 64;

struct SocketTable {
    open: Mutex<[bool; SOCKET_TABLE_SIZE]>,
}

impl SocketTable {
    const fn new() -> Self {
        Self { open: Mutex::new([false; SOCKET_TABLE_SIZE]) }
    }

    fn open_socket(&self) -> Result<u32, ErrorCode> {
        let mut slots = self.open.lock();
        let (index, slot) = slots.iter_mut().enumerate().find(|(_, s)| !**s).ok_or(ErrorCode::NetworkUnreachable)?;
        *slot = true;
        Ok(index as u32)
    }

    fn close_socket(&self, handle: u32) -> Result<(), ErrorCode> {
        let mut slots = self.open.lock();
        let slot = slots.get_mut(handle as usize).ok_or(ErrorCode::NetworkInvalidSocket)?;
        if !core::mem::replace(slot, false) {
            return Err(ErrorCode::NetworkInvalidSocket);
        }
        Ok(())
    }

    fn is_open(&self, handle: u32) -> bool {
        self.open.lock().get(handle as usize).copied().unwrap_or(false)
    }
}

/// Network deck implementation.
pub struct NetworkDeck {
    counters: DeckCounters,
    sockets: SocketTable,
}

impl NetworkDeck {
    /// A fresh deck with every socket slot closed.
    #[must_use]
    pub const fn new() -> Self {
        Self { counters: DeckCounters::new(), sockets: SocketTable::new() }
    }
}

impl Default for NetworkDeck {
    fn default() -> Self {
        Self::new()
    }
}

impl Deck for NetworkDeck {
    fn prefix(&self) -> u8 {
        PREFIX_NETWORK
    }

    fn accepts(&self, event_type: u32) -> bool {
        (400..500).contains(&event_type)
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

impl NetworkDeck {
    fn process_inner(&self, entry: &mut RoutingEntry) -> DeckOutcome {
        if let Err(code) = validate_step(entry, PREFIX_NETWORK) {
            return DeckOutcome::Error(code);
        }
        let event_type = entry.event_copy.event_type;
        if !self.accepts(event_type) {
            return DeckOutcome::Error(ErrorCode::NotImplemented);
        }
        let payload = entry.event_copy.payload();
        let timestamp = entry.event_copy.timestamp;

        match event_type {
            event_type::SOCKET_OPEN => match self.sockets.open_socket() {
                Ok(handle) => {
                    entry.record_success(DeckResult::Value(u64::from(handle)), timestamp);
                    DeckOutcome::Completed
                }
                Err(code) => DeckOutcome::Error(code),
            },
            event_type::SOCKET_CLOSE => {
                let Some(handle) = payload.get(0..4).map(|b| u32::from_le_bytes(b.try_into().unwrap())) else {
                    return DeckOutcome::Error(ErrorCode::OperationsInvalidInput);
                };
                match self.sockets.close_socket(handle) {
                    Ok(()) => {
                        entry.record_success(DeckResult::Value(0), timestamp);
                        DeckOutcome::Completed
                    }
                    Err(code) => DeckOutcome::Error(code),
                }
            }
            event_type::SOCKET_SEND_DATAGRAM
            | event_type::SOCKET_RECV_DATAGRAM
            | event_type::SOCKET_SEND_STREAM
            | event_type::SOCKET_RECV_STREAM => {
                let Some(handle) = payload.get(0..4).map(|b| u32::from_le_bytes(b.try_into().unwrap())) else {
                    return DeckOutcome::Error(ErrorCode::OperationsInvalidInput);
                };
                if !self.sockets.is_open(handle) {
                    return DeckOutcome::Error(ErrorCode::NetworkInvalidSocket);
                }
                // No backing network device in this core; every transfer is
                // unreachable until a real link layer is wired in.
                DeckOutcome::Error(ErrorCode::NetworkUnreachable)
            }
            _ => DeckOutcome::Error(ErrorCode::NotImplemented),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::decks::test_support::stub_collaborators;

    #[test]
    fn open_then_close_frees_the_slot_for_reuse() {
        let deck = NetworkDeck::new();
        let collab = stub_collaborators();
        let mut open = RoutingEntry::new(
            1,
            crate::abi::ring::RingEvent::new(1, event_type::SOCKET_OPEN, [4, 0, 0, 0, 0, 0, 0, 0], b""),
            0,
        );
        deck.process(&mut open, &collab);
        let DeckResult::Value(handle) = open.last_result() else { panic!("expected a handle") };
        let handle = *handle as u32;

        let mut close = RoutingEntry::new(
            1,
            crate::abi::ring::RingEvent::new(1, event_type::SOCKET_CLOSE, [4, 0, 0, 0, 0, 0, 0, 0], &handle.to_le_bytes()),
            0,
        );
        assert!(matches!(deck.process(&mut close, &collab), DeckOutcome::Completed));
        assert!(!deck.sockets.is_open(handle));
    }

    #[test]
    fn send_on_unopened_socket_is_invalid() {
        let deck = NetworkDeck::new();
        let collab = stub_collaborators();
        let mut entry = RoutingEntry::new(
            1,
            crate::abi::ring::RingEvent::new(1, event_type::SOCKET_SEND_DATAGRAM, [4, 0, 0, 0, 0, 0, 0, 0], &0u32.to_le_bytes()),
            0,
        );
        assert!(matches!(
            deck.process(&mut entry, &collab),
            DeckOutcome::Error(ErrorCode::NetworkInvalidSocket)
        ));
    }
}
