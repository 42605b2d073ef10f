// src/abi/ring.rs
//! Wire-format structures shared across the user/kernel ring-buffer ABI.
//!
//! Two rings are mapped per process: the event ring (user → kernel) and the
//! result ring (kernel → user), placed back-to-back at a fixed offset. Each
//! has 256 fixed-size slots; slot and cursor alignment is 64 bytes.

use core::sync::atomic::{AtomicU32, Ordering};

/// Fixed slot count for both rings. Power of two, so index wrapping is a
/// cheap bitmask instead of a modulo.
pub const RING_CAPACITY: u32 = 256;
/// Mask derived from [`RING_CAPACITY`] for index wrapping.
pub const RING_MASK: u32 = RING_CAPACITY - 1;

/// Maximum inline payload carried by an event or a result.
pub const MAX_PAYLOAD: usize = 512;

/// A user-submitted event, written by user space inside the mapped event
/// ring and read exactly once by the kernel on `notify(Submit)`.
#[derive(Debug, Clone, Copy)]
#[repr(C, align(64))]
pub struct RingEvent {
    /// Owning workflow. Must match the caller's registered workflow.
    pub workflow_id: u64,
    /// Kernel-assigned globally unique id. Zero until the kernel assigns it.
    pub id: u64,
    /// Kernel-assigned submission timestamp (TSC ticks). Zero until assigned.
    pub timestamp: u64,
    /// Deck-dispatched event type. Operations 100-199, Storage 200-299,
    /// Hardware 300-399, Network 400-499.
    pub event_type: u32,
    /// Number of valid bytes in `payload`.
    pub payload_size: u32,
    /// Deck-prefix route, zero-terminated. `route[i] == 0` means "done";
    /// `1..=N` selects a deck; `N+1` is the implicit Execution terminus.
    pub route: [u8; 8],
    /// Inline payload, up to [`MAX_PAYLOAD`] bytes.
    pub payload: [u8; MAX_PAYLOAD],
}

impl RingEvent {
    /// A zeroed event with the given type, route and payload, ready to be
    /// written into the mapped event ring by user space.
    #[must_use]
    pub fn new(workflow_id: u64, event_type: u32, route: [u8; 8], payload: &[u8]) -> Self {
        let mut buf = [0u8; MAX_PAYLOAD];
        let n = payload.len().min(MAX_PAYLOAD);
        buf[..n].copy_from_slice(&payload[..n]);
        Self {
            workflow_id,
            id: 0,
            timestamp: 0,
            event_type,
            payload_size: n as u32,
            route,
            payload: buf,
        }
    }

    /// The payload slice actually in use.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload[..(self.payload_size as usize).min(MAX_PAYLOAD)]
    }

    /// The first non-zero route prefix, or `None` if the route is already
    /// exhausted (`route[0] == 0`, the "already done" case).
    #[must_use]
    pub fn first_prefix(&self) -> Option<u8> {
        match self.route[0] {
            0 => None,
            p => Some(p),
        }
    }
}

/// A kernel-produced result, written into the result ring for user space to
/// consume. `status == 0` is success; a negative value is a negated
/// [`crate::errors::ErrorCode`].
#[derive(Debug, Clone, Copy)]
#[repr(C, align(64))]
pub struct RingResult {
    /// The event this result answers.
    pub event_id: u64,
    /// The owning workflow.
    pub workflow_id: u64,
    /// TSC timestamp at completion.
    pub completion_time: u64,
    /// `0` on success, negative negated error code otherwise.
    pub status: i32,
    /// Raw error code (0 when `status == 0`).
    pub error_code: u16,
    /// Padding to keep the following fields naturally aligned.
    _reserved: u16,
    /// Number of valid bytes in `result`.
    pub result_size: u32,
    /// Inline result payload, up to [`MAX_PAYLOAD`] bytes.
    pub result: [u8; MAX_PAYLOAD],
}

impl RingResult {
    /// Builds a success result carrying `data` as the inline payload.
    #[must_use]
    pub fn success(event_id: u64, workflow_id: u64, completion_time: u64, data: &[u8]) -> Self {
        let mut buf = [0u8; MAX_PAYLOAD];
        let n = data.len().min(MAX_PAYLOAD);
        buf[..n].copy_from_slice(&data[..n]);
        Self {
            event_id,
            workflow_id,
            completion_time,
            status: 0,
            error_code: 0,
            _reserved: 0,
            result_size: n as u32,
            result: buf,
        }
    }

    /// Builds a failure result from an error code.
    #[must_use]
    pub fn failure(
        event_id: u64,
        workflow_id: u64,
        completion_time: u64,
        code: crate::errors::ErrorCode,
    ) -> Self {
        Self {
            event_id,
            workflow_id,
            completion_time,
            status: code.as_negative_status(),
            error_code: code as u16,
            _reserved: 0,
            result_size: 0,
            result: [0u8; MAX_PAYLOAD],
        }
    }

    /// Whether this result represents success.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status == 0
    }
}

/// Cursor pair shared between producer and consumer, each on its own atomic
/// to avoid false sharing across the two sides of a ring.
#[derive(Debug)]
#[repr(C, align(64))]
pub struct RingHeader {
    head: AtomicU32,
    tail: AtomicU32,
    ring_mask: u32,
    ring_entries: u32,
    dropped: AtomicU32,
}

impl RingHeader {
    /// A fresh header for a ring of `entries` slots (must be a power of two).
    #[must_use]
    pub fn new(entries: u32) -> Self {
        assert!(entries.is_power_of_two(), "ring capacity must be a power of two");
        Self {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            ring_mask: entries - 1,
            ring_entries: entries,
            dropped: AtomicU32::new(0),
        }
    }

    /// Number of slots currently occupied.
    #[must_use]
    pub fn pending_count(&self) -> u32 {
        self.tail.load(Ordering::Acquire).wrapping_sub(self.head.load(Ordering::Acquire))
    }

    /// Whether the ring has no pending slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending_count() == 0
    }

    /// Whether the ring is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.pending_count() >= self.ring_entries
    }

    /// Index of the next slot to write, not yet committed.
    #[must_use]
    pub fn tail_index(&self) -> u32 {
        self.tail.load(Ordering::Relaxed) & self.ring_mask
    }

    /// Index of the next slot to read, not yet committed.
    #[must_use]
    pub fn head_index(&self) -> u32 {
        self.head.load(Ordering::Relaxed) & self.ring_mask
    }

    /// Commits a producer write: release-orders the slot write before this
    /// advance becomes visible to the consumer.
    pub fn advance_tail(&self) {
        self.tail.fetch_add(1, Ordering::Release);
    }

    /// Commits a consumer read: release-orders the slot read before this
    /// advance becomes visible to the producer.
    pub fn advance_head(&self) {
        self.head.fetch_add(1, Ordering::Release);
    }

    /// Records a drop (push rejected because the ring was full).
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Total drops recorded since creation.
    #[must_use]
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

const _: () = {
    assert!(core::mem::size_of::<RingEvent>() % 64 == 0, "RingEvent must be 64-byte aligned in size");
    assert!(core::mem::align_of::<RingEvent>() == 64);
    assert!(core::mem::size_of::<RingResult>() % 64 == 0, "RingResult must be 64-byte aligned in size");
    assert!(core::mem::align_of::<RingResult>() == 64);
    assert!(core::mem::align_of::<RingHeader>() == 64);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_payload_is_truncated_to_capacity() {
        let data = [7u8; MAX_PAYLOAD + 32];
        let event = RingEvent::new(1, 101, [1, 0, 0, 0, 0, 0, 0, 0], &data);
        assert_eq!(event.payload().len(), MAX_PAYLOAD);
    }

    #[test]
    fn first_prefix_none_when_route_already_done() {
        let event = RingEvent::new(1, 101, [0; 8], &[]);
        assert_eq!(event.first_prefix(), None);
    }

    #[test]
    fn result_failure_uses_negated_status() {
        let result = RingResult::failure(1, 2, 3, crate::errors::ErrorCode::Timeout);
        assert!(!result.is_ok());
        assert_eq!(result.status, -(0x0003));
    }

    #[test]
    fn header_tracks_pending_and_full() {
        let header = RingHeader::new(4);
        assert!(header.is_empty());
        header.advance_tail();
        header.advance_tail();
        assert_eq!(header.pending_count(), 2);
        header.advance_tail();
        header.advance_tail();
        assert!(header.is_full());
    }
}
