// src/kernel/ring_buffer.rs
//! Lock-free single-producer/single-consumer ring buffer.
//!
//! Backs both the event ring (user produces, kernel consumes) and the result
//! ring (kernel produces, user consumes). A push is rejected when the ring
//! is full; a pop is rejected when it is empty — there is no blocking and no
//! kernel-side backpressure beyond that immediate overflow status.

use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU32, Ordering};

/// Ring buffer operation outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// The ring has no free slot; the push was rejected.
    Full,
    /// The ring has no pending slot; the pop was rejected.
    Empty,
}

/// A fixed-capacity SPSC ring of `T`. Capacity must be a power of two so
/// index wrapping is a mask instead of a modulo.
pub struct SpscRing<T> {
    slots: Vec<UnsafeCell<MaybeUninit<T>>>,
    /// Consumer cursor, on its own cache line to avoid false sharing with `tail`.
    head: AtomicU32,
    _pad0: [u8; 60],
    /// Producer cursor.
    tail: AtomicU32,
    _pad1: [u8; 60],
    mask: u32,
    dropped: AtomicU32,
}

impl<T> SpscRing<T> {
    /// Builds a ring with the given capacity (must be a power of two).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        assert!(capacity <= u32::MAX as usize, "ring capacity too large");

        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(UnsafeCell::new(MaybeUninit::uninit()));
        }

        Self {
            slots,
            head: AtomicU32::new(0),
            _pad0: [0; 60],
            tail: AtomicU32::new(0),
            _pad1: [0; 60],
            mask: (capacity - 1) as u32,
            dropped: AtomicU32::new(0),
        }
    }

    /// Producer-side push. Rejected immediately if the ring is full.
    pub fn push(&self, value: T) -> Result<(), RingError> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        let next_tail = (tail.wrapping_add(1)) & self.mask_wrap();
        if self.len_from(head, tail) >= self.capacity() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(RingError::Full);
        }

        let index = (tail & self.mask) as usize;
        // Safety: this is the sole producer; `index` is not concurrently
        // written, and the consumer only reads slots the tail advance below
        // has not yet published.
        unsafe {
            (*self.slots[index].get()).as_mut_ptr().write(value);
        }
        let _ = next_tail;
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Consumer-side pop. Rejected immediately if the ring is empty.
    pub fn pop(&self) -> Result<T, RingError> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head == tail {
            return Err(RingError::Empty);
        }

        let index = (head & self.mask) as usize;
        // Safety: this is the sole consumer; the producer has released the
        // write at `index` via the `tail` store observed above.
        let value = unsafe { (*self.slots[index].get()).as_ptr().read() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(value)
    }

    /// Ring capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        (self.mask + 1) as usize
    }

    /// Number of pending slots.
    #[must_use]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        self.len_from(head, tail)
    }

    /// Whether the ring currently has no pending slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the ring is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Total pushes rejected due to a full ring.
    #[must_use]
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn len_from(&self, head: u32, tail: u32) -> usize {
        tail.wrapping_sub(head) as usize
    }

    const fn mask_wrap(&self) -> u32 {
        u32::MAX
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let mut cur = head;
        while cur != tail {
            let index = (cur & self.mask) as usize;
            // Safety: every slot between head and tail holds an initialized
            // value that has not yet been popped.
            unsafe {
                (*self.slots[index].get()).as_mut_ptr().drop_in_place();
            }
            cur = cur.wrapping_add(1);
        }
    }
}

// Safety: producer and consumer are distinct owners operating on disjoint
// slot indices at any instant; `T: Send` is sufficient to cross threads.
unsafe impl<T: Send> Send for SpscRing<T> {}
unsafe impl<T: Send> Sync for SpscRing<T> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_returns_same_value() {
        let ring: SpscRing<u32> = SpscRing::new(4);
        ring.push(7).unwrap();
        assert_eq!(ring.pop().unwrap(), 7);
    }

    #[test]
    fn pop_on_empty_ring_fails() {
        let ring: SpscRing<u32> = SpscRing::new(4);
        assert_eq!(ring.pop(), Err(RingError::Empty));
    }

    #[test]
    fn push_past_capacity_fails_and_counts_drop() {
        let ring: SpscRing<u32> = SpscRing::new(2);
        ring.push(1).unwrap();
        ring.push(2).unwrap();
        assert_eq!(ring.push(3), Err(RingError::Full));
        assert_eq!(ring.dropped(), 1);
    }

    #[test]
    fn fifo_ordering_is_preserved() {
        let ring: SpscRing<u32> = SpscRing::new(8);
        for i in 0..5 {
            ring.push(i).unwrap();
        }
        for i in 0..5 {
            assert_eq!(ring.pop().unwrap(), i);
        }
    }

    #[test]
    fn drop_releases_remaining_elements() {
        use alloc::rc::Rc;
        let ring: SpscRing<Rc<u32>> = SpscRing::new(4);
        let value = Rc::new(99);
        ring.push(value.clone()).unwrap();
        assert_eq!(Rc::strong_count(&value), 2);
        drop(ring);
        assert_eq!(Rc::strong_count(&value), 1);
    }
}
