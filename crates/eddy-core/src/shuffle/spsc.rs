//! Bounded single-producer single-consumer ring used as the per-peer send
//! buffer of the in-process transport.
//!
//! Power-of-two capacity (index arithmetic is a mask), cache-line padded
//! head/tail to keep the producer and consumer off each other's lines,
//! acquire/release ordering, no locks. A full ring rejects the push — that
//! rejection is exactly the shuffle's high-water-mark drop semantics.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Pads a value to a cache line to prevent false sharing between the
/// producer and consumer indices.
#[repr(C, align(64))]
pub(crate) struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

/// A bounded lock-free SPSC ring.
///
/// # Safety contract
///
/// Exactly one thread pushes and exactly one thread pops. The transport
/// upholds this: each directed peer pair owns one ring, written by that
/// peer's single send thread and drained by the receiver's single pull
/// thread.
pub struct SpscRing<T> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Consumer index.
    head: CachePadded<AtomicUsize>,
    /// Producer index.
    tail: CachePadded<AtomicUsize>,
    mask: usize,
}

// SAFETY: the single-producer/single-consumer contract above makes the
// interior mutability safe to share; T only needs to be Send.
unsafe impl<T: Send> Send for SpscRing<T> {}
// SAFETY: same contract.
unsafe impl<T: Send> Sync for SpscRing<T> {}

impl<T> SpscRing<T> {
    /// Creates a ring holding at least `capacity` items (rounded up to a
    /// power of two, minimum 2).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let buffer = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            buffer,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            mask: capacity - 1,
        }
    }

    /// Usable capacity of the ring.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Items currently queued. Approximate under concurrency.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tail
            .load(Ordering::Acquire)
            .wrapping_sub(self.head.load(Ordering::Acquire))
    }

    /// Whether the ring is empty. Approximate under concurrency.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pushes one item. A full ring returns the item back — the caller
    /// decides whether that is backpressure or an admission-control drop.
    ///
    /// # Errors
    ///
    /// `Err(value)` when the ring is full.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.buffer.len() {
            return Err(value);
        }
        let slot = &self.buffer[tail & self.mask];
        // SAFETY: only this producer writes the slot, and the slot is
        // outside the consumer's visible range until the tail store below.
        unsafe {
            (*slot.get()).write(value);
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Pops the oldest item, if any.
    pub fn pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        let slot = &self.buffer[head & self.mask];
        // SAFETY: the producer's Release store made this slot visible, and
        // only this consumer reads it before advancing head.
        let value = unsafe { (*slot.get()).assume_init_read() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(value)
    }
}

impl<T> Drop for SpscRing<T> {
    fn drop(&mut self) {
        // Drain whatever the consumer never took.
        while self.pop().is_some() {}
    }
}

impl<T> std::fmt::Debug for SpscRing<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpscRing")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
