//! Bounded lock-free MPMC ring buffer.
//!
//! Carries boxed items between submit, the matching workers, and the egress
//! processor. Two monotonically increasing counters index the slot array:
//! `head` is the next write position, `tail` the next read position, and
//! `counter & (capacity - 1)` selects the slot. A null slot pointer is the
//! "empty" sentinel: a producer that has reserved a slot must observe it
//! empty before publishing (release store), and a consumer that has reserved
//! a slot spins until the producer's publish lands. Both counters are
//! cache-line padded so producers and consumers do not false-share.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// CAS attempts before yielding the thread to keep contended loops cooperative.
const SPINS_BEFORE_YIELD: u32 = 100;

pub struct RingBuffer<T> {
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    slots: Box<[AtomicPtr<T>]>,
    mask: u64,
}

unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T> RingBuffer<T> {
    /// Creates a buffer with `capacity` rounded up to a power of two (min 2).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots: Vec<AtomicPtr<T>> = (0..capacity)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            slots: slots.into_boxed_slice(),
            mask: capacity as u64 - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.saturating_sub(tail) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Attempts to enqueue. Returns the item back when the buffer is full so
    /// the caller can decide to drop, retry, or surface an error.
    pub fn push(&self, item: Box<T>) -> Result<(), Box<T>> {
        let raw = Box::into_raw(item);
        let mut spins = 0u32;
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            if head.wrapping_sub(tail) >= self.capacity() as u64 {
                return Err(unsafe { Box::from_raw(raw) });
            }
            if self
                .head
                .compare_exchange_weak(head, head + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let slot = &self.slots[(head & self.mask) as usize];
                // A consumer from the previous lap may still hold the slot;
                // it must be observed empty before the publish.
                let mut wait = 0u32;
                while !slot.load(Ordering::Acquire).is_null() {
                    wait += 1;
                    if wait > SPINS_BEFORE_YIELD {
                        std::thread::yield_now();
                        wait = 0;
                    } else {
                        std::hint::spin_loop();
                    }
                }
                slot.store(raw, Ordering::Release);
                return Ok(());
            }
            spins += 1;
            if spins > SPINS_BEFORE_YIELD {
                std::thread::yield_now();
                spins = 0;
            }
        }
    }

    /// Attempts to dequeue one item.
    pub fn pop(&self) -> Option<Box<T>> {
        let mut spins = 0u32;
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            if tail >= head {
                return None;
            }
            if self
                .tail
                .compare_exchange_weak(tail, tail + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(self.take_slot(tail));
            }
            spins += 1;
            if spins > SPINS_BEFORE_YIELD {
                std::thread::yield_now();
                spins = 0;
            }
        }
    }

    /// Dequeues up to `max` items with a single range reservation on `tail`.
    pub fn batch_pop(&self, max: usize) -> Vec<Box<T>> {
        if max == 0 {
            return Vec::new();
        }
        let mut spins = 0u32;
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            if tail >= head {
                return Vec::new();
            }
            let count = (head - tail).min(max as u64);
            if self
                .tail
                .compare_exchange_weak(tail, tail + count, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let mut items = Vec::with_capacity(count as usize);
                for i in 0..count {
                    items.push(self.take_slot(tail + i));
                }
                return items;
            }
            spins += 1;
            if spins > SPINS_BEFORE_YIELD {
                std::thread::yield_now();
                spins = 0;
            }
        }
    }

    /// Takes ownership of the item in a reserved slot, spinning until the
    /// producer's publish is visible, and swaps the empty sentinel back in.
    fn take_slot(&self, position: u64) -> Box<T> {
        let slot = &self.slots[(position & self.mask) as usize];
        let mut spins = 0u32;
        loop {
            let raw = slot.swap(ptr::null_mut(), Ordering::AcqRel);
            if !raw.is_null() {
                return unsafe { Box::from_raw(raw) };
            }
            spins += 1;
            if spins > SPINS_BEFORE_YIELD {
                std::thread::yield_now();
                spins = 0;
            } else {
                std::hint::spin_loop();
            }
        }
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}
