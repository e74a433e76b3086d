//! Lock-free single-producer single-consumer ring
//!
//! The relay thread is the only producer and the monitor thread the only
//! consumer. `push` never blocks: when the monitor falls behind, samples are
//! refused and the relay carries on.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Slot<T> {
    data: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    const fn new() -> Self {
        Self {
            data: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Keeps the producer and consumer indices on separate cache lines
#[repr(C, align(64))]
struct CacheLinePadded<T> {
    value: T,
}

impl<T> CacheLinePadded<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

/// Bounded SPSC queue of `N` (a power of two) `Copy` items
#[repr(C)]
pub struct RingBuffer<T, const N: usize> {
    /// Next slot to write, owned by the producer
    head: CacheLinePadded<AtomicUsize>,
    /// Next slot to read, owned by the consumer
    tail: CacheLinePadded<AtomicUsize>,
    buffer: Box<[Slot<T>]>,
    mask: usize,
}

// SAFETY: one thread writes `head` and the slots ahead of it, one thread
// writes `tail`; acquire/release on the indices publishes the slot contents.
unsafe impl<T: Send, const N: usize> Send for RingBuffer<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for RingBuffer<T, N> {}

impl<T: Copy, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy, const N: usize> RingBuffer<T, N> {
    /// # Panics
    /// If `N` is zero or not a power of two
    pub fn new() -> Self {
        assert!(N > 0 && N.is_power_of_two(), "N must be power of 2");

        let buffer: Vec<Slot<T>> = (0..N).map(|_| Slot::new()).collect();

        Self {
            head: CacheLinePadded::new(AtomicUsize::new(0)),
            tail: CacheLinePadded::new(AtomicUsize::new(0)),
            buffer: buffer.into_boxed_slice(),
            mask: N - 1,
        }
    }

    /// Producer side. Returns `false` if the ring is full.
    #[inline(always)]
    pub fn push(&self, value: T) -> bool {
        let head = self.head.value.load(Ordering::Relaxed);
        let tail = self.tail.value.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= N {
            return false;
        }

        let slot = &self.buffer[head & self.mask];
        // SAFETY: the consumer never reads at or past `head`
        unsafe {
            (*slot.data.get()).write(value);
        }

        self.head
            .value
            .store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Consumer side
    #[inline(always)]
    pub fn pop(&self) -> Option<T> {
        let tail = self.tail.value.load(Ordering::Relaxed);
        let head = self.head.value.load(Ordering::Acquire);

        if tail == head {
            return None;
        }

        let slot = &self.buffer[tail & self.mask];
        // SAFETY: slots before `head` were fully written before the release store
        let value = unsafe { (*slot.data.get()).assume_init_read() };

        self.tail
            .value
            .store(tail.wrapping_add(1), Ordering::Release);
        Some(value)
    }

    /// Consumer side: hand everything queued so far to `f`, releasing the
    /// slots with a single store
    pub fn drain(&self, mut f: impl FnMut(T)) -> usize {
        let tail = self.tail.value.load(Ordering::Relaxed);
        let head = self.head.value.load(Ordering::Acquire);
        let queued = head.wrapping_sub(tail);

        for i in 0..queued {
            let slot = &self.buffer[tail.wrapping_add(i) & self.mask];
            // SAFETY: every slot in tail..head was published by the release store
            f(unsafe { (*slot.data.get()).assume_init_read() });
        }

        self.tail.value.store(head, Ordering::Release);
        queued
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.len() >= N
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        let head = self.head.value.load(Ordering::Acquire);
        let tail = self.tail.value.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }

    #[inline(always)]
    pub const fn capacity(&self) -> usize {
        N
    }
}
