//! Lock-free bounded MPMC queue.
//!
//! Holds pointers into a slab; the connection pool uses one instance as
//! its freelist. Producers and consumers reserve cells with a fetch-add
//! on a cursor, and a cursor that crosses the ring capacity is rolled
//! back by one capacity so both stay bounded. Cell indices never need a
//! wrap check because the cells live in a [`MirrorRegion`].
//!
//! The queue does not block and does not detect empty or full: callers
//! must never dequeue more than was enqueued nor enqueue beyond the live
//! set. The freelist discipline (fill once at startup, then cycle slots
//! one-for-one) upholds this. Null is the consumed-cell sentinel, so the
//! queue cannot carry null pointers.

use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use crate::error::Error;
use crate::mirror::MirrorRegion;

pub(crate) struct AtomicQueue<T> {
    cells: MirrorRegion<AtomicPtr<T>>,
    head: AtomicU64,
    tail: AtomicU64,
}

impl<T> AtomicQueue<T> {
    /// Create a queue holding at least `hint` elements.
    ///
    /// The live set must stay strictly below the resulting
    /// [`capacity`](Self::capacity) for [`len`](Self::len) to be
    /// unambiguous, so callers should pass one more than they intend to
    /// keep in flight.
    pub fn with_capacity(hint: usize) -> Result<Self, Error> {
        // memfd pages are zero-filled: every cell starts out null.
        let cells = MirrorRegion::alloc(hint)?;
        Ok(AtomicQueue {
            cells,
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
        })
    }

    /// Ring capacity in elements.
    pub fn capacity(&self) -> usize {
        self.cells.capacity()
    }

    /// Number of queued elements. Exact at quiescence; a racing snapshot
    /// while producers and consumers are active.
    pub fn len(&self) -> usize {
        let cap = self.capacity() as u64;
        let t = self.tail.load(Ordering::Acquire);
        let h = self.head.load(Ordering::Acquire);
        // The cursors can sit one rollback epoch apart.
        (if t >= h { t - h } else { t + cap - h }) as usize
    }

    /// Push a non-null pointer onto the back of the queue.
    pub fn enqueue(&self, item: *mut T) {
        debug_assert!(!item.is_null());
        let t = self.tail.fetch_add(1, Ordering::Relaxed);
        // Safety: the reservation makes this cell ours until a consumer's
        // own fetch-add returns the same index.
        let prev = unsafe { (*self.cells.at(t as usize)).swap(item, Ordering::Release) };
        debug_assert!(prev.is_null(), "freelist cell overwritten before consumption");
        self.maybe_roll(&self.tail, t + 1);
    }

    /// Pop the front pointer. The queue must be non-empty.
    ///
    /// The matching producer may still be between its cursor reservation
    /// and its payload store; the consumed-cell sentinel (null) makes the
    /// consumer wait for the store instead of reading a stale pointer.
    pub fn dequeue(&self) -> *mut T {
        let h = self.head.fetch_add(1, Ordering::Relaxed);
        // Safety: as for enqueue; Acquire pairs with the producer's swap.
        let cell = unsafe { &*self.cells.at(h as usize) };
        loop {
            let item = cell.swap(std::ptr::null_mut(), Ordering::Acquire);
            if !item.is_null() {
                self.maybe_roll(&self.head, h + 1);
                return item;
            }
            std::hint::spin_loop();
        }
    }

    /// Roll a cursor back by one capacity once it crosses it.
    ///
    /// `next` is this caller's reservation plus one. Wait until no later
    /// reservation is still pending above ours, then a single
    /// compare-exchange subtracts the capacity; exactly one caller in a
    /// crossing group succeeds, the rest find the cursor already small.
    fn maybe_roll(&self, cursor: &AtomicU64, next: u64) {
        let cap = self.capacity() as u64;
        if next < cap {
            return;
        }
        while cursor.load(Ordering::Acquire) > next {
            std::hint::spin_loop();
        }
        let _ = cursor.compare_exchange(next, next - cap, Ordering::AcqRel, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let values: Vec<u64> = (0..100).collect();
        let queue = AtomicQueue::<u64>::with_capacity(values.len() + 1).unwrap();
        for v in &values {
            queue.enqueue(v as *const u64 as *mut u64);
        }
        assert_eq!(queue.len(), values.len());
        for v in &values {
            assert_eq!(queue.dequeue(), v as *const u64 as *mut u64);
        }
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn cursors_stay_bounded() {
        let mut value = 7u64;
        let queue = AtomicQueue::<u64>::with_capacity(1).unwrap();
        let cap = queue.capacity() as u64;
        // Cycle one element through several rollbacks.
        for _ in 0..cap * 3 {
            queue.enqueue(&mut value);
            assert_eq!(queue.dequeue(), &raw mut value);
        }
        assert!(queue.head.load(Ordering::Relaxed) < cap * 2);
        assert!(queue.tail.load(Ordering::Relaxed) < cap * 2);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn concurrent_churn_preserves_elements() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 20_000;

        let mut values: Vec<u64> = (0..64).collect();
        let queue = AtomicQueue::<u64>::with_capacity(values.len() + 1).unwrap();
        for v in &mut values {
            queue.enqueue(v);
        }

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..ROUNDS {
                        let p = queue.dequeue();
                        assert!(!p.is_null());
                        unsafe { *p += 1 };
                        queue.enqueue(p);
                    }
                });
            }
        });

        // Every pointer is still present exactly once.
        assert_eq!(queue.len(), values.len());
        let mut seen: Vec<*mut u64> = (0..values.len()).map(|_| queue.dequeue()).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), values.len());
        // Each round incremented exactly one element.
        assert_eq!(
            values.iter().sum::<u64>(),
            (0..64u64).sum::<u64>() + (THREADS * ROUNDS) as u64
        );
    }
}
