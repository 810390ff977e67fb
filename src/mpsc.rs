//! Lock-free multi-producer single-consumer ring buffer.
//!
//! Producers race for write positions with a compare-and-swap on the shared
//! `tail` cursor; the winner owns the slot outright and publishes its value
//! through the slot's occupancy word. The sole consumer advances `head` with
//! plain stores.
//!
//! Because reserving a position and publishing its value are two separate
//! steps, the consumer can reach a position whose producer has not finished
//! yet; that surfaces as the transient [`PopError::SlotBusyWriting`]. The
//! producer side has no such window: the consumer clears a slot before
//! advancing `head`, so any position that passes the fullness check is
//! already drained.
//!
//! # Example
//!
//! ```
//! use quadring::mpsc;
//!
//! let (tx, rx) = mpsc::channel::<u64>(1024);
//!
//! let tx2 = tx.clone();
//! tx.push(1).unwrap();
//! tx2.push(2).unwrap();
//!
//! assert!(rx.pop().is_ok());
//! assert!(rx.pop().is_ok());
//! ```
//!
//! # Thread safety
//!
//! [`Producer`] is `Clone + Send + Sync`: hand one to each writer thread, or
//! share a single one behind a reference. [`Consumer`] is `Send` but neither
//! `Sync` nor `Clone`.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::error::{PopError, PushError};
use crate::ring::{
    self, Cursor, PhantomUnsync, RingBuffer, RingConsumer, RingProducer, Slot,
};
use crate::trace;

struct Ring<T> {
    head: Cursor,
    tail: Cursor,
    capacity: usize,
    slots: Box<[Slot<T>]>,
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let head = self.head.pos.load(Ordering::Relaxed);
        let tail = self.tail.pos.load(Ordering::Relaxed);
        // SAFETY: teardown holds exclusive access and every reservation in
        // [head, tail) was published before its handle went away.
        unsafe { ring::drop_enqueued(&self.slots, head, tail) };
    }
}

/// Write end of the queue. Clone one per producer thread.
pub struct Producer<T: Send> {
    ring: Arc<Ring<T>>,
}

impl<T: Send> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
        }
    }
}

/// Read end of the queue. Exactly one exists per channel.
pub struct Consumer<T: Send> {
    ring: Arc<Ring<T>>,
    _unsync: PhantomUnsync,
}

/// Creates a multi-producer single-consumer channel with the given capacity.
///
/// # Panics
///
/// Panics if `capacity` is zero.
#[must_use]
pub fn channel<T: Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    ring::validate_capacity(capacity);

    let ring = Arc::new(Ring {
        head: Cursor::new(),
        tail: Cursor::new(),
        capacity,
        slots: ring::slot_array(capacity),
    });
    trace::debug!(capacity, "mpsc channel created");

    (
        Producer {
            ring: Arc::clone(&ring),
        },
        Consumer {
            ring,
            _unsync: PhantomData,
        },
    )
}

impl<T: Send> Producer<T> {
    /// Attempts to enqueue a value.
    ///
    /// Lock-free under producer contention: a lost cursor race is retried
    /// internally with a spin hint, never surfaced.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Full`] with the value when the buffer is at
    /// capacity. No other failure exists in this variant.
    #[inline]
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        let ring = &*self.ring;
        let capacity = ring.capacity as u64;

        loop {
            let head = ring.head.pos.load(Ordering::Acquire);
            let tail = ring.tail.pos.load(Ordering::Relaxed);

            // `>=` rather than `==`: competing producers may have advanced
            // `tail` past a momentarily stale `head` snapshot.
            if tail.wrapping_sub(head) >= capacity {
                return Err(PushError::Full(value));
            }

            if ring
                .tail
                .pos
                .compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                let slot = &ring.slots[(tail % capacity) as usize];
                debug_assert_eq!(slot.distance_from_empty(tail), 0);
                // SAFETY: the CAS makes this thread the sole owner of cursor
                // value `tail`, and the fullness check above proved the
                // consumer drained the slot's previous cycle before it
                // advanced `head` into range.
                unsafe { slot.fill(tail, value) };
                return Ok(());
            }

            // Another producer won this position; take a fresh snapshot.
            std::hint::spin_loop();
        }
    }

    /// Number of values currently enqueued. Best-effort snapshot.
    pub fn len(&self) -> usize {
        let ring = &*self.ring;
        ring::occupancy(&ring.head.pos, &ring.tail.pos, ring.capacity)
    }

    /// The fixed capacity chosen at construction.
    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }

    /// Whether the buffer appeared empty at the time of the call.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send> Consumer<T> {
    /// Attempts to dequeue the oldest value.
    ///
    /// # Errors
    ///
    /// Returns [`PopError::Empty`] when no value is enqueued, or
    /// [`PopError::SlotBusyWriting`] when the next position is reserved but
    /// its value is not published yet. The latter is transient: the value
    /// will arrive without any action from this side.
    #[inline]
    pub fn pop(&self) -> Result<T, PopError> {
        let ring = &*self.ring;
        let head = ring.head.pos.load(Ordering::Relaxed);
        let tail = ring.tail.pos.load(Ordering::Acquire);

        if tail == head {
            return Err(PopError::Empty);
        }

        let slot = &ring.slots[(head % ring.capacity as u64) as usize];
        if slot.distance_from_full(head) != 0 {
            // The winning producer has reserved this position but not yet
            // published its value.
            return Err(PopError::SlotBusyWriting);
        }

        // SAFETY: this handle is the only consumer, `head < tail`, and the
        // occupancy check above observed the published state with acquire
        // ordering.
        let value = unsafe { slot.take(head, ring.capacity as u64) };

        // Release so producers that observe the new head also observe the
        // cleared slot.
        ring.head.pos.store(head.wrapping_add(1), Ordering::Release);
        Ok(value)
    }

    /// Number of values currently enqueued. Best-effort snapshot.
    pub fn len(&self) -> usize {
        let ring = &*self.ring;
        ring::occupancy(&ring.head.pos, &ring.tail.pos, ring.capacity)
    }

    /// The fixed capacity chosen at construction.
    pub fn capacity(&self) -> usize {
        self.ring.capacity
    }

    /// Whether the buffer appeared empty at the time of the call.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send> RingBuffer for Producer<T> {
    fn len(&self) -> usize {
        self.len()
    }

    fn capacity(&self) -> usize {
        self.capacity()
    }
}

impl<T: Send> RingBuffer for Consumer<T> {
    fn len(&self) -> usize {
        self.len()
    }

    fn capacity(&self) -> usize {
        self.capacity()
    }
}

impl<T: Send> RingProducer<T> for Producer<T> {
    fn push(&self, value: T) -> Result<(), PushError<T>> {
        self.push(value)
    }
}

impl<T: Send> RingConsumer<T> for Consumer<T> {
    fn pop(&self) -> Result<T, PopError> {
        self.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn basic_push_pop() {
        let (tx, rx) = channel::<u64>(8);

        tx.push(1).unwrap();
        tx.push(2).unwrap();
        tx.push(3).unwrap();

        assert_eq!(rx.pop(), Ok(1));
        assert_eq!(rx.pop(), Ok(2));
        assert_eq!(rx.pop(), Ok(3));
        assert_eq!(rx.pop(), Err(PopError::Empty));
    }

    #[test]
    fn full_returns_value() {
        let (tx, rx) = channel::<u64>(4);

        for i in 0..4 {
            assert!(tx.push(i).is_ok());
        }
        assert_eq!(tx.push(5), Err(PushError::Full(5)));

        assert_eq!(rx.pop(), Ok(0));
        assert!(tx.push(5).is_ok());
        assert_eq!(tx.push(6), Err(PushError::Full(6)));
    }

    #[test]
    fn wrapping_behavior() {
        let (tx, rx) = channel::<u64>(4);

        for round in 0..5 {
            for i in 0..4 {
                assert!(tx.push(round * 10 + i).is_ok());
            }
            for i in 0..4 {
                assert_eq!(rx.pop(), Ok(round * 10 + i));
            }
            assert_eq!(rx.pop(), Err(PopError::Empty));
        }
    }

    #[test]
    fn capacity_one() {
        let (tx, rx) = channel::<u8>(1);

        assert!(tx.push(7).is_ok());
        assert_eq!(tx.push(8), Err(PushError::Full(8)));
        assert_eq!(rx.pop(), Ok(7));
        assert_eq!(rx.pop(), Err(PopError::Empty));
    }

    #[test]
    fn producers_do_not_lose_values() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 2_500;

        let (tx, rx) = channel::<u64>(64);
        let mut handles = Vec::new();

        for p in 0..PRODUCERS {
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut item = p * 10_000 + i;
                    while let Err(err) = tx.push(item) {
                        item = err.into_inner();
                        thread::yield_now();
                    }
                }
            }));
        }

        let mut received = Vec::with_capacity((PRODUCERS * PER_PRODUCER) as usize);
        while received.len() < (PRODUCERS * PER_PRODUCER) as usize {
            match rx.pop() {
                Ok(value) => received.push(value),
                Err(_) => std::hint::spin_loop(),
            }
        }

        for handle in handles {
            handle.join().unwrap();
        }

        received.sort_unstable();
        let mut expected: Vec<u64> = (0..PRODUCERS)
            .flat_map(|p| (0..PER_PRODUCER).map(move |i| p * 10_000 + i))
            .collect();
        expected.sort_unstable();
        assert_eq!(received, expected);
    }

    #[test]
    fn per_producer_order_is_preserved() {
        const PER_PRODUCER: u64 = 1_000;

        let (tx, rx) = channel::<(u64, u64)>(32);
        let mut handles = Vec::new();

        for p in 0..2 {
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut item = (p, i);
                    while let Err(err) = tx.push(item) {
                        item = err.into_inner();
                        thread::yield_now();
                    }
                }
            }));
        }

        let mut last_seen = [None::<u64>; 2];
        let mut received = 0;
        while received < 2 * PER_PRODUCER {
            match rx.pop() {
                Ok((p, i)) => {
                    if let Some(prev) = last_seen[p as usize] {
                        assert!(i > prev, "producer {p} reordered: {i} after {prev}");
                    }
                    last_seen[p as usize] = Some(i);
                    received += 1;
                }
                Err(_) => std::hint::spin_loop(),
            }
        }

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn zero_capacity_panics() {
        let _ = channel::<u64>(0);
    }
}
