//! Lock-free single-producer multi-consumer ring buffer.
//!
//! The mirror image of [`crate::mpsc`]: consumers race for read positions
//! with a compare-and-swap on the shared `head` cursor, while the sole
//! producer advances `tail` with plain stores.
//!
//! The asymmetry shows up on the producer side. A consumer reserves a
//! position first and drains the slot second, so on wraparound the producer
//! can reach a slot whose previous occupant is claimed but not yet cleared;
//! overwriting it would destroy a value mid-read. That window surfaces as the
//! transient [`PushError::SlotBusyReading`]. Consumers have no such window:
//! the producer publishes a slot before advancing `tail`, so any position won
//! by a consumer is already readable.
//!
//! # Example
//!
//! ```
//! use quadring::spmc;
//!
//! let (tx, rx) = spmc::channel::<u64>(1024);
//!
//! tx.push(1).unwrap();
//! tx.push(2).unwrap();
//!
//! let rx2 = rx.clone();
//! assert!(rx.pop().is_ok());
//! assert!(rx2.pop().is_ok());
//! ```
//!
//! # Thread safety
//!
//! [`Producer`] is `Send` but neither `Sync` nor `Clone`. [`Consumer`] is
//! `Clone + Send + Sync`: hand one to each reader thread.

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

/// Write end of the queue. Exactly one exists per channel.
pub struct Producer<T: Send> {
    ring: Arc<Ring<T>>,
    _unsync: PhantomUnsync,
}

/// Read end of the queue. Clone one per consumer thread.
pub struct Consumer<T: Send> {
    ring: Arc<Ring<T>>,
}

impl<T: Send> Clone for Consumer<T> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
        }
    }
}

/// Creates a single-producer multi-consumer channel with the given capacity.
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
    trace::debug!(capacity, "spmc channel created");

    (
        Producer {
            ring: Arc::clone(&ring),
            _unsync: PhantomData,
        },
        Consumer { ring },
    )
}

impl<T: Send> Producer<T> {
    /// Attempts to enqueue a value.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Full`] with the value when the buffer is at
    /// capacity, or [`PushError::SlotBusyReading`] when the target slot's
    /// previous occupant is claimed by a consumer that has not finished
    /// draining it. The latter is transient: that consumer's progress is the
    /// only thing awaited.
    #[inline]
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        let ring = &*self.ring;
        let capacity = ring.capacity as u64;
        let tail = ring.tail.pos.load(Ordering::Relaxed);
        let head = ring.head.pos.load(Ordering::Acquire);

        if tail.wrapping_sub(head) >= capacity {
            return Err(PushError::Full(value));
        }

        let slot = &ring.slots[(tail % capacity) as usize];
        if slot.distance_from_empty(tail) != 0 {
            // The previous cycle's consumer reserved the slot but has not
            // cleared it yet; overwriting now would race its read.
            return Err(PushError::SlotBusyReading(value));
        }

        // SAFETY: this handle is the only producer and the occupancy check
        // above observed the drained state with acquire ordering.
        unsafe { slot.fill(tail, value) };

        // Publish the slot before consumers can reserve it.
        ring.tail.pos.store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
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
    /// Lock-free under consumer contention: a lost cursor race is retried
    /// internally with a spin hint, never surfaced.
    ///
    /// # Errors
    ///
    /// Returns [`PopError::Empty`] when no value is enqueued. No other
    /// failure exists in this variant.
    #[inline]
    pub fn pop(&self) -> Result<T, PopError> {
        let ring = &*self.ring;
        let capacity = ring.capacity as u64;

        loop {
            let head = ring.head.pos.load(Ordering::Relaxed);
            let tail = ring.tail.pos.load(Ordering::Acquire);

            if tail == head {
                return Err(PopError::Empty);
            }

            if ring
                .head
                .pos
                .compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                let slot = &ring.slots[(head % capacity) as usize];
                debug_assert_eq!(slot.distance_from_full(head), 0);
                // SAFETY: the CAS makes this thread the sole owner of cursor
                // value `head`, and the producer published the slot before
                // advancing `tail` past it (ordered by the acquire load).
                let value = unsafe { slot.take(head, capacity) };
                return Ok(value);
            }

            // Another consumer won this position; take a fresh snapshot.
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
