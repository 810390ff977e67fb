//! Lock-free multi-producer multi-consumer ring buffer.
//!
//! The fully concurrent member of the family: both sides reserve cursor
//! positions with a compare-and-swap, so both transient contention windows
//! exist. Reserving a position and completing the slot handoff are separate
//! steps, and the other side can observe the gap between them:
//!
//! - a producer reaching a slot whose previous occupant is claimed but not
//!   yet drained fails with [`PushError::SlotBusyReading`];
//! - a consumer reaching a slot that is reserved but not yet published fails
//!   with [`PopError::SlotBusyWriting`].
//!
//! Both are surfaced immediately rather than absorbed by an internal spin;
//! [`is_transient`](PopError::is_transient) distinguishes them from genuine
//! `Full`/`Empty` backpressure.
//!
//! The occupancy word carries the cursor cycle, not just an empty/full flag.
//! A consumer advances `head` before it finishes clearing its slot, so with a
//! bare flag a second consumer arriving one wrap later could mistake the
//! previous cycle's still-present value for its own and deliver it twice. The
//! cycle tag makes every wrap's states distinct, for every capacity down
//! to 1.
//!
//! # Example
//!
//! ```
//! use quadring::mpmc;
//!
//! let (tx, rx) = mpmc::channel::<u64>(1024);
//!
//! let tx2 = tx.clone();
//! let rx2 = rx.clone();
//! tx.push(1).unwrap();
//! tx2.push(2).unwrap();
//!
//! assert!(rx.pop().is_ok());
//! assert!(rx2.pop().is_ok());
//! ```
//!
//! # Thread safety
//!
//! Both [`Producer`] and [`Consumer`] are `Clone + Send + Sync`.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::error::{PopError, PushError};
use crate::ring::{self, Cursor, RingBuffer, RingConsumer, RingProducer, Slot};
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

/// Creates a multi-producer multi-consumer channel with the given capacity.
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
    trace::debug!(capacity, "mpmc channel created");

    (
        Producer {
            ring: Arc::clone(&ring),
        },
        Consumer { ring },
    )
}

impl<T: Send> Producer<T> {
    /// Attempts to enqueue a value.
    ///
    /// Lock-free under producer contention: a lost cursor race or a stale
    /// cursor snapshot is retried internally with a spin hint.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::Full`] with the value when the buffer is at
    /// capacity, or [`PushError::SlotBusyReading`] when the target slot's
    /// previous occupant is claimed by a consumer that has not finished
    /// draining it.
    #[inline]
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        let ring = &*self.ring;
        let capacity = ring.capacity as u64;

        loop {
            let head = ring.head.pos.load(Ordering::Acquire);
            let tail = ring.tail.pos.load(Ordering::Acquire);

            // `>=` rather than `==`: competing producers may have advanced
            // `tail` past a momentarily stale `head` snapshot.
            if tail.wrapping_sub(head) >= capacity {
                return Err(PushError::Full(value));
            }

            let slot = &ring.slots[(tail % capacity) as usize];
            let distance = slot.distance_from_empty(tail);

            if distance > 0 {
                // The `tail` snapshot is stale: this cycle was already
                // claimed by another producer. Take a fresh snapshot.
                std::hint::spin_loop();
                continue;
            }
            if distance < 0 {
                // The previous cycle's consumer reserved the slot but has
                // not cleared it yet; overwriting now would race its read.
                return Err(PushError::SlotBusyReading(value));
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
                // SAFETY: the CAS makes this thread the sole owner of cursor
                // value `tail`, and the occupancy check above observed the
                // drained state with acquire ordering.
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
    /// Lock-free under consumer contention: a lost cursor race or a stale
    /// cursor snapshot is retried internally with a spin hint.
    ///
    /// # Errors
    ///
    /// Returns [`PopError::Empty`] when no value is enqueued, or
    /// [`PopError::SlotBusyWriting`] when the next position is reserved but
    /// its value is not published yet.
    #[inline]
    pub fn pop(&self) -> Result<T, PopError> {
        let ring = &*self.ring;
        let capacity = ring.capacity as u64;

        loop {
            let head = ring.head.pos.load(Ordering::Acquire);
            let tail = ring.tail.pos.load(Ordering::Acquire);

            if tail == head {
                return Err(PopError::Empty);
            }

            let slot = &ring.slots[(head % capacity) as usize];
            let distance = slot.distance_from_full(head);

            if distance > 0 {
                // The `head` snapshot is stale: this cycle was already taken
                // by another consumer. Take a fresh snapshot.
                std::hint::spin_loop();
                continue;
            }
            if distance < 0 {
                // The winning producer has reserved this position but not
                // yet published its value.
                return Err(PopError::SlotBusyWriting);
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
                // SAFETY: the CAS makes this thread the sole owner of cursor
                // value `head`, and the occupancy check above observed the
                // published state with acquire ordering.
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
