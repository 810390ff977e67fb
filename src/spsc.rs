//! Lock-free single-producer single-consumer ring buffer.
//!
//! The simplest member of the family: with exactly one thread per side there
//! is no contention on either cursor, so neither side ever needs a
//! compare-and-swap. The only cross-thread hazard is cursor visibility, which
//! a release store on the advancing side and an acquire load on the observing
//! side fully resolve. Slots carry no occupancy word; the cursors alone order
//! every slot access, and neither `SlotBusy` error can occur.
//!
//! Each side additionally keeps a private cache of the far cursor and only
//! re-reads the shared atomic when the cached value makes the ring look full
//! (producer) or empty (consumer). A full-looking cache can only
//! underestimate the far side's progress, so the refresh-and-recheck is the
//! sole place a definitive `Full`/`Empty` verdict is made.
//!
//! # Example
//!
//! ```
//! use quadring::spsc;
//!
//! let (tx, rx) = spsc::channel::<u64>(1024);
//!
//! // Producer thread
//! tx.push(42).unwrap();
//!
//! // Consumer thread
//! assert_eq!(rx.pop().unwrap(), 42);
//! ```
//!
//! # Thread safety
//!
//! [`Producer`] and [`Consumer`] are [`Send`] but neither [`Sync`] nor
//! [`Clone`]: each end can move to another thread, but a second concurrent
//! producer or consumer cannot be created.

use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{PopError, PushError};
use crate::ring::{self, PhantomUnsync, ProtocolCell, RingBuffer, RingConsumer, RingProducer};
use crate::trace;

/// Producer-side state: the write cursor and a cache of the read cursor.
#[repr(C, align(64))]
struct ProducerState {
    /// Next position to write. Owned by the producer, observed by the consumer.
    tail: AtomicU64,
    /// Producer-private snapshot of `head`, refreshed on apparent fullness.
    cached_head: ProtocolCell<u64>,
}

impl ProducerState {
    const fn new() -> Self {
        Self {
            tail: AtomicU64::new(0),
            cached_head: ProtocolCell::new(0),
        }
    }
}

/// Consumer-side state: the read cursor and a cache of the write cursor.
#[repr(C, align(64))]
struct ConsumerState {
    /// Next position to read. Owned by the consumer, observed by the producer.
    head: AtomicU64,
    /// Consumer-private snapshot of `tail`, refreshed on apparent emptiness.
    cached_tail: ProtocolCell<u64>,
}

impl ConsumerState {
    const fn new() -> Self {
        Self {
            head: AtomicU64::new(0),
            cached_tail: ProtocolCell::new(0),
        }
    }
}

/// Heap ring shared by the two handles.
struct Ring<T> {
    producer: ProducerState,
    consumer: ConsumerState,
    capacity: usize,
    slots: Box<[ProtocolCell<MaybeUninit<T>>]>,
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let head = self.consumer.head.load(Ordering::Relaxed);
        let tail = self.producer.tail.load(Ordering::Relaxed);
        let mut pos = head;
        while pos != tail {
            let idx = (pos % self.capacity as u64) as usize;
            // SAFETY: teardown holds exclusive access, and every position in
            // [head, tail) was written by a completed push.
            unsafe { (*self.slots[idx].get()).assume_init_drop() };
            pos = pos.wrapping_add(1);
        }
    }
}

/// Write end of the queue. Exactly one exists per channel.
pub struct Producer<T: Send> {
    ring: Arc<Ring<T>>,
    _unsync: PhantomUnsync,
}

/// Read end of the queue. Exactly one exists per channel.
pub struct Consumer<T: Send> {
    ring: Arc<Ring<T>>,
    _unsync: PhantomUnsync,
}

/// Creates a single-producer single-consumer channel with the given capacity.
///
/// # Panics
///
/// Panics if `capacity` is zero.
#[must_use]
pub fn channel<T: Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    ring::validate_capacity(capacity);

    let slots = (0..capacity)
        .map(|_| ProtocolCell::new(MaybeUninit::uninit()))
        .collect();
    let ring = Arc::new(Ring {
        producer: ProducerState::new(),
        consumer: ConsumerState::new(),
        capacity,
        slots,
    });
    trace::debug!(capacity, "spsc channel created");

    (
        Producer {
            ring: Arc::clone(&ring),
            _unsync: PhantomData,
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
    /// # Errors
    ///
    /// Returns [`PushError::Full`] with the value when the buffer is at
    /// capacity. No other failure exists in this variant.
    #[inline]
    pub fn push(&self, value: T) -> Result<(), PushError<T>> {
        let ring = &*self.ring;
        let capacity = ring.capacity as u64;
        let tail = ring.producer.tail.load(Ordering::Relaxed);

        // SAFETY: this handle is unique and !Sync, so only this thread ever
        // touches the producer-side cache.
        let mut head = unsafe { *ring.producer.cached_head.get() };
        if tail.wrapping_sub(head) >= capacity {
            head = ring.consumer.head.load(Ordering::Acquire);
            // SAFETY: as above.
            unsafe { *ring.producer.cached_head.get() = head };
            if tail.wrapping_sub(head) >= capacity {
                return Err(PushError::Full(value));
            }
        }

        let idx = (tail % capacity) as usize;
        // SAFETY: the fullness check proved the consumer has drained cycle
        // `tail - capacity` of this slot, and `tail` is unpublished, so no
        // other thread can touch the slot until the release store below.
        unsafe { (*ring.slots[idx].get()).write(value) };

        ring.producer
            .tail
            .store(tail.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Number of values currently enqueued. Best-effort snapshot.
    pub fn len(&self) -> usize {
        let ring = &*self.ring;
        ring::occupancy(&ring.consumer.head, &ring.producer.tail, ring.capacity)
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
    /// Returns [`PopError::Empty`] when no value is enqueued. No other
    /// failure exists in this variant.
    #[inline]
    pub fn pop(&self) -> Result<T, PopError> {
        let ring = &*self.ring;
        let head = ring.consumer.head.load(Ordering::Relaxed);

        // SAFETY: this handle is unique and !Sync, so only this thread ever
        // touches the consumer-side cache.
        let mut tail = unsafe { *ring.consumer.cached_tail.get() };
        if tail == head {
            tail = ring.producer.tail.load(Ordering::Acquire);
            // SAFETY: as above.
            unsafe { *ring.consumer.cached_tail.get() = tail };
            if tail == head {
                return Err(PopError::Empty);
            }
        }

        let idx = (head % ring.capacity as u64) as usize;
        // SAFETY: head < tail, so the producer published this slot (the
        // acquire load of `tail` ordered the payload write before this read),
        // and it will not overwrite it until `head` advances.
        let value = unsafe { (*ring.slots[idx].get()).assume_init_read() };

        ring.consumer
            .head
            .store(head.wrapping_add(1), Ordering::Release);
        Ok(value)
    }

    /// Number of values currently enqueued. Best-effort snapshot.
    pub fn len(&self) -> usize {
        let ring = &*self.ring;
        ring::occupancy(&ring.consumer.head, &ring.producer.tail, ring.capacity)
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

    #[test]
    fn basic_push_pop() {
        let (tx, rx) = channel::<u64>(8);

        assert!(tx.push(42).is_ok());
        assert_eq!(rx.pop(), Ok(42));
        assert_eq!(rx.pop(), Err(PopError::Empty));
    }

    #[test]
    fn fill_then_drain_in_order() {
        let (tx, rx) = channel::<u64>(16);

        for i in 0..10 {
            assert!(tx.push(i).is_ok());
        }
        for i in 0..10 {
            assert_eq!(rx.pop(), Ok(i));
        }
        assert_eq!(rx.pop(), Err(PopError::Empty));
    }

    #[test]
    fn full_returns_value() {
        let (tx, rx) = channel::<u64>(4);

        for i in 0..4 {
            assert!(tx.push(i).is_ok(), "failed to push item {i}");
        }
        assert_eq!(tx.push(999), Err(PushError::Full(999)));

        assert_eq!(rx.pop(), Ok(0));
        assert!(tx.push(4).is_ok());
        assert_eq!(tx.push(1000), Err(PushError::Full(1000)));
    }

    #[test]
    fn sixteen_slots_thirty_two_pushes() {
        let (tx, rx) = channel::<u32>(16);

        for i in 0..32 {
            let outcome = tx.push(i);
            if i < 16 {
                assert!(outcome.is_ok());
            } else {
                assert_eq!(outcome, Err(PushError::Full(i)));
            }
        }
        assert_eq!(tx.len(), 16);
        assert_eq!(rx.len(), 16);

        for i in 0..16 {
            assert_eq!(rx.pop(), Ok(i));
        }
        assert_eq!(rx.pop(), Err(PopError::Empty));
        assert_eq!(tx.len(), 0);
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
    fn interleaved_operations() {
        let (tx, rx) = channel::<u64>(8);

        tx.push(1).unwrap();
        tx.push(2).unwrap();
        assert_eq!(rx.pop(), Ok(1));
        tx.push(3).unwrap();
        assert_eq!(rx.pop(), Ok(2));
        assert_eq!(rx.pop(), Ok(3));
        assert_eq!(rx.pop(), Err(PopError::Empty));
    }

    #[test]
    fn capacity_one() {
        let (tx, rx) = channel::<u8>(1);

        for round in 0..10 {
            assert!(tx.push(round).is_ok());
            assert_eq!(tx.push(99), Err(PushError::Full(99)));
            assert_eq!(rx.pop(), Ok(round));
            assert_eq!(rx.pop(), Err(PopError::Empty));
        }
    }

    #[test]
    fn absent_values_round_trip() {
        let (tx, rx) = channel::<Option<String>>(4);

        tx.push(None).unwrap();
        tx.push(Some("present".to_string())).unwrap();

        assert_eq!(rx.pop(), Ok(None));
        assert_eq!(rx.pop(), Ok(Some("present".to_string())));
    }

    #[test]
    fn concurrent_fifo() {
        let (tx, rx) = channel::<u64>(64);
        let count = 10_000u64;

        let producer = std::thread::spawn(move || {
            for i in 0..count {
                let mut item = i;
                while let Err(err) = tx.push(item) {
                    item = err.into_inner();
                    std::hint::spin_loop();
                }
            }
        });

        let consumer = std::thread::spawn(move || {
            let mut next = 0u64;
            while next < count {
                match rx.pop() {
                    Ok(value) => {
                        assert_eq!(value, next);
                        next += 1;
                    }
                    Err(PopError::Empty) => std::hint::spin_loop(),
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
        });

        producer.join().unwrap();
        consumer.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn zero_capacity_panics() {
        let _ = channel::<u64>(0);
    }
}
