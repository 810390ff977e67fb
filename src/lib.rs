//! Bounded lock-free ring buffers, one variant per producer/consumer
//! cardinality.
//!
//! Every variant is a fixed-capacity circular buffer handing values between
//! threads without locks: producers reserve a write cursor position, fill the
//! slot, and publish it; consumers reserve a read cursor position, take the
//! value, and release the slot. The variants differ only in which side needs a
//! compare-and-swap to reserve its cursor:
//!
//! | Module | Producers | Consumers | Reservation |
//! |---|---|---|---|
//! | [`spsc`] | 1 | 1 | plain store on both cursors |
//! | [`mpsc`] | many | 1 | CAS on the write cursor |
//! | [`spmc`] | 1 | many | CAS on the read cursor |
//! | [`mpmc`] | many | many | CAS on both cursors |
//!
//! Cardinality is enforced at the type level: each variant's
//! [`channel`](spsc::channel) constructor returns a `(Producer, Consumer)`
//! pair, and only the handles on a "multi" side are `Clone + Sync`.
//!
//! No operation blocks, parks, or sleeps. Backpressure and transient slot
//! contention are surfaced as [`PushError`]/[`PopError`] values and the caller
//! decides how to back off; see [`error`] for the full taxonomy.
//!
//! # Example
//!
//! ```
//! use quadring::mpmc;
//!
//! let (tx, rx) = mpmc::channel::<u64>(8);
//!
//! tx.push(7).unwrap();
//! tx.push(11).unwrap();
//!
//! assert_eq!(rx.pop().unwrap(), 7);
//! assert_eq!(rx.pop().unwrap(), 11);
//! assert!(rx.pop().is_err());
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod mpmc;
pub mod mpsc;
pub mod spmc;
pub mod spsc;
pub mod trace;

mod ring;

pub use error::{PopError, PushError};
pub use ring::{RingBuffer, RingConsumer, RingProducer};
