//! A lock-free, multi-producer, single-owner-at-a-time ring buffer of
//! payload pointers, with ownership of the consumer side handed directly
//! between producer threads.
//!
//! This is the software side of a network-interface driver's per-queue
//! transmit ring: producers (protocol stack threads, one per CPU) push
//! packet pointers with [`BufRing::enqueue`]; whichever producer happens to
//! be the one that makes the ring go from empty to non-empty becomes
//! responsible for draining it (feeding the NIC's hardware descriptor ring)
//! until it explicitly steps down or another producer forces its way in.
//! There is never a dedicated consumer thread — "consumer" is a role any
//! producer can pick up.
//!
//! The algorithm is a direct port of FreeBSD's `buf_ring_sc` (the
//! single-consumer variant of `subr_bufring.c`, as used by `iflib.c`), with
//! the ownership and index state packed into two 32-bit atomics
//! (`prod_word`, `cons_word`) rather than the spinlock-protected bitfields
//! of the kernel original.
//!
//! ```
//! use bufring::{BufRing, EnqueueOutcome, RingConfig, UnlockReason};
//! use std::ptr::NonNull;
//!
//! let ring: BufRing<u64> = BufRing::alloc(RingConfig::new(1024, false).unwrap());
//!
//! let mut packet = 7u64;
//! match ring.enqueue(NonNull::new(&mut packet).unwrap()) {
//!     EnqueueOutcome::OkNowOwner(owner) => {
//!         let mut batch = [NonNull::dangling(); 8];
//!         let n = owner.peek(&mut batch);
//!         // ... hand batch[..n] to the device ...
//!         owner.advance(n);
//!         owner.unlock(UnlockReason::Idle);
//!     }
//!     _ => {}
//! }
//! ```

mod backoff;
mod config;
mod error;
mod invariants;
mod owner;
mod ring;
mod stats;

pub use backoff::Backoff;
pub use config::{high_throughput_config, low_latency_config, RingConfig};
pub use error::RingError;
pub use owner::Owner;
pub use ring::{BufRing, EnqueueOutcome, UnlockReason};
pub use stats::StatsSnapshot;
