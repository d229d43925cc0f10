use thiserror::Error;

/// Construction-time failures for [`BufRing`](crate::BufRing).
///
/// The ring's steady-state operations (`enqueue`, `peek`, `advance`, ...)
/// never fail: a full ring is a status (`EnqueueOutcome::Full`), not an
/// error, and a contract violation (e.g. advancing past what was peeked)
/// is a programmer bug caught by a `debug_assert!`, not a recoverable
/// condition. `RingError` exists only for parameters the caller supplies
/// before any ring exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("ring capacity must be a power of two in [2, {max}], got {capacity}")]
    InvalidCapacity { capacity: u32, max: u32 },
}
