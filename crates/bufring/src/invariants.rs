//! Debug assertion macros for the ring's ownership-handoff invariants.
//!
//! Active only under `#[cfg(debug_assertions)]`; zero overhead in release
//! builds. Each macro documents the single invariant it checks.

// =============================================================================
// INV-OWN-01: Ownership mutual exclusion
// =============================================================================

/// Assert that at most one producer observes itself becoming owner for a
/// given reservation.
///
/// **Invariant**: `OWNED` transitions from clear to set at most once per
/// handoff; a second producer racing the same transition must see the bit
/// already set and take the "preserve flags" branch instead.
///
/// Used in: `BufRing::enqueue` after the reservation CAS succeeds.
macro_rules! debug_assert_single_new_owner {
    ($became_owner:expr, $already_owned:expr) => {
        debug_assert!(
            !($became_owner && $already_owned),
            "INV-OWN-01 violated: became owner while ring already reported OWNED"
        )
    };
}

// =============================================================================
// INV-FULL-01: Bounded count
// =============================================================================

/// Assert the live item count never exceeds `capacity - 1`.
///
/// **Invariant**: `0 <= count(ring) <= capacity - 1` (one slot is always
/// kept empty to disambiguate full from empty).
///
/// Used in: `BufRing::enqueue` after publishing `prod_tail`.
macro_rules! debug_assert_bounded_count {
    ($count:expr, $capacity:expr) => {
        debug_assert!(
            $count < $capacity,
            "INV-FULL-01 violated: count {} not below capacity {}",
            $count,
            $capacity
        )
    };
}

// =============================================================================
// INV-PEEK-01: Non-zero peek request
// =============================================================================

/// Assert that a peek request asks for at least one slot.
///
/// **Invariant**: `peek` with a zero-length output buffer is a caller bug,
/// not a degenerate no-op.
///
/// Used in: `Owner::peek`.
macro_rules! debug_assert_peek_nonempty {
    ($out_len:expr) => {
        debug_assert!($out_len > 0, "INV-PEEK-01 violated: peek called with an empty output buffer")
    };
}

// =============================================================================
// INV-ADV-01: Advance within what was peeked
// =============================================================================

/// Assert that `advance` never retires more items than the most recent
/// `peek` observed.
///
/// **Invariant**: `k <= last_peeked`
///
/// Used in: `Owner::advance`.
macro_rules! debug_assert_advance_within_peeked {
    ($k:expr, $last_peeked:expr) => {
        debug_assert!(
            $k <= $last_peeked,
            "INV-ADV-01 violated: advance({}) exceeds {} items observed via peek",
            $k,
            $last_peeked
        )
    };
}

// =============================================================================
// INV-PTR-01: Slot pointer validity
// =============================================================================

/// Assert that a slot read back during `peek` holds a non-null payload
/// pointer.
///
/// **Invariant**: every slot in `[cons, prod_tail)` holds a non-null pointer.
///
/// Used in: `Owner::peek`.
macro_rules! debug_assert_slot_nonnull {
    ($ptr:expr) => {
        debug_assert!(!$ptr.is_null(), "INV-PTR-01 violated: null payload pointer inside the live range")
    };
}

pub(crate) use debug_assert_advance_within_peeked;
pub(crate) use debug_assert_bounded_count;
pub(crate) use debug_assert_peek_nonempty;
pub(crate) use debug_assert_single_new_owner;
pub(crate) use debug_assert_slot_nonnull;
