//! The consumer-ownership handle.
//!
//! At most one [`Owner`] exists for a given [`BufRing`] at any moment; it is
//! minted only by `BufRing::enqueue` (on a handoff), `BufRing::lock`, or
//! `BufRing::trylock`. There is no public constructor, so holding one *is*
//! holding ownership — the `debug_assert!`-guarded contracts below are the
//! only checks left to runtime.

use std::cell::Cell;
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering;

use crate::invariants::{
    debug_assert_advance_within_peeked, debug_assert_peek_nonempty, debug_assert_slot_nonnull,
};
use crate::ring::{index_of, BufRing, UnlockReason, CONS_ABDICATING, INDEX_MASK};

/// The handle granted to whichever thread currently owns a ring's consumer
/// side. Only reachable through [`BufRing::enqueue`]'s `OkNowOwner` variant,
/// [`BufRing::lock`], or [`BufRing::trylock`].
///
/// Dropping an `Owner` without calling [`Owner::unlock`] releases ownership
/// as if `unlock(UnlockReason::Normal)` had been called — this makes
/// ownership release panic-safe: a panic while draining the ring still
/// leaves it in a state the next producer can take over.
pub struct Owner<'a, T> {
    ring: &'a BufRing<T>,
    last_peeked: Cell<usize>,
}

impl<'a, T> Owner<'a, T> {
    pub(crate) fn new(ring: &'a BufRing<T>) -> Self {
        Owner {
            ring,
            last_peeked: Cell::new(0),
        }
    }

    /// Copies up to `out.len()` live payload pointers into `out`, starting
    /// from the oldest, without removing them from the ring. Returns the
    /// number of pointers written.
    ///
    /// If `pending_buf` holds a handed-off item, it is always `out[0]`.
    pub fn peek(&self, out: &mut [NonNull<T>]) -> usize {
        debug_assert_peek_nonempty!(out.len());
        if out.is_empty() {
            return 0;
        }

        let mut written = 0;
        let pending = self.ring.pending_ptr();
        if !pending.is_null() {
            debug_assert_slot_nonnull!(pending);
            out[0] = unsafe { NonNull::new_unchecked(pending) };
            written = 1;
        }

        if written < out.len() {
            let cons = index_of(self.ring.cons_word_relaxed());
            let tail = self.ring.prod_tail_acquire();
            let mask = self.ring.config().mask();
            let avail = tail.wrapping_sub(cons) & mask;

            let mut i = 0u32;
            while written < out.len() && i < avail {
                let idx = (cons.wrapping_add(i)) & mask;
                let raw = self.ring.slot_load(idx);
                debug_assert_slot_nonnull!(raw);
                out[written] = unsafe { NonNull::new_unchecked(raw) };
                written += 1;
                i += 1;
            }
        }

        self.last_peeked.set(written);
        written
    }

    /// Retires the first `k` items most recently returned by [`Owner::peek`].
    ///
    /// Clears the retired slots to `null` (proving the read has completed
    /// and giving the next producer a clean slot to reuse) and publishes the
    /// new consumer index with a release store.
    pub fn advance(&self, k: usize) {
        debug_assert_advance_within_peeked!(k, self.last_peeked.get());
        if k == 0 {
            return;
        }

        let mask = self.ring.config().mask();
        let cons = index_of(self.ring.cons_word_relaxed());

        let pending = self.ring.pending_ptr();
        let slots_to_clear = if !pending.is_null() {
            unsafe {
                self.ring.set_pending_ptr(ptr::null_mut());
            }
            k - 1
        } else {
            k
        };
        for i in 0..slots_to_clear as u32 {
            let idx = (cons.wrapping_add(i)) & mask;
            self.ring.slot_store(idx, ptr::null_mut());
        }

        let new_cons_idx = (cons.wrapping_add(slots_to_clear as u32)) & mask;
        let cur = self.ring.cons_word_relaxed();
        let new_word = (cur & !INDEX_MASK) | new_cons_idx;
        self.ring.cons_word_store(new_word, Ordering::Release);

        self.last_peeked.set(self.last_peeked.get() - k);
    }

    /// Replaces the payload pointer at peek-relative `index` with `new_item`
    /// without retiring it. `index == 0` and a pending handoff item both
    /// means: rewrite `pending_buf` instead of a ring slot.
    pub fn putback(&self, new_item: NonNull<T>, index: usize) {
        let pending = self.ring.pending_ptr();
        if index == 0 && !pending.is_null() {
            unsafe {
                self.ring.set_pending_ptr(new_item.as_ptr());
            }
        } else {
            let cons = index_of(self.ring.cons_word_relaxed());
            let mask = self.ring.config().mask();
            let idx = cons.wrapping_add(index as u32) & mask;
            self.ring.slot_store(idx, new_item.as_ptr());
        }
    }

    /// Marks the ring as abdicating: future producers latch `PENDING` and
    /// may take over ownership directly through `pending_buf` instead of
    /// waiting for `unlock`. Idempotent — a second call while already
    /// abdicating does not double-count the statistic.
    pub fn abdicate(&self) {
        let cur = self.ring.cons_word_relaxed();
        if cur & CONS_ABDICATING == 0 {
            self.ring
                .cons_word_store(cur | CONS_ABDICATING, Ordering::Release);
            self.ring.stats_ref().abdications.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Releases ownership for the given `reason`, consuming the handle.
    ///
    /// Returns `true` if a producer had already latched `PENDING` at the
    /// moment of release — that producer is the next owner, with no
    /// further `lock`/`trylock` call required on its part.
    pub fn unlock(self, reason: UnlockReason) -> bool {
        let pending = self.ring.unlock_inner(reason);
        mem::forget(self);
        pending
    }
}

impl<'a, T> Drop for Owner<'a, T> {
    fn drop(&mut self) {
        self.ring.unlock_inner(UnlockReason::Normal);
    }
}
