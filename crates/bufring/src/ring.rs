//! The shared ring: slot storage, the packed atomic producer/consumer words,
//! and the enqueue/lock state machine.
//!
//! Grounded directly in FreeBSD's `buf_ring_sc` (`subr_bufring.c`): a single
//! bounded array of payload pointers, a CAS-reserved `prod_head`/published
//! `prod_tail` pair on the producer side, and a `cons_word` carrying both the
//! consumer's read index and the sticky `IDLE`/`STALLED`/`ABDICATING` flags
//! that drive ownership handoff between producer threads.

use std::hint;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crossbeam_utils::CachePadded;

use crate::backoff::Backoff;
use crate::config::RingConfig;
use crate::invariants::{debug_assert_bounded_count, debug_assert_single_new_owner};
use crate::owner::Owner;
use crate::stats::{Stats, StatsSnapshot};

// Index occupies the low 28 bits of both prod_word and cons_word; the
// remaining 4 bits carry state flags. Producer and consumer assign different
// meanings to bits 29-31 since the two words are never compared bitwise
// against each other, only their index portions.
pub(crate) const INDEX_BITS: u32 = 28;
pub(crate) const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;

pub(crate) const PROD_OWNED: u32 = 1 << 28;
pub(crate) const PROD_PENDING: u32 = 1 << 30;

pub(crate) const CONS_IDLE: u32 = 1 << 29;
pub(crate) const CONS_STALLED: u32 = 1 << 30;
pub(crate) const CONS_ABDICATING: u32 = 1 << 31;

// The pair of sticky flags that make a producer eligible to latch PENDING
// and take over ownership without waiting for a full unlock/lock cycle.
const CONS_HANDOFF_MASK: u32 = CONS_IDLE | CONS_ABDICATING;
const CONS_STICKY_MASK: u32 = CONS_IDLE | CONS_STALLED | CONS_ABDICATING;

const CACHE_LINE: usize = 64;

#[inline]
pub(crate) fn index_of(word: u32) -> u32 {
    word & INDEX_MASK
}

#[inline]
fn flags_of(word: u32) -> u32 {
    word & !INDEX_MASK
}

/// Outcome of a call to [`BufRing::enqueue`].
///
/// Carries the ownership capability as data rather than leaving the caller
/// to separately ask "am I the owner now?" — when the variant is
/// `OkNowOwner`, the enclosed [`Owner`] is the only way to reach
/// `peek`/`advance`/`putback`/`abdicate`/`unlock`.
pub enum EnqueueOutcome<'a, T> {
    /// Enqueued; ring was already owned by another producer (or is
    /// currently stalled/not yet claimed by anyone waiting).
    Ok,
    /// Enqueued, and this call became the new owner.
    OkNowOwner(Owner<'a, T>),
    /// Enqueued, but the consumer previously reported `STALLED`; the item is
    /// queued but nobody currently intends to drain it.
    OkStalled,
    /// The ring was full and no pending handoff slot was available.
    Full,
}

/// Reason passed to [`Owner::unlock`], mirroring why a consumer is giving up
/// ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockReason {
    /// No more immediate work; next producer becomes owner as soon as it
    /// tries.
    Idle,
    /// Consumer is shutting down or rotating duty; future producers latch
    /// `PENDING` and take over directly through `pending_buf`.
    Abdicate,
    /// Downstream is backed up; producers keep enqueueing but nobody should
    /// expect prompt draining.
    Stalled,
    /// No sticky state recorded; the next `lock`/`trylock` wins ordinarily.
    Normal,
}

/// Outcome of a preliminary reservation attempt inside `enqueue`'s CAS loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reservation {
    Ok,
    NowOwner,
    Stalled,
}

/// Marker for a region that would be non-preemptible in the kernel original
/// (`critical_enter`/`critical_exit` around the ownership CAS in
/// `buf_ring_sc_unlock`/`buf_ring_sc_lock`). Userspace Rust has no equivalent
/// primitive; this type documents the intent at the call site without
/// attempting to emulate it. It performs no operation.
struct NonPreemptGuard;

impl NonPreemptGuard {
    #[inline]
    fn enter() -> Self {
        NonPreemptGuard
    }
}

/// A lock-free, multi-producer ring buffer of non-null payload pointers with
/// consumer-ownership handoff.
///
/// Producers call [`BufRing::enqueue`]; at any moment at most one thread
/// holds an [`Owner`], the handle needed to drain the ring
/// (`peek`/`advance`/`putback`/`abdicate`/`unlock`). Ownership transfers
/// either explicitly, through `unlock`, or implicitly, when a producer wins
/// the handoff race against an idle or abdicating owner.
///
/// `BufRing` does not take ownership of the pointees: the payload allocator
/// is an external collaborator, and `BufRing<T>` never drops values left in
/// its slots when it itself is dropped (matching `buf_ring_sc_free`, which
/// frees only the ring structure).
pub struct BufRing<T> {
    prod_word: CachePadded<AtomicU32>,
    prod_tail: AtomicU32,
    cons_word: CachePadded<AtomicU32>,
    pending_buf: std::cell::UnsafeCell<*mut T>,
    slots: Box<[AtomicPtr<T>]>,
    scale: usize,
    config: RingConfig,
    stats: Stats,
}

unsafe impl<T: Send> Send for BufRing<T> {}
unsafe impl<T: Send> Sync for BufRing<T> {}

impl<T> BufRing<T> {
    /// Allocates a ring for the given configuration.
    #[must_use]
    pub fn alloc(config: RingConfig) -> Self {
        let scale = if config.align_entries() {
            (CACHE_LINE / std::mem::size_of::<*mut T>()).max(1)
        } else {
            1
        };
        let len = config.capacity() as usize * scale;
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || AtomicPtr::new(ptr::null_mut()));
        Self {
            prod_word: CachePadded::new(AtomicU32::new(0)),
            prod_tail: AtomicU32::new(0),
            cons_word: CachePadded::new(AtomicU32::new(0)),
            pending_buf: std::cell::UnsafeCell::new(ptr::null_mut()),
            slots: slots.into_boxed_slice(),
            scale,
            config,
            stats: Stats::new(),
        }
    }

    /// Convenience constructor combining [`RingConfig::new`] and
    /// [`BufRing::alloc`].
    ///
    /// # Errors
    ///
    /// Returns `Err` if `capacity` is invalid; see [`RingConfig::new`].
    pub fn try_new(capacity: u32, align_entries: bool) -> Result<Self, crate::error::RingError> {
        Ok(Self::alloc(RingConfig::new(capacity, align_entries)?))
    }

    /// Ring slot count.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.config.capacity()
    }

    #[inline]
    fn slot(&self, idx: u32) -> &AtomicPtr<T> {
        &self.slots[idx as usize * self.scale]
    }

    /// Number of live items currently queued.
    #[must_use]
    pub fn count(&self) -> u32 {
        let tail = self.prod_tail.load(Ordering::Acquire);
        let cons = index_of(self.cons_word.load(Ordering::Acquire));
        tail.wrapping_sub(cons) & self.config.mask()
    }

    /// Whether the ring currently holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let tail = self.prod_tail.load(Ordering::Acquire);
        let cons = index_of(self.cons_word.load(Ordering::Acquire));
        tail == cons
    }

    /// Whether the ring is at capacity (one slot is always left unused).
    #[must_use]
    pub fn is_full(&self) -> bool {
        let tail = self.prod_tail.load(Ordering::Acquire);
        let cons = index_of(self.cons_word.load(Ordering::Acquire));
        (tail.wrapping_add(1) & self.config.mask()) == cons
    }

    /// Point-in-time copy of this ring's counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Zeroes all counters.
    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    pub(crate) fn config(&self) -> &RingConfig {
        &self.config
    }

    pub(crate) fn pending_ptr(&self) -> *mut T {
        unsafe { *self.pending_buf.get() }
    }

    pub(crate) unsafe fn set_pending_ptr(&self, ptr: *mut T) {
        *self.pending_buf.get() = ptr;
    }

    pub(crate) fn slot_load(&self, idx: u32) -> *mut T {
        self.slot(idx).load(Ordering::Relaxed)
    }

    pub(crate) fn slot_store(&self, idx: u32, ptr: *mut T) {
        self.slot(idx).store(ptr, Ordering::Relaxed);
    }

    pub(crate) fn cons_word_relaxed(&self) -> u32 {
        self.cons_word.load(Ordering::Relaxed)
    }

    pub(crate) fn cons_word_store(&self, word: u32, order: Ordering) {
        self.cons_word.store(word, order);
    }

    pub(crate) fn prod_tail_acquire(&self) -> u32 {
        self.prod_tail.load(Ordering::Acquire)
    }

    pub(crate) fn stats_ref(&self) -> &Stats {
        &self.stats
    }

    /// Submits `item` for transmission.
    ///
    /// Returns the full four-way outcome described by [`EnqueueOutcome`].
    /// Never blocks indefinitely: the only spin inside this call is the
    /// bounded tail-publication wait (the store just before returning),
    /// which one producer at a time holds for at most as long as it takes
    /// the producer ahead of it to store its own tail value.
    pub fn enqueue(&self, item: ptr::NonNull<T>) -> EnqueueOutcome<'_, T> {
        let _guard = NonPreemptGuard::enter();
        let mask = self.config.mask();

        // Handoff latch: if the owner is idle or abdicating, try to become
        // the one producer allowed to finish this call as the new owner via
        // pending_buf instead of a normal slot write.
        let mut pending = false;
        loop {
            let cons = self.cons_word.load(Ordering::Acquire);
            if cons & CONS_HANDOFF_MASK == 0 {
                break;
            }
            let state = self.prod_word.load(Ordering::Acquire);
            if flags_of(state) != PROD_OWNED {
                break;
            }
            match self.prod_word.compare_exchange(
                state,
                state | PROD_PENDING,
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    pending = true;
                    break;
                }
                Err(_) => continue,
            }
        }

        let mut backoff = Backoff::new();
        let (prod_head, next, status) = loop {
            let prod_head = self.prod_word.load(Ordering::Relaxed);
            let cons = self.cons_word.load(Ordering::Relaxed);
            let pidx = index_of(prod_head);
            let cidx = index_of(cons);
            let next = pidx.wrapping_add(1) & mask;

            if next == cidx {
                let pidx2 = index_of(self.prod_word.load(Ordering::Acquire));
                let cidx2 = index_of(self.cons_word.load(Ordering::Acquire));
                if pidx2 != pidx || cidx2 != cidx {
                    continue;
                }
                if pending {
                    while flags_of(self.prod_word.load(Ordering::Relaxed)) & PROD_OWNED != 0 {
                        hint::spin_loop();
                    }
                    self.prod_word.fetch_or(PROD_OWNED, Ordering::Acquire);
                    self.cons_word
                        .fetch_and(!CONS_HANDOFF_MASK, Ordering::Relaxed);
                    self.prod_word.fetch_and(!PROD_PENDING, Ordering::Release);
                    unsafe {
                        *self.pending_buf.get() = item.as_ptr();
                    }
                    self.stats.enqueues.fetch_add(1, Ordering::Relaxed);
                    log::trace!("enqueue: claimed pending_buf, now owner");
                    return EnqueueOutcome::OkNowOwner(Owner::new(self));
                }
                self.stats.drops.fetch_add(1, Ordering::Relaxed);
                log::trace!("enqueue: ring full, dropping item");
                return EnqueueOutcome::Full;
            }

            if pending {
                while flags_of(self.prod_word.load(Ordering::Relaxed)) & PROD_OWNED != 0 {
                    hint::spin_loop();
                }
            }

            let (flag_bits, status) = if cons & CONS_STALLED != 0 {
                (flags_of(prod_head), Reservation::Stalled)
            } else if pending {
                (PROD_OWNED | PROD_PENDING, Reservation::NowOwner)
            } else if flags_of(prod_head) & PROD_OWNED == 0 {
                (PROD_OWNED, Reservation::NowOwner)
            } else {
                (flags_of(prod_head), Reservation::Ok)
            };
            let new_word = next | flag_bits;

            match self.prod_word.compare_exchange(
                prod_head,
                new_word,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    debug_assert_single_new_owner!(
                        status == Reservation::NowOwner,
                        flags_of(prod_head) & PROD_OWNED != 0
                    );
                    break (prod_head, next, status);
                }
                Err(_) => {
                    backoff.spin();
                    continue;
                }
            }
        };

        let pidx = index_of(prod_head);

        if status == Reservation::NowOwner {
            self.cons_word
                .fetch_and(!CONS_STICKY_MASK, Ordering::Relaxed);
        }
        if pending {
            self.prod_word.fetch_and(!PROD_PENDING, Ordering::Release);
        }

        self.slot(pidx).store(item.as_ptr(), Ordering::Relaxed);

        while self.prod_tail.load(Ordering::Relaxed) != pidx {
            hint::spin_loop();
        }
        self.prod_tail.store(next, Ordering::Release);

        self.stats.enqueues.fetch_add(1, Ordering::Relaxed);
        debug_assert_bounded_count!(self.count(), self.config.capacity());

        match status {
            Reservation::NowOwner => {
                log::trace!("enqueue: acquired ownership");
                EnqueueOutcome::OkNowOwner(Owner::new(self))
            }
            Reservation::Stalled => EnqueueOutcome::OkStalled,
            Reservation::Ok => EnqueueOutcome::Ok,
        }
    }

    /// Unconditionally takes ownership, blocking until any current owner
    /// releases it. Intended for administrative use (initial startup,
    /// recovery after a stall) — the only call in this crate allowed to
    /// busy-spin without a bound.
    #[must_use]
    pub fn lock(&self) -> Owner<'_, T> {
        let _guard = NonPreemptGuard::enter();
        let mut backoff = Backoff::new();
        loop {
            let value = self.prod_word.load(Ordering::Relaxed);
            if value & PROD_PENDING == 0
                && self
                    .prod_word
                    .compare_exchange(
                        value,
                        value | PROD_PENDING,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            {
                break;
            }
            backoff.snooze();
        }

        let mut backoff = Backoff::new();
        loop {
            let value = self.prod_word.load(Ordering::Relaxed);
            if value & PROD_OWNED == 0
                && self
                    .prod_word
                    .compare_exchange(
                        value,
                        value | PROD_OWNED,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    )
                    .is_ok()
            {
                break;
            }
            backoff.snooze();
        }

        let cons = self.cons_word.load(Ordering::Relaxed);
        if cons & CONS_IDLE != 0 {
            self.stats.starts.fetch_add(1, Ordering::Relaxed);
        } else if cons & CONS_STALLED != 0 {
            self.stats.restarts.fetch_add(1, Ordering::Relaxed);
        }
        self.cons_word
            .fetch_and(!CONS_STICKY_MASK, Ordering::Relaxed);
        self.prod_word.fetch_and(!PROD_PENDING, Ordering::Release);

        log::debug!("lock: administrative ownership acquired");
        Owner::new(self)
    }

    /// Single-attempt, non-blocking version of [`BufRing::lock`].
    pub fn trylock(&self) -> Option<Owner<'_, T>> {
        let _guard = NonPreemptGuard::enter();
        loop {
            let value = self.prod_word.load(Ordering::Relaxed);
            if value & (PROD_OWNED | PROD_PENDING) != 0 {
                return None;
            }
            if self
                .prod_word
                .compare_exchange(
                    value,
                    value | PROD_OWNED,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                break;
            }
        }

        let cons = self.cons_word.load(Ordering::Relaxed);
        if cons & CONS_IDLE != 0 {
            self.stats.starts.fetch_add(1, Ordering::Relaxed);
        } else if cons & CONS_STALLED != 0 {
            self.stats.restarts.fetch_add(1, Ordering::Relaxed);
        }
        self.cons_word
            .fetch_and(!CONS_STICKY_MASK, Ordering::Relaxed);

        log::debug!("trylock: ownership acquired");
        Some(Owner::new(self))
    }

    /// Releases ownership, recording `reason` on `cons_word` before clearing
    /// `OWNED`. Returns whether a producer was latched `PENDING` at the
    /// moment of release (that producer is now, or is about to become, the
    /// next owner).
    pub(crate) fn unlock_inner(&self, reason: UnlockReason) -> bool {
        let _guard = NonPreemptGuard::enter();
        match reason {
            UnlockReason::Idle => {
                self.cons_word.fetch_or(CONS_IDLE, Ordering::Release);
            }
            UnlockReason::Abdicate => {
                let cur = self.cons_word.load(Ordering::Relaxed);
                if cur & CONS_ABDICATING == 0 {
                    self.cons_word
                        .store(cur | CONS_ABDICATING, Ordering::Release);
                    self.stats.abdications.fetch_add(1, Ordering::Relaxed);
                }
            }
            UnlockReason::Stalled => {
                self.cons_word.fetch_or(CONS_STALLED, Ordering::Release);
                self.stats.stalls.fetch_add(1, Ordering::Relaxed);
            }
            UnlockReason::Normal => {}
        }

        loop {
            let cur = self.prod_word.load(Ordering::Relaxed);
            let pending = cur & PROD_PENDING != 0;
            let new = cur & !PROD_OWNED;
            if self
                .prod_word
                .compare_exchange(cur, new, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                log::debug!("unlock: released ownership, reason={:?}", reason);
                return pending;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RingConfig;

    fn config(capacity: u32) -> RingConfig {
        RingConfig::new(capacity, false).unwrap()
    }

    #[test]
    fn first_enqueue_grants_ownership() {
        let ring: BufRing<u32> = BufRing::alloc(config(8));
        let mut value = 42u32;
        let ptr = ptr::NonNull::new(&mut value as *mut u32).unwrap();
        match ring.enqueue(ptr) {
            EnqueueOutcome::OkNowOwner(_owner) => {}
            _ => panic!("expected OkNowOwner on first enqueue"),
        }
        assert_eq!(ring.count(), 1);
    }

    #[test]
    fn second_enqueue_does_not_reacquire_ownership() {
        let ring: BufRing<u32> = BufRing::alloc(config(8));
        let mut a = 1u32;
        let mut b = 2u32;
        let owner = match ring.enqueue(ptr::NonNull::new(&mut a).unwrap()) {
            EnqueueOutcome::OkNowOwner(owner) => owner,
            _ => panic!("expected OkNowOwner"),
        };
        match ring.enqueue(ptr::NonNull::new(&mut b).unwrap()) {
            EnqueueOutcome::Ok => {}
            _ => panic!("expected plain Ok while ring is already owned"),
        }
        drop(owner);
    }

    #[test]
    fn full_ring_without_pending_reports_full() {
        let ring: BufRing<u32> = BufRing::alloc(config(2));
        let mut a = 1u32;
        let mut b = 2u32;
        let _owner = match ring.enqueue(ptr::NonNull::new(&mut a).unwrap()) {
            EnqueueOutcome::OkNowOwner(owner) => owner,
            _ => panic!("expected OkNowOwner"),
        };
        // capacity 2 => only one live slot is usable (one is always kept empty).
        match ring.enqueue(ptr::NonNull::new(&mut b).unwrap()) {
            EnqueueOutcome::Full => {}
            other => panic!("expected Full, got a different outcome: {}", matches_name(&other)),
        }
    }

    fn matches_name<T>(outcome: &EnqueueOutcome<'_, T>) -> &'static str {
        match outcome {
            EnqueueOutcome::Ok => "Ok",
            EnqueueOutcome::OkNowOwner(_) => "OkNowOwner",
            EnqueueOutcome::OkStalled => "OkStalled",
            EnqueueOutcome::Full => "Full",
        }
    }

    #[test]
    fn unlock_then_lock_round_trips_ownership() {
        let ring: BufRing<u32> = BufRing::alloc(config(8));
        let mut a = 1u32;
        let owner = match ring.enqueue(ptr::NonNull::new(&mut a).unwrap()) {
            EnqueueOutcome::OkNowOwner(owner) => owner,
            _ => panic!("expected OkNowOwner"),
        };
        assert!(!owner.unlock(UnlockReason::Idle));
        let _owner2 = ring.lock();
    }

    #[test]
    fn trylock_fails_while_owned() {
        let ring: BufRing<u32> = BufRing::alloc(config(8));
        let mut a = 1u32;
        let _owner = match ring.enqueue(ptr::NonNull::new(&mut a).unwrap()) {
            EnqueueOutcome::OkNowOwner(owner) => owner,
            _ => panic!("expected OkNowOwner"),
        };
        assert!(ring.trylock().is_none());
    }
}
