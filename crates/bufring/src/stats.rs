use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for a single ring, updated from any producer or from the
/// owning consumer. All fields use `Relaxed` ordering: they are diagnostic,
/// not part of the ring's synchronization protocol.
#[derive(Debug, Default)]
pub struct Stats {
    pub(crate) enqueues: AtomicU64,
    pub(crate) drops: AtomicU64,
    pub(crate) abdications: AtomicU64,
    pub(crate) stalls: AtomicU64,
    pub(crate) starts: AtomicU64,
    pub(crate) restarts: AtomicU64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueues: self.enqueues.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
            abdications: self.abdications.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
            starts: self.starts.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        self.enqueues.store(0, Ordering::Relaxed);
        self.drops.store(0, Ordering::Relaxed);
        self.abdications.store(0, Ordering::Relaxed);
        self.stalls.store(0, Ordering::Relaxed);
        self.starts.store(0, Ordering::Relaxed);
        self.restarts.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time copy of a ring's [`Stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub enqueues: u64,
    pub drops: u64,
    pub abdications: u64,
    pub stalls: u64,
    pub starts: u64,
    pub restarts: u64,
}
