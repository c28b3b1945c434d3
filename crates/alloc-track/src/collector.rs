//! Per-thread allocation counters
//!
//! A [`Collector`] is only ever mutated by lifecycle events of the thread it
//! accounts for. Counters are atomics so collectors can be shared through
//! the registry, but no cross-field consistency is needed: Relaxed ordering
//! is enough because a single thread performs every write.

use std::num::{NonZeroU32, NonZeroU64};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::thread::ThreadId;

use crate::stats::CollectorSnapshot;

/// Process-unique identity of a [`Collector`].
///
/// Tagged objects record the id of the collector that counted them, so a
/// free is only credited to that collector and never to a later one on the
/// same thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectorId(NonZeroU32);

impl CollectorId {
    fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        loop {
            // 0 is skipped when the counter wraps
            if let Some(id) = NonZeroU32::new(NEXT.fetch_add(1, Ordering::Relaxed)) {
                return Self(id);
            }
        }
    }

    /// Id from a stored word; 0 means none
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Word to store in an object
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// Allocation counters and limit state for one thread
#[derive(Debug)]
pub struct Collector {
    id: CollectorId,
    thread: ThreadId,
    allocated: AtomicU64,
    freed: AtomicU64,
    /// 0 means unlimited
    limit: AtomicU64,
    breached: AtomicBool,
    peak_delta: AtomicI64,
}

impl Collector {
    /// Create a collector for `thread` with zeroed counters and no limit
    pub fn new(thread: ThreadId) -> Self {
        Self {
            id: CollectorId::next(),
            thread,
            allocated: AtomicU64::new(0),
            freed: AtomicU64::new(0),
            limit: AtomicU64::new(0),
            breached: AtomicBool::new(false),
            peak_delta: AtomicI64::new(0),
        }
    }

    /// Identity recorded on the objects this collector counts
    #[inline]
    pub fn id(&self) -> CollectorId {
        self.id
    }

    /// Owning thread
    #[inline]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Count an allocation.
    ///
    /// Returns true only when this allocation breaches the limit for the
    /// first time; later allocations over the limit just count.
    #[inline]
    pub fn record_alloc(&self) -> bool {
        let allocated = self.allocated.fetch_add(1, Ordering::Relaxed) + 1;
        let delta = allocated as i64 - self.freed.load(Ordering::Relaxed) as i64;
        self.peak_delta.fetch_max(delta, Ordering::Relaxed);

        let limit = self.limit.load(Ordering::Relaxed);
        if limit != 0 && delta > limit as i64 {
            return !self.breached.swap(true, Ordering::AcqRel);
        }
        false
    }

    /// Count a free. Frees only shrink the delta, so no limit check.
    #[inline]
    pub fn record_free(&self) {
        self.freed.fetch_add(1, Ordering::Relaxed);
    }

    /// Allocations observed
    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Frees observed
    pub fn freed(&self) -> u64 {
        self.freed.load(Ordering::Relaxed)
    }

    /// `allocated - freed`
    pub fn delta(&self) -> i64 {
        self.allocated() as i64 - self.freed() as i64
    }

    /// Highest delta observed
    pub fn peak_delta(&self) -> i64 {
        self.peak_delta.load(Ordering::Relaxed)
    }

    /// Configured limit
    pub fn limit(&self) -> Option<NonZeroU64> {
        NonZeroU64::new(self.limit.load(Ordering::Relaxed))
    }

    /// Set or clear the limit
    pub fn set_limit(&self, limit: Option<NonZeroU64>) {
        self.limit
            .store(limit.map_or(0, NonZeroU64::get), Ordering::Relaxed);
    }

    /// Returns true if the delta is currently above the limit
    pub fn exceeds_limit(&self) -> bool {
        self.limit()
            .is_some_and(|limit| self.delta() > limit.get() as i64)
    }

    /// Returns true once a limit check failed and no reprieve cleared it
    #[inline]
    pub fn is_breached(&self) -> bool {
        self.breached.load(Ordering::Acquire)
    }

    /// Clear the breach flag after a successful reprieve
    pub fn clear_breach(&self) {
        self.breached.store(false, Ordering::Release);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> CollectorSnapshot {
        CollectorSnapshot {
            thread: format!("{:?}", self.thread),
            allocated: self.allocated(),
            freed: self.freed(),
            delta: self.delta(),
            max_delta: self.peak_delta(),
            limit: self.limit().map(NonZeroU64::get),
            breached: self.is_breached(),
        }
    }
}
