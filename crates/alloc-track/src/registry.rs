//! Collector registry
//!
//! Maps threads to their [`Collector`]. Membership is what "tracking is
//! started" means for a thread. The registry also owns the lifecycle feed
//! subscription and keeps it enabled exactly while at least one collector
//! is registered.
//!
//! Lock order is `entries` then `cache`. The cache is only written while
//! the entries lock is held, so it can never point at a removed collector.
//! Cache hits take shared locks only; a miss refreshes the cache when it
//! is uncontended and otherwise leaves it alone.

use std::sync::Arc;
use std::thread::ThreadId;

use parking_lot::RwLock;

use crate::collector::Collector;
use crate::error::{TrackError, TrackResult};
use crate::host::Subscription;
use crate::stats::CollectorSnapshot;

/// Registry of per-thread collectors
pub struct Registry<S: Subscription> {
    entries: RwLock<Vec<Arc<Collector>>>,
    /// Last collector returned by [`lookup`](Registry::lookup)
    cache: RwLock<Option<Arc<Collector>>>,
    feed: S,
    exclusive: bool,
}

impl<S: Subscription> Registry<S> {
    /// Create an empty registry. `feed` must be disabled.
    pub fn new(feed: S, exclusive: bool) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            cache: RwLock::new(None),
            feed,
            exclusive,
        }
    }

    /// Register a collector for `thread`
    pub fn register(&self, thread: ThreadId) -> TrackResult<Arc<Collector>> {
        let mut entries = self.entries.write();
        if entries.iter().any(|c| c.thread() == thread) {
            return Err(TrackError::AlreadyStarted);
        }
        if self.exclusive && !entries.is_empty() {
            return Err(TrackError::AlreadyRunning);
        }

        let collector = Arc::new(Collector::new(thread));
        entries.push(Arc::clone(&collector));
        if entries.len() == 1 {
            self.feed.enable();
        }
        Ok(collector)
    }

    /// Remove the collector of `thread`
    pub fn unregister(&self, thread: ThreadId) -> TrackResult<Arc<Collector>> {
        let mut entries = self.entries.write();
        let index = entries
            .iter()
            .position(|c| c.thread() == thread)
            .ok_or(TrackError::NotStarted)?;
        let removed = entries.swap_remove(index);

        let mut cache = self.cache.write();
        if cache.as_ref().is_some_and(|c| Arc::ptr_eq(c, &removed)) {
            *cache = None;
        }
        drop(cache);

        if entries.is_empty() {
            self.feed.disable();
        }
        Ok(removed)
    }

    /// Collector of `thread`, if it is tracking
    #[inline]
    pub fn lookup(&self, thread: ThreadId) -> Option<Arc<Collector>> {
        // Lookups run inside host hooks which may nest (a collection
        // started from a safe point fires free events).
        let entries = self.entries.read_recursive();
        if entries.is_empty() {
            return None;
        }

        if let Some(cached) = self.cache.read_recursive().as_ref() {
            if cached.thread() == thread {
                return Some(Arc::clone(cached));
            }
        }

        let found = entries.iter().find(|c| c.thread() == thread)?;
        if let Some(mut cache) = self.cache.try_write() {
            *cache = Some(Arc::clone(found));
        }
        Some(Arc::clone(found))
    }

    /// Thread owning the single collector, in exclusive mode
    pub fn owner(&self) -> Option<ThreadId> {
        if !self.exclusive {
            return None;
        }
        self.entries.read_recursive().first().map(|c| c.thread())
    }

    /// Returns true if any registered collector has a pending breach
    pub fn any_breached(&self) -> bool {
        self.entries
            .read_recursive()
            .iter()
            .any(|c| c.is_breached())
    }

    /// Number of registered collectors
    pub fn len(&self) -> usize {
        self.entries.read_recursive().len()
    }

    /// Returns true if no thread is tracking
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true for an exclusive registry
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Snapshots of all registered collectors
    pub fn snapshots(&self) -> Vec<CollectorSnapshot> {
        self.entries
            .read_recursive()
            .iter()
            .map(|c| c.snapshot())
            .collect()
    }

    /// The lifecycle feed subscription
    pub fn feed(&self) -> &S {
        &self.feed
    }

    #[cfg(test)]
    fn cached_thread(&self) -> Option<ThreadId> {
        self.cache.read().as_ref().map(|c| c.thread())
    }
}

impl<S: Subscription> std::fmt::Debug for Registry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("collectors", &self.len())
            .field("exclusive", &self.exclusive)
            .field("feed_enabled", &self.feed.is_enabled())
            .finish()
    }
}
