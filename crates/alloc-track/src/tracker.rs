//! Allocation tracker facade

use std::sync::{Arc, Weak};

use crate::collector::Collector;
use crate::config::TrackerConfig;
use crate::dispatch::dispatch;
use crate::error::{TrackError, TrackResult};
use crate::host::{HostRuntime, LifecycleEvent, LifecycleHook, SafepointHook, Subscription};
use crate::limit;
use crate::registry::Registry;
use crate::signal::DeferredSignal;
use crate::stats::TrackerStats;

/// Per-thread allocation tracker bound to a host runtime.
///
/// Cheap to clone; all clones share the same state. The host only holds
/// weak references to it, so dropping the last handle removes the
/// tracker's subscriptions.
pub struct AllocTracker<H: HostRuntime> {
    inner: Arc<TrackerInner<H>>,
}

struct TrackerInner<H: HostRuntime> {
    host: H,
    config: TrackerConfig,
    registry: Registry<H::Subscription>,
    signal: DeferredSignal<H::Subscription>,
}

impl<H: HostRuntime> TrackerInner<H> {
    #[inline]
    fn on_lifecycle(&self, event: LifecycleEvent<'_>) {
        dispatch(
            &self.registry,
            &self.signal,
            self.host.current_thread(),
            event,
        );
    }

    fn on_safepoint(&self) -> TrackResult<()> {
        let thread = self.host.current_thread();
        if self.config.reprieve {
            let collect = || self.host.collect_garbage();
            self.signal.fire(&self.registry, thread, Some(&collect))
        } else {
            self.signal.fire(&self.registry, thread, None)
        }
    }
}

impl<H: HostRuntime> AllocTracker<H> {
    /// Create a tracker with the default config
    pub fn new(host: H) -> Self {
        Self::with_config(host, TrackerConfig::default())
    }

    /// Create a tracker with a custom config
    pub fn with_config(host: H, config: TrackerConfig) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<TrackerInner<H>>| {
            let target = weak.clone();
            let lifecycle: LifecycleHook = Arc::new(move |event: LifecycleEvent<'_>| {
                if let Some(inner) = target.upgrade() {
                    inner.on_lifecycle(event);
                }
            });

            let target = weak.clone();
            let safepoint: SafepointHook = Arc::new(move || match target.upgrade() {
                Some(inner) => inner.on_safepoint(),
                None => Ok(()),
            });

            let feed = host.lifecycle_subscription(lifecycle);
            let signal = host.safepoint_subscription(safepoint);
            TrackerInner {
                registry: Registry::new(feed, config.is_exclusive()),
                signal: DeferredSignal::new(signal),
                host,
                config,
            }
        });
        Self { inner }
    }

    /// Start tracking on the calling thread
    pub fn start(&self) -> TrackResult<()> {
        self.start_collector().map(|_| ())
    }

    pub(crate) fn start_collector(&self) -> TrackResult<Arc<Collector>> {
        let thread = self.inner.host.current_thread();
        let collector = self.inner.registry.register(thread)?;
        tracing::debug!(target: "alloc_track", ?thread, "allocation tracking started");
        Ok(collector)
    }

    /// Returns true if the calling thread is tracking
    pub fn is_started(&self) -> bool {
        self.inner
            .registry
            .lookup(self.inner.host.current_thread())
            .is_some()
    }

    /// Stop tracking on the calling thread and discard its counters
    pub fn stop(&self) -> TrackResult<()> {
        let inner = &*self.inner;
        let thread = inner.host.current_thread();
        let collector = self.collector()?;
        inner.registry.unregister(thread)?;
        inner.signal.settle(&inner.registry);

        tracing::debug!(
            target: "alloc_track",
            ?thread,
            allocated = collector.allocated(),
            freed = collector.freed(),
            "allocation tracking stopped"
        );
        Ok(())
    }

    /// Allocations observed on the calling thread
    pub fn alloc(&self) -> TrackResult<u64> {
        Ok(self.collector()?.allocated())
    }

    /// Tracked objects freed on the calling thread
    pub fn free(&self) -> TrackResult<u64> {
        Ok(self.collector()?.freed())
    }

    /// `alloc() - free()` for the calling thread
    pub fn delta(&self) -> TrackResult<i64> {
        Ok(self.collector()?.delta())
    }

    /// Highest delta observed on the calling thread
    pub fn max_delta(&self) -> TrackResult<i64> {
        Ok(self.collector()?.peak_delta())
    }

    /// Run `work` with tracking enabled and at most `cap` live tracked
    /// objects.
    ///
    /// Tracking is stopped on every exit path. Exceeding the cap raises
    /// [`TrackError::LimitExceeded`] at the next safe point, or when `work`
    /// returns. An error returned by `work` is passed through unchanged.
    pub fn limit<T, E, F>(&self, cap: i64, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<TrackError>,
    {
        limit::run(self, cap, work)
    }

    /// Treat the current point as a safe point for the calling thread:
    /// resolve its pending limit breach, if any
    pub fn checkpoint(&self) -> TrackResult<()> {
        self.inner.on_safepoint()
    }

    /// Snapshot of tracker state
    pub fn stats(&self) -> TrackerStats {
        let inner = &*self.inner;
        let collectors = inner.registry.snapshots();
        TrackerStats {
            tracking: collectors.len(),
            lifecycle_feed_enabled: inner.registry.feed().is_enabled(),
            signal_armed: inner.signal.is_armed(),
            limits_exceeded: inner.signal.limits_exceeded(),
            reprieves: inner.signal.reprieves(),
            collectors,
        }
    }

    /// Tracker config
    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Host runtime
    pub fn host(&self) -> &H {
        &self.inner.host
    }

    fn collector(&self) -> TrackResult<Arc<Collector>> {
        let registry = &self.inner.registry;
        registry
            .lookup(self.inner.host.current_thread())
            .ok_or_else(|| {
                if registry.owner().is_some() {
                    TrackError::WrongThread
                } else {
                    TrackError::NotStarted
                }
            })
    }
}

impl<H: HostRuntime> Clone for AllocTracker<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: HostRuntime> std::fmt::Debug for AllocTracker<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocTracker")
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .field("signal", &self.inner.signal)
            .finish()
    }
}
