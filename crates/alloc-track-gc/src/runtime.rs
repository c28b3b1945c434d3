//! Process-wide runtime shared by all thread heaps

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use rustc_hash::FxHashMap;

use crate::heap::{GcConfig, Heap};
use crate::object::GcHeader;
use crate::tracepoint::{Event, Hook, Raised, TracePoint, TracePointTable};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

// Each thread gets its own heap per runtime, so collections on one thread
// never reclaim objects another thread still uses, and lifecycle events
// always fire on the thread that owns the object.
thread_local! {
    static THREAD_HEAPS: RefCell<FxHashMap<u64, Heap>> = RefCell::new(FxHashMap::default());
}

/// Runtime-wide counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Collections across all heaps
    pub collections: u64,
    /// Objects allocated across all heaps
    pub objects_allocated: u64,
    /// Objects reclaimed across all heaps
    pub objects_freed: u64,
    /// Currently enabled tracepoints
    pub active_tracepoints: usize,
    /// Tracepoints registered, enabled or not
    pub tracepoints: usize,
}

/// Managed runtime.
///
/// Owns the tracepoint table and hands out one [`Heap`] per thread.
pub struct Runtime {
    id: u64,
    config: GcConfig,
    tracepoints: TracePointTable,
    collections: AtomicU64,
    objects_allocated: AtomicU64,
    objects_freed: AtomicU64,
}

impl Runtime {
    /// Create a runtime with the default config
    pub fn new() -> Arc<Self> {
        Self::with_config(GcConfig::default())
    }

    /// Create a runtime with a custom config
    pub fn with_config(config: GcConfig) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            config,
            tracepoints: TracePointTable::new(),
            collections: AtomicU64::new(0),
            objects_allocated: AtomicU64::new(0),
            objects_freed: AtomicU64::new(0),
        })
    }

    /// Get config
    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// The current thread's heap, created on first use
    pub fn heap(self: &Arc<Self>) -> Heap {
        THREAD_HEAPS.with(|heaps| {
            heaps
                .borrow_mut()
                .entry(self.id)
                .or_insert_with(|| Heap::new(Arc::clone(self)))
                .clone()
        })
    }

    /// Collect the current thread's heap.
    ///
    /// Returns the number of reclaimed objects, 0 if this thread never
    /// touched the runtime.
    pub fn collect_current(&self) -> usize {
        let heap = THREAD_HEAPS.with(|heaps| heaps.borrow().get(&self.id).cloned());
        heap.map_or(0, |heap| heap.collect())
    }

    /// Create a disabled tracepoint for `events`.
    ///
    /// Must not be called from inside a hook.
    pub fn tracepoint(&self, events: &[Event], hook: Hook) -> Arc<TracePoint> {
        self.tracepoints.create(events, hook)
    }

    /// Disable and drop a tracepoint
    pub fn remove_tracepoint(&self, point: &Arc<TracePoint>) {
        self.tracepoints.remove(point);
    }

    /// Runtime statistics
    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            collections: self.collections.load(Ordering::Relaxed),
            objects_allocated: self.objects_allocated.load(Ordering::Relaxed),
            objects_freed: self.objects_freed.load(Ordering::Relaxed),
            active_tracepoints: self.tracepoints.active(),
            tracepoints: self.tracepoints.len(),
        }
    }

    #[inline]
    pub(crate) fn fire_internal(&self, event: Event, object: &GcHeader) {
        self.tracepoints.fire_internal(event, object);
    }

    #[inline]
    pub(crate) fn fire_safepoint(&self) -> Result<(), Raised> {
        self.tracepoints.fire_safepoint()
    }

    #[inline]
    pub(crate) fn record_allocation(&self) {
        self.objects_allocated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_collection(&self, reclaimed: usize) {
        self.collections.fetch_add(1, Ordering::Relaxed);
        self.objects_freed
            .fetch_add(reclaimed as u64, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_is_per_thread() {
        let runtime = Runtime::new();
        let heap = runtime.heap();
        let _kept = heap.alloc(1u32);

        let remote = Arc::clone(&runtime);
        let live_elsewhere = std::thread::spawn(move || remote.heap().live_objects())
            .join()
            .unwrap();

        assert_eq!(live_elsewhere, 0);
        assert_eq!(runtime.heap().live_objects(), 1);
    }

    #[test]
    fn test_collect_current_without_heap() {
        let runtime = Runtime::new();
        assert_eq!(runtime.collect_current(), 0);
        assert_eq!(runtime.stats().collections, 0);
    }

    #[test]
    fn test_runtime_stats_aggregate() {
        let runtime = Runtime::new();
        let heap = runtime.heap();
        for i in 0..3 {
            let _ = heap.alloc(i);
        }
        runtime.collect_current();

        let stats = runtime.stats();
        assert_eq!(stats.objects_allocated, 3);
        assert_eq!(stats.objects_freed, 3);
        assert_eq!(stats.collections, 1);
    }
}
