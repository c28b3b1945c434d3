//! Thread-confined managed heap

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use crate::error::{GcError, GcResult};
use crate::object::{ErasedBox, Gc, GcBox, GcHeader, flags, tags};
use crate::runtime::Runtime;
use crate::tracepoint::Event;

/// Default number of allocations between automatic collections
const DEFAULT_COLLECT_THRESHOLD: usize = 10_000;

/// GC configuration
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Allocations since the last collection that trigger an automatic
    /// collection (default: 10,000). `None` disables automatic collection.
    pub collect_threshold: Option<usize>,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            collect_threshold: Some(DEFAULT_COLLECT_THRESHOLD),
        }
    }
}

/// Per-heap statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Objects currently held by the heap (live or not yet swept)
    pub live_objects: usize,
    /// Number of collections run on this heap
    pub collections: usize,
    /// Objects reclaimed by the last collection
    pub last_reclaimed: usize,
    /// Objects allocated since the heap was created
    pub total_allocated: u64,
    /// Objects reclaimed since the heap was created
    pub total_freed: u64,
}

/// A managed heap bound to one thread.
///
/// Obtained from [`Runtime::heap`]. Handles are cheap to clone and all
/// refer to the same heap. Lifecycle tracepoints of the owning runtime
/// fire on this thread: `NewObj` from [`alloc`](Heap::alloc), `FreeObj`
/// from [`collect`](Heap::collect), `Safepoint` from
/// [`safepoint`](Heap::safepoint).
#[derive(Clone)]
pub struct Heap {
    inner: Rc<HeapInner>,
}

struct HeapInner {
    runtime: Arc<Runtime>,
    objects: RefCell<Vec<ErasedBox>>,
    since_gc: Cell<usize>,
    collecting: Cell<bool>,
    stats: Cell<HeapStats>,
}

impl Heap {
    pub(crate) fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            inner: Rc::new(HeapInner {
                runtime,
                objects: RefCell::new(Vec::new()),
                since_gc: Cell::new(0),
                collecting: Cell::new(false),
                stats: Cell::new(HeapStats::default()),
            }),
        }
    }

    /// The runtime this heap belongs to
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.inner.runtime
    }

    /// Allocate a plain object
    pub fn alloc<T: 'static>(&self, value: T) -> Gc<T> {
        self.alloc_tagged(tags::OBJECT, value)
    }

    /// Allocate an object with an explicit type tag
    pub fn alloc_tagged<T: 'static>(&self, tag: u8, value: T) -> Gc<T> {
        let inner = &self.inner;

        let over_threshold = inner
            .runtime
            .config()
            .collect_threshold
            .is_some_and(|threshold| inner.since_gc.get() >= threshold);
        if over_threshold && !inner.collecting.get() {
            self.collect();
        }

        let boxed = Rc::new(GcBox {
            header: GcHeader::new(tag),
            value,
        });
        let erased: Rc<GcBox<dyn Any>> = boxed.clone();
        inner.objects.borrow_mut().push(erased);
        inner.since_gc.set(inner.since_gc.get() + 1);

        let mut stats = inner.stats.get();
        stats.total_allocated += 1;
        inner.stats.set(stats);
        inner.runtime.record_allocation();

        inner.runtime.fire_internal(Event::NewObj, &boxed.header);
        Gc::new(boxed)
    }

    /// Reclaim every object without a live handle.
    ///
    /// Fires `FreeObj` for each reclaimed object after the object table has
    /// been released, so hooks may allocate. Returns the number of objects
    /// reclaimed. A collection requested while one is already running on
    /// this heap is a no-op.
    pub fn collect(&self) -> usize {
        let inner = &self.inner;
        if inner.collecting.replace(true) {
            return 0;
        }

        #[cfg(feature = "gc_logging")]
        let start = std::time::Instant::now();

        let dead: Vec<ErasedBox> = {
            let mut objects = inner.objects.borrow_mut();
            let all = std::mem::take(&mut *objects);
            let (live, dead): (Vec<_>, Vec<_>) =
                all.into_iter().partition(|obj| Rc::strong_count(obj) > 1);
            *objects = live;
            dead
        };

        let reclaimed = dead.len();
        for obj in dead {
            obj.header.set_flag(flags::RECLAIMED);
            inner.runtime.fire_internal(Event::FreeObj, &obj.header);
        }

        let mut stats = inner.stats.get();
        stats.collections += 1;
        stats.last_reclaimed = reclaimed;
        stats.total_freed += reclaimed as u64;
        inner.stats.set(stats);
        inner.since_gc.set(0);
        inner.runtime.record_collection(reclaimed);
        inner.collecting.set(false);

        #[cfg(feature = "gc_logging")]
        tracing::debug!(
            target: "alloc_track::gc",
            collection = stats.collections,
            reclaimed,
            live_objects = self.live_objects(),
            pause_us = start.elapsed().as_micros() as u64,
            "GC cycle complete"
        );

        reclaimed
    }

    /// Reach a safe point: run safe-point hooks, surfacing the first
    /// error one of them raises.
    pub fn safepoint(&self) -> GcResult<()> {
        self.inner
            .runtime
            .fire_safepoint()
            .map_err(GcError::Raised)
    }

    /// Objects currently held by the heap
    pub fn live_objects(&self) -> usize {
        self.inner.objects.borrow().len()
    }

    /// Returns true while a collection is running on this heap
    pub fn is_collecting(&self) -> bool {
        self.inner.collecting.get()
    }

    /// Heap statistics
    pub fn stats(&self) -> HeapStats {
        let mut stats = self.inner.stats.get();
        stats.live_objects = self.live_objects();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_runtime() -> Arc<Runtime> {
        Runtime::with_config(GcConfig {
            collect_threshold: None,
        })
    }

    #[test]
    fn test_alloc_and_deref() {
        let runtime = manual_runtime();
        let heap = runtime.heap();
        let value = heap.alloc(42i32);
        assert_eq!(*value, 42);
        assert_eq!(value.header().tag(), tags::OBJECT);
        assert_eq!(heap.live_objects(), 1);
    }

    #[test]
    fn test_collect_unreachable() {
        let runtime = manual_runtime();
        let heap = runtime.heap();
        let kept = heap.alloc(String::from("kept"));
        for i in 0..10 {
            let _ = heap.alloc(i);
        }
        assert_eq!(heap.live_objects(), 11);

        let reclaimed = heap.collect();
        assert_eq!(reclaimed, 10);
        assert_eq!(heap.live_objects(), 1);
        assert_eq!(kept.as_str(), "kept");

        let stats = heap.stats();
        assert_eq!(stats.collections, 1);
        assert_eq!(stats.last_reclaimed, 10);
        assert_eq!(stats.total_allocated, 11);
        assert_eq!(stats.total_freed, 10);
    }

    #[test]
    fn test_cloned_handle_keeps_object_alive() {
        let runtime = manual_runtime();
        let heap = runtime.heap();
        let a = heap.alloc(1u8);
        let b = a.clone();
        drop(a);
        assert_eq!(heap.collect(), 0);
        drop(b);
        assert_eq!(heap.collect(), 1);
    }

    #[test]
    fn test_threshold_triggers_collection() {
        let runtime = Runtime::with_config(GcConfig {
            collect_threshold: Some(5),
        });
        let heap = runtime.heap();
        for i in 0..12 {
            let _ = heap.alloc(i);
        }
        // Collections ran before the 6th and 11th allocations
        assert_eq!(heap.stats().collections, 2);
        assert_eq!(heap.live_objects(), 2);
    }

    #[test]
    fn test_safepoint_without_hooks() {
        let runtime = manual_runtime();
        let heap = runtime.heap();
        assert!(heap.safepoint().is_ok());
    }
}
