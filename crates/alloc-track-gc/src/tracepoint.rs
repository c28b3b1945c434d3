//! Lifecycle tracepoints
//!
//! A tracepoint couples a set of [`Event`]s with a hook. Tracepoints are
//! created disabled and toggled with [`TracePoint::enable`] /
//! [`TracePoint::disable`], which are lock-free and may be called from
//! inside any hook.
//!
//! Two kinds of hooks exist:
//!
//! - **Internal** hooks observe `NewObj` / `FreeObj`. They run inside the
//!   allocator and the sweeper and cannot report errors.
//! - **Safe** hooks observe `Safepoint`. They run at points where the
//!   mutator is in a consistent state and may raise an error, which is
//!   returned from [`Heap::safepoint`](crate::Heap::safepoint).

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::object::GcHeader;

/// Error raised by a safe hook
pub type Raised = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Tracepoint event
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// A managed object was allocated
    NewObj = 1 << 0,
    /// A managed object is being reclaimed
    FreeObj = 1 << 1,
    /// The mutator reached a safe point
    Safepoint = 1 << 2,
}

impl Event {
    /// Bit of this event in a tracepoint's event mask
    #[inline]
    pub const fn bit(self) -> u8 {
        self as u8
    }

    /// Internal events fire from inside the allocator or the sweeper
    pub const fn is_internal(self) -> bool {
        matches!(self, Event::NewObj | Event::FreeObj)
    }
}

/// Argument passed to hooks
pub struct TraceArg<'a> {
    event: Event,
    object: Option<&'a GcHeader>,
}

impl<'a> TraceArg<'a> {
    pub(crate) fn new(event: Event, object: Option<&'a GcHeader>) -> Self {
        Self { event, object }
    }

    /// The event that fired
    pub fn event(&self) -> Event {
        self.event
    }

    /// Header of the allocated or reclaimed object (internal events only)
    pub fn object(&self) -> Option<&'a GcHeader> {
        self.object
    }
}

type InternalFn = dyn Fn(&TraceArg<'_>) + Send + Sync;
type SafeFn = dyn Fn(&TraceArg<'_>) -> Result<(), Raised> + Send + Sync;

/// Tracepoint hook
#[derive(Clone)]
pub enum Hook {
    /// Hook for internal events; must not raise
    Internal(Arc<InternalFn>),
    /// Hook for safe points; may raise
    Safe(Arc<SafeFn>),
}

impl Hook {
    /// Wrap a closure as an internal hook
    pub fn internal<F>(f: F) -> Self
    where
        F: Fn(&TraceArg<'_>) + Send + Sync + 'static,
    {
        Hook::Internal(Arc::new(f))
    }

    /// Wrap a closure as a safe hook
    pub fn safe<F>(f: F) -> Self
    where
        F: Fn(&TraceArg<'_>) -> Result<(), Raised> + Send + Sync + 'static,
    {
        Hook::Safe(Arc::new(f))
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Internal(_) => f.write_str("Hook::Internal"),
            Hook::Safe(_) => f.write_str("Hook::Safe"),
        }
    }
}

/// A subscription to a set of events
pub struct TracePoint {
    events: u8,
    hook: Hook,
    enabled: AtomicBool,
    /// Shared count of enabled tracepoints on the owning runtime
    active: Arc<AtomicUsize>,
}

impl TracePoint {
    /// Enable the tracepoint. Idempotent.
    pub fn enable(&self) {
        if !self.enabled.swap(true, Ordering::AcqRel) {
            self.active.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Disable the tracepoint. Idempotent.
    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            self.active.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Returns true if the tracepoint is enabled
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Returns true if the tracepoint subscribes to `event`
    #[inline]
    pub fn traces(&self, event: Event) -> bool {
        self.events & event.bit() != 0
    }

    /// The tracepoint hook
    pub fn hook(&self) -> &Hook {
        &self.hook
    }
}

impl fmt::Debug for TracePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracePoint")
            .field("events", &format_args!("{:#05b}", self.events))
            .field("hook", &self.hook)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// All tracepoints of a runtime
pub(crate) struct TracePointTable {
    points: RwLock<Vec<Arc<TracePoint>>>,
    active: Arc<AtomicUsize>,
}

impl TracePointTable {
    pub(crate) fn new() -> Self {
        Self {
            points: RwLock::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a disabled tracepoint.
    ///
    /// Must not be called from inside a hook.
    pub(crate) fn create(&self, events: &[Event], hook: Hook) -> Arc<TracePoint> {
        let mask = events.iter().fold(0u8, |mask, event| mask | event.bit());
        let point = Arc::new(TracePoint {
            events: mask,
            hook,
            enabled: AtomicBool::new(false),
            active: Arc::clone(&self.active),
        });
        self.points.write().push(Arc::clone(&point));
        point
    }

    /// Disable and forget a tracepoint.
    ///
    /// If the table is being walked (the caller is inside a hook, or another
    /// thread is firing) the point is only disabled and stays in the table.
    pub(crate) fn remove(&self, point: &Arc<TracePoint>) {
        point.disable();
        if let Some(mut points) = self.points.try_write() {
            points.retain(|p| !Arc::ptr_eq(p, point));
        }
    }

    /// Number of tracepoints in the table, enabled or not
    pub(crate) fn len(&self) -> usize {
        self.points.read().len()
    }

    /// Number of enabled tracepoints
    #[inline]
    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Run internal hooks subscribed to `event`
    pub(crate) fn fire_internal(&self, event: Event, object: &GcHeader) {
        if self.active() == 0 {
            return;
        }
        let arg = TraceArg::new(event, Some(object));
        // Hooks may re-enter the heap (a safe hook can trigger a collection
        // which fires FreeObj), so readers must not queue behind writers.
        let points = self.points.read_recursive();
        for point in points.iter() {
            if !point.is_enabled() || !point.traces(event) {
                continue;
            }
            if let Hook::Internal(hook) = &point.hook {
                hook(&arg);
            }
        }
    }

    /// Run safe hooks; the first raised error stops the walk
    pub(crate) fn fire_safepoint(&self) -> Result<(), Raised> {
        if self.active() == 0 {
            return Ok(());
        }
        let arg = TraceArg::new(Event::Safepoint, None);
        let points = self.points.read_recursive();
        for point in points.iter() {
            if !point.is_enabled() || !point.traces(Event::Safepoint) {
                continue;
            }
            if let Hook::Safe(hook) = &point.hook {
                hook(&arg)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::tags;

    #[test]
    fn test_enable_is_idempotent() {
        let table = TracePointTable::new();
        let point = table.create(&[Event::NewObj], Hook::internal(|_| {}));
        assert!(!point.is_enabled());
        assert_eq!(table.active(), 0);

        point.enable();
        point.enable();
        assert!(point.is_enabled());
        assert_eq!(table.active(), 1);

        point.disable();
        point.disable();
        assert!(!point.is_enabled());
        assert_eq!(table.active(), 0);
    }

    #[test]
    fn test_fire_internal_respects_mask() {
        let table = TracePointTable::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let point = table.create(
            &[Event::FreeObj],
            Hook::internal(move |arg| {
                assert_eq!(arg.event(), Event::FreeObj);
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        );
        point.enable();

        let header = GcHeader::new(tags::OBJECT);
        table.fire_internal(Event::NewObj, &header);
        table.fire_internal(Event::FreeObj, &header);
        assert_eq!(seen.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_removed_tracepoint_stops_firing() {
        let table = TracePointTable::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let point = table.create(
            &[Event::NewObj],
            Hook::internal(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        );
        point.enable();
        table.remove(&point);

        let header = GcHeader::new(tags::OBJECT);
        table.fire_internal(Event::NewObj, &header);
        assert_eq!(seen.load(Ordering::Relaxed), 0);
        assert_eq!(table.active(), 0);
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_remove_while_firing_only_disables() {
        let table = Arc::new(TracePointTable::new());
        let slot: Arc<parking_lot::Mutex<Option<Arc<TracePoint>>>> = Arc::default();

        let (t, s) = (Arc::clone(&table), Arc::clone(&slot));
        let point = table.create(
            &[Event::NewObj],
            Hook::internal(move |_| {
                if let Some(me) = s.lock().take() {
                    t.remove(&me);
                }
            }),
        );
        *slot.lock() = Some(Arc::clone(&point));
        point.enable();

        let header = GcHeader::new(tags::OBJECT);
        table.fire_internal(Event::NewObj, &header);
        assert!(!point.is_enabled());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_safe_hook_error_propagates() {
        let table = TracePointTable::new();
        let point = table.create(
            &[Event::Safepoint],
            Hook::safe(|_| Err("boom".into())),
        );
        assert!(table.fire_safepoint().is_ok());

        point.enable();
        let err = table.fire_safepoint().unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
