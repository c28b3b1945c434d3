//! Host runtime boundary
//!
//! The tracker never owns objects or runs collections itself. Everything it
//! needs from the managed runtime goes through [`HostRuntime`]: two event
//! subscriptions, a way to request a collection, and the identity of the
//! calling thread.

use std::sync::Arc;
use std::thread::ThreadId;

use crate::collector::CollectorId;
use crate::error::TrackResult;

/// An object reported by a lifecycle event.
///
/// Exposes the reserved per-object state the tracker uses to remember which
/// collector counted the object as allocated.
pub trait TaggedObject {
    /// Mark the object as counted by `owner`
    fn tag(&self, owner: CollectorId);

    /// Collector that counted the object, if any
    fn tagged_by(&self) -> Option<CollectorId>;

    /// Returns true if some collector counted the object
    fn is_tagged(&self) -> bool {
        self.tagged_by().is_some()
    }
}

/// Object lifecycle notification
#[derive(Clone, Copy)]
pub enum LifecycleEvent<'a> {
    /// An object was allocated on the current thread
    Allocated(&'a dyn TaggedObject),
    /// An object is being reclaimed on the current thread
    Freed(&'a dyn TaggedObject),
}

impl std::fmt::Debug for LifecycleEvent<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleEvent::Allocated(obj) => f
                .debug_struct("Allocated")
                .field("owner", &obj.tagged_by())
                .finish(),
            LifecycleEvent::Freed(obj) => f
                .debug_struct("Freed")
                .field("owner", &obj.tagged_by())
                .finish(),
        }
    }
}

/// Hook run inside the allocator / sweeper. Must not raise.
pub type LifecycleHook = Arc<dyn Fn(LifecycleEvent<'_>) + Send + Sync>;

/// Hook run at safe points. May raise.
pub type SafepointHook = Arc<dyn Fn() -> TrackResult<()> + Send + Sync>;

/// Handle to an event subscription. Toggling is idempotent.
pub trait Subscription: Send + Sync {
    /// Start delivering events
    fn enable(&self);

    /// Stop delivering events
    fn disable(&self);

    /// Returns true if events are delivered
    fn is_enabled(&self) -> bool;
}

/// Services the tracker needs from the managed runtime
pub trait HostRuntime: Send + Sync + 'static {
    /// Subscription handle type
    type Subscription: Subscription;

    /// Create a disabled subscription to allocation and free events
    fn lifecycle_subscription(&self, hook: LifecycleHook) -> Self::Subscription;

    /// Create a disabled subscription to safe points
    fn safepoint_subscription(&self, hook: SafepointHook) -> Self::Subscription;

    /// Run a collection pass on the current thread
    fn collect_garbage(&self);

    /// Identity of the calling thread
    fn current_thread(&self) -> ThreadId {
        std::thread::current().id()
    }
}
