//! Lifecycle event dispatch
//!
//! Runs inside the host's allocator and sweeper on every event while the
//! lifecycle feed is enabled. Never raises and never calls user code.

use std::thread::ThreadId;

use crate::host::{LifecycleEvent, Subscription};
use crate::registry::Registry;
use crate::signal::DeferredSignal;

/// Route one lifecycle event to the collector of `thread`
#[inline]
pub fn dispatch<F, S>(
    registry: &Registry<F>,
    signal: &DeferredSignal<S>,
    thread: ThreadId,
    event: LifecycleEvent<'_>,
) where
    F: Subscription,
    S: Subscription,
{
    match event {
        LifecycleEvent::Allocated(object) => {
            let Some(collector) = registry.lookup(thread) else {
                return;
            };
            object.tag(collector.id());
            if collector.record_alloc() {
                tracing::trace!(
                    target: "alloc_track",
                    ?thread,
                    delta = collector.delta(),
                    "allocation limit breached"
                );
                signal.arm();
            }
        }
        LifecycleEvent::Freed(object) => {
            // Objects counted by an earlier collector of this thread are not ours
            let Some(owner) = object.tagged_by() else {
                return;
            };
            if let Some(collector) = registry.lookup(thread) {
                if collector.id() == owner {
                    collector.record_free();
                }
            }
        }
    }
}
