//! [`HostRuntime`] implementation for `alloc-track-gc`
//!
//! Lifecycle events come from an internal `NewObj`/`FreeObj` tracepoint,
//! the deferred signal from a `Safepoint` tracepoint. Counted objects are
//! marked with one of the header's reserved user bits, and the id of the
//! counting collector goes into the user word paired with that bit.

use std::sync::Arc;

use alloc_track_gc::{Event, GcError, GcHeader, Hook, Raised, Runtime, TracePoint, flags};

use crate::collector::CollectorId;
use crate::error::{TrackError, TrackResult};
use crate::host::{
    HostRuntime, LifecycleEvent, LifecycleHook, SafepointHook, Subscription, TaggedObject,
};

/// Host adapter over an `alloc-track-gc` runtime
#[derive(Debug, Clone)]
pub struct GcHost {
    runtime: Arc<Runtime>,
    tag_bit: u8,
    slot: usize,
}

impl GcHost {
    /// Adapter marking counted objects with [`flags::USER0`]
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self {
            runtime,
            tag_bit: flags::USER0,
            slot: 0,
        }
    }

    /// Adapter marking counted objects with another reserved user bit
    pub fn with_tag_bit(runtime: Arc<Runtime>, tag_bit: u8) -> TrackResult<Self> {
        let Some(slot) = flags::user_slot(tag_bit) else {
            return Err(TrackError::invalid_argument(format!(
                "tag bit {tag_bit:#010b} is not a reserved user bit"
            )));
        };
        Ok(Self {
            runtime,
            tag_bit,
            slot,
        })
    }

    /// The wrapped runtime
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Header bit used to mark counted objects
    pub fn tag_bit(&self) -> u8 {
        self.tag_bit
    }
}

impl HostRuntime for GcHost {
    type Subscription = GcSubscription;

    fn lifecycle_subscription(&self, hook: LifecycleHook) -> GcSubscription {
        let (bit, slot) = (self.tag_bit, self.slot);
        let point = self.runtime.tracepoint(
            &[Event::NewObj, Event::FreeObj],
            Hook::internal(move |arg| {
                let Some(header) = arg.object() else {
                    return;
                };
                let object = TaggedHeader { header, bit, slot };
                match arg.event() {
                    Event::NewObj => hook(LifecycleEvent::Allocated(&object)),
                    Event::FreeObj => hook(LifecycleEvent::Freed(&object)),
                    Event::Safepoint => {}
                }
            }),
        );
        GcSubscription::new(Arc::clone(&self.runtime), point)
    }

    fn safepoint_subscription(&self, hook: SafepointHook) -> GcSubscription {
        let point = self.runtime.tracepoint(
            &[Event::Safepoint],
            Hook::safe(move |_| hook().map_err(Raised::from)),
        );
        GcSubscription::new(Arc::clone(&self.runtime), point)
    }

    fn collect_garbage(&self) {
        self.runtime.collect_current();
    }
}

/// Tracepoint owned by a tracker; removed from the runtime on drop
#[derive(Debug)]
pub struct GcSubscription {
    runtime: Arc<Runtime>,
    point: Arc<TracePoint>,
}

impl GcSubscription {
    fn new(runtime: Arc<Runtime>, point: Arc<TracePoint>) -> Self {
        Self { runtime, point }
    }
}

impl Subscription for GcSubscription {
    fn enable(&self) {
        self.point.enable();
    }

    fn disable(&self) {
        self.point.disable();
    }

    fn is_enabled(&self) -> bool {
        self.point.is_enabled()
    }
}

impl Drop for GcSubscription {
    fn drop(&mut self) {
        self.runtime.remove_tracepoint(&self.point);
    }
}

struct TaggedHeader<'a> {
    header: &'a GcHeader,
    bit: u8,
    slot: usize,
}

impl TaggedObject for TaggedHeader<'_> {
    #[inline]
    fn tag(&self, owner: CollectorId) {
        self.header.set_user_word(self.slot, owner.get());
        self.header.set_flag(self.bit);
    }

    #[inline]
    fn tagged_by(&self) -> Option<CollectorId> {
        if !self.header.has_flag(self.bit) {
            return None;
        }
        CollectorId::from_raw(self.header.user_word(self.slot))
    }
}

impl From<GcError> for TrackError {
    fn from(err: GcError) -> Self {
        err.downcast::<TrackError>()
            .unwrap_or_else(|other| TrackError::Host(other.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc_track_gc::GcConfig;

    fn runtime() -> Arc<Runtime> {
        Runtime::with_config(GcConfig {
            collect_threshold: None,
        })
    }

    #[test]
    fn test_with_tag_bit_rejects_heap_bits() {
        assert!(GcHost::with_tag_bit(runtime(), flags::USER2).is_ok());
        assert!(GcHost::with_tag_bit(runtime(), flags::RECLAIMED).is_err());
        assert!(GcHost::with_tag_bit(runtime(), flags::USER0 | flags::USER1).is_err());
        assert!(GcHost::with_tag_bit(runtime(), 0).is_err());
    }

    #[test]
    fn test_lifecycle_subscription_tags_objects() {
        let runtime = runtime();
        let host = GcHost::with_tag_bit(Arc::clone(&runtime), flags::USER1).unwrap();
        let owner = crate::Collector::new(std::thread::current().id()).id();
        let hook: LifecycleHook = Arc::new(move |event: LifecycleEvent<'_>| {
            if let LifecycleEvent::Allocated(object) = event {
                object.tag(owner);
            }
        });
        let subscription = host.lifecycle_subscription(hook);

        let heap = runtime.heap();
        let before = heap.alloc(1);
        subscription.enable();
        let after = heap.alloc(2);

        assert!(!before.header().has_flag(flags::USER1));
        assert!(after.header().has_flag(flags::USER1));
        assert!(!after.header().has_flag(flags::USER0));
        assert_eq!(after.header().user_word(1), owner.get());
        assert_eq!(after.header().user_word(0), 0);
        assert_eq!(before.header().user_word(1), 0);
    }

    #[test]
    fn test_subscription_drop_removes_tracepoint() {
        let runtime = runtime();
        let host = GcHost::new(Arc::clone(&runtime));
        let subscription = host.safepoint_subscription(Arc::new(|| Ok(())));
        subscription.enable();
        assert_eq!(runtime.stats().tracepoints, 1);

        drop(subscription);
        assert_eq!(runtime.stats().tracepoints, 0);
        assert_eq!(runtime.stats().active_tracepoints, 0);
    }

    #[test]
    fn test_track_error_survives_safepoint() {
        let runtime = runtime();
        let host = GcHost::new(Arc::clone(&runtime));
        let subscription = host.safepoint_subscription(Arc::new(|| {
            Err(TrackError::LimitExceeded { limit: 1, delta: 2 })
        }));
        subscription.enable();

        let err: TrackError = runtime.heap().safepoint().unwrap_err().into();
        assert_eq!(err, TrackError::LimitExceeded { limit: 1, delta: 2 });
    }

    #[test]
    fn test_foreign_error_becomes_host_error() {
        let err: TrackError = GcError::Raised("disk on fire".into()).into();
        assert_eq!(err, TrackError::Host("disk on fire".to_string()));
    }
}
