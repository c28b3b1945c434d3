//! Deferred limit violation signal
//!
//! Lifecycle hooks run inside the allocator and must not raise, so a limit
//! breach is only flagged there. The signal is a safe-point subscription
//! that is enabled while any collector has a pending breach; when the
//! owning thread reaches a safe point the breach is either forgiven (after
//! a reprieve collection) or raised as [`TrackError::LimitExceeded`].

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::ThreadId;

use parking_lot::Mutex;

use crate::error::{TrackError, TrackResult};
use crate::host::Subscription;
use crate::registry::Registry;

/// Safe-point subscription plus arm/settle bookkeeping
pub struct DeferredSignal<S: Subscription> {
    subscription: S,
    /// Serializes enabling against the "nothing breached" check in settle
    gate: Mutex<()>,
    limits_exceeded: AtomicU64,
    reprieves: AtomicU64,
}

impl<S: Subscription> DeferredSignal<S> {
    /// Wrap a disabled safe-point subscription
    pub fn new(subscription: S) -> Self {
        Self {
            subscription,
            gate: Mutex::new(()),
            limits_exceeded: AtomicU64::new(0),
            reprieves: AtomicU64::new(0),
        }
    }

    /// Enable the safe-point subscription. Idempotent.
    ///
    /// Called from lifecycle hooks after a collector reported a new breach.
    #[inline]
    pub fn arm(&self) {
        let _gate = self.gate.lock();
        self.subscription.enable();
    }

    /// Disable the subscription if no registered collector is breached
    pub fn settle<F: Subscription>(&self, registry: &Registry<F>) {
        let _gate = self.gate.lock();
        if !registry.any_breached() {
            self.subscription.disable();
        }
    }

    /// Resolve a pending breach of `thread`'s collector.
    ///
    /// Runs `reprieve` (a collection pass) first when given. If the thread
    /// is still over its limit afterwards its collector is unregistered and
    /// the violation is returned; otherwise the breach is cleared.
    pub fn fire<F: Subscription>(
        &self,
        registry: &Registry<F>,
        thread: ThreadId,
        reprieve: Option<&dyn Fn()>,
    ) -> TrackResult<()> {
        let Some(collector) = registry.lookup(thread) else {
            return Ok(());
        };
        if !collector.is_breached() {
            return Ok(());
        }

        if let Some(collect) = reprieve {
            collect();
        }

        if collector.exceeds_limit() {
            let limit = collector.limit().map_or(0, NonZeroU64::get);
            let delta = collector.delta();
            registry.unregister(thread)?;
            self.limits_exceeded.fetch_add(1, Ordering::Relaxed);
            self.settle(registry);

            tracing::warn!(
                target: "alloc_track",
                ?thread,
                limit,
                delta,
                "allocation limit exceeded, tracking stopped"
            );
            return Err(TrackError::LimitExceeded { limit, delta });
        }

        collector.clear_breach();
        self.reprieves.fetch_add(1, Ordering::Relaxed);
        self.settle(registry);

        tracing::debug!(
            target: "alloc_track",
            ?thread,
            delta = collector.delta(),
            "allocation limit breach cleared"
        );
        Ok(())
    }

    /// Returns true while the safe-point subscription is enabled
    pub fn is_armed(&self) -> bool {
        self.subscription.is_enabled()
    }

    /// Violations raised so far
    pub fn limits_exceeded(&self) -> u64 {
        self.limits_exceeded.load(Ordering::Relaxed)
    }

    /// Breaches cleared so far
    pub fn reprieves(&self) -> u64 {
        self.reprieves.load(Ordering::Relaxed)
    }
}

impl<S: Subscription> std::fmt::Debug for DeferredSignal<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredSignal")
            .field("armed", &self.is_armed())
            .field("limits_exceeded", &self.limits_exceeded())
            .field("reprieves", &self.reprieves())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::MockSubscription;
    use std::cell::Cell;

    fn setup(limit: u64) -> (Registry<MockSubscription>, DeferredSignal<MockSubscription>) {
        let registry = Registry::new(MockSubscription::default(), false);
        let collector = registry.register(std::thread::current().id()).unwrap();
        collector.set_limit(NonZeroU64::new(limit));
        (registry, DeferredSignal::new(MockSubscription::default()))
    }

    #[test]
    fn test_fire_without_breach_is_noop() {
        let (registry, signal) = setup(5);
        let me = std::thread::current().id();
        registry.lookup(me).unwrap().record_alloc();

        signal.fire(&registry, me, None).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(signal.reprieves(), 0);
    }

    #[test]
    fn test_fire_raises_and_unregisters() {
        let (registry, signal) = setup(2);
        let me = std::thread::current().id();
        let collector = registry.lookup(me).unwrap();
        for _ in 0..3 {
            if collector.record_alloc() {
                signal.arm();
            }
        }
        assert!(signal.is_armed());

        let err = signal.fire(&registry, me, None).unwrap_err();
        assert_eq!(err, TrackError::LimitExceeded { limit: 2, delta: 3 });
        assert!(registry.lookup(me).is_none());
        assert!(!signal.is_armed());
        assert_eq!(signal.limits_exceeded(), 1);
    }

    #[test]
    fn test_reprieve_clears_breach() {
        let (registry, signal) = setup(2);
        let me = std::thread::current().id();
        let collector = registry.lookup(me).unwrap();
        for _ in 0..3 {
            if collector.record_alloc() {
                signal.arm();
            }
        }

        let ran = Cell::new(false);
        let reprieve = || {
            ran.set(true);
            collector.record_free();
        };
        signal.fire(&registry, me, Some(&reprieve)).unwrap();

        assert!(ran.get());
        assert!(!collector.is_breached());
        assert!(!signal.is_armed());
        assert_eq!(signal.reprieves(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_settle_keeps_signal_for_other_breach() {
        let registry = Registry::new(MockSubscription::default(), false);
        let signal = DeferredSignal::new(MockSubscription::default());
        let other = std::thread::spawn(|| std::thread::current().id())
            .join()
            .unwrap();

        let theirs = registry.register(other).unwrap();
        theirs.set_limit(NonZeroU64::new(1));
        theirs.record_alloc();
        assert!(theirs.record_alloc());
        signal.arm();

        signal.settle(&registry);
        assert!(signal.is_armed());

        registry.unregister(other).unwrap();
        signal.settle(&registry);
        assert!(!signal.is_armed());
    }
}
