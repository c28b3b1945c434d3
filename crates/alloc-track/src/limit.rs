//! Scoped allocation limits

use std::num::NonZeroU64;

use crate::error::{TrackError, TrackResult};
use crate::host::HostRuntime;
use crate::tracker::AllocTracker;

/// Run `work` under a live object cap of `cap`
pub(crate) fn run<H, T, E, F>(tracker: &AllocTracker<H>, cap: i64, work: F) -> Result<T, E>
where
    H: HostRuntime,
    F: FnOnce() -> Result<T, E>,
    E: From<TrackError>,
{
    let cap = u64::try_from(cap)
        .ok()
        .and_then(NonZeroU64::new)
        .ok_or_else(|| TrackError::invalid_argument(format!("limit must be positive, got {cap}")))?;

    let scope = LimitScope::enter(tracker, cap)?;
    let result = work();
    let exit = scope.exit();

    match (result, exit) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err.into()),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup)) => {
            tracing::warn!(
                target: "alloc_track",
                error = %cleanup,
                "allocation limit cleanup failed after the limited block returned an error"
            );
            Err(err)
        }
    }
}

/// Keeps tracking active for the duration of a limited block.
///
/// Dropping the scope without calling [`exit`](LimitScope::exit) (the
/// block panicked) stops tracking without raising.
struct LimitScope<'a, H: HostRuntime> {
    tracker: &'a AllocTracker<H>,
    active: bool,
}

impl<'a, H: HostRuntime> LimitScope<'a, H> {
    fn enter(tracker: &'a AllocTracker<H>, cap: NonZeroU64) -> TrackResult<Self> {
        let collector = tracker.start_collector()?;
        collector.set_limit(Some(cap));
        Ok(Self {
            tracker,
            active: true,
        })
    }

    /// Leave the block. The exit is a safe point: a pending breach is
    /// resolved before tracking stops.
    fn exit(mut self) -> TrackResult<()> {
        self.active = false;
        self.tracker.checkpoint()?;
        if !self.tracker.is_started() {
            // Already raised at a safe point inside the block
            return Ok(());
        }
        self.tracker.stop()
    }
}

impl<H: HostRuntime> Drop for LimitScope<'_, H> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        match self.tracker.stop() {
            Ok(()) | Err(TrackError::NotStarted) => {}
            Err(err) => tracing::warn!(
                target: "alloc_track",
                error = %err,
                "failed to stop allocation tracking while unwinding"
            ),
        }
    }
}
