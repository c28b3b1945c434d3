//! Tracker statistics snapshots

use serde::Serialize;

/// Snapshot of one collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectorSnapshot {
    /// Owning thread (debug representation of its `ThreadId`)
    pub thread: String,
    /// Allocations observed
    pub allocated: u64,
    /// Frees observed
    pub freed: u64,
    /// `allocated - freed`
    pub delta: i64,
    /// Highest delta observed
    pub max_delta: i64,
    /// Configured limit
    pub limit: Option<u64>,
    /// Whether a breach is pending
    pub breached: bool,
}

/// Snapshot of the whole tracker (for reporting)
#[derive(Debug, Clone, Serialize)]
pub struct TrackerStats {
    /// Threads currently tracking
    pub tracking: usize,
    /// Whether the lifecycle feed is subscribed
    pub lifecycle_feed_enabled: bool,
    /// Whether the deferred violation signal is armed
    pub signal_armed: bool,
    /// Limit violations raised since the tracker was created
    pub limits_exceeded: u64,
    /// Breaches cleared by a reprieve collection
    pub reprieves: u64,
    /// Per-thread collectors
    pub collectors: Vec<CollectorSnapshot>,
}

impl TrackerStats {
    /// Total live objects across all tracked threads
    pub fn total_delta(&self) -> i64 {
        self.collectors.iter().map(|c| c.delta).sum()
    }
}
