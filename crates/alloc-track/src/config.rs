//! Tracker configuration

use serde::Deserialize;

/// How many threads may track at once
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrackingPolicy {
    /// A single tracking region for the whole process. Other threads get
    /// `AlreadyRunning` on start and `WrongThread` on queries.
    #[default]
    Exclusive,
    /// Every thread may track independently
    PerThread,
}

/// Tracker configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// Tracking policy
    pub policy: TrackingPolicy,

    /// Run a collection before raising a limit violation and only raise if
    /// the thread is still over its limit afterwards
    pub reprieve: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            policy: TrackingPolicy::Exclusive,
            reprieve: true,
        }
    }
}

impl TrackerConfig {
    /// Config allowing every thread to track independently
    pub fn per_thread() -> Self {
        Self {
            policy: TrackingPolicy::PerThread,
            ..Self::default()
        }
    }

    /// Set whether a collection is attempted before raising
    pub fn with_reprieve(mut self, reprieve: bool) -> Self {
        self.reprieve = reprieve;
        self
    }

    /// Returns true for [`TrackingPolicy::Exclusive`]
    pub fn is_exclusive(&self) -> bool {
        self.policy == TrackingPolicy::Exclusive
    }
}
