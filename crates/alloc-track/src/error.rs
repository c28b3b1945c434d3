//! Tracker error types

use thiserror::Error;

/// Errors surfaced to callers of the tracker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    /// Malformed call (non-positive limit, unparsable argument)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Tracking already active for the calling thread
    #[error("allocation tracker already started")]
    AlreadyStarted,

    /// Tracking active on another thread while only one region may run
    #[error("allocation tracker already running on another thread")]
    AlreadyRunning,

    /// No tracking active for the calling thread
    #[error("allocation tracker has not been started")]
    NotStarted,

    /// Operation attempted from a thread that does not own the tracker
    #[error("allocation tracker is owned by another thread")]
    WrongThread,

    /// Live object delta exceeded the configured limit
    #[error("allocation limit exceeded (limit {limit}, delta {delta})")]
    LimitExceeded {
        /// Configured cap
        limit: u64,
        /// `allocated - freed` when the violation was raised
        delta: i64,
    },

    /// Error raised by the host runtime rather than the tracker
    #[error("host runtime error: {0}")]
    Host(String),
}

impl TrackError {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Returns true for [`TrackError::LimitExceeded`]
    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, Self::LimitExceeded { .. })
    }
}

/// Result type for tracker operations
pub type TrackResult<T> = std::result::Result<T, TrackError>;
