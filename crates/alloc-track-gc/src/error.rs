//! Heap error types

use thiserror::Error;

use crate::tracepoint::Raised;

/// Errors surfaced by the heap to the mutator
#[derive(Debug, Error)]
pub enum GcError {
    /// A safe-point hook raised an error
    #[error("{0}")]
    Raised(Raised),
}

impl GcError {
    /// The error raised by the hook
    pub fn raised(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        match self {
            GcError::Raised(err) => err.as_ref(),
        }
    }

    /// Recover a concrete error raised by a hook.
    ///
    /// Returns `self` unchanged if the raised error has a different type.
    pub fn downcast<E>(self) -> Result<E, Self>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match self {
            GcError::Raised(err) => err
                .downcast::<E>()
                .map(|boxed| *boxed)
                .map_err(GcError::Raised),
        }
    }
}

/// Result type for heap operations
pub type GcResult<T> = std::result::Result<T, GcError>;
