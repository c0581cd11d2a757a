//! Scheduler error types.

use std::time::Duration;

use thiserror::Error;

/// Result type for scheduler operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Errors that can occur while building or running an event loop.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The poller backing the tick sleep failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Tick interval rejected.
    #[error("tick interval must be greater than zero, got {0:?}")]
    InvalidTick(Duration),
}
