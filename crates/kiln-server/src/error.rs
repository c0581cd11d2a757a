//! Server error types.

use kiln_net::NetError;
use kiln_runtime::RuntimeError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors returned by server construction and [`Server::run`](crate::Server::run).
///
/// Per-connection failures never surface here; they are reported through
/// `error` events on the connection that failed.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket construction or configuration failed.
    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// The event loop could not be created or failed while sleeping.
    #[error("event loop error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Metrics registry error.
    #[error("metrics error: {0}")]
    Metrics(String),

    /// `run()` was called while the server was already listening.
    #[error("server is already running")]
    AlreadyRunning,

    /// The server has been shut down and cannot run again.
    #[error("server shutdown")]
    Shutdown,
}

impl From<prometheus::Error> for ServerError {
    fn from(e: prometheus::Error) -> Self {
        Self::Metrics(e.to_string())
    }
}
