//! Transport error types.

use std::io;

use thiserror::Error;

use crate::pem::PemError;

/// Result type for transport operations.
pub type NetResult<T> = Result<T, NetError>;

/// Errors produced by [`RawSocket`](crate::RawSocket) and
/// [`StreamSocket`](crate::StreamSocket).
#[derive(Debug, Error)]
pub enum NetError {
    /// I/O error from the underlying system call.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The address string could not be parsed or resolved.
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Binding the listening socket failed.
    #[error("failed to bind to {address}: {source}")]
    BindFailed { address: String, source: io::Error },

    /// Connecting to the remote endpoint failed.
    #[error("failed to connect to {address}: {source}")]
    ConnectFailed { address: String, source: io::Error },

    /// The handle has already been closed.
    #[error("socket is closed")]
    Closed,

    /// The operation does not apply to this kind of socket.
    #[error("{operation} is not supported on a {role} socket")]
    WrongRole {
        operation: &'static str,
        role: &'static str,
    },

    /// Invalid argument passed to a setter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// TLS configuration or session error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// PEM decoding error while loading TLS material.
    #[error("PEM error: {0}")]
    Pem(#[from] PemError),
}

impl NetError {
    /// Returns true if the error is a non-blocking "try again" condition.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::WouldBlock)
    }

    /// Returns true if the peer reset or aborted the connection.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            )
        )
    }
}
