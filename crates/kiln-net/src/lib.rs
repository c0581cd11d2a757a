//! # kiln-net: socket transport for Kiln
//!
//! Two layers of socket handles:
//!
//! - [`RawSocket`]: one-to-one wrapper over the OS socket calls (create, bind,
//!   connect, listen, accept, send/receive, options, shutdown, close).
//! - [`StreamSocket`]: the stream handle the server uses. Adds address-string
//!   construction, chunked reads and writes, timeouts and TLS on an
//!   already-open descriptor.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │               StreamSocket               │
//! │  chunking · timeouts · rustls session    │
//! │  ┌────────────────────────────────────┐  │
//! │  │             RawSocket              │  │
//! │  │         (socket2::Socket)          │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Every operation returns a [`NetResult`]; nothing here panics or exits on
//! a failed system call. Non-blocking "try again" conditions are reported as
//! empty reads or `None` accepts, not as errors.

mod addr;
mod error;
pub mod pem;
mod raw;
mod stream;
pub mod tls;

pub use addr::{Endpoint, display_sock_addr, join_host_port};
pub use error::{NetError, NetResult};
pub use raw::RawSocket;
pub use stream::{DEFAULT_BACKLOG, DEFAULT_CHUNK_SIZE, ShutdownMode, SocketRole, StreamSocket};
pub use tls::{TlsConfig, TlsContext};

// Re-exported so callers can build raw sockets without a direct dependency.
pub use socket2::{Domain, Protocol, SockAddr, Type};
