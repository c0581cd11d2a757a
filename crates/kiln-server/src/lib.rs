//! # kiln-server: event-driven TCP server
//!
//! A single-threaded socket server built on the [`kiln_runtime`] tick
//! scheduler and the [`kiln_net`] transport.
//!
//! ```text
//! ┌─────────────────────────── Server ───────────────────────────┐
//! │  SocketHandler (listener)      EventLoop (one tick)          │
//! │  ┌──────────────────┐   accept ──► conn-1 ──► conn-2 ──► …   │
//! │  │ connection/error │     │          │          │            │
//! │  │ close listeners  │     ▼          ▼          ▼            │
//! │  └──────────────────┘  Connection  read() → data → reply     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Applications talk to the server through typed events. A `connection`
//! listener receives each accepted [`Connection`] before its task starts and
//! typically attaches `data` listeners to it:
//!
//! ```no_run
//! use kiln_server::{Server, ServerConfig};
//!
//! let config = ServerConfig::new("127.0.0.1", 7000).with_exit_sentinel("exit");
//! let mut server = Server::with_config(config)?;
//! server.on_connection(|conn| {
//!     conn.events_mut().on_data(|chunk, reply| reply.extend_from_slice(chunk));
//! });
//! server.run()?;
//! # Ok::<(), kiln_server::ServerError>(())
//! ```
//!
//! Failures on an established connection never stop the server: they are
//! emitted as `error` events and the affected connection closes.

mod config;
mod connection;
mod error;
mod events;
mod handler;
mod metrics;
mod server;

pub use config::ServerConfig;
pub use connection::{Connection, READ_CHUNK_SIZE};
pub use error::{ServerError, ServerResult};
pub use events::{Event, EventEmitter, EventKind, Listener, SocketError};
pub use handler::SocketHandler;
pub use metrics::ServerMetrics;
pub use server::{Server, ServerState, ShutdownHandle};

// Re-exported so applications need only this crate for common setups.
pub use kiln_net::{ShutdownMode, TlsConfig, TlsContext};
