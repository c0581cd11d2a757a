//! The event-loop-driven server.

use std::cell::RefCell;
use std::fmt;
use std::ops::ControlFlow;
use std::rc::Rc;
use std::time::Duration;

use kiln_net::{NetResult, ShutdownMode, StreamSocket, TlsContext};
use kiln_runtime::{AsyncEvent, EventLoop, Spawner, StopHandle, yield_now};
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};
use crate::events::{Event, EventKind, SocketError};
use crate::handler::SocketHandler;
use crate::metrics::ServerMetrics;

/// Lifecycle of a [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Bound, not yet running.
    Initialized,
    /// `run()` is driving the event loop.
    Listening,
    /// Shutdown requested; the listener is being closed.
    ShuttingDown,
    /// Listener closed. Terminal.
    Stopped,
}

/// Ends a running server from any thread or task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    stop: StopHandle,
}

impl ShutdownHandle {
    /// Requests shutdown. `run()` returns within one tick.
    pub fn shutdown(&self) {
        self.stop.stop();
    }

    pub fn is_shutdown(&self) -> bool {
        self.stop.is_stopped()
    }
}

/// A listening socket plus the cooperative loop that serves it.
///
/// One task accepts at most one peer per tick; each accepted peer gets its
/// own task that reads a chunk, emits `data`, and yields. Everything runs on
/// the thread that calls [`Server::run`].
pub struct Server {
    config: ServerConfig,
    listener: Rc<RefCell<SocketHandler>>,
    state: ServerState,
    stop: StopHandle,
    metrics: ServerMetrics,
}

impl Server {
    /// Binds `address:port` with default settings.
    pub fn new(address: &str, port: u16) -> ServerResult<Self> {
        Self::with_config(ServerConfig::new(address, port))
    }

    /// Binds the listener described by `config` and puts it in non-blocking
    /// mode.
    pub fn with_config(config: ServerConfig) -> ServerResult<Self> {
        let address = config.bind_address();
        let mut socket = StreamSocket::server(&address)?;
        socket.set_blocking(false)?;
        if let Some(size) = config.chunk_size {
            socket.set_chunk_size(size)?;
        }
        if let Some(size) = config.write_buffer {
            socket.set_write_buffer(size)?;
        }
        if let Some(timeout) = config.timeout {
            socket.set_timeout(timeout)?;
        }
        if let Some(tls) = &config.tls {
            socket.set_crypto_context(tls.build_context()?);
            socket.enable_crypto(true)?;
        }

        let metrics = ServerMetrics::new()?;
        let mut handler = SocketHandler::new(socket);
        let errors = metrics.errors.clone();
        handler.events_mut().on_error(move |_| errors.inc());

        info!(address = %address, tls = config.tls.is_some(), "server bound");
        Ok(Self {
            config,
            listener: Rc::new(RefCell::new(handler)),
            state: ServerState::Initialized,
            stop: StopHandle::new(),
            metrics,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn metrics(&self) -> &ServerMetrics {
        &self.metrics
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stop: self.stop.clone(),
        }
    }

    /// True while the listener is open and no shutdown has been requested.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ServerState::Initialized | ServerState::Listening
        ) && !self.stop.is_stopped()
            && self.listener.borrow().is_open()
    }

    /// The address the listener is bound to.
    pub fn local_address(&self) -> Option<String> {
        self.listener.borrow_mut().remote_address(false)
    }

    pub fn on<F>(&mut self, kind: EventKind, listener: F)
    where
        F: FnMut(&mut Event<'_>) + 'static,
    {
        self.listener.borrow_mut().on(kind, listener);
    }

    /// Registers a listener for newly accepted connections.
    pub fn on_connection<F>(&mut self, listener: F)
    where
        F: FnMut(&mut Connection) + 'static,
    {
        self.listener.borrow_mut().events_mut().on_connection(listener);
    }

    /// Registers a listener for listener-level errors.
    pub fn on_error<F>(&mut self, listener: F)
    where
        F: FnMut(&SocketError) + 'static,
    {
        self.listener.borrow_mut().events_mut().on_error(listener);
    }

    pub fn on_close<F>(&mut self, listener: F)
    where
        F: FnMut() + 'static,
    {
        self.listener.borrow_mut().events_mut().on_close(listener);
    }

    pub fn set_blocking(&mut self, blocking: bool) -> bool {
        self.configure("set_blocking", |socket| socket.set_blocking(blocking))
    }

    /// Sets the transport chunk size inherited by accepted connections.
    pub fn set_chunk_size(&mut self, size: usize) -> bool {
        self.configure("set_chunk_size", |socket| {
            socket.set_chunk_size(size).map(|_| ())
        })
    }

    pub fn set_write_buffer(&mut self, size: usize) -> bool {
        self.configure("set_write_buffer", |socket| socket.set_write_buffer(size))
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> bool {
        self.configure("set_timeout", |socket| socket.set_timeout(timeout))
    }

    /// Installs the TLS context used by [`Self::set_secure`].
    pub fn set_tls_context(&mut self, context: TlsContext) {
        self.listener
            .borrow_mut()
            .socket_mut()
            .set_crypto_context(context);
    }

    /// Turns TLS on or off for connections accepted from now on.
    pub fn set_secure(&mut self, enable: bool) -> bool {
        self.configure("set_secure", |socket| socket.enable_crypto(enable))
    }

    fn configure<F>(&mut self, operation: &'static str, apply: F) -> bool
    where
        F: FnOnce(&mut StreamSocket) -> NetResult<()>,
    {
        let mut listener = self.listener.borrow_mut();
        match apply(listener.socket_mut()) {
            Ok(()) => true,
            Err(e) => {
                listener.report(operation, &e);
                false
            }
        }
    }

    /// Serves connections until shutdown is requested.
    ///
    /// Returns after the event loop stops, with the listener shut down and
    /// the server [`Stopped`](ServerState::Stopped). Connection tasks still
    /// in flight are dropped with the loop.
    #[instrument(skip_all, fields(address))]
    pub fn run(&mut self) -> ServerResult<()> {
        match self.state {
            ServerState::Initialized => {}
            ServerState::Listening => return Err(ServerError::AlreadyRunning),
            ServerState::ShuttingDown | ServerState::Stopped => return Err(ServerError::Shutdown),
        }
        let address = self
            .local_address()
            .unwrap_or_else(|| self.config.bind_address());
        tracing::Span::current().record("address", address.as_str());

        let mut event_loop =
            EventLoop::with_stop_handle(self.config.tick_interval, self.stop.clone())?;
        event_loop.add_event(self.accept_event(event_loop.spawner()));
        self.state = ServerState::Listening;
        info!("server listening");

        let result = event_loop.run();
        drop(event_loop);

        self.state = ServerState::ShuttingDown;
        self.close_listener(ShutdownMode::Both);
        result.map_err(ServerError::from)
    }

    /// Closes the listener and ends the event loop.
    ///
    /// Returns false if the server was already shut down.
    pub fn shutdown(&mut self, mode: ShutdownMode) -> bool {
        if matches!(
            self.state,
            ServerState::ShuttingDown | ServerState::Stopped
        ) {
            return false;
        }
        self.state = ServerState::ShuttingDown;
        self.stop.stop();
        self.close_listener(mode);
        true
    }

    fn close_listener(&mut self, mode: ShutdownMode) {
        {
            let mut listener = self.listener.borrow_mut();
            if listener.is_open() {
                listener.shutdown(mode);
                listener.close();
            }
        }
        self.state = ServerState::Stopped;
        info!(
            accepted = self.metrics.connections_accepted.get(),
            "server stopped"
        );
    }

    /// The task that accepts at most one peer per tick.
    fn accept_event(&self, spawner: Spawner) -> AsyncEvent {
        let listener = Rc::clone(&self.listener);
        let context = Rc::new(ConnectionContext {
            exit_sentinel: self
                .config
                .exit_sentinel
                .as_deref()
                .map(str::trim)
                .filter(|sentinel| !sentinel.is_empty())
                .map(str::to_string),
            idle_timeout: self.config.idle_timeout,
            stop: self.stop.clone(),
            metrics: self.metrics.clone(),
        });
        let max_connections = self.config.max_connections;
        let mut next_id: u64 = 0;

        AsyncEvent::repeating("accept", move || {
            if !listener.borrow().is_open() {
                debug!("listener closed, accept task finished");
                return ControlFlow::Break(());
            }
            if context.metrics.active() >= max_connections {
                return ControlFlow::Continue(());
            }
            let Some(mut conn) = listener.borrow_mut().accept(Some(Duration::ZERO)) else {
                return ControlFlow::Continue(());
            };

            next_id += 1;
            if !conn.set_blocking(false) {
                warn!(peer = %conn.peer(), "connection left blocking, dropping it");
                conn.close();
                return ControlFlow::Continue(());
            }
            let errors = context.metrics.errors.clone();
            conn.events_mut().on_error(move |_| errors.inc());

            let active = ActiveConnection::open(context.metrics.clone());
            let span = info_span!("connection", id = next_id, peer = %conn.peer());
            let task = serve(conn, Rc::clone(&context), active).instrument(span);
            spawner.spawn(AsyncEvent::new(format!("conn-{next_id}"), task));
            ControlFlow::Continue(())
        })
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("address", &self.config.bind_address())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// What every connection task shares with the server.
struct ConnectionContext {
    exit_sentinel: Option<String>,
    idle_timeout: Option<Duration>,
    stop: StopHandle,
    metrics: ServerMetrics,
}

impl ConnectionContext {
    fn is_exit(&self, chunk: &[u8]) -> bool {
        self.exit_sentinel
            .as_deref()
            .is_some_and(|sentinel| chunk.trim_ascii() == sentinel.as_bytes())
    }
}

/// Counts a connection as active until the task owning it is dropped.
struct ActiveConnection(ServerMetrics);

impl ActiveConnection {
    fn open(metrics: ServerMetrics) -> Self {
        metrics.connection_opened();
        Self(metrics)
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.0.connection_closed();
    }
}

/// Per-connection task: read, check for exit, yield.
async fn serve(mut conn: Connection, context: Rc<ConnectionContext>, _active: ActiveConnection) {
    debug!("connection task started");
    while conn.is_open() {
        let Some(chunk) = conn.read() else {
            conn.close();
            break;
        };
        context.metrics.bytes_read.inc_by(chunk.len() as u64);

        if context.is_exit(&chunk) {
            info!("exit sentinel received, shutting down");
            conn.close();
            context.stop.stop();
            break;
        }
        if let Some(limit) = context.idle_timeout {
            if conn.is_idle(limit) {
                info!(idle_ms = limit.as_millis() as u64, "closing idle connection");
                conn.close();
                break;
            }
        }
        if conn.pending_write() > 0 && conn.flush().is_none() {
            conn.close();
            break;
        }

        yield_now().await;
    }
    debug!("connection task finished");
}
