//! Stream socket handle used by the server.
//!
//! [`StreamSocket`] wraps a [`RawSocket`] with the stream-level settings the
//! server cares about: blocking mode, read chunk size, write buffering,
//! timeouts and an optional TLS session. A handle is either a listener
//! (created by [`StreamSocket::server`]) or a connected stream (created by
//! [`StreamSocket::client`], [`StreamSocket::pair`] or `accept`).

use std::fmt;
use std::io;
use std::net::Shutdown;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use socket2::{Domain, Type};
use tracing::{debug, trace};

use crate::addr::{Endpoint, display_sock_addr};
use crate::error::{NetError, NetResult};
use crate::raw::RawSocket;
use crate::tls::{self, TlsContext};

/// Default maximum bytes moved by one read or write call.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Listen backlog for server sockets.
pub const DEFAULT_BACKLOG: i32 = 128;

/// How often a blocking accept with a timeout re-checks for a connection.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Which half of a connection to shut down.
///
/// Follows POSIX `shutdown()`: 0 = read, 1 = write, 2 = both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownMode {
    Read,
    Write,
    #[default]
    Both,
}

impl TryFrom<i32> for ShutdownMode {
    type Error = NetError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Read),
            1 => Ok(Self::Write),
            2 => Ok(Self::Both),
            other => Err(NetError::InvalidArgument(format!(
                "shutdown mode must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

impl From<ShutdownMode> for Shutdown {
    fn from(mode: ShutdownMode) -> Self {
        match mode {
            ShutdownMode::Read => Shutdown::Read,
            ShutdownMode::Write => Shutdown::Write,
            ShutdownMode::Both => Shutdown::Both,
        }
    }
}

/// Whether a handle listens for connections or carries a byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRole {
    Listener,
    Stream,
}

impl SocketRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::Listener => "listening",
            Self::Stream => "stream",
        }
    }
}

/// A buffered stream-style socket handle.
pub struct StreamSocket {
    raw: RawSocket,
    role: SocketRole,
    chunk_size: usize,
    timeout: Option<Duration>,
    crypto: Option<TlsContext>,
    crypto_enabled: bool,
    session: Option<rustls::Connection>,
}

impl StreamSocket {
    fn from_raw(raw: RawSocket, role: SocketRole) -> Self {
        Self {
            raw,
            role,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: None,
            crypto: None,
            crypto_enabled: false,
            session: None,
        }
    }

    /// Creates a listening socket bound to `address`.
    ///
    /// TCP listeners set `SO_REUSEADDR` so a restarted server can rebind
    /// while old connections sit in `TIME_WAIT`.
    pub fn server(address: &str) -> NetResult<Self> {
        let endpoint = Endpoint::parse(address)?;
        let raw = RawSocket::create(endpoint.domain(), Type::STREAM, None)?;
        if endpoint.is_tcp() {
            raw.set_reuse_address(true)?;
        }

        raw.bind(&endpoint.to_sock_addr()?)
            .map_err(|e| match e {
                NetError::Io(source) => NetError::BindFailed {
                    address: endpoint.to_string(),
                    source,
                },
                other => other,
            })?;
        raw.listen(DEFAULT_BACKLOG)?;

        debug!(address = %endpoint, "stream server socket listening");
        Ok(Self::from_raw(raw, SocketRole::Listener))
    }

    /// Connects a stream socket to `address`.
    pub fn client(address: &str) -> NetResult<Self> {
        Self::connect(address, None)
    }

    /// Connects a stream socket to `address`, giving up after `timeout`.
    pub fn client_with_timeout(address: &str, timeout: Duration) -> NetResult<Self> {
        Self::connect(address, Some(timeout))
    }

    fn connect(address: &str, timeout: Option<Duration>) -> NetResult<Self> {
        let endpoint = Endpoint::parse(address)?;
        let raw = RawSocket::create(endpoint.domain(), Type::STREAM, None)?;
        let target = endpoint.to_sock_addr()?;

        let connected = match timeout {
            Some(timeout) => raw.connect_timeout(&target, timeout),
            None => raw.connect(&target),
        };
        connected.map_err(|e| match e {
            NetError::Io(source) => NetError::ConnectFailed {
                address: endpoint.to_string(),
                source,
            },
            other => other,
        })?;

        debug!(address = %endpoint, "stream client socket connected");
        Ok(Self::from_raw(raw, SocketRole::Stream))
    }

    /// Creates a pair of connected, unnamed stream sockets.
    #[cfg(unix)]
    pub fn pair() -> NetResult<(Self, Self)> {
        let (a, b) = RawSocket::pair(Domain::UNIX, Type::STREAM)?;
        Ok((
            Self::from_raw(a, SocketRole::Stream),
            Self::from_raw(b, SocketRole::Stream),
        ))
    }

    pub fn role(&self) -> SocketRole {
        self.role
    }

    pub fn is_open(&self) -> bool {
        self.raw.is_open()
    }

    pub fn is_blocking(&self) -> bool {
        self.raw.is_blocking()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns true while a TLS session is active (or, for a listener, while
    /// accepted sockets will start one).
    pub fn is_encrypted(&self) -> bool {
        self.crypto_enabled
    }

    /// Low-level access to the wrapped descriptor.
    pub fn raw(&self) -> &RawSocket {
        &self.raw
    }

    pub fn set_blocking(&mut self, blocking: bool) -> NetResult<()> {
        self.raw.set_blocking(blocking)
    }

    /// Sets the maximum bytes moved per read/write call and returns the
    /// previous value.
    pub fn set_chunk_size(&mut self, size: usize) -> NetResult<usize> {
        if size == 0 {
            return Err(NetError::InvalidArgument(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        self.ensure_open()?;
        Ok(std::mem::replace(&mut self.chunk_size, size))
    }

    /// Sizes the kernel send buffer.
    ///
    /// A size of zero asks for unbuffered writes: TCP streams disable Nagle
    /// coalescing instead of shrinking the buffer.
    pub fn set_write_buffer(&self, size: usize) -> NetResult<()> {
        if size == 0 {
            self.ensure_open()?;
            if let Err(e) = self.raw.set_nodelay(true) {
                // Not a TCP socket; nothing buffers in userspace either.
                trace!(error = %e, "nodelay not applicable");
            }
            return Ok(());
        }
        self.raw.set_send_buffer_size(size)
    }

    /// Applies a read/write timeout to blocking operations. A zero duration
    /// removes the timeout.
    pub fn set_timeout(&mut self, timeout: Duration) -> NetResult<()> {
        let timeout = (!timeout.is_zero()).then_some(timeout);
        self.raw.set_timeouts(timeout)?;
        self.timeout = timeout;
        Ok(())
    }

    /// Installs the TLS configuration used by [`Self::enable_crypto`].
    pub fn set_crypto_context(&mut self, context: TlsContext) {
        self.crypto = Some(context);
    }

    pub fn crypto_context(&self) -> Option<&TlsContext> {
        self.crypto.as_ref()
    }

    /// Turns encryption on or off for this already-open socket.
    ///
    /// On a stream this starts (or ends, with `close_notify`) a TLS session.
    /// On a listener it decides whether accepted sockets start one.
    pub fn enable_crypto(&mut self, enable: bool) -> NetResult<()> {
        self.ensure_open()?;

        if !enable {
            if let Some(mut session) = self.session.take() {
                tls::close_session(&mut session, &mut self.raw);
            }
            self.crypto_enabled = false;
            return Ok(());
        }

        let context = self
            .crypto
            .as_ref()
            .ok_or_else(|| NetError::Tls("no TLS context configured".to_string()))?;

        if self.role == SocketRole::Stream && self.session.is_none() {
            self.session = Some(context.new_session()?);
        } else if self.role == SocketRole::Listener && !context.is_server() {
            return Err(NetError::Tls(
                "listening sockets need a server TLS context".to_string(),
            ));
        }
        self.crypto_enabled = true;
        Ok(())
    }

    /// Returns the local (`remote == false`) or peer address as a string.
    pub fn name(&self, remote: bool) -> NetResult<String> {
        let addr = if remote {
            self.raw.peer_addr()?
        } else {
            self.raw.local_addr()?
        };
        Ok(display_sock_addr(&addr))
    }

    /// Accepts a connection.
    ///
    /// - Non-blocking listener: a single attempt; `Ok(None)` if nothing is
    ///   pending.
    /// - Blocking listener with `Some(timeout)`: waits at most `timeout`.
    /// - Blocking listener with `None`: waits until a peer connects.
    ///
    /// The accepted socket is blocking, inherits the listener's chunk size,
    /// timeout and TLS context, and starts a TLS session when the listener
    /// has encryption enabled. Returns the socket and the peer name.
    pub fn accept(&mut self, timeout: Option<Duration>) -> NetResult<Option<(StreamSocket, String)>> {
        self.expect_role(SocketRole::Listener, "accept")?;

        let accepted = if self.is_blocking() && timeout.is_some() {
            self.accept_until(timeout.map(|t| Instant::now() + t))
        } else {
            self.raw.accept()
        };

        let Some((raw, peer)) = accepted? else {
            return Ok(None);
        };

        let mut stream = Self::from_raw(raw, SocketRole::Stream);
        stream.chunk_size = self.chunk_size;
        if let Some(timeout) = self.timeout {
            stream.set_timeout(timeout)?;
        }
        stream.crypto = self.crypto.clone();
        if self.crypto_enabled {
            stream.enable_crypto(true)?;
        }

        let peer = display_sock_addr(&peer);
        trace!(peer = %peer, "accepted stream socket");
        Ok(Some((stream, peer)))
    }

    fn accept_until(
        &mut self,
        deadline: Option<Instant>,
    ) -> NetResult<Option<(RawSocket, socket2::SockAddr)>> {
        self.raw.set_blocking(false)?;
        let result = loop {
            match self.raw.accept() {
                Ok(None) => {
                    let now = Instant::now();
                    match deadline {
                        Some(deadline) if now < deadline => {
                            thread::sleep(ACCEPT_POLL_INTERVAL.min(deadline - now));
                        }
                        _ => break Ok(None),
                    }
                }
                other => break other,
            }
        };
        self.raw.set_blocking(true)?;
        result
    }

    /// Reads at most `max` bytes (capped at the chunk size).
    ///
    /// Returns `Ok(Some(bytes))` with the data read, which is empty when a
    /// non-blocking read would block or a blocking read timed out, and
    /// `Ok(None)` once the peer has closed the stream.
    pub fn read(&mut self, max: usize) -> NetResult<Option<Bytes>> {
        self.expect_role(SocketRole::Stream, "read")?;
        self.ensure_open()?;

        let len = max.min(self.chunk_size);
        if len == 0 {
            return Ok(Some(Bytes::new()));
        }
        let mut buf = vec![0u8; len];

        loop {
            let result = match self.session.as_mut() {
                Some(session) => tls::read_plaintext(session, &mut self.raw, &mut buf),
                None => io::Read::read(&mut self.raw, &mut buf),
            };
            return match result {
                Ok(0) => Ok(None),
                Ok(n) => {
                    buf.truncate(n);
                    Ok(Some(Bytes::from(buf)))
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    Ok(Some(Bytes::new()))
                }
                Err(e) => Err(e.into()),
            };
        }
    }

    /// Writes `data` in chunk-sized pieces.
    ///
    /// Blocking sockets write everything; non-blocking sockets stop at the
    /// first piece the kernel refuses. Returns the bytes accepted.
    pub fn write(&mut self, data: &[u8]) -> NetResult<usize> {
        self.expect_role(SocketRole::Stream, "write")?;
        self.ensure_open()?;

        let mut written = 0;
        while written < data.len() {
            let end = (written + self.chunk_size).min(data.len());
            let piece = &data[written..end];
            let result = match self.session.as_mut() {
                Some(session) => tls::write_plaintext(session, &mut self.raw, piece),
                None => io::Write::write(&mut self.raw, piece),
            };
            match result {
                Ok(0) => {
                    return Err(NetError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write to socket",
                    )));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }

    /// Reads at most `max` bytes and reports the sender's address.
    ///
    /// Bypasses any TLS session. Returns `Ok(None)` once the peer has closed
    /// the stream and an empty payload when nothing is available.
    pub fn receive_from(&mut self, max: usize) -> NetResult<Option<(Bytes, String)>> {
        self.expect_role(SocketRole::Stream, "receive_from")?;

        let mut buf = vec![0u8; max.min(self.chunk_size)];
        match self.raw.receive_from(&mut buf) {
            Ok((0, _)) if !buf.is_empty() => Ok(None),
            Ok((n, from)) => {
                buf.truncate(n);
                let from = from.as_ref().map(display_sock_addr).unwrap_or_default();
                Ok(Some((Bytes::from(buf), from)))
            }
            Err(e) if e.is_would_block() => Ok(Some((Bytes::new(), String::new()))),
            Err(e) => Err(e),
        }
    }

    /// Sends `data` to the connected peer, or to `address` when given.
    ///
    /// Bypasses any TLS session.
    pub fn send_to(&self, data: &[u8], address: Option<&str>) -> NetResult<usize> {
        match address {
            None => self.raw.send(data),
            Some(address) => {
                let target = Endpoint::parse(address)?.to_sock_addr()?;
                self.raw.send_to(data, &target)
            }
        }
    }

    /// Shuts down one or both halves of the connection.
    pub fn shutdown(&mut self, mode: ShutdownMode) -> NetResult<()> {
        self.ensure_open()?;
        if mode != ShutdownMode::Read {
            if let Some(session) = self.session.as_mut() {
                tls::close_session(session, &mut self.raw);
            }
        }
        self.raw.shutdown(mode.into())
    }

    /// Closes the handle. Returns false if it was already closed.
    pub fn close(&mut self) -> bool {
        if let Some(mut session) = self.session.take() {
            tls::close_session(&mut session, &mut self.raw);
        }
        self.crypto_enabled = false;
        self.raw.close()
    }

    fn ensure_open(&self) -> NetResult<()> {
        if self.raw.is_open() {
            Ok(())
        } else {
            Err(NetError::Closed)
        }
    }

    fn expect_role(&self, role: SocketRole, operation: &'static str) -> NetResult<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(NetError::WrongRole {
                operation,
                role: self.role.as_str(),
            })
        }
    }
}

impl fmt::Debug for StreamSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSocket")
            .field("role", &self.role)
            .field("open", &self.is_open())
            .field("blocking", &self.is_blocking())
            .field("chunk_size", &self.chunk_size)
            .field("timeout", &self.timeout)
            .field("encrypted", &self.crypto_enabled)
            .finish_non_exhaustive()
    }
}
