//! Connection state management.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use kiln_net::{ShutdownMode, StreamSocket};
use tracing::trace;

use crate::events::{Event, EventEmitter, EventKind};
use crate::handler::SocketHandler;

/// Largest chunk a single [`Connection::read`] returns.
pub const READ_CHUNK_SIZE: usize = 1500;

/// State of one accepted peer.
#[derive(Debug)]
pub struct Connection {
    handler: SocketHandler,
    /// Peer address as reported at accept time.
    peer: String,
    /// Replies queued by data listeners, not yet accepted by the socket.
    write_buf: BytesMut,
    /// Last time bytes moved in either direction.
    last_activity: Instant,
}

impl Connection {
    pub fn new(socket: StreamSocket, peer: impl Into<String>) -> Self {
        Self {
            handler: SocketHandler::new(socket),
            peer: peer.into(),
            write_buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            last_activity: Instant::now(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn handler(&self) -> &SocketHandler {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut SocketHandler {
        &mut self.handler
    }

    pub fn events_mut(&mut self) -> &mut EventEmitter {
        self.handler.events_mut()
    }

    pub fn on<F>(&mut self, kind: EventKind, listener: F)
    where
        F: FnMut(&mut Event<'_>) + 'static,
    {
        self.handler.on(kind, listener);
    }

    pub fn is_open(&self) -> bool {
        self.handler.is_open()
    }

    pub fn is_blocking(&self) -> bool {
        self.handler.socket().is_blocking()
    }

    /// Switches this connection's blocking mode without touching the
    /// listener it came from.
    pub fn set_blocking(&mut self, blocking: bool) -> bool {
        match self.handler.socket_mut().set_blocking(blocking) {
            Ok(()) => true,
            Err(e) => {
                self.handler.report("set_blocking", &e);
                false
            }
        }
    }

    /// Reads one chunk of at most [`READ_CHUNK_SIZE`] bytes.
    ///
    /// Emits `data` with exactly the bytes returned, which may be empty when
    /// nothing was available. Returns `None` without a `data` event once the
    /// peer has closed (no `error`) or the read failed (`error` emitted).
    /// Replies queued by data listeners are flushed before returning; if that
    /// write fails the `error` is emitted and `None` is returned as well.
    pub fn read(&mut self) -> Option<Bytes> {
        let chunk = match self.handler.socket_mut().read(READ_CHUNK_SIZE) {
            Ok(Some(chunk)) => chunk,
            Ok(None) => {
                trace!(peer = %self.peer, "peer closed the stream");
                return None;
            }
            Err(e) if e.is_disconnect() => {
                trace!(peer = %self.peer, error = %e, "peer dropped the stream");
                return None;
            }
            Err(e) => {
                self.handler.report("read", &e);
                return None;
            }
        };

        if !chunk.is_empty() {
            self.touch();
        }
        self.handler.events_mut().emit(&mut Event::Data {
            chunk: &chunk,
            reply: &mut self.write_buf,
        });
        self.flush()?;
        Some(chunk)
    }

    /// Writes `data` to the peer, returning the bytes the socket accepted.
    ///
    /// Empty input performs no socket call. Failures emit `error` and
    /// return 0.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        match self.handler.socket_mut().write(data) {
            Ok(written) => {
                if written > 0 {
                    self.touch();
                }
                written
            }
            Err(e) => {
                self.handler.report("write", &e);
                0
            }
        }
    }

    /// Appends `data` to the reply buffer without writing it yet.
    pub fn queue(&mut self, data: &[u8]) {
        self.write_buf.extend_from_slice(data);
    }

    /// Bytes queued but not yet accepted by the socket.
    pub fn pending_write(&self) -> usize {
        self.write_buf.len()
    }

    /// Writes as much of the reply buffer as the socket accepts.
    ///
    /// Whatever a non-blocking socket refuses stays queued for the next
    /// flush. A failed write emits `error`, discards the queue and returns
    /// `None`.
    pub fn flush(&mut self) -> Option<usize> {
        if self.write_buf.is_empty() || !self.is_open() {
            return Some(0);
        }
        let pending = self.write_buf.split().freeze();
        match self.handler.socket_mut().write(&pending) {
            Ok(written) => {
                if written < pending.len() {
                    self.write_buf.extend_from_slice(&pending[written..]);
                }
                if written > 0 {
                    self.touch();
                }
                Some(written)
            }
            Err(e) => {
                self.handler.report("write", &e);
                None
            }
        }
    }

    pub fn close(&mut self) -> bool {
        self.handler.close()
    }

    pub fn shutdown(&mut self, mode: ShutdownMode) -> bool {
        self.handler.shutdown(mode)
    }

    pub fn remote_address(&mut self, remote: bool) -> Option<String> {
        self.handler.remote_address(remote)
    }

    /// Updates the last activity timestamp.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Checks if no bytes have moved for longer than `timeout`.
    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }
}
