//! Event-emitting wrapper around a [`StreamSocket`].

use std::io;
use std::time::Duration;

use kiln_net::{NetError, ShutdownMode, StreamSocket};
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::events::{Event, EventEmitter, EventKind, SocketError};

/// Owns a socket and reports what happens to it as events.
///
/// Operations never return transport errors directly: failures are emitted
/// as `error` events and the call returns `None` or `false`.
#[derive(Debug)]
pub struct SocketHandler {
    socket: StreamSocket,
    events: EventEmitter,
    close_emitted: bool,
}

impl SocketHandler {
    pub fn new(socket: StreamSocket) -> Self {
        Self {
            socket,
            events: EventEmitter::new(),
            close_emitted: false,
        }
    }

    pub fn socket(&self) -> &StreamSocket {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut StreamSocket {
        &mut self.socket
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventEmitter {
        &mut self.events
    }

    pub fn on<F>(&mut self, kind: EventKind, listener: F)
    where
        F: FnMut(&mut Event<'_>) + 'static,
    {
        self.events.on(kind, listener);
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_open()
    }

    /// Accepts one pending peer and emits `connection` for it.
    ///
    /// Returns `None` when nothing is pending (no event) or when the accept
    /// failed (an `error` event is emitted).
    pub fn accept(&mut self, timeout: Option<Duration>) -> Option<Connection> {
        match self.socket.accept(timeout) {
            Ok(Some((stream, peer))) => {
                let mut conn = Connection::new(stream, peer);
                self.events.emit(&mut Event::Connection(&mut conn));
                Some(conn)
            }
            Ok(None) => None,
            Err(e) => {
                self.report("accept", &e);
                None
            }
        }
    }

    /// Closes the socket and emits `close`.
    ///
    /// Returns false if the socket was already closed.
    pub fn close(&mut self) -> bool {
        let closed = self.socket.close();
        if closed {
            self.emit_close();
        }
        closed
    }

    /// Shuts down one or both directions and emits `close`.
    ///
    /// A socket that was never connected (a listener) has nothing to shut
    /// down; that case is not reported as an error.
    pub fn shutdown(&mut self, mode: ShutdownMode) -> bool {
        let result = self.socket.shutdown(mode);
        let ok = match result {
            Ok(()) => true,
            Err(NetError::Io(e)) if e.kind() == io::ErrorKind::NotConnected => {
                debug!(?mode, "shutdown on unconnected socket");
                true
            }
            Err(e) => {
                self.report("shutdown", &e);
                false
            }
        };
        self.emit_close();
        ok
    }

    /// Returns the peer (`remote == true`) or local address.
    pub fn remote_address(&mut self, remote: bool) -> Option<String> {
        match self.socket.name(remote) {
            Ok(name) => Some(name),
            Err(e) => {
                self.report("name", &e);
                None
            }
        }
    }

    /// Emits an `error` event for a failed operation.
    pub(crate) fn report(&mut self, operation: &'static str, err: &NetError) {
        warn!(operation, error = %err, "socket operation failed");
        let err = SocketError::new(operation, err);
        self.events.emit(&mut Event::Error(&err));
    }

    /// Emits `close` at most once over the handler's lifetime.
    fn emit_close(&mut self) {
        if !self.close_emitted {
            self.close_emitted = true;
            self.events.emit(&mut Event::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use kiln_net::StreamSocket;

    use super::*;

    fn listener() -> SocketHandler {
        let mut socket = StreamSocket::server("127.0.0.1:0").unwrap();
        socket.set_blocking(false).unwrap();
        SocketHandler::new(socket)
    }

    fn count(handler: &mut SocketHandler, kind: EventKind) -> Rc<Cell<usize>> {
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        handler.on(kind, move |_| counter.set(counter.get() + 1));
        hits
    }

    #[test]
    fn accept_with_nothing_pending_is_silent() {
        let mut handler = listener();
        let errors = count(&mut handler, EventKind::Error);
        let connections = count(&mut handler, EventKind::Connection);

        assert!(handler.accept(Some(Duration::ZERO)).is_none());
        assert_eq!(errors.get(), 0);
        assert_eq!(connections.get(), 0);
    }

    #[test]
    fn accept_emits_connection_with_peer() {
        let mut handler = listener();
        let peers = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&peers);
        handler
            .events_mut()
            .on_connection(move |conn| seen.borrow_mut().push(conn.peer().to_string()));

        let local = handler.remote_address(false).unwrap();
        let client = StreamSocket::client(&local).unwrap();
        let client_name = client.name(false).unwrap();

        let mut accepted = None;
        for _ in 0..200 {
            accepted = handler.accept(Some(Duration::ZERO));
            if accepted.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        let conn = accepted.expect("client was never accepted");
        assert_eq!(conn.peer(), client_name);
        assert_eq!(*peers.borrow(), [client_name]);
    }

    #[test]
    fn accept_on_closed_socket_emits_error() {
        let mut handler = listener();
        let operations = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&operations);
        handler
            .events_mut()
            .on_error(move |err| seen.borrow_mut().push(err.operation));

        handler.close();
        assert!(handler.accept(None).is_none());
        assert_eq!(*operations.borrow(), ["accept"]);
    }

    #[test]
    fn close_emits_once() {
        let mut handler = listener();
        let closes = count(&mut handler, EventKind::Close);

        assert!(handler.close());
        assert!(!handler.close());
        assert_eq!(closes.get(), 1);
        assert!(!handler.is_open());
    }

    #[test]
    fn shutdown_on_listener_is_not_an_error() {
        let mut handler = listener();
        let errors = count(&mut handler, EventKind::Error);
        let closes = count(&mut handler, EventKind::Close);

        assert!(handler.shutdown(ShutdownMode::Both));
        handler.close();
        assert_eq!(errors.get(), 0);
        assert_eq!(closes.get(), 1);
    }

    #[test]
    fn remote_address_on_listener_reports_error() {
        let mut handler = listener();
        let errors = count(&mut handler, EventKind::Error);

        assert!(handler.remote_address(false).is_some());
        assert!(handler.remote_address(true).is_none());
        assert_eq!(errors.get(), 1);
    }
}
