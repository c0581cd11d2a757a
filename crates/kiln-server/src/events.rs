//! Typed event registry shared by listeners and connections.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use bytes::BytesMut;
use tracing::error;

use crate::connection::Connection;

/// Key under which listeners are registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connection,
    Data,
    Error,
    Close,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Data => "data",
            Self::Error => "error",
            Self::Close => "close",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload of an `error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketError {
    /// Operation that failed, e.g. `"accept"` or `"read"`.
    pub operation: &'static str,
    pub message: String,
}

impl SocketError {
    pub fn new(operation: &'static str, message: impl fmt::Display) -> Self {
        Self {
            operation,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for SocketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.operation, self.message)
    }
}

/// An event delivered to listeners.
///
/// Payloads borrow from the emitter's owner for the duration of the
/// emission, so listeners must copy anything they want to keep.
pub enum Event<'a> {
    /// A peer was accepted. Listeners may attach their own listeners to the
    /// connection before its read task starts.
    Connection(&'a mut Connection),
    /// Bytes were read. Anything appended to `reply` is written back to the
    /// peer after every data listener has run.
    Data {
        chunk: &'a [u8],
        reply: &'a mut BytesMut,
    },
    Error(&'a SocketError),
    Close,
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connection(_) => EventKind::Connection,
            Self::Data { .. } => EventKind::Data,
            Self::Error(_) => EventKind::Error,
            Self::Close => EventKind::Close,
        }
    }
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(conn) => f.debug_tuple("Connection").field(&conn.peer()).finish(),
            Self::Data { chunk, reply } => f
                .debug_struct("Data")
                .field("len", &chunk.len())
                .field("reply_len", &reply.len())
                .finish(),
            Self::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Self::Close => f.write_str("Close"),
        }
    }
}

/// A registered callback.
pub type Listener = Box<dyn FnMut(&mut Event<'_>)>;

/// Ordered, per-kind listener lists.
///
/// Emission is synchronous and follows registration order. A listener that
/// panics is logged and skipped; the rest still run.
#[derive(Default)]
pub struct EventEmitter {
    listeners: HashMap<EventKind, Vec<Listener>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener for `kind`.
    pub fn on<F>(&mut self, kind: EventKind, listener: F)
    where
        F: FnMut(&mut Event<'_>) + 'static,
    {
        self.listeners.entry(kind).or_default().push(Box::new(listener));
    }

    /// Registers a `data` listener that receives the chunk and reply buffer.
    pub fn on_data<F>(&mut self, mut listener: F)
    where
        F: FnMut(&[u8], &mut BytesMut) + 'static,
    {
        self.on(EventKind::Data, move |event| {
            if let Event::Data { chunk, reply } = event {
                listener(chunk, &mut **reply);
            }
        });
    }

    pub fn on_error<F>(&mut self, mut listener: F)
    where
        F: FnMut(&SocketError) + 'static,
    {
        self.on(EventKind::Error, move |event| {
            if let Event::Error(err) = event {
                listener(*err);
            }
        });
    }

    pub fn on_close<F>(&mut self, mut listener: F)
    where
        F: FnMut() + 'static,
    {
        self.on(EventKind::Close, move |_| listener());
    }

    pub fn on_connection<F>(&mut self, mut listener: F)
    where
        F: FnMut(&mut Connection) + 'static,
    {
        self.on(EventKind::Connection, move |event| {
            if let Event::Connection(conn) = event {
                listener(&mut **conn);
            }
        });
    }

    /// Invokes every listener registered for the event's kind.
    ///
    /// Returns the number of listeners that completed without panicking.
    pub fn emit(&mut self, event: &mut Event<'_>) -> usize {
        let kind = event.kind();
        let Some(listeners) = self.listeners.get_mut(&kind) else {
            return 0;
        };

        let mut completed = 0;
        for (index, listener) in listeners.iter_mut().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => completed += 1,
                Err(_) => error!(event = %kind, listener = index, "event listener panicked"),
            }
        }
        completed
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Removes every listener for `kind`, returning how many were removed.
    pub fn remove_all(&mut self, kind: EventKind) -> usize {
        self.listeners.remove(&kind).map_or(0, |removed| removed.len())
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<_> = self
            .listeners
            .iter()
            .map(|(kind, listeners)| (kind.name(), listeners.len()))
            .collect();
        counts.sort_unstable();
        f.debug_struct("EventEmitter").field("listeners", &counts).finish()
    }
}
