//! Schedulable units of cooperative work.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use tracing::error;

use crate::yield_now;

/// What happened when an event was advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// Suspended; resume on the next tick.
    Pending,
    /// Returned; remove from the loop.
    Completed,
    /// Panicked; already logged, remove from the loop.
    Panicked,
}

impl EventStatus {
    pub fn is_finished(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A labelled future advanced once per tick by the [`EventLoop`](crate::EventLoop).
///
/// The future is the suspendable execution context: every `.await` that
/// returns `Pending` (normally [`yield_now`]) hands control back to the loop
/// with the task's state intact.
pub struct AsyncEvent {
    label: String,
    future: Pin<Box<dyn Future<Output = ()>>>,
    polls: u64,
}

impl AsyncEvent {
    pub fn new(label: impl Into<String>, future: impl Future<Output = ()> + 'static) -> Self {
        Self {
            label: label.into(),
            future: Box::pin(future),
            polls: 0,
        }
    }

    /// Wraps a callable that runs once per tick until it returns
    /// `ControlFlow::Break`.
    pub fn repeating<F>(label: impl Into<String>, mut body: F) -> Self
    where
        F: FnMut() -> ControlFlow<()> + 'static,
    {
        Self::new(label, async move {
            while body().is_continue() {
                yield_now().await;
            }
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of times the loop has advanced this event.
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Runs the task until its next suspension point or completion.
    ///
    /// A panic inside the task is caught and reported as
    /// [`EventStatus::Panicked`].
    pub(crate) fn advance(&mut self, cx: &mut Context<'_>) -> EventStatus {
        self.polls += 1;
        let future = self.future.as_mut();
        match panic::catch_unwind(AssertUnwindSafe(|| future.poll(cx))) {
            Ok(Poll::Pending) => EventStatus::Pending,
            Ok(Poll::Ready(())) => EventStatus::Completed,
            Err(payload) => {
                error!(
                    event = %self.label,
                    panic = %panic_message(payload.as_ref()),
                    "async event panicked, dropping it"
                );
                EventStatus::Panicked
            }
        }
    }
}

impl fmt::Debug for AsyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncEvent")
            .field("label", &self.label)
            .field("polls", &self.polls)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
