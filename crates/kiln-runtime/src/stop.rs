//! Loop cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

/// Shared stop flag for an [`EventLoop`](crate::EventLoop).
///
/// Cloneable and `Send + Sync`, so it can stop a loop from a task running on
/// the loop itself or from any other thread. Once stopped it stays stopped.
/// One handle may be shared by several loops; stopping it wakes all of them.
#[derive(Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    wakers: Mutex<Vec<mio::Waker>>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests the loop to stop and interrupts its tick sleep.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let wakers = self
            .inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for waker in wakers.iter() {
            if let Err(e) = waker.wake() {
                warn!(error = %e, "failed to wake event loop");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Adds the waker of a loop that observes this handle.
    pub(crate) fn attach(&self, waker: mio::Waker) {
        self.inner
            .wakers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(waker);
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
