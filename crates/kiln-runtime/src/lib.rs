//! # kiln-runtime: cooperative tick scheduler
//!
//! A hand-rolled, single-threaded executor for the Kiln server. Work is
//! expressed as [`AsyncEvent`]s, each wrapping a future. The [`EventLoop`]
//! advances every event once per tick and sleeps out the rest of the tick.
//!
//! ```text
//!  tick ─┬─ accept ─┬─ conn#1 ─┬─ conn#2 ─┬─ sleep(remaining) ─┐
//!        │          │          │          │                    │
//!        └──────────┴──────────┴──────────┴────────────────────┘
//!              registration order, one poll each
//! ```
//!
//! Tasks suspend with [`yield_now`]. Stopping is explicit: a [`StopHandle`]
//! is shared with whoever may end the loop, and a `mio` waker interrupts
//! the tick sleep so a stop takes effect promptly.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! use kiln_runtime::{AsyncEvent, EventLoop, yield_now};
//!
//! let mut event_loop = EventLoop::new(Duration::from_millis(1)).unwrap();
//! let counter = Rc::new(Cell::new(0));
//! let seen = Rc::clone(&counter);
//! event_loop.add_event(AsyncEvent::new("count", async move {
//!     for _ in 0..3 {
//!         seen.set(seen.get() + 1);
//!         yield_now().await;
//!     }
//! }));
//! event_loop.run_until_idle().unwrap();
//! assert_eq!(counter.get(), 3);
//! ```

mod error;
mod event;
mod event_loop;
mod stop;
mod yield_now;

pub use error::{RuntimeError, RuntimeResult};
pub use event::{AsyncEvent, EventStatus};
pub use event_loop::{DEFAULT_TICK, EventLoop, Spawner};
pub use stop::StopHandle;
pub use yield_now::yield_now;
