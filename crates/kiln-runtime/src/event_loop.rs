//! The tick scheduler.

use std::cell::RefCell;
use std::io;
use std::rc::{Rc, Weak};
use std::task::{Context, Waker};
use std::time::{Duration, Instant};

use mio::{Events, Poll, Token};
use tracing::{debug, info, trace};

use crate::error::{RuntimeError, RuntimeResult};
use crate::event::AsyncEvent;
use crate::stop::StopHandle;

/// Default time budget of one tick.
pub const DEFAULT_TICK: Duration = Duration::from_millis(200);

const WAKE_TOKEN: Token = Token(0);

type SpawnQueue = Rc<RefCell<Vec<AsyncEvent>>>;

/// Single-threaded cooperative scheduler.
///
/// Each tick advances every live [`AsyncEvent`] exactly once, in
/// registration order, drops the ones that finished, then sleeps for
/// whatever is left of the tick interval. There is no preemption: a task
/// only gives control back at a suspension point.
///
/// The stop flag is checked at the top of every tick and before every event
/// is advanced. Once it is observed nothing else runs and [`Self::run`]
/// returns.
pub struct EventLoop {
    tick: Duration,
    events: Vec<AsyncEvent>,
    spawned: SpawnQueue,
    stop: StopHandle,
    poll: Poll,
    wake_events: Events,
    ticks: u64,
}

impl EventLoop {
    pub fn new(tick: Duration) -> RuntimeResult<Self> {
        Self::with_stop_handle(tick, StopHandle::new())
    }

    /// Creates a loop that observes an existing stop handle, which may also
    /// be shared with other loops.
    pub fn with_stop_handle(tick: Duration, stop: StopHandle) -> RuntimeResult<Self> {
        if tick.is_zero() {
            return Err(RuntimeError::InvalidTick(tick));
        }
        let poll = Poll::new()?;
        stop.attach(mio::Waker::new(poll.registry(), WAKE_TOKEN)?);

        Ok(Self {
            tick,
            events: Vec::new(),
            spawned: Rc::new(RefCell::new(Vec::new())),
            stop,
            poll,
            wake_events: Events::with_capacity(4),
            ticks: 0,
        })
    }

    /// Appends an event; it runs after every event already registered.
    pub fn add_event(&mut self, event: AsyncEvent) {
        debug!(event = %event.label(), "async event registered");
        self.events.push(event);
    }

    /// Handle for registering events from inside running tasks.
    pub fn spawner(&self) -> Spawner {
        Spawner {
            queue: Rc::downgrade(&self.spawned),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Asks the loop to stop.
    pub fn end(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick
    }

    /// Number of ticks completed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Number of live events, including ones spawned but not yet run.
    pub fn len(&self) -> usize {
        self.events.len() + self.spawned.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Labels of the live events in scheduling order.
    pub fn labels(&self) -> Vec<String> {
        self.events
            .iter()
            .chain(self.spawned.borrow().iter())
            .map(|event| event.label().to_string())
            .collect()
    }

    /// Runs one tick without sleeping.
    ///
    /// Events spawned during the tick are appended to the schedule and run
    /// later in the same tick. Returns false if the stop flag cut the tick
    /// short.
    pub fn tick(&mut self) -> bool {
        let mut cx = Context::from_waker(Waker::noop());
        self.adopt_spawned();

        let mut index = 0;
        while index < self.events.len() {
            if self.stop.is_stopped() {
                return false;
            }
            let status = self.events[index].advance(&mut cx);
            self.adopt_spawned();

            if status.is_finished() {
                let event = self.events.remove(index);
                trace!(event = %event.label(), ?status, "async event finished");
            } else {
                index += 1;
            }
        }

        self.ticks += 1;
        true
    }

    /// Runs ticks until stopped.
    pub fn run(&mut self) -> RuntimeResult<()> {
        self.run_while(|_| true)
    }

    /// Runs ticks until stopped or until no events remain.
    pub fn run_until_idle(&mut self) -> RuntimeResult<()> {
        self.run_while(|event_loop| !event_loop.is_empty())
    }

    fn run_while(&mut self, keep_going: impl Fn(&Self) -> bool) -> RuntimeResult<()> {
        info!(
            tick_ms = self.tick.as_millis() as u64,
            events = self.len(),
            "event loop started"
        );

        while !self.stop.is_stopped() && keep_going(self) {
            let started = Instant::now();
            if !self.tick() || !keep_going(self) {
                break;
            }
            self.sleep(self.tick.saturating_sub(started.elapsed()))?;
        }

        info!(ticks = self.ticks, events = self.len(), "event loop stopped");
        Ok(())
    }

    /// Sleeps for `budget`, waking early if the stop handle fires.
    fn sleep(&mut self, budget: Duration) -> RuntimeResult<()> {
        match self.poll.poll(&mut self.wake_events, Some(budget)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn adopt_spawned(&mut self) {
        let spawned = std::mem::take(&mut *self.spawned.borrow_mut());
        for event in spawned {
            self.add_event(event);
        }
    }
}

/// Registers events on a running loop.
///
/// Holds only a weak reference; spawning after the loop is dropped is a
/// no-op that returns false.
#[derive(Clone)]
pub struct Spawner {
    queue: Weak<RefCell<Vec<AsyncEvent>>>,
}

impl Spawner {
    pub fn spawn(&self, event: AsyncEvent) -> bool {
        match self.queue.upgrade() {
            Some(queue) => {
                queue.borrow_mut().push(event);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Spawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Spawner")
            .field("attached", &(self.queue.strong_count() > 0))
            .finish()
    }
}
