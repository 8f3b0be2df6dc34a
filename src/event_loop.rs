//! The timer queue every deferred value schedules its work on.
//!
//! There is exactly one kind of scheduling: a timer. A zero-delay timer is
//! what the rest of the crate calls "the next tick". Timers are ordered by
//! deadline and then by the order they were scheduled, so two zero-delay
//! timers always run first-scheduled, first-run.
//!
//! Time is virtual. The clock only moves when a timer runs or when
//! [`EventLoop::advance`] is called, which keeps every run reproducible.
use crate::{Deferred, Error, Settler};
use futures::task::noop_waker_ref;
use std::{
    cell::RefCell,
    collections::BTreeMap,
    future::Future,
    rc::{Rc, Weak},
    task::{Context, Poll},
    time::Duration,
};
use tracing::trace;

type Task = Box<dyn FnOnce()>;

/// Event loop settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Upper bound on the tasks a single `run`, `advance` or `block_on` call
    /// may execute. `None` means unbounded.
    pub tick_budget: Option<usize>,
}

impl Config {
    pub fn with_tick_budget(mut self, budget: usize) -> Self {
        self.tick_budget = Some(budget);
        self
    }
}

/// A single-threaded timer queue with a virtual clock.
///
/// Cloning is cheap and every clone drives the same queue.
///
/// # Examples
///
/// ```
/// use promise_loop::EventLoop;
/// use std::{cell::RefCell, rc::Rc, time::Duration};
///
/// let event_loop = EventLoop::new();
/// let log = Rc::new(RefCell::new(Vec::new()));
/// let (a, b) = (log.clone(), log.clone());
/// event_loop.set_timeout(Duration::from_millis(5), move || a.borrow_mut().push("late"));
/// event_loop.schedule(move || b.borrow_mut().push("soon"));
/// assert_eq!(event_loop.run(), Ok(2));
/// assert_eq!(*log.borrow(), vec!["soon", "late"]);
/// assert_eq!(event_loop.now(), Duration::from_millis(5));
/// ```
#[derive(Clone, Default)]
pub struct EventLoop {
    shared: Rc<RefCell<Shared>>,
}

/// A handle that does not keep the loop alive.
///
/// Deferred values hold one of these: the loop's queue owns their routines
/// and observers, so a strong handle back to the loop would never be freed.
#[derive(Clone)]
pub(crate) struct WeakEventLoop {
    shared: Weak<RefCell<Shared>>,
}

impl WeakEventLoop {
    pub(crate) fn upgrade(&self) -> Option<EventLoop> {
        self.shared.upgrade().map(|shared| EventLoop { shared })
    }
}

#[derive(Default)]
struct Shared {
    config: Config,
    now: Duration,
    next_seq: u64,
    timers: BTreeMap<(Duration, u64), Task>,
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.borrow();
        f.debug_struct("EventLoop")
            .field("config", &shared.config)
            .field("now", &shared.now)
            .field("pending", &shared.timers.len())
            .finish()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                config,
                ..Shared::default()
            })),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakEventLoop {
        WeakEventLoop {
            shared: Rc::downgrade(&self.shared),
        }
    }

    pub fn config(&self) -> Config {
        self.shared.borrow().config.clone()
    }

    /// Current virtual time, measured from the loop's creation.
    pub fn now(&self) -> Duration {
        self.shared.borrow().now
    }

    /// Number of timers waiting to run.
    pub fn pending(&self) -> usize {
        self.shared.borrow().timers.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Queue `task` for the next tick.
    pub fn schedule(&self, task: impl FnOnce() + 'static) {
        self.set_timeout(Duration::ZERO, task)
    }

    /// Queue `task` to run once the clock reaches `now() + delay`. Deadlines
    /// past the end of time saturate at `Duration::MAX`.
    pub fn set_timeout(&self, delay: Duration, task: impl FnOnce() + 'static) {
        let mut shared = self.shared.borrow_mut();
        let deadline = shared.now.saturating_add(delay);
        let seq = shared.next_seq;
        shared.next_seq += 1;
        shared.timers.insert((deadline, seq), Box::new(task));
        trace!(seq, ?deadline, "timer scheduled");
    }

    /// Run the earliest timer. Returns `false` if nothing was queued.
    pub fn tick(&self) -> bool {
        let Some(((deadline, seq), task)) = self.pop_due(None) else {
            return false;
        };
        trace!(seq, ?deadline, "timer fired");
        task();
        true
    }

    /// Tick until the queue is empty, returning how many tasks ran.
    pub fn run(&self) -> Result<usize, Error> {
        let budget = self.budget();
        let mut ran = 0;
        while self.tick() {
            ran += 1;
            if ran >= budget && !self.is_idle() {
                return Err(Error::TickBudgetExhausted(budget));
            }
        }
        Ok(ran)
    }

    /// Run every timer due within `by`, then move the clock to `now() + by`.
    pub fn advance(&self, by: Duration) -> Result<usize, Error> {
        let until = self.now().saturating_add(by);
        let budget = self.budget();
        let mut ran = 0;
        while let Some(((deadline, seq), task)) = self.pop_due(Some(until)) {
            if ran >= budget {
                // Put it back untouched; the caller asked for too much work.
                self.shared.borrow_mut().timers.insert((deadline, seq), task);
                return Err(Error::TickBudgetExhausted(budget));
            }
            trace!(seq, ?deadline, "timer fired");
            task();
            ran += 1;
        }
        let mut shared = self.shared.borrow_mut();
        shared.now = shared.now.max(until);
        Ok(ran)
    }

    /// Drive the loop until `future` completes.
    ///
    /// The future is polled, then the loop ticks once, and so on. If the
    /// queue drains while the future is still pending nothing can ever wake
    /// it, so this returns [`Error::Stalled`].
    pub fn block_on<F: Future>(&self, future: F) -> Result<F::Output, Error> {
        futures::pin_mut!(future);
        let mut cx = Context::from_waker(noop_waker_ref());
        let budget = self.budget();
        let mut ran = 0;
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Ok(output);
            }
            if ran >= budget {
                return Err(Error::TickBudgetExhausted(budget));
            }
            if !self.tick() {
                return Err(Error::Stalled);
            }
            ran += 1;
        }
    }

    /// Shorthand for [`Deferred::new`] on this loop.
    pub fn deferred<T, E, R>(&self, routine: R) -> Deferred<T, E>
    where
        T: Clone + 'static,
        E: Clone + 'static,
        R: FnOnce(Settler<T, E>) -> Result<(), E> + 'static,
    {
        Deferred::new(self, routine)
    }

    fn budget(&self) -> usize {
        self.shared.borrow().config.tick_budget.unwrap_or(usize::MAX)
    }

    fn pop_due(&self, until: Option<Duration>) -> Option<((Duration, u64), Task)> {
        let mut shared = self.shared.borrow_mut();
        let (&(deadline, _), _) = shared.timers.first_key_value()?;
        if until.is_some_and(|until| deadline > until) {
            return None;
        }
        let entry = shared.timers.pop_first()?;
        shared.now = shared.now.max(deadline);
        Some(entry)
    }
}
