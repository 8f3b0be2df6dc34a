//! Deferred values (promises) for single-threaded code.
//!
//! A [`Deferred`] is the eventual outcome of some work: pending at first,
//! then fulfilled with a value or rejected with a reason, exactly once.
//! Observers registered with [`Deferred::then`] and [`Deferred::catch`] are
//! never run synchronously by registration, and every piece of work is
//! queued on an [`EventLoop`], a timer queue with a virtual clock that the
//! caller drives.
//!
//! ```
//! use promise_loop::{Deferred, EventLoop, Operand};
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new();
//! let timers = event_loop.clone();
//! let slow = Deferred::<&str, ()>::new(&event_loop, move |settler| {
//!     timers.set_timeout(Duration::from_millis(10), move || {
//!         settler.fulfill("slow");
//!     });
//!     Ok(())
//! });
//! let winner = Deferred::race(&event_loop, vec![slow.into(), Operand::plain("plain")]);
//! assert_eq!(event_loop.block_on(winner), Ok(Ok("plain")));
//! ```
mod callback;
mod combinator;
mod deferred;
mod event_loop;
mod operand;

pub use callback::{Callback, CallbackId, Next};
pub use deferred::{Deferred, Routine, Settler, State};
pub use event_loop::{Config, EventLoop};
pub use operand::Operand;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// `try_new` was given `None`, the only missing routine a caller can
    /// express.
    #[error("initiation routine None is not a function")]
    InvalidRoutine,
    #[error("event loop ran out of work before the future completed")]
    Stalled,
    #[error("event loop exceeded its budget of {0} tasks")]
    TickBudgetExhausted(usize),
}
