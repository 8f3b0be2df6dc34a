//! The deferred value state machine.
//!
//! A [`Deferred`] starts pending and settles at most once, either fulfilled
//! with a `T` or rejected with an `E`. The right to settle it belongs to the
//! [`Settler`] handed to its initiation routine, much like a producer and its
//! consumer: the routine holds the producing half, everyone else only
//! observes.
use crate::{event_loop::WeakEventLoop, Callback, CallbackId, Error, EventLoop, Next};
use std::{
    any::Any,
    cell::RefCell,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};
use tracing::{debug, warn};

/// A boxed initiation routine, for constructors that take one optionally.
pub type Routine<T, E> = Box<dyn FnOnce(Settler<T, E>) -> Result<(), E>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Fulfilled => "fulfilled",
            State::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Observer<A> {
    id: Option<CallbackId>,
    run: Rc<dyn Fn(&A)>,
    /// The value a keyed observer settles, handed back to duplicate
    /// `and_then` registrations.
    chain: Option<Rc<dyn Any>>,
}

impl<A> Clone for Observer<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            run: self.run.clone(),
            chain: self.chain.clone(),
        }
    }
}

impl<A> Observer<A> {
    fn anonymous(run: impl Fn(&A) + 'static) -> Self {
        Self {
            id: None,
            run: Rc::new(run),
            chain: None,
        }
    }
}

struct Inner<T, E> {
    outcome: Option<Result<T, E>>,
    fulfillments: Vec<Observer<T>>,
    rejections: Vec<Observer<E>>,
    wakers: Vec<Waker>,
}

impl<T, E> Inner<T, E> {
    fn state(&self) -> State {
        match self.outcome {
            None => State::Pending,
            Some(Ok(_)) => State::Fulfilled,
            Some(Err(_)) => State::Rejected,
        }
    }
}

/// The eventual outcome of some piece of work.
///
/// Clones are handles to the same value. A deferred value does not keep
/// its event loop alive; once the loop is dropped, queued work is dropped
/// with it.
///
/// # Examples
///
/// ```
/// use promise_loop::{Callback, Deferred, EventLoop, Next};
///
/// let event_loop = EventLoop::new();
/// let answer = Deferred::<i32, String>::new(&event_loop, |settler| {
///     settler.fulfill(21);
///     Ok(())
/// });
/// let doubled = answer.then(Some(&Callback::new(|v: &i32| Next::Fulfill(v * 2))), None);
///
/// // Nothing runs until the loop does.
/// assert!(answer.is_pending());
/// assert_eq!(event_loop.block_on(doubled), Ok(Ok(42)));
/// assert!(answer.is_fulfilled());
/// ```
pub struct Deferred<T, E> {
    inner: Rc<RefCell<Inner<T, E>>>,
    event_loop: WeakEventLoop,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            event_loop: self.event_loop.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<T, E> Deferred<T, E> {
    pub fn state(&self) -> State {
        self.inner.borrow().state()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    pub fn is_fulfilled(&self) -> bool {
        self.state() == State::Fulfilled
    }

    pub fn is_rejected(&self) -> bool {
        self.state() == State::Rejected
    }

    /// `true` if both handles refer to the same deferred value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The loop this value schedules on, if it is still alive.
    pub fn event_loop(&self) -> Option<EventLoop> {
        self.event_loop.upgrade()
    }

    pub(crate) fn unsettled(event_loop: WeakEventLoop) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                outcome: None,
                fulfillments: Vec::new(),
                rejections: Vec::new(),
                wakers: Vec::new(),
            })),
            event_loop,
        }
    }

    pub(crate) fn settler(&self) -> Settler<T, E> {
        Settler {
            deferred: self.clone(),
        }
    }

    fn has_fulfillment(&self, id: CallbackId) -> bool {
        self.inner
            .borrow()
            .fulfillments
            .iter()
            .any(|observer| observer.id == Some(id))
    }

    fn has_rejection(&self, id: CallbackId) -> bool {
        self.inner
            .borrow()
            .rejections
            .iter()
            .any(|observer| observer.id == Some(id))
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// Create a pending value whose `routine` runs on the next tick of
    /// `event_loop`.
    ///
    /// The routine settles the value through its [`Settler`], now or later.
    /// Returning `Err(reason)` rejects the value with `reason`.
    pub fn new<R>(event_loop: &EventLoop, routine: R) -> Self
    where
        R: FnOnce(Settler<T, E>) -> Result<(), E> + 'static,
    {
        let deferred = Self::unsettled(event_loop.downgrade());
        let settler = deferred.settler();
        event_loop.schedule(move || {
            if let Err(reason) = routine(settler.clone()) {
                settler.reject(reason);
            }
        });
        deferred
    }

    /// Like [`Deferred::new`], but fails when no routine is given.
    pub fn try_new(event_loop: &EventLoop, routine: Option<Routine<T, E>>) -> Result<Self, Error> {
        match routine {
            Some(routine) => Ok(Self::new(event_loop, routine)),
            None => Err(Error::InvalidRoutine),
        }
    }

    /// The settled value or reason, if any.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        self.inner.borrow().outcome.clone()
    }

    /// Observe this value, returning a new one that settles with whatever
    /// the invoked callback returns.
    ///
    /// A missing callback passes the outcome straight through. A callback
    /// handle that is already registered for the same outcome is not
    /// registered again and counts as missing. If this value has already
    /// settled the matching callback still runs, on the next tick.
    pub fn then(
        &self,
        on_fulfill: Option<&Callback<T, T, E>>,
        on_reject: Option<&Callback<E, T, E>>,
    ) -> Deferred<T, E> {
        let chain = Deferred::unsettled(self.event_loop.clone());
        let settler = chain.settler();
        let fulfillment = match on_fulfill {
            Some(callback) if !self.has_fulfillment(callback.id()) => {
                forward(callback.clone(), settler.clone())
            }
            _ => {
                let settler = settler.clone();
                Observer::anonymous(move |value: &T| {
                    settler.fulfill(value.clone());
                })
            }
        };
        let rejection = match on_reject {
            Some(callback) if !self.has_rejection(callback.id()) => {
                forward(callback.clone(), settler)
            }
            _ => Observer::anonymous(move |reason: &E| {
                settler.reject(reason.clone());
            }),
        };
        self.observe(Some(fulfillment), Some(rejection));
        chain
    }

    /// Shorthand for `then(None, Some(on_reject))`.
    pub fn catch(&self, on_reject: &Callback<E, T, E>) -> Deferred<T, E> {
        self.then(None, Some(on_reject))
    }

    /// Continue with a callback that changes the success type. Rejections
    /// pass through.
    ///
    /// Registering the same `on_fulfill` handle again returns the value the
    /// first registration produced.
    pub fn and_then<U>(&self, on_fulfill: &Callback<T, U, E>) -> Deferred<U, E>
    where
        U: Clone + 'static,
    {
        if let Some(existing) = self.registered_chain::<U>(on_fulfill.id()) {
            return existing;
        }
        let chain = Deferred::unsettled(self.event_loop.clone());
        let settler = chain.settler();
        let fulfillment = forward(on_fulfill.clone(), settler.clone());
        let rejection = Observer::anonymous(move |reason: &E| {
            settler.reject(reason.clone());
        });
        self.observe(Some(fulfillment), Some(rejection));
        chain
    }

    fn registered_chain<U>(&self, id: CallbackId) -> Option<Deferred<U, E>>
    where
        U: 'static,
    {
        self.inner
            .borrow()
            .fulfillments
            .iter()
            .filter(|observer| observer.id == Some(id))
            .find_map(|observer| observer.chain.as_ref()?.downcast_ref::<Deferred<U, E>>().cloned())
    }

    pub(crate) fn fulfill(&self, value: T) -> &Self {
        let (observers, wakers) = {
            let mut inner = self.inner.borrow_mut();
            let state = inner.state();
            if state != State::Pending {
                warn!(%state, "cannot fulfill a deferred value more than once");
                return self;
            }
            inner.outcome = Some(Ok(value.clone()));
            (inner.fulfillments.clone(), std::mem::take(&mut inner.wakers))
        };
        wakers.into_iter().for_each(Waker::wake);
        // Walk a snapshot backwards: observers added while notifying are not
        // part of this pass.
        for observer in observers.iter().rev() {
            (observer.run)(&value);
        }
        self
    }

    pub(crate) fn reject(&self, reason: E) -> &Self {
        let (observers, wakers) = {
            let mut inner = self.inner.borrow_mut();
            let state = inner.state();
            if state != State::Pending {
                warn!(%state, "cannot reject a deferred value more than once");
                return self;
            }
            inner.outcome = Some(Err(reason.clone()));
            (inner.rejections.clone(), std::mem::take(&mut inner.wakers))
        };
        wakers.into_iter().for_each(Waker::wake);
        for observer in observers.iter().rev() {
            (observer.run)(&reason);
        }
        self
    }

    /// Settle with whatever `other` settles with.
    pub(crate) fn adopt(&self, other: Deferred<T, E>) -> &Self {
        let state = self.state();
        if state != State::Pending {
            warn!(%state, "cannot adopt into a deferred value more than once");
            return self;
        }
        if self.ptr_eq(&other) {
            warn!("a deferred value cannot adopt itself");
            return self;
        }
        debug!(source = %other.state(), "adopting the outcome of another deferred value");
        let (on_value, on_reason) = (self.settler(), self.settler());
        other.observe(
            Some(Observer::anonymous(move |value: &T| {
                on_value.fulfill(value.clone());
            })),
            Some(Observer::anonymous(move |reason: &E| {
                on_reason.reject(reason.clone());
            })),
        );
        self
    }

    pub(crate) fn settle(&self, next: Next<T, E>) -> &Self {
        match next {
            Next::Fulfill(value) => self.fulfill(value),
            Next::Reject(reason) => self.reject(reason),
            Next::Adopt(other) => self.adopt(other),
        }
    }

    /// Subscribe internal observers. Already-settled values notify the
    /// matching observer on the next tick.
    pub(crate) fn observe_with(
        &self,
        on_fulfill: impl Fn(&T) + 'static,
        on_reject: impl Fn(&E) + 'static,
    ) {
        self.observe(
            Some(Observer::anonymous(on_fulfill)),
            Some(Observer::anonymous(on_reject)),
        )
    }

    fn observe(&self, on_fulfill: Option<Observer<T>>, on_reject: Option<Observer<E>>) {
        let mut inner = self.inner.borrow_mut();
        if let Some(observer) = on_fulfill {
            if let Some(Ok(value)) = &inner.outcome {
                let (value, late) = (value.clone(), observer.clone());
                self.schedule(move || (late.run)(&value));
            }
            inner.fulfillments.push(observer);
        }
        if let Some(observer) = on_reject {
            if let Some(Err(reason)) = &inner.outcome {
                let (reason, late) = (reason.clone(), observer.clone());
                self.schedule(move || (late.run)(&reason));
            }
            inner.rejections.push(observer);
        }
    }

    fn schedule(&self, task: impl FnOnce() + 'static) {
        match self.event_loop.upgrade() {
            Some(event_loop) => event_loop.schedule(task),
            None => debug!("event loop is gone, dropping late notification"),
        }
    }
}

fn forward<A, T, E>(callback: Callback<A, T, E>, settler: Settler<T, E>) -> Observer<A>
where
    A: 'static,
    T: Clone + 'static,
    E: Clone + 'static,
{
    let chain: Rc<dyn Any> = Rc::new(settler.deferred().clone());
    Observer {
        id: Some(callback.id()),
        run: Rc::new(move |arg: &A| {
            settler.settle(callback.call(arg));
        }),
        chain: Some(chain),
    }
}

impl<T, E> Future for Deferred<T, E>
where
    T: Clone,
    E: Clone,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.borrow_mut();
        if let Some(outcome) = &inner.outcome {
            return Poll::Ready(outcome.clone());
        }
        inner.wakers.push(cx.waker().clone());
        Poll::Pending
    }
}

/// The settling half of a [`Deferred`], handed to its initiation routine.
///
/// Every method returns the deferred value it settles. Settling an already
/// settled value logs a warning and changes nothing.
pub struct Settler<T, E> {
    deferred: Deferred<T, E>,
}

impl<T, E> Clone for Settler<T, E> {
    fn clone(&self) -> Self {
        Self {
            deferred: self.deferred.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for Settler<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Settler").field(&self.deferred).finish()
    }
}

impl<T, E> Settler<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    pub fn fulfill(&self, value: T) -> &Deferred<T, E> {
        self.deferred.fulfill(value)
    }

    pub fn reject(&self, reason: E) -> &Deferred<T, E> {
        self.deferred.reject(reason)
    }

    /// Follow `other`: stay pending until it settles, then copy its outcome.
    pub fn adopt(&self, other: Deferred<T, E>) -> &Deferred<T, E> {
        self.deferred.adopt(other)
    }

    pub fn settle(&self, next: Next<T, E>) -> &Deferred<T, E> {
        self.deferred.settle(next)
    }

    pub fn is_settled(&self) -> bool {
        !self.deferred.is_pending()
    }

    /// The value this settler settles.
    pub fn deferred(&self) -> &Deferred<T, E> {
        &self.deferred
    }
}
