use crate::Deferred;
use std::rc::Rc;

/// What an observer wants done with the value its `then` returned.
pub enum Next<T, E> {
    Fulfill(T),
    Reject(E),
    /// Settle with whatever the given value eventually settles with.
    Adopt(Deferred<T, E>),
}

impl<T, E> From<Result<T, E>> for Next<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Next::Fulfill(value),
            Err(reason) => Next::Reject(reason),
        }
    }
}

impl<T, E> From<Deferred<T, E>> for Next<T, E> {
    fn from(deferred: Deferred<T, E>) -> Self {
        Next::Adopt(deferred)
    }
}

impl<T, E> std::fmt::Debug for Next<T, E>
where
    T: std::fmt::Debug,
    E: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Next::Fulfill(value) => f.debug_tuple("Fulfill").field(value).finish(),
            Next::Reject(reason) => f.debug_tuple("Reject").field(reason).finish(),
            Next::Adopt(deferred) => f.debug_tuple("Adopt").field(deferred).finish(),
        }
    }
}

/// Identity of a [`Callback`] handle. Two handles compare equal only if one
/// was cloned from the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(usize);

/// A shareable observer: receives `&A` and says how the chained value
/// settles.
///
/// Registering the same handle twice for the same outcome of the same
/// deferred value is a no-op, so keep the handle around if you need that.
///
/// # Examples
///
/// ```
/// use promise_loop::{Callback, Next};
///
/// let double = Callback::<i32, i32, String>::new(|v| Next::Fulfill(v * 2));
/// let same = double.clone();
/// assert_eq!(double.id(), same.id());
/// assert_ne!(double.id(), Callback::<i32, i32, String>::new(|v| Next::Fulfill(v * 2)).id());
/// ```
pub struct Callback<A, T, E> {
    f: Rc<dyn Fn(&A) -> Next<T, E>>,
}

impl<A, T, E> Callback<A, T, E> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&A) -> Next<T, E> + 'static,
    {
        Self { f: Rc::new(f) }
    }

    /// Build a callback from a closure returning a `Result`.
    pub fn from_result<F>(f: F) -> Self
    where
        F: Fn(&A) -> Result<T, E> + 'static,
    {
        Self::new(move |arg| f(arg).into())
    }

    pub fn id(&self) -> CallbackId {
        CallbackId(Rc::as_ptr(&self.f) as *const () as usize)
    }

    pub(crate) fn call(&self, arg: &A) -> Next<T, E> {
        (self.f)(arg)
    }
}

impl<A, T, E> Clone for Callback<A, T, E> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<A, T, E> std::fmt::Debug for Callback<A, T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Callback").field(&self.id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_identity() {
        let a = Callback::<i32, i32, ()>::new(|v| Next::Fulfill(*v));
        let b = Callback::<i32, i32, ()>::new(|v| Next::Fulfill(*v));
        assert_eq!(a.id(), a.clone().id());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_from_result() {
        let halve = Callback::<i32, i32, String>::from_result(|v| {
            if v % 2 == 0 {
                Ok(v / 2)
            } else {
                Err(format!("{v} is odd"))
            }
        });
        assert!(matches!(halve.call(&4), Next::Fulfill(2)));
        assert!(matches!(halve.call(&3), Next::Reject(ref r) if r == "3 is odd"));
    }
}
