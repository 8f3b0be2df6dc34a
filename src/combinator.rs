//! Shortcuts and combinators built on [`Deferred`].
use crate::{Deferred, EventLoop, Operand};
use std::{cell::RefCell, rc::Rc};

impl<T, E> Deferred<T, E>
where
    T: Clone + 'static,
    E: Clone + 'static,
{
    /// A value fulfilled with `data` on the next tick. A deferred operand is
    /// returned as is.
    ///
    /// ```
    /// use promise_loop::{Deferred, EventLoop, Operand};
    ///
    /// let event_loop = EventLoop::new();
    /// let first = Deferred::<i32, ()>::resolved(&event_loop, Operand::plain(1));
    /// let again = Deferred::resolved(&event_loop, Operand::from(first.clone()));
    /// assert!(again.ptr_eq(&first));
    /// ```
    pub fn resolved(event_loop: &EventLoop, data: Operand<T, E>) -> Self {
        match data {
            Operand::Deferred(deferred) => deferred,
            Operand::Plain(value) => Self::new(event_loop, move |settler| {
                settler.fulfill(value);
                Ok(())
            }),
        }
    }

    /// A value rejected with `reason` on the next tick. A deferred operand is
    /// returned as is.
    pub fn rejected(event_loop: &EventLoop, reason: Operand<T, E, E>) -> Self {
        match reason {
            Operand::Deferred(deferred) => deferred,
            Operand::Plain(reason) => Self::new(event_loop, move |settler| {
                settler.reject(reason);
                Ok(())
            }),
        }
    }

    /// Settle with the first operand to settle.
    ///
    /// Operands are scanned in order when the race's routine runs. A plain
    /// operand wins on the spot and ends the scan. An empty race never
    /// settles.
    pub fn race(event_loop: &EventLoop, operands: Vec<Operand<T, E>>) -> Self {
        Self::new(event_loop, move |settler| {
            for operand in operands {
                let deferred = match operand {
                    Operand::Plain(value) => {
                        settler.fulfill(value);
                        break;
                    }
                    Operand::Deferred(deferred) => deferred,
                };
                let (on_value, on_reason) = (settler.clone(), settler.clone());
                deferred.observe_with(
                    move |value| {
                        if !on_value.is_settled() {
                            on_value.fulfill(value.clone());
                        }
                    },
                    move |reason| {
                        if !on_reason.is_settled() {
                            on_reason.reject(reason.clone());
                        }
                    },
                );
            }
            Ok(())
        })
    }

    /// Fulfill with every operand's value once all have fulfilled, or reject
    /// with the first rejection.
    ///
    /// Values are collected in the order the operands complete, not the
    /// order they were given in. Plain operands complete during the scan, so
    /// they come first.
    ///
    /// ```
    /// use promise_loop::{Deferred, EventLoop, Operand};
    ///
    /// let event_loop = EventLoop::new();
    /// let later = Deferred::<i32, String>::resolved(&event_loop, Operand::plain(2));
    /// let all = Deferred::all(&event_loop, vec![Operand::from(later), Operand::plain(1)]);
    /// assert_eq!(event_loop.block_on(all), Ok(Ok(vec![1, 2])));
    /// ```
    pub fn all(event_loop: &EventLoop, operands: Vec<Operand<T, E>>) -> Deferred<Vec<T>, E> {
        Deferred::new(event_loop, move |settler| {
            let expected = operands.len();
            let tally = Rc::new(RefCell::new(Vec::with_capacity(expected)));
            for operand in operands {
                let deferred = match operand {
                    Operand::Plain(value) => {
                        tally.borrow_mut().push(value);
                        continue;
                    }
                    Operand::Deferred(deferred) => deferred,
                };
                let (on_value, on_reason, tally) = (settler.clone(), settler.clone(), tally.clone());
                deferred.observe_with(
                    move |value| {
                        if on_value.is_settled() {
                            return;
                        }
                        let complete = {
                            let mut tally = tally.borrow_mut();
                            tally.push(value.clone());
                            (tally.len() == expected).then(|| tally.to_vec())
                        };
                        if let Some(values) = complete {
                            on_value.fulfill(values);
                        }
                    },
                    move |reason| {
                        if !on_reason.is_settled() {
                            on_reason.reject(reason.clone());
                        }
                    },
                );
            }
            // Covers both an empty input and an input of plain values only.
            let complete = (tally.borrow().len() == expected).then(|| tally.borrow().to_vec());
            if let Some(values) = complete {
                settler.fulfill(values);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::{Deferred, EventLoop, Next, Operand};
    use std::time::Duration;

    fn settle_after(event_loop: &EventLoop, delay: u64, next: Next<i32, String>) -> Deferred<i32, String> {
        let timers = event_loop.clone();
        Deferred::new(event_loop, move |settler| {
            timers.set_timeout(Duration::from_millis(delay), move || {
                settler.settle(next);
            });
            Ok(())
        })
    }

    #[test]
    fn test_resolved_and_rejected_settle_next_tick() {
        let event_loop = EventLoop::new();
        let ok = Deferred::<i32, String>::resolved(&event_loop, Operand::plain(1));
        let err = Deferred::<i32, String>::rejected(&event_loop, Operand::plain("no".into()));
        assert!(ok.is_pending() && err.is_pending());
        event_loop.run().unwrap();
        assert_eq!(ok.outcome(), Some(Ok(1)));
        assert_eq!(err.outcome(), Some(Err("no".into())));
    }

    #[test]
    fn test_shortcuts_return_deferred_operands_unchanged() {
        let event_loop = EventLoop::new();
        let source = settle_after(&event_loop, 1, Next::Fulfill(3));
        assert!(Deferred::resolved(&event_loop, Operand::from(source.clone())).ptr_eq(&source));
        assert!(Deferred::rejected(&event_loop, Operand::from(source.clone())).ptr_eq(&source));
        event_loop.run().unwrap();
        // `rejected` hands back the operand untouched, so it still fulfills.
        assert_eq!(source.outcome(), Some(Ok(3)));
    }

    #[test]
    fn test_race_first_to_settle_wins() {
        let event_loop = EventLoop::new();
        let slow = settle_after(&event_loop, 20, Next::Fulfill(1));
        let fast = settle_after(&event_loop, 10, Next::Reject("fast".into()));
        let race = Deferred::race(&event_loop, vec![slow.into(), fast.into()]);
        assert_eq!(event_loop.block_on(race.clone()), Ok(Err("fast".to_owned())));
        event_loop.run().unwrap();
        assert_eq!(race.outcome(), Some(Err("fast".to_owned())));
    }

    #[test]
    fn test_race_plain_operand_wins_immediately() {
        let event_loop = EventLoop::new();
        let other = settle_after(&event_loop, 0, Next::Fulfill(7));
        let race = Deferred::race(&event_loop, vec![Operand::plain(5), other.into()]);
        // The other operand's routine, then the race's.
        event_loop.tick();
        event_loop.tick();
        assert_eq!(race.outcome(), Some(Ok(5)));
        event_loop.run().unwrap();
        assert_eq!(race.outcome(), Some(Ok(5)));
    }

    #[test]
    fn test_race_with_no_operands_never_settles() {
        let event_loop = EventLoop::new();
        let race = Deferred::<i32, String>::race(&event_loop, Vec::new());
        event_loop.run().unwrap();
        assert!(race.is_pending());
        assert_eq!(event_loop.block_on(race), Err(crate::Error::Stalled));
    }

    #[test]
    fn test_all_empty_fulfills_with_empty_vec() {
        let event_loop = EventLoop::new();
        let all = Deferred::<i32, String>::all(&event_loop, Vec::new());
        event_loop.tick();
        assert_eq!(all.outcome(), Some(Ok(Vec::new())));
    }

    #[test]
    fn test_all_collects_in_completion_order() {
        let event_loop = EventLoop::new();
        let a = settle_after(&event_loop, 20, Next::Fulfill(1));
        let b = settle_after(&event_loop, 10, Next::Fulfill(2));
        let all = Deferred::all(&event_loop, vec![a.into(), b.into(), Operand::plain(3)]);
        assert_eq!(event_loop.block_on(all), Ok(Ok(vec![3, 2, 1])));
    }

    #[test]
    fn test_all_plain_operands_only() {
        let event_loop = EventLoop::new();
        let all = Deferred::<i32, String>::all(&event_loop, vec![Operand::plain(1), Operand::plain(2)]);
        event_loop.tick();
        assert_eq!(all.outcome(), Some(Ok(vec![1, 2])));
    }

    #[test]
    fn test_all_rejects_with_first_rejection() {
        let event_loop = EventLoop::new();
        let bad = settle_after(&event_loop, 10, Next::Reject("e".into()));
        let worse = settle_after(&event_loop, 15, Next::Reject("f".into()));
        let good = settle_after(&event_loop, 5, Next::Fulfill(9));
        let all = Deferred::all(
            &event_loop,
            vec![Operand::plain(1), bad.into(), good.into(), worse.into()],
        );
        event_loop.run().unwrap();
        assert_eq!(all.outcome(), Some(Err("e".to_owned())));
    }
}
