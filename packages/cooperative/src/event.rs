//! One-shot, level-triggered broadcast signal.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;

use crate::{Resumer, suspend};

/// A flag that coroutines can wait on.
///
/// Once set, every current and future waiter proceeds immediately until the event is
/// [cleared][Self::clear]. Setting the event resumes the waiters synchronously, in the order
/// they started waiting, before [`set()`][Self::set] returns.
///
/// Share it between coroutines via [`Rc`][std::rc::Rc].
///
/// # Example
///
/// ```rust
/// use std::rc::Rc;
///
/// use cooperative::{Event, start};
///
/// let event = Rc::new(Event::new());
///
/// let waiter = start({
///     let event = Rc::clone(&event);
///     async move { event.wait().await }
/// });
/// assert!(!waiter.is_finished());
///
/// event.set();
/// assert!(waiter.is_finished());
/// ```
#[derive(Default)]
pub struct Event {
    flag: Cell<bool>,

    // Always empty while `flag` is set.
    waiters: RefCell<Vec<Resumer<()>>>,
}

impl Event {
    /// Creates an event that is not set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the event is currently set.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.flag.get()
    }

    /// Sets the event and resumes every coroutine waiting on it.
    ///
    /// Does nothing if the event is already set, including when called again by one of the
    /// coroutines this call resumes.
    pub fn set(&self) {
        if self.flag.replace(true) {
            return;
        }

        // Taken out first: the waiters we resume may wait on this event again.
        let waiters = self.waiters.take();

        for waiter in waiters {
            waiter.resume(());
        }
    }

    /// Resets the event so that new waiters suspend until the next [`set()`][Self::set].
    ///
    /// Coroutines that were already resumed are not affected.
    pub fn clear(&self) {
        self.flag.set(false);
    }

    /// Waits until the event is set.
    ///
    /// Completes without suspending if the event is already set when first polled.
    pub fn wait(&self) -> impl Future<Output = ()> + '_ {
        suspend(move |resumer: Resumer<()>| {
            if self.flag.get() {
                resumer.resume(());
            } else {
                self.waiters.borrow_mut().push(resumer);
            }
        })
    }
}

impl fmt::Debug for Event {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("flag", &self.flag.get())
            .field("waiters", &self.waiters.borrow().len())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::rc::Rc;
    use std::task::Poll;

    use futures::FutureExt;
    use futures::future::{LocalBoxFuture, poll_fn};
    use static_assertions::assert_not_impl_any;
    use testing::Journal;

    use super::*;
    use crate::{CoroutineState, start};

    assert_not_impl_any!(Event: Send, Sync);

    fn waiter(
        event: &Rc<Event>,
        journal: &Journal,
        name: &'static str,
    ) -> impl Future<Output = ()> + use<> {
        let event = Rc::clone(event);
        let journal = journal.clone();
        async move {
            event.wait().await;
            journal.record(name);
        }
    }

    #[test]
    fn starts_unset() {
        let event = Event::new();
        assert!(!event.is_set());
    }

    #[test]
    fn wait_after_set_does_not_suspend() {
        let event = Rc::new(Event::new());
        let journal = Journal::new();
        event.set();

        let coroutine = start(waiter(&event, &journal, "A"));

        assert!(coroutine.is_finished());
        journal.assert_entries(&["A"]);
    }

    #[test]
    fn set_resumes_waiters_in_order() {
        let event = Rc::new(Event::new());
        let journal = Journal::new();

        let coroutines: Vec<_> = ["A", "B", "C"]
            .into_iter()
            .map(|name| start(waiter(&event, &journal, name)))
            .collect();

        assert!(journal.is_empty());

        event.set();

        journal.assert_entries(&["A", "B", "C"]);
        assert!(coroutines.iter().all(|c| c.is_finished()));
    }

    #[test]
    fn set_is_idempotent() {
        let event = Rc::new(Event::new());
        let journal = Journal::new();
        let _coroutine = start(waiter(&event, &journal, "A"));

        event.set();
        event.set();

        assert!(event.is_set());
        journal.assert_entries(&["A"]);
    }

    #[test]
    fn set_from_resumed_waiter_is_noop() {
        let event = Rc::new(Event::new());
        let journal = Journal::new();

        let _first = start({
            let event = Rc::clone(&event);
            let journal = journal.clone();
            async move {
                event.wait().await;
                journal.record("first");
                event.set();
            }
        });
        let _second = start(waiter(&event, &journal, "second"));

        event.set();

        journal.assert_entries(&["first", "second"]);
    }

    #[test]
    fn clear_makes_wait_suspend_again() {
        let event = Rc::new(Event::new());
        let journal = Journal::new();

        let coroutine = start({
            let event = Rc::clone(&event);
            let journal = journal.clone();
            async move {
                event.wait().await;
                journal.record("first");
                event.clear();
                event.wait().await;
                journal.record("second");
            }
        });

        event.set();
        journal.assert_entries(&["first"]);
        assert!(!event.is_set());
        assert_eq!(coroutine.state(), CoroutineState::Suspended);

        event.set();
        journal.assert_entries(&["first", "second"]);
        assert!(coroutine.is_finished());
    }

    #[test]
    fn closed_waiter_is_skipped() {
        let event = Rc::new(Event::new());
        let journal = Journal::new();

        let closed = start(waiter(&event, &journal, "closed"));
        let _open = start(waiter(&event, &journal, "open"));
        closed.close();

        event.set();

        journal.assert_entries(&["open"]);
    }

    #[test]
    fn pending_wait_awaited_by_another_coroutine_resumes_it() {
        let event = Rc::new(Event::new());
        let pending: Rc<RefCell<Option<LocalBoxFuture<'static, ()>>>> = Rc::new(RefCell::new(
            Some(waiter(&event, &Journal::new(), "unused").boxed_local()),
        ));

        let first = start({
            let pending = Rc::clone(&pending);
            async move {
                poll_fn(|cx| {
                    let mut pending = pending.borrow_mut();
                    assert!(pending.as_mut().unwrap().as_mut().poll(cx).is_pending());
                    Poll::Ready(())
                })
                .await;
            }
        });
        assert!(first.is_finished());

        let second = start({
            let pending = Rc::clone(&pending);
            async move {
                let wait = pending.borrow_mut().take().unwrap();
                wait.await;
            }
        });
        assert_eq!(second.state(), CoroutineState::Suspended);

        event.set();

        assert!(second.is_finished());
    }
}
