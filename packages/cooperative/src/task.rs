//! Handles to the child coroutines started by the combinators.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use crate::{Coroutine, CoroutineState, start};

/// A coroutine started by [`gather()`][crate::gather], together with its completion state.
///
/// Combinators do not cancel their children, so a task can still be running after the
/// combinator that started it has returned. Inspect [`is_done()`][Self::is_done] to see
/// whether it has finished.
pub struct Task<T> {
    shared: Rc<TaskShared<T>>,
    coroutine: Coroutine<()>,
}

struct TaskShared<T> {
    // Flips to true exactly once, right after `result` has been stored.
    done: Cell<bool>,
    result: RefCell<Option<T>>,
    done_callback: Cell<Option<Box<dyn FnOnce()>>>,
}

impl<T: 'static> Task<T> {
    /// Starts `future` as a coroutine. `done_callback` runs once the result has been captured.
    pub(crate) fn spawn<F, C>(future: F, done_callback: C) -> Self
    where
        F: Future<Output = T> + 'static,
        C: FnOnce() + 'static,
    {
        let shared = Rc::new(TaskShared {
            done: Cell::new(false),
            result: RefCell::new(None),
            done_callback: Cell::new(Some(Box::new(done_callback))),
        });

        let coroutine = start({
            let shared = Rc::clone(&shared);
            async move {
                let result = future.await;

                *shared.result.borrow_mut() = Some(result);
                shared.done.set(true);

                if let Some(done_callback) = shared.done_callback.take() {
                    done_callback();
                }
            }
        });

        Self { shared, coroutine }
    }
}

impl<T> Task<T> {
    /// Whether the task's coroutine has produced its result.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.done.get()
    }

    /// Takes the result of a finished task.
    ///
    /// Returns `None` if the task has not finished yet or the result was already taken.
    #[must_use]
    pub fn take_result(&self) -> Option<T> {
        self.shared.result.borrow_mut().take()
    }

    /// The lifecycle state of the task's coroutine.
    #[must_use]
    pub fn state(&self) -> CoroutineState {
        self.coroutine.state()
    }

    /// Terminates the task's coroutine if it is still running.
    ///
    /// A closed task never becomes done.
    pub fn close(&self) {
        self.coroutine.close();
    }
}

impl<T> fmt::Debug for Task<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("done", &self.shared.done.get())
            .field("coroutine", &self.coroutine)
            .finish_non_exhaustive()
    }
}
