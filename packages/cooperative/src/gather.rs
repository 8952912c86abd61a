//! Composes several coroutines into one awaitable: wait for all of them, or for the first.
//!
//! Every future handed to these functions runs as its own coroutine and keeps running to
//! completion after the combinator has returned. Nothing is cancelled.

use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

use crate::{Resumer, Task, suspend};

/// Starts every future as a coroutine and waits until at least `n` of them have finished.
///
/// The futures start in iteration order, each running until its first suspension before the
/// next one starts. If `n` of them finish during that, the caller is not suspended at all.
///
/// Returns the tasks in input order, whether or not they had finished when the threshold was
/// reached. With `n` larger than the number of futures, the returned future never completes.
///
/// Futures of different types can be combined by boxing them, e.g. with
/// `futures::FutureExt::boxed_local()`.
pub async fn gather<I, F>(futures: I, n: usize) -> Vec<Task<F::Output>>
where
    I: IntoIterator<Item = F>,
    F: Future + 'static,
    F::Output: 'static,
{
    let countdown = Rc::new(Countdown {
        remaining: Cell::new(n),
        parent: Cell::new(None),
    });

    let tasks: Vec<_> = futures
        .into_iter()
        .map(|future| {
            let countdown = Rc::clone(&countdown);
            Task::spawn(future, move || countdown.tick())
        })
        .collect();

    if countdown.remaining.get() > 0 {
        suspend(|resumer: Resumer<()>| countdown.parent.set(Some(resumer))).await;
    }

    tasks
}

/// Waits until the first of `futures` finishes. The others keep running.
///
/// # Example
///
/// ```rust
/// use std::rc::Rc;
///
/// use cooperative::{Event, or, start};
///
/// let first = Rc::new(Event::new());
/// let second = Rc::new(Event::new());
///
/// let race = start(or(
///     [Rc::clone(&first), Rc::clone(&second)].map(|event| async move { event.wait().await }),
/// ));
///
/// second.set();
///
/// let tasks = race.take_result().unwrap();
/// assert!(!tasks[0].is_done());
/// assert!(tasks[1].is_done());
/// ```
pub async fn or<I, F>(futures: I) -> Vec<Task<F::Output>>
where
    I: IntoIterator<Item = F>,
    F: Future + 'static,
    F::Output: 'static,
{
    gather(futures, 1).await
}

/// Waits until all of `futures` have finished.
///
/// # Example
///
/// ```rust
/// use cooperative::{and, start};
///
/// let join = start(and([1, 2].map(|n| async move { n })));
///
/// let results: Vec<_> = join
///     .take_result()
///     .unwrap()
///     .iter()
///     .map(|task| task.take_result().unwrap())
///     .collect();
/// assert_eq!(results, [1, 2]);
/// ```
pub async fn and<I, F>(futures: I) -> Vec<Task<F::Output>>
where
    I: IntoIterator<Item = F>,
    F: Future + 'static,
    F::Output: 'static,
{
    let futures: Vec<F> = futures.into_iter().collect();
    let n = futures.len();
    gather(futures, n).await
}

/// Counts task completions down to the threshold, then resumes whoever is waiting.
struct Countdown {
    remaining: Cell<usize>,

    // `None` until the gathering coroutine actually suspends.
    parent: Cell<Option<Resumer<()>>>,
}

impl Countdown {
    fn tick(&self) {
        let Some(remaining) = self.remaining.get().checked_sub(1) else {
            // Threshold already reached; late finishers are not counted.
            return;
        };

        self.remaining.set(remaining);

        if remaining == 0 {
            if let Some(parent) = self.parent.take() {
                parent.resume(());
            }
        }
    }
}
