//! Counting semaphore with FIFO hand-off to suspended acquirers.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;

use tracing::error;

use crate::{Error, Result, Resumer, suspend};

/// Limits how many holders a resource can have at the same time.
///
/// Coroutines that cannot get a permit right away queue up and receive permits strictly in the
/// order they asked for them. A released permit goes straight to the first queued coroutine,
/// which is resumed before [`release()`][Self::release] returns. The permit never becomes
/// visible in [`value()`][Self::value] in between.
///
/// Share it between coroutines via [`Rc`][std::rc::Rc].
///
/// # Example
///
/// ```rust
/// use std::rc::Rc;
///
/// use cooperative::{Semaphore, start};
///
/// let semaphore = Rc::new(Semaphore::new(1));
/// semaphore.acquire_nowait().unwrap();
///
/// let coroutine = start({
///     let semaphore = Rc::clone(&semaphore);
///     async move {
///         let _permit = semaphore.acquire_guard().await;
///         // Exclusive access until the guard is dropped.
///     }
/// });
/// assert!(!coroutine.is_finished());
///
/// semaphore.release().unwrap();
/// assert!(coroutine.is_finished());
/// assert_eq!(semaphore.value(), 1);
/// ```
pub struct Semaphore {
    value: Cell<usize>,
    max_value: usize,

    // Only ever non-empty while `value` is zero.
    waiters: RefCell<VecDeque<Resumer<()>>>,
}

impl Semaphore {
    /// Creates a semaphore with `max_value` permits, all of them available.
    ///
    /// A semaphore with zero permits is valid: every acquisition blocks until somebody calls
    /// [`release()`][Self::release] while it is waiting.
    #[must_use]
    pub fn new(max_value: usize) -> Self {
        Self {
            value: Cell::new(max_value),
            max_value,
            waiters: RefCell::new(VecDeque::new()),
        }
    }

    /// Creates a semaphore from a capacity of some other integer type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `max_value` is not a valid permit count,
    /// e.g. because it is negative.
    ///
    /// # Example
    ///
    /// ```rust
    /// use cooperative::{Error, Semaphore};
    ///
    /// assert_eq!(Semaphore::try_new(3_i64).unwrap().max_value(), 3);
    /// assert!(matches!(
    ///     Semaphore::try_new(-1_i64),
    ///     Err(Error::InvalidArgument { .. })
    /// ));
    /// ```
    pub fn try_new<V>(max_value: V) -> Result<Self>
    where
        V: TryInto<usize> + Copy + fmt::Display,
    {
        let permits: usize = max_value
            .try_into()
            .map_err(|_conversion_error| Error::InvalidArgument {
                problem: format!(
                    "semaphore capacity must be a non-negative integer, got {max_value}"
                ),
            })?;

        Ok(Self::new(permits))
    }

    /// The number of permits available right now.
    #[must_use]
    pub fn value(&self) -> usize {
        self.value.get()
    }

    /// The number of permits the semaphore was created with.
    #[must_use]
    pub fn max_value(&self) -> usize {
        self.max_value
    }

    /// Whether [`acquire_nowait()`][Self::acquire_nowait] would succeed right now.
    #[must_use]
    pub fn can_acquire_nowait(&self) -> bool {
        self.value.get() > 0
    }

    /// Takes a permit without suspending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WouldBlock`] if no permit is available.
    pub fn acquire_nowait(&self) -> Result<()> {
        let value = self.value.get().checked_sub(1).ok_or(Error::WouldBlock)?;
        self.value.set(value);
        Ok(())
    }

    /// Takes a permit, suspending until one is handed over if none is available.
    ///
    /// Completes without suspending if a permit is available when first polled. Otherwise the
    /// caller joins the back of the queue; the permit it eventually receives comes directly from
    /// a [`release()`][Self::release].
    pub fn acquire(&self) -> impl Future<Output = ()> + '_ {
        suspend(move |resumer: Resumer<()>| {
            if self.acquire_nowait().is_ok() {
                resumer.resume(());
            } else {
                self.waiters.borrow_mut().push_back(resumer);
            }
        })
    }

    /// Returns a permit.
    ///
    /// If coroutines are queued, the first one that still exists receives the permit and is
    /// resumed before this call returns. Otherwise the permit becomes available again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if nothing is waiting and all permits are already
    /// available, i.e. the semaphore was released more often than it was acquired.
    pub fn release(&self) -> Result<()> {
        loop {
            // The borrow ends here; the resumed coroutine may use the semaphore again.
            let waiter = self.waiters.borrow_mut().pop_front();

            match waiter {
                // Closed while waiting; giving it the permit would lose the permit.
                Some(waiter) if waiter.is_abandoned() => {}
                Some(waiter) => {
                    waiter.resume(());
                    return Ok(());
                }
                None => break,
            }
        }

        let value = self.value.get();

        if value >= self.max_value {
            return Err(Error::InvalidState {
                problem: "semaphore released too many times".to_string(),
            });
        }

        self.value.set(value.wrapping_add(1));
        Ok(())
    }

    /// Takes a permit, suspending if necessary, and returns a guard that releases it when
    /// dropped.
    ///
    /// The permit is released on every path out of the guard's scope, including early returns,
    /// panics and closing the coroutine that holds the guard.
    pub async fn acquire_guard(&self) -> SemaphoreGuard<'_> {
        self.acquire().await;
        SemaphoreGuard { semaphore: self }
    }

    /// Takes a permit without suspending and returns a guard that releases it when dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WouldBlock`] if no permit is available. Nothing is acquired in that
    /// case.
    pub fn try_acquire_guard(&self) -> Result<SemaphoreGuard<'_>> {
        self.acquire_nowait()?;
        Ok(SemaphoreGuard { semaphore: self })
    }
}

impl fmt::Debug for Semaphore {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("value", &self.value.get())
            .field("max_value", &self.max_value)
            .field("waiters", &self.waiters.borrow().len())
            .finish()
    }
}

/// A permit taken from a [`Semaphore`], released when the guard is dropped.
#[must_use = "the permit is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SemaphoreGuard<'a> {
    semaphore: &'a Semaphore,
}

impl SemaphoreGuard<'_> {
    /// The semaphore this permit belongs to.
    #[must_use]
    pub fn semaphore(&self) -> &Semaphore {
        self.semaphore
    }
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        // Only fails if somebody released our permit behind our back.
        if let Err(error) = self.semaphore.release() {
            error!(%error, "failed to release semaphore permit held by guard");
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::rc::Rc;

    use static_assertions::assert_not_impl_any;
    use testing::Journal;

    use super::*;
    use crate::{CoroutineState, start};

    assert_not_impl_any!(Semaphore: Send, Sync);

    #[test]
    fn try_new_rejects_negative() {
        assert!(matches!(
            Semaphore::try_new(-1_i32),
            Err(Error::InvalidArgument { .. })
        ));
        assert_eq!(Semaphore::try_new(0_i32).unwrap().max_value(), 0);
        assert_eq!(Semaphore::try_new(2_u8).unwrap().value(), 2);
    }

    #[test]
    fn can_acquire_nowait_follows_value() {
        let semaphore = Semaphore::new(2);
        assert!(semaphore.can_acquire_nowait());

        semaphore.acquire_nowait().unwrap();
        assert!(semaphore.can_acquire_nowait());

        semaphore.acquire_nowait().unwrap();
        assert!(!semaphore.can_acquire_nowait());

        assert!(!Semaphore::new(0).can_acquire_nowait());
    }

    #[test]
    fn count_nowait() {
        let semaphore = Semaphore::new(2);
        assert_eq!(semaphore.value(), 2);

        semaphore.acquire_nowait().unwrap();
        assert_eq!(semaphore.value(), 1);
        semaphore.acquire_nowait().unwrap();
        assert_eq!(semaphore.value(), 0);

        semaphore.release().unwrap();
        assert_eq!(semaphore.value(), 1);
        semaphore.release().unwrap();
        assert_eq!(semaphore.value(), 2);
    }

    #[test]
    fn count_async() {
        let coroutine = start(async {
            let semaphore = Semaphore::new(2);

            semaphore.acquire().await;
            assert_eq!(semaphore.value(), 1);
            semaphore.acquire().await;
            assert_eq!(semaphore.value(), 0);

            semaphore.release().unwrap();
            assert_eq!(semaphore.value(), 1);
            semaphore.release().unwrap();
            assert_eq!(semaphore.value(), 2);
        });

        assert!(coroutine.is_finished());
    }

    #[test]
    fn acquiring_and_releasing_too_much() {
        for capacity in 0..3 {
            let semaphore = Semaphore::new(capacity);

            assert!(matches!(semaphore.release(), Err(Error::InvalidState { .. })));

            for _ in 0..capacity {
                semaphore.acquire_nowait().unwrap();
            }
            assert_eq!(semaphore.value(), 0);
            assert!(matches!(semaphore.acquire_nowait(), Err(Error::WouldBlock)));
            assert!(matches!(semaphore.acquire_nowait(), Err(Error::WouldBlock)));

            for _ in 0..capacity {
                semaphore.release().unwrap();
            }
            assert_eq!(semaphore.value(), capacity);
            assert!(matches!(semaphore.release(), Err(Error::InvalidState { .. })));
            assert!(matches!(semaphore.release(), Err(Error::InvalidState { .. })));
        }
    }

    #[test]
    fn nested_sync_guard_would_block() {
        let semaphore = Semaphore::new(1);

        {
            let _outer = semaphore.try_acquire_guard().unwrap();
            assert_eq!(semaphore.value(), 0);

            assert!(matches!(
                semaphore.try_acquire_guard(),
                Err(Error::WouldBlock)
            ));
            assert_eq!(semaphore.value(), 0);
        }

        assert_eq!(semaphore.value(), 1);
    }

    #[test]
    fn async_guard_releases_on_scope_exit() {
        let semaphore = Rc::new(Semaphore::new(1));

        let coroutine = start({
            let semaphore = Rc::clone(&semaphore);
            async move {
                {
                    let guard = semaphore.acquire_guard().await;
                    assert_eq!(guard.semaphore().value(), 0);
                }
                assert_eq!(semaphore.value(), 1);
            }
        });

        assert!(coroutine.is_finished());
        assert_eq!(semaphore.value(), 1);
    }

    #[test]
    fn nested_async_guards() {
        let semaphore = Rc::new(Semaphore::new(2));
        semaphore.acquire_nowait().unwrap();

        let coroutine = start({
            let semaphore = Rc::clone(&semaphore);
            async move {
                assert_eq!(semaphore.value(), 1);
                {
                    let _outer = semaphore.acquire_guard().await;
                    assert_eq!(semaphore.value(), 0);
                    {
                        let _inner = semaphore.acquire_guard().await;
                        assert_eq!(semaphore.value(), 0);
                    }
                    assert_eq!(semaphore.value(), 1);
                }
                assert_eq!(semaphore.value(), 2);
            }
        });

        assert_eq!(semaphore.value(), 0);
        assert_eq!(coroutine.state(), CoroutineState::Suspended);

        semaphore.release().unwrap();

        assert_eq!(semaphore.value(), 2);
        assert!(coroutine.is_finished());
    }

    #[test]
    fn sync_guard_released_on_panic() {
        let semaphore = Semaphore::new(1);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _guard = semaphore.try_acquire_guard().unwrap();
            assert_eq!(semaphore.value(), 0);
            panic!("inside guarded block");
        }));

        assert!(result.is_err());
        assert_eq!(semaphore.value(), 1);
    }

    #[test]
    fn async_guard_released_on_panic() {
        let semaphore = Rc::new(Semaphore::new(1));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            start({
                let semaphore = Rc::clone(&semaphore);
                async move {
                    let _guard = semaphore.acquire_guard().await;
                    assert_eq!(semaphore.value(), 0);
                    panic!("inside guarded block");
                }
            })
        }));

        assert!(result.is_err());
        assert_eq!(semaphore.value(), 1);
    }

    #[test]
    fn zero_capacity_blocks_until_released() {
        let semaphore = Rc::new(Semaphore::new(0));
        let journal = Journal::new();

        assert!(matches!(semaphore.acquire_nowait(), Err(Error::WouldBlock)));

        let coroutine = start({
            let semaphore = Rc::clone(&semaphore);
            let journal = journal.clone();
            async move {
                semaphore.acquire().await;
                journal.record("acquired");
            }
        });
        assert_eq!(coroutine.state(), CoroutineState::Suspended);
        assert!(journal.is_empty());

        semaphore.release().unwrap();

        journal.assert_entries(&["acquired"]);
        assert_eq!(semaphore.value(), 0);
    }

    #[test]
    fn closed_waiter_does_not_consume_permit() {
        let semaphore = Rc::new(Semaphore::new(1));
        semaphore.acquire_nowait().unwrap();
        let journal = Journal::new();

        let waiter = |name: &'static str| {
            let semaphore = Rc::clone(&semaphore);
            let journal = journal.clone();
            async move {
                semaphore.acquire().await;
                journal.record(name);
            }
        };

        let closed = start(waiter("closed"));
        let open = start(waiter("open"));
        closed.close();

        semaphore.release().unwrap();

        journal.assert_entries(&["open"]);
        assert!(open.is_finished());
        assert_eq!(semaphore.value(), 0);
    }

    #[test]
    fn closing_guard_holder_releases() {
        let semaphore = Rc::new(Semaphore::new(1));
        let blocker = Rc::new(crate::Event::new());

        let holder = start({
            let semaphore = Rc::clone(&semaphore);
            let blocker = Rc::clone(&blocker);
            async move {
                let _guard = semaphore.acquire_guard().await;
                blocker.wait().await;
            }
        });
        assert_eq!(semaphore.value(), 0);

        holder.close();

        assert_eq!(semaphore.value(), 1);
    }

    #[test]
    fn guard_drop_after_extra_release_is_logged_not_propagated() {
        let semaphore = Semaphore::new(1);

        let guard = semaphore.try_acquire_guard().unwrap();

        // Somebody returns our permit behind the guard's back.
        semaphore.release().unwrap();
        assert_eq!(semaphore.value(), 1);

        // The guard's own release fails with `InvalidState`, which it can only log.
        drop(guard);

        assert_eq!(semaphore.value(), semaphore.max_value());
    }
}
