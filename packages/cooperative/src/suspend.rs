//! The suspension protocol between a coroutine and whatever will wake it up.
//!
//! A coroutine suspends by awaiting [`suspend()`] with a *binder*: a closure that receives the
//! [`Resumer`] for this suspension point and arranges for it to be invoked exactly once.
//! The binder may resume right away, in which case the coroutine continues without ever
//! leaving the current poll, or it may store the resumer for some other component to invoke
//! later.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

/// Suspends the current coroutine until the [`Resumer`] handed to `binder` is invoked.
///
/// The binder is called exactly once, on the first poll of the returned future. The value
/// passed to [`Resumer::resume()`] becomes the output of the future.
///
/// # Example
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// use cooperative::{Resumer, start, suspend};
///
/// let parked: Rc<RefCell<Option<Resumer<u32>>>> = Rc::default();
///
/// let coroutine = start({
///     let parked = Rc::clone(&parked);
///     async move { suspend(move |resumer| *parked.borrow_mut() = Some(resumer)).await * 2 }
/// });
/// assert!(!coroutine.is_finished());
///
/// let resumer = parked.borrow_mut().take().unwrap();
/// resumer.resume(21);
/// assert_eq!(coroutine.take_result(), Some(42));
/// ```
pub fn suspend<T, B>(binder: B) -> Suspend<T, B>
where
    B: FnOnce(Resumer<T>),
{
    Suspend {
        binder: Some(binder),
        slot: Rc::new(Slot {
            value: Cell::new(None),
            waker: RefCell::new(None),
            binding: Cell::new(false),
        }),
    }
}

/// Future returned by [`suspend()`].
#[must_use = "futures do nothing unless awaited"]
pub struct Suspend<T, B> {
    // `None` once the binder has been called.
    binder: Option<B>,
    slot: Rc<Slot<T>>,
}

/// Where a resumer delivers its value.
///
/// Owned by the `Suspend` future; resumers only hold a weak reference, so a resumer whose
/// suspension point is gone knows it is talking to nobody.
struct Slot<T> {
    value: Cell<Option<T>>,

    // The waker of the most recent poll. Only present while a resumer exists; the resumer
    // clears it when dropped so that an unresumable coroutine does not keep itself alive.
    waker: RefCell<Option<Waker>>,

    // True while the binder runs. A resumption during that window continues the coroutine
    // in the current poll instead of waking it.
    binding: Cell<bool>,
}

// We never pin the binder or the slot, so moving a `Suspend` is always fine.
impl<T, B> Unpin for Suspend<T, B> {}

impl<T, B> Future for Suspend<T, B>
where
    B: FnOnce(Resumer<T>),
{
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(binder) = this.binder.take() {
            *this.slot.waker.borrow_mut() = Some(cx.waker().clone());

            let resumer = Resumer {
                slot: Rc::downgrade(&this.slot),
            };

            this.slot.binding.set(true);
            let _binding = scopeguard::guard(&this.slot.binding, |binding| binding.set(false));

            binder(resumer);
        } else {
            // We may be polled by a different task than last time. The stale waker is dropped
            // outside the borrow because dropping it may drop a resumer of this very slot.
            let stale = match this.slot.waker.borrow_mut().as_mut() {
                Some(current) if !current.will_wake(cx.waker()) => {
                    Some(mem::replace(current, cx.waker().clone()))
                }
                _ => None,
            };
            drop(stale);
        }

        this.slot.value.take().map_or(Poll::Pending, Poll::Ready)
    }
}

impl<T, B> fmt::Debug for Suspend<T, B> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspend")
            .field("bound", &self.binder.is_none())
            .finish_non_exhaustive()
    }
}

/// Single-use handle that continues a suspended coroutine.
///
/// Invoking [`resume()`][Self::resume] consumes the resumer, stores the value as the result
/// of the suspension point and drives the coroutine forward before returning. Anything the
/// coroutine does until its next suspension (including panicking) happens inside that call.
///
/// Holding a resumer keeps the suspended coroutine alive. Dropping it without resuming leaves
/// the coroutine parked for good unless something else wakes it.
pub struct Resumer<T> {
    slot: Weak<Slot<T>>,
}

impl<T> Resumer<T> {
    /// Resumes the suspended coroutine with `value`.
    ///
    /// This is a no-op if the suspension point no longer exists, for example because the
    /// coroutine was closed while it was suspended.
    pub fn resume(self, value: T) {
        let Some(slot) = self.slot.upgrade() else {
            return;
        };

        slot.value.set(Some(value));

        if slot.binding.get() {
            return;
        }

        let waker = slot.waker.borrow_mut().take();
        drop(slot);

        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Whether the suspension point this resumer targets is gone, making
    /// [`resume()`][Self::resume] a no-op.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.slot.strong_count() == 0
    }
}

impl<T> Drop for Resumer<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.upgrade() {
            // Nobody can resume this suspension point anymore.
            let waker = slot.waker.borrow_mut().take();
            drop(slot);
            drop(waker);
        }
    }
}

impl<T> fmt::Debug for Resumer<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumer")
            .field("abandoned", &self.is_abandoned())
            .finish_non_exhaustive()
    }
}
