//! Starts coroutines and drives them forward whenever they are woken.
//!
//! There is no run queue. Waking a coroutine polls it right there, inside the call that woke
//! it, so wakeups delivered by the primitives in this crate run in the exact order they are
//! issued.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::Future;
use std::mem::ManuallyDrop;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::{self, ThreadId};

use scopeguard::ScopeGuard;
use tracing::{trace, warn};

static NEXT_COROUTINE_ID: AtomicU64 = AtomicU64::new(0);

/// Lifecycle of a coroutine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CoroutineState {
    /// Created with [`Coroutine::new()`] and not polled yet.
    NotStarted,

    /// Waiting for a wakeup.
    Suspended,

    /// Being polled right now. Only observable from inside the coroutine itself or from code
    /// it calls.
    Running,

    /// Completed; its result has been captured.
    Finished,

    /// Terminated from the outside or by a panic. It will never run again.
    Closed,
}

/// Begins driving `future` as a coroutine.
///
/// The coroutine runs until its first real suspension or until it completes, whichever comes
/// first, and the handle is returned in either case. A panic raised by the coroutine during
/// this first step propagates out of `start()`.
///
/// # Example
///
/// ```rust
/// use cooperative::{Event, start};
/// use std::rc::Rc;
///
/// let event = Rc::new(Event::new());
///
/// let coroutine = start({
///     let event = Rc::clone(&event);
///     async move {
///         event.wait().await;
///         "done"
///     }
/// });
/// assert!(!coroutine.is_finished());
///
/// event.set();
/// assert_eq!(coroutine.take_result(), Some("done"));
/// ```
pub fn start<F>(future: F) -> Coroutine<F::Output>
where
    F: Future + 'static,
{
    let coroutine = Coroutine::new(future);
    coroutine.resume();
    coroutine
}

/// Handle to a coroutine driven by this crate.
///
/// Cloning the handle is cheap and all clones refer to the same coroutine. The coroutine is
/// kept alive by its handles and by the resumers and wakers it has handed out, so dropping
/// every handle does not stop a suspended coroutine from being resumed later.
pub struct Coroutine<T> {
    core: Rc<CoroutineCore<T>>,
}

impl<T: 'static> Coroutine<T> {
    /// Wraps `future` as a coroutine without polling it.
    ///
    /// Call [`resume()`][Self::resume] to take the first step, or use [`start()`] to do both.
    #[must_use]
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        Self {
            core: Rc::new(CoroutineCore {
                id: NEXT_COROUTINE_ID.fetch_add(1, Ordering::Relaxed),
                state: Cell::new(CoroutineState::NotStarted),
                future: RefCell::new(Some(Box::pin(future))),
                output: Cell::new(None),
                woken_while_running: Cell::new(false),
                close_requested: Cell::new(false),
            }),
        }
    }

    /// Polls the coroutine once, as if it had been woken.
    ///
    /// Does nothing if the coroutine has already finished or been closed. Useful for driving
    /// coroutines by hand, e.g. in tests, without any other component holding a resumer.
    pub fn resume(&self) {
        Rc::clone(&self.core).drive();
    }

    /// Terminates the coroutine. It will never be polled again.
    ///
    /// Closing drops the coroutine's future, running the destructors of everything it holds
    /// (e.g. releasing semaphore permits). Resumers the coroutine handed out become no-ops.
    /// Closing a coroutine from inside itself takes effect when its current poll returns
    /// `Pending`. If that poll completes instead, the coroutine finishes normally and its
    /// result is kept. Closing a finished coroutine does nothing.
    pub fn close(&self) {
        self.core.close();
    }
}

impl<T> Coroutine<T> {
    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CoroutineState {
        self.core.state.get()
    }

    /// Whether the coroutine has completed and its result was captured.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state() == CoroutineState::Finished
    }

    /// Whether the coroutine was closed before it could finish.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == CoroutineState::Closed
    }

    /// Takes the result of a finished coroutine.
    ///
    /// Returns `None` if the coroutine has not finished or the result was already taken.
    #[must_use]
    pub fn take_result(&self) -> Option<T> {
        self.core.output.take()
    }
}

impl<T> Clone for Coroutine<T> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for Coroutine<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("id", &self.core.id)
            .field("state", &self.core.state.get())
            .finish_non_exhaustive()
    }
}

type LocalFuture<T> = Pin<Box<dyn Future<Output = T>>>;

struct CoroutineCore<T> {
    // Only used to correlate log entries.
    id: u64,

    state: Cell<CoroutineState>,

    // `None` once the coroutine has finished or been closed.
    future: RefCell<Option<LocalFuture<T>>>,

    output: Cell<Option<T>>,

    woken_while_running: Cell<bool>,
    close_requested: Cell<bool>,
}

/// Type-erased access to a coroutine for its waker.
trait Drive {
    fn drive(self: Rc<Self>);
}

impl<T: 'static> Drive for CoroutineCore<T> {
    fn drive(self: Rc<Self>) {
        match self.state.get() {
            CoroutineState::Finished | CoroutineState::Closed => return,
            CoroutineState::Running => {
                // Woken from inside its own poll. Poll again once the current poll returns
                // instead of re-entering the future.
                self.woken_while_running.set(true);
                return;
            }
            CoroutineState::NotStarted => trace!(coroutine = self.id, "starting coroutine"),
            CoroutineState::Suspended => {}
        }

        self.state.set(CoroutineState::Running);

        // If the future panics it is poisoned. Close the coroutine before the panic leaves
        // this frame so nobody can resume it again.
        let poisoned = scopeguard::guard(&self, |core| core.terminate());
        self.poll_until_parked();
        ScopeGuard::into_inner(poisoned);
    }
}

impl<T: 'static> CoroutineCore<T> {
    /// Polls until the coroutine finishes, gets closed or stays pending without having been
    /// woken in the meantime.
    fn poll_until_parked(self: &Rc<Self>) {
        let waker = Waker::from(Arc::new(CoroutineWaker::new(
            Rc::clone(self) as Rc<dyn Drive>
        )));
        let mut cx = Context::from_waker(&waker);

        loop {
            self.woken_while_running.set(false);

            let poll = {
                let mut future = self.future.borrow_mut();
                let Some(future) = future.as_mut() else {
                    return;
                };

                future.as_mut().poll(&mut cx)
            };

            match poll {
                Poll::Ready(output) => {
                    self.output.set(Some(output));
                    self.state.set(CoroutineState::Finished);

                    let future = self.future.borrow_mut().take();
                    drop(future);

                    trace!(coroutine = self.id, "coroutine finished");
                    return;
                }
                Poll::Pending if self.close_requested.get() => {
                    self.terminate();
                    return;
                }
                Poll::Pending if self.woken_while_running.get() => {}
                Poll::Pending => {
                    self.state.set(CoroutineState::Suspended);
                    return;
                }
            }
        }
    }
}

impl<T> CoroutineCore<T> {
    fn close(&self) {
        match self.state.get() {
            CoroutineState::Finished | CoroutineState::Closed => {}
            CoroutineState::Running => self.close_requested.set(true),
            CoroutineState::NotStarted | CoroutineState::Suspended => self.terminate(),
        }
    }

    fn terminate(&self) {
        self.state.set(CoroutineState::Closed);

        // The state is already `Closed`, so anything the destructors wake is a no-op for us.
        let future = self.future.borrow_mut().take();
        drop(future);

        trace!(coroutine = self.id, "coroutine closed");
    }
}

/// Wakes a coroutine by driving it in place.
///
/// `Waker` must be `Send + Sync` but the coroutine is neither, so the reference to it is bound
/// to the thread the coroutine lives on. Wakeups from any other thread are dropped.
struct CoroutineWaker {
    coroutine: ThreadBound<Rc<dyn Drive>>,
}

impl CoroutineWaker {
    fn new(coroutine: Rc<dyn Drive>) -> Self {
        Self {
            coroutine: ThreadBound::new(coroutine),
        }
    }
}

impl Wake for CoroutineWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        match self.coroutine.get() {
            Some(coroutine) => Rc::clone(coroutine).drive(),
            None => warn!("ignoring wakeup of a coroutine from outside its thread"),
        }
    }
}

/// A value that is only ever touched on the thread that created it.
///
/// Accessing it from another thread yields nothing and dropping it on another thread leaks
/// it instead of running its destructor there.
struct ThreadBound<T> {
    owner: ThreadId,
    value: ManuallyDrop<T>,
}

impl<T> ThreadBound<T> {
    fn new(value: T) -> Self {
        Self {
            owner: thread::current().id(),
            value: ManuallyDrop::new(value),
        }
    }

    fn get(&self) -> Option<&T> {
        (thread::current().id() == self.owner).then_some(&*self.value)
    }
}

// SAFETY: The value is only reachable through `get()` and `drop()`, both of which refuse to
// touch it on any thread except the owner.
unsafe impl<T> Send for ThreadBound<T> {}

// SAFETY: See `Send` above; shared access from other threads never reaches the value.
unsafe impl<T> Sync for ThreadBound<T> {}

impl<T> Drop for ThreadBound<T> {
    fn drop(&mut self) {
        if thread::current().id() == self.owner {
            // SAFETY: We are on the owning thread and this is the only place the value is dropped.
            unsafe {
                ManuallyDrop::drop(&mut self.value);
            }
        }
    }
}
