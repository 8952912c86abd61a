#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A minimal single-threaded cooperative coroutine driver with synchronization primitives.
//!
//! Coroutines are ordinary Rust futures. There is no event loop: [`start()`] polls a coroutine
//! until it suspends, and whatever wakes it up later polls it again right there, inside the
//! waking call. This gives the primitives in this crate strict, synchronous ordering guarantees:
//!
//! * [`Event::set()`] resumes every waiter, in the order they started waiting, before it returns.
//! * [`Semaphore::release()`] hands the permit to the longest-waiting coroutine and resumes it
//!   before it returns.
//! * [`gather()`], [`or()`] and [`and()`] resume the caller as soon as enough children finished.
//!
//! Anything that wants to wake a suspended coroutine does so through a [`Resumer`], obtained by
//! being the binder passed to [`suspend()`]. Standard wakers work as well, so coroutines can
//! await third-party futures too.
//!
//! Everything here is `!Send`; coroutines live and die on the thread that started them.
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use cooperative::{Semaphore, start};
//!
//! let semaphore = Rc::new(Semaphore::new(1));
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! // Hold the only permit so that the coroutines below have to queue up.
//! semaphore.acquire_nowait().unwrap();
//!
//! for name in ["first", "second"] {
//!     let semaphore = Rc::clone(&semaphore);
//!     let log = Rc::clone(&log);
//!     start(async move {
//!         let _permit = semaphore.acquire_guard().await;
//!         log.borrow_mut().push(name);
//!     });
//! }
//! assert!(log.borrow().is_empty());
//!
//! semaphore.release().unwrap();
//! assert_eq!(*log.borrow(), ["first", "second"]);
//! assert_eq!(semaphore.value(), 1);
//! ```

mod driver;
mod error;
mod event;
mod gather;
mod semaphore;
mod suspend;
mod task;

pub use driver::*;
pub use error::*;
pub use event::*;
pub use gather::*;
pub use semaphore::*;
pub use suspend::*;
pub use task::*;
