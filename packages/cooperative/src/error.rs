use thiserror::Error;

/// Errors reported synchronously by the coroutine primitives.
///
/// Failures of the coroutines themselves are never wrapped in this type. A coroutine that
/// returns `Err` stores that value as its result and a panicking coroutine unwinds through
/// whichever call drove it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A constructor received a value it cannot work with.
    #[error("invalid argument: {problem}")]
    InvalidArgument {
        /// A human-readable description of the problem.
        problem: String,
    },

    /// The operation would break an invariant of the primitive it was called on.
    #[error("invalid state: {problem}")]
    InvalidState {
        /// A human-readable description of the problem.
        problem: String,
    },

    /// A non-suspending operation could not complete without suspending.
    #[error("operation would block")]
    WouldBlock,
}

/// A specialized `Result` type for coroutine primitives, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
