//! Unified error types for the RstinyOS task core.
//!
//! Membership operations only ever fail with [`TinyError::InvalidArgument`]
//! or [`TinyError::Busy`]. Both are reported before anything is mutated, so
//! the caller can retry with fixed arguments or escalate (for example, route
//! main thread removal through task teardown).
//!
//! ## Usage Examples
//!
//! ```ignore
//! manager.detach(&task, &thread)?;
//! ```

use thiserror::Error;

use crate::task::ThreadState;

/// Kernel task core error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TinyError {
    /// Malformed call: unresolvable task/thread, a task with no main thread,
    /// or a thread that is not a member of the given task.
    #[error("invalid argument")]
    InvalidArgument,
    /// Structurally disallowed: detaching a main thread, re-attaching a thread
    /// whose membership link is in use, or a second joiner.
    #[error("resource busy")]
    Busy,
    /// Priority value outside its configured range.
    #[error("priority {0} out of range")]
    InvalidPriority(usize),
    /// Illegal thread state change.
    #[error("invalid thread state transition {from:?} -> {to:?}")]
    InvalidTransition { from: ThreadState, to: ThreadState },
    /// A logger is already installed.
    #[error("logger initialization failed")]
    LoggerInitFailed,
}

/// Result type alias using [`TinyError`].
pub type TinyResult<T> = Result<T, TinyError>;
