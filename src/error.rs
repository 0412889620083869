//! Error types for the executor surface.
//!
//! Three kinds of failure cross the crate boundary as values:
//! configuration errors at build time, task failures at `submit`/join-handle
//! boundaries, and interrupted waits. Contract violations (joining forks out
//! of order, decrementing a [`JoinCounter`](crate::JoinCounter) below zero,
//! submitting after shutdown) are programmer errors and panic with a message
//! naming the broken contract instead of returning an error; the boundaries
//! that capture a task's panics refuse to capture these, so they propagate
//! to the caller unhandled even when raised inside a submitted computation.

use std::any::Any;
use std::fmt;

use thiserror::Error;

use crate::unwind;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the executor and its configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Construction-time validation failed (non-positive period, N ≤ τ, zero
    /// workers, an out-of-range overhead target, or a non-positive polling
    /// interval).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The task's computation panicked; the payload is preserved verbatim.
    #[error("task failed: {0}")]
    TaskFailed(TaskFailure),

    /// A wait was abandoned because the completing side disappeared.
    #[error("join interrupted: the completing worker disappeared")]
    Interrupted,
}

/// A captured task panic, carrying the original payload.
pub struct TaskFailure {
    payload: Box<dyn Any + Send + 'static>,
}

impl TaskFailure {
    /// Wraps a panic payload captured at a task boundary. Contract
    /// violations are not task failures: those resume unwinding right here
    /// and surface to the caller unhandled.
    pub(crate) fn capture(payload: Box<dyn Any + Send + 'static>) -> TaskFailure {
        if payload.is::<unwind::ContractViolation>() {
            unwind::resume_unwinding(payload);
        }
        TaskFailure { payload }
    }

    /// The panic message, when the payload is one of the string types
    /// `panic!` produces.
    pub fn message(&self) -> &str {
        unwind::payload_message(&*self.payload)
    }

    /// Unwraps the failure back into the raw panic payload.
    pub fn into_payload(self) -> Box<dyn Any + Send + 'static> {
        self.payload
    }

    /// Resumes the captured panic on the current thread.
    pub fn resume(self) -> ! {
        unwind::resume_unwinding(self.payload)
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskFailure").field(&self.message()).finish()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_preserves_static_message() {
        let failure = TaskFailure::capture(Box::new("out of cheese"));
        assert_eq!(failure.message(), "out of cheese");
        assert_eq!(
            Error::TaskFailed(failure).to_string(),
            "task failed: out of cheese"
        );
    }

    #[test]
    fn failure_preserves_formatted_message() {
        let failure = TaskFailure::capture(Box::new(format!("bad index {}", 3)));
        assert_eq!(failure.message(), "bad index 3");
    }

    #[test]
    fn opaque_payload_gets_placeholder() {
        let failure = TaskFailure::capture(Box::new(42_u64));
        assert_eq!(failure.message(), "task panicked with a non-string payload");
        assert!(failure.into_payload().downcast::<u64>().is_ok());
    }

    #[test]
    fn contract_violations_are_not_captured() {
        let payload: Box<dyn Any + Send> = Box::new(unwind::ContractViolation {
            message: "test violation",
        });
        let resumed = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            TaskFailure::capture(payload)
        }));
        let payload = resumed.expect_err("capture must resume the violation");
        assert!(payload.is::<unwind::ContractViolation>());
    }
}
