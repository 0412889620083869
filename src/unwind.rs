//! Panic capture and propagation helpers, in the rayon lineage.
//!
//! A child task's failure travels as a captured panic payload: caught at the
//! point the child runs, carried through its completion signal, and resumed
//! on the worker that joins it. Payloads cross the crate boundary only as
//! [`TaskFailure`](crate::TaskFailure) values.
//!
//! Scheduler contract violations are panics too, but with the distinct
//! [`ContractViolation`] payload: task boundaries refuse to capture them,
//! so they pass through every `halt_unwinding` site and reach the caller
//! unhandled instead of being downgraded to recoverable task failures.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::Result as ThreadResult;

/// Executes `f` and captures any panic, translating it into an `Err` result.
/// The payload is either resumed later with [`resume_unwinding`] or surfaced
/// as an error value, so `f` can be treated as exception safe.
#[inline]
pub(crate) fn halt_unwinding<F, R>(f: F) -> ThreadResult<R>
where
    F: FnOnce() -> R,
{
    panic::catch_unwind(AssertUnwindSafe(f))
}

/// Resumes a previously captured panic on the current thread.
#[cold]
pub(crate) fn resume_unwinding(payload: Box<dyn Any + Send>) -> ! {
    panic::resume_unwind(payload)
}

/// Panic payload marking a scheduler contract violation: joining forks out
/// of order, promoting a frame twice, decrementing a join counter below
/// zero, submitting after shutdown. Fatal to the offending worker.
#[derive(Debug)]
pub(crate) struct ContractViolation {
    pub(crate) message: &'static str,
}

/// Raises a contract violation. The payload type, not the message, is what
/// lets task boundaries tell this apart from a failure of the user's own
/// computation.
#[cold]
pub(crate) fn contract_violation(message: &'static str) -> ! {
    panic::panic_any(ContractViolation { message })
}

/// Extracts the human-readable message from a panic payload, if it carries
/// one of the two string types `panic!` produces.
pub(crate) fn payload_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "task panicked with a non-string payload"
    }
}
