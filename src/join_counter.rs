//! A countdown latch for n-ary joins: tracks how many parallel branches
//! must complete before the join continuation may run.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::unwind;

/// Counts down completions of parallel branches. Exactly one decrement
/// observes the transition to zero and becomes the ready signaler; waiters
/// are woken together.
pub struct JoinCounter {
    remaining: AtomicI64,
    ready: Mutex<bool>,
    ready_changed: Condvar,
}

impl JoinCounter {
    /// Creates a counter for the given number of branches.
    ///
    /// # Panics
    ///
    /// Panics if `branches` is zero.
    pub fn new(branches: u32) -> JoinCounter {
        assert!(branches > 0, "join counter needs at least one branch");
        JoinCounter {
            remaining: AtomicI64::new(i64::from(branches)),
            ready: Mutex::new(false),
            ready_changed: Condvar::new(),
        }
    }

    /// Records the completion of one branch. Returns true for exactly the
    /// decrement that brings the counter to zero.
    ///
    /// # Panics
    ///
    /// Panics if called more times than there are branches. That is a
    /// contract violation: when committed inside a submitted task it is not
    /// captured as a task failure but propagates to the caller unhandled.
    pub fn decrement(&self) -> bool {
        let remaining = self.remaining.fetch_sub(1, Ordering::AcqRel) - 1;

        if remaining == 0 {
            let mut ready = self.ready.lock().unwrap();
            *ready = true;
            self.ready_changed.notify_all();
            return true;
        }

        if remaining < 0 {
            unwind::contract_violation(
                "join counter decremented below zero: more completions than branches",
            );
        }
        false
    }

    /// Whether every branch has completed.
    pub fn is_ready(&self) -> bool {
        *self.ready.lock().unwrap()
    }

    /// Branches still outstanding.
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire).max(0) as u64
    }

    /// Blocks until every branch has completed.
    pub fn wait(&self) {
        let mut ready = self.ready.lock().unwrap();
        while !*ready {
            ready = self.ready_changed.wait(ready).unwrap();
        }
    }

    /// Blocks until every branch has completed or the timeout elapses.
    /// Returns whether the counter became ready.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ready = self.ready.lock().unwrap();
        while !*ready {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .ready_changed
                .wait_timeout(ready, deadline - now)
                .unwrap();
            ready = guard;
        }
        true
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;
    use std::sync::atomic::AtomicU32;
    use std::thread;

    #[test]
    fn counts_down_to_ready() {
        let counter = JoinCounter::new(3);
        assert!(!counter.decrement());
        assert!(!counter.decrement());
        assert!(!counter.is_ready());
        assert!(counter.decrement());
        assert!(counter.is_ready());
        assert_eq!(counter.remaining(), 0);
    }

    #[test]
    fn exactly_one_decrementer_signals_ready() {
        let counter = JoinCounter::new(10);
        let signals = AtomicU32::new(0);

        thread::scope(|scope| {
            for _ in 0..10 {
                scope.spawn(|| {
                    if counter.decrement() {
                        signals.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
            counter.wait();
        });

        assert_eq!(signals.load(Ordering::Relaxed), 1);
        assert!(counter.is_ready());
    }

    #[test]
    fn over_decrement_is_a_contract_violation() {
        let counter = JoinCounter::new(1);
        assert!(counter.decrement());
        let payload = panic::catch_unwind(|| counter.decrement())
            .expect_err("decrementing below zero must panic");
        assert!(payload.is::<crate::unwind::ContractViolation>());
    }

    #[test]
    #[should_panic(expected = "at least one branch")]
    fn zero_branches_is_rejected() {
        let _ = JoinCounter::new(0);
    }

    #[test]
    fn wait_timeout_reports_readiness() {
        let counter = JoinCounter::new(1);
        assert!(!counter.wait_timeout(Duration::from_millis(10)));

        thread::scope(|scope| {
            scope.spawn(|| {
                thread::sleep(Duration::from_millis(10));
                counter.decrement();
            });
            assert!(counter.wait_timeout(Duration::from_secs(10)));
        });
    }
}
