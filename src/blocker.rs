//! Blocks a thread on the progress of a future. Used by
//! [`JoinHandle::wait`](crate::JoinHandle::wait) to poll an async submission
//! to completion from synchronous code.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::task::Wake;

// -----------------------------------------------------------------------------
// States

/// The blocker is not sleeping and has not been woken.
const IDLE: u32 = 0;

/// The blocker is sleeping or about to go to sleep.
const WAIT: u32 = 1;

/// The blocker has been woken at least once since it last slept.
const WAKE: u32 = 2;

// -----------------------------------------------------------------------------
// Blocker

/// A futex-backed parker that doubles as an async waker.
///
/// Wrap it in an `Arc` and convert it into a [`std::task::Waker`] via
/// `Waker::from`; calls to `wake` are sticky, so a wake delivered between a
/// `Poll::Pending` and the following [`Blocker::block`] is never lost.
pub(crate) struct Blocker {
    state: AtomicU32,
}

impl Blocker {
    pub(crate) fn new() -> Blocker {
        Blocker {
            state: AtomicU32::new(IDLE),
        }
    }

    /// Parks the thread until the next wake. Returns immediately if a wake
    /// arrived since the last call.
    pub(crate) fn block(&self) {
        if self.state.swap(WAIT, Ordering::Acquire) != WAKE {
            atomic_wait::wait(&self.state, WAIT);
        }
        self.state.store(IDLE, Ordering::Relaxed);
    }

    fn notify(&self) {
        if self.state.swap(WAKE, Ordering::Release) == WAIT {
            atomic_wait::wake_all(&self.state);
        }
    }
}

impl Wake for Blocker {
    fn wake(self: Arc<Self>) {
        self.notify();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.notify();
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wake_before_block_is_not_lost() {
        let blocker = Arc::new(Blocker::new());
        blocker.wake_by_ref();
        // Must return immediately instead of parking forever.
        blocker.block();
    }

    #[test]
    fn wake_releases_a_parked_thread() {
        let blocker = Arc::new(Blocker::new());
        let remote = blocker.clone();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            remote.wake_by_ref();
        });
        blocker.block();
        waker.join().unwrap();
    }
}
