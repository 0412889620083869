//! A one-shot completion signal used to publish the outcome of a forked child
//! to the worker that joins it.
//!
//! The futex protocol is adapted from the oneshot-style channels used by
//! heartbeat thread pools: a single `AtomicU32` both synchronizes the value
//! hand-off and parks the receiving thread. The channel is split into a
//! [`Sender`] that is consumed by `send` and a [`Receiver`] that is never
//! cloned, so "send exactly once, receive on one thread" are ownership facts
//! rather than caller obligations.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

// -----------------------------------------------------------------------------
// States

/// No waiting receiver and no sent value.
const IDLE: u32 = 0b000;

/// Set by the receiver when it is parked (or about to park) and needs a wake.
const WAIT: u32 = 0b001;

/// Set by the sender once the value has been written.
const SENT: u32 = 0b010;

/// Set when the sender is dropped without sending.
const DROPPED: u32 = 0b100;

// -----------------------------------------------------------------------------
// Channel

struct Channel<T> {
    state: AtomicU32,
    value: UnsafeCell<Option<T>>,
}

// SAFETY: The value slot is written once by the sender before the `SENT` bit
// is published with release ordering, and read at most once by the single
// receiver after observing `SENT` with acquire ordering. The two accesses can
// never overlap.
unsafe impl<T: Send> Sync for Channel<T> {}

/// Creates a connected sender/receiver pair.
pub(crate) fn channel<T: Send>() -> (Sender<T>, Receiver<T>) {
    let channel = Arc::new(Channel {
        state: AtomicU32::new(IDLE),
        value: UnsafeCell::new(None),
    });
    let sender = Sender {
        channel: Some(channel.clone()),
    };
    let receiver = Receiver { channel };
    (sender, receiver)
}

// -----------------------------------------------------------------------------
// Sender

/// The sending half. Consumed by [`Sender::send`]; dropping it unsent marks
/// the channel disconnected and wakes the receiver.
pub(crate) struct Sender<T: Send> {
    channel: Option<Arc<Channel<T>>>,
}

impl<T: Send> Sender<T> {
    /// Publishes the value and wakes the receiver if it is parked.
    pub(crate) fn send(mut self, value: T) {
        let channel = self.channel.take().expect("signal sender reused");

        // Write the value before publishing the SENT bit. The release
        // ordering on the bit makes the write visible to the receiver.
        //
        // SAFETY: The SENT bit has not been set, so the receiver is not
        // reading the slot, and `send` consumes the only sender.
        unsafe { *channel.value.get() = Some(value) };

        let prev = channel.state.fetch_or(SENT, Ordering::Release);
        if prev & WAIT != 0 {
            atomic_wait::wake_one(&channel.state);
        }
    }
}

impl<T: Send> Drop for Sender<T> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            let prev = channel.state.fetch_or(DROPPED, Ordering::Release);
            if prev & WAIT != 0 {
                atomic_wait::wake_one(&channel.state);
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Receiver

/// The receiving half. Not `Clone`; all receive methods take `&mut self`.
pub(crate) struct Receiver<T: Send> {
    channel: Arc<Channel<T>>,
}

/// Outcome of a non-blocking receive attempt.
pub(crate) enum TryTake<T> {
    /// The value has arrived.
    Ready(T),
    /// The sender has not completed yet.
    Pending,
    /// The sender was dropped without sending.
    Disconnected,
}

impl<T: Send> Receiver<T> {
    /// Takes the value if it has been sent, without blocking.
    pub(crate) fn try_take(&mut self) -> TryTake<T> {
        let state = self.channel.state.load(Ordering::Acquire);
        if state & SENT != 0 {
            TryTake::Ready(self.take_value())
        } else if state & DROPPED != 0 {
            TryTake::Disconnected
        } else {
            TryTake::Pending
        }
    }

    /// Parks the calling thread until the value arrives. Returns `None` if
    /// the sender was dropped without sending.
    pub(crate) fn wait(&mut self) -> Option<T> {
        // Loop to mitigate spurious futex wake-ups.
        loop {
            let prev = self.channel.state.fetch_or(WAIT, Ordering::Acquire);
            if prev & SENT != 0 {
                return Some(self.take_value());
            }
            if prev & DROPPED != 0 {
                return None;
            }
            atomic_wait::wait(&self.channel.state, prev | WAIT);
        }
    }

    fn take_value(&mut self) -> T {
        // SAFETY: The SENT bit was observed with acquire ordering, so the
        // sender's write to the slot happens-before this read, and the
        // sender never touches the slot again. `&mut self` on a non-`Clone`
        // receiver makes this the only reader.
        unsafe { (*self.channel.value.get()).take() }.expect("one-shot signal received twice")
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
    fn send_then_take() {
        let (tx, mut rx) = channel();
        tx.send(7_u32);
        match rx.try_take() {
            TryTake::Ready(v) => assert_eq!(v, 7),
            _ => panic!("value should be ready"),
        }
    }

    #[test]
    fn pending_until_sent() {
        let (tx, mut rx) = channel::<u32>();
        assert!(matches!(rx.try_take(), TryTake::Pending));
        tx.send(1);
        assert!(matches!(rx.try_take(), TryTake::Ready(1)));
    }

    #[test]
    fn wait_across_threads() {
        let (tx, mut rx) = channel();
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            tx.send("done");
        });
        assert_eq!(rx.wait(), Some("done"));
        sender.join().unwrap();
    }

    #[test]
    fn dropped_sender_disconnects() {
        let (tx, mut rx) = channel::<u32>();
        drop(tx);
        assert!(matches!(rx.try_take(), TryTake::Disconnected));
        assert_eq!(rx.wait(), None);
    }
}
