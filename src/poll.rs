//! Polling strategies: deciding when to consult the heartbeat timer.
//!
//! Reading the clock is not free, so the timer is consulted through a
//! strategy that keeps the amortized cost of a `should_poll` check well
//! below the promotion cost τ. Count-based polling fires every N
//! operations; time-based polling fires every N nanoseconds and suits
//! workloads with uneven operation costs.

use std::fmt;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// The default count-based interval: poll every 1000 operations.
const DEFAULT_COUNT_INTERVAL: u32 = 1_000;

/// The default time-based interval: poll every 10 µs.
const DEFAULT_TIME_INTERVAL: Duration = Duration::from_micros(10);

/// The floor for [`PollingStrategy::for_period`], to avoid polling faster
/// than is useful.
const MIN_TIME_INTERVAL: Duration = Duration::from_micros(1);

/// Decides when the heartbeat timer should actually be read.
///
/// `should_poll` is the cheap gate called on every operation;
/// `record_poll` must be called when it returns true and the timer was
/// consulted.
#[derive(Debug, Clone)]
pub struct PollingStrategy {
    kind: Kind,
}

#[derive(Debug, Clone)]
enum Kind {
    Count { interval: u32, since_poll: u32 },
    Time { interval: Duration, last_poll: Instant },
}

impl PollingStrategy {
    /// Polls every `operations` calls.
    pub fn every(operations: u32) -> Result<PollingStrategy> {
        if operations == 0 {
            return Err(Error::InvalidConfig(
                "poll interval must be positive".into(),
            ));
        }
        Ok(PollingStrategy {
            kind: Kind::Count {
                interval: operations,
                since_poll: 0,
            },
        })
    }

    /// Polls once the given wall-clock interval has elapsed.
    pub fn every_interval(interval: Duration) -> Result<PollingStrategy> {
        if interval.is_zero() {
            return Err(Error::InvalidConfig(
                "poll interval must be positive".into(),
            ));
        }
        Ok(PollingStrategy {
            kind: Kind::Time {
                interval,
                last_poll: Instant::now(),
            },
        })
    }

    /// Polls every `micros` microseconds.
    pub fn every_micros(micros: u64) -> Result<PollingStrategy> {
        Self::every_interval(Duration::from_micros(micros))
    }

    /// A time-based strategy matched to a heartbeat period: one tenth of the
    /// period, floored at 1 µs, so promotion latency stays small relative to
    /// N without polling faster than is useful.
    pub fn for_period(period: Duration) -> PollingStrategy {
        let interval = (period / 10).max(MIN_TIME_INTERVAL);
        PollingStrategy {
            kind: Kind::Time {
                interval,
                last_poll: Instant::now(),
            },
        }
    }

    /// The default count-based strategy (every 1000 operations).
    pub fn count_default() -> PollingStrategy {
        PollingStrategy {
            kind: Kind::Count {
                interval: DEFAULT_COUNT_INTERVAL,
                since_poll: 0,
            },
        }
    }

    /// The default time-based strategy (every 10 µs).
    pub fn time_default() -> PollingStrategy {
        PollingStrategy {
            kind: Kind::Time {
                interval: DEFAULT_TIME_INTERVAL,
                last_poll: Instant::now(),
            },
        }
    }

    /// Should the timer be consulted now?
    ///
    /// For the count-based variant this also counts the operation.
    #[inline]
    pub fn should_poll(&mut self) -> bool {
        match &mut self.kind {
            Kind::Count {
                interval,
                since_poll,
            } => {
                *since_poll += 1;
                *since_poll >= *interval
            }
            Kind::Time {
                interval,
                last_poll,
            } => last_poll.elapsed() >= *interval,
        }
    }

    /// Records that the timer was consulted, restarting the interval.
    #[inline]
    pub fn record_poll(&mut self) {
        match &mut self.kind {
            Kind::Count { since_poll, .. } => *since_poll = 0,
            Kind::Time { last_poll, .. } => *last_poll = Instant::now(),
        }
    }

    /// Restores the strategy to its initial state.
    pub fn reset(&mut self) {
        self.record_poll();
    }
}

impl fmt::Display for PollingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Count { interval, .. } => write!(f, "count-based[{interval}]"),
            Kind::Time { interval, .. } => {
                write!(f, "time-based[{:.2}\u{3bc}s]", interval.as_nanos() as f64 / 1000.0)
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn count_based_fires_on_the_nth_operation() {
        let mut strategy = PollingStrategy::every(3).unwrap();
        assert!(!strategy.should_poll());
        assert!(!strategy.should_poll());
        assert!(strategy.should_poll());

        strategy.record_poll();
        assert!(!strategy.should_poll());
        assert!(!strategy.should_poll());
        assert!(strategy.should_poll());
    }

    #[test]
    fn count_based_stays_ready_until_recorded() {
        let mut strategy = PollingStrategy::every(2).unwrap();
        assert!(!strategy.should_poll());
        assert!(strategy.should_poll());
        // Not recording the poll leaves the strategy ready.
        assert!(strategy.should_poll());
    }

    #[test]
    fn every_one_polls_every_call() {
        let mut strategy = PollingStrategy::every(1).unwrap();
        for _ in 0..10 {
            assert!(strategy.should_poll());
            strategy.record_poll();
        }
    }

    #[test]
    fn time_based_fires_after_the_interval() {
        let mut strategy = PollingStrategy::every_interval(Duration::from_millis(1)).unwrap();
        thread::sleep(Duration::from_millis(5));
        assert!(strategy.should_poll());

        strategy.record_poll();
        let mut fresh = PollingStrategy::every_interval(Duration::from_secs(3600)).unwrap();
        assert!(!fresh.should_poll());
    }

    #[test]
    fn zero_intervals_are_invalid() {
        assert!(matches!(
            PollingStrategy::every(0),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            PollingStrategy::every_interval(Duration::ZERO),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn for_period_uses_a_tenth_with_a_floor() {
        let matched = PollingStrategy::for_period(Duration::from_micros(1000));
        match matched.kind {
            Kind::Time { interval, .. } => assert_eq!(interval, Duration::from_micros(100)),
            _ => panic!("expected a time-based strategy"),
        }

        let floored = PollingStrategy::for_period(Duration::from_micros(2));
        match floored.kind {
            Kind::Time { interval, .. } => assert_eq!(interval, Duration::from_micros(1)),
            _ => panic!("expected a time-based strategy"),
        }
    }

    #[test]
    fn display_names_the_variant() {
        assert_eq!(
            PollingStrategy::every(100).unwrap().to_string(),
            "count-based[100]"
        );
        assert_eq!(
            PollingStrategy::every_micros(10).unwrap().to_string(),
            "time-based[10.00\u{3bc}s]"
        );
    }
}
