//! The heartbeat timer: the per-worker authority on when a promotion may be
//! admitted.
//!
//! A promotion may occur only when at least one heartbeat period N has
//! elapsed since the previous promotion on the same worker. Over any window
//! Δ this admits at most ⌊Δ/N⌋ + 1 promotions, which bounds the cumulative
//! promotion cost at τ·(Δ/N) and yields the τ/N overhead guarantee.

use std::time::{Duration, Instant};

const CLOCK_CALIBRATION_WARMUP: u32 = 1_000;
const CLOCK_CALIBRATION_ITERATIONS: u32 = 10_000;

/// Tracks elapsed time since the last promotion on one worker.
///
/// Timers are worker-local and use the monotonic clock; `Instant` can never
/// run backwards, so [`Timer::should_promote`] cannot toggle from `true`
/// back to `false` without an intervening [`Timer::record_promotion`].
#[derive(Debug)]
pub struct Timer {
    last_promotion: Instant,
    period: Duration,
    credits: u64,
    clock_overhead: Option<Duration>,
}

impl Timer {
    /// Creates a timer with the given heartbeat period.
    ///
    /// # Panics
    ///
    /// Panics if the period is zero. Building through
    /// [`Config`](crate::Config) rejects that case with
    /// [`Error::InvalidConfig`](crate::Error::InvalidConfig) first.
    pub fn new(period: Duration) -> Timer {
        assert!(period > Duration::ZERO, "heartbeat period must be positive");
        Timer {
            last_promotion: Instant::now(),
            period,
            credits: 0,
            clock_overhead: None,
        }
    }

    /// Returns true if at least one heartbeat period has elapsed since the
    /// last promotion.
    #[inline]
    pub fn should_promote(&self) -> bool {
        self.last_promotion.elapsed() >= self.period
    }

    /// Records that a promotion occurred, resetting the elapsed window and
    /// the credit counter.
    #[inline]
    pub fn record_promotion(&mut self) {
        self.last_promotion = Instant::now();
        self.credits = 0;
    }

    /// Adds credits for sequential work performed since the last promotion.
    ///
    /// Credits are bookkeeping for count-based accounting; they do not
    /// influence [`Timer::should_promote`].
    #[inline]
    pub fn add_credits(&mut self, credits: u64) {
        self.credits += credits;
    }

    /// Credits accumulated since the last promotion.
    pub fn credits(&self) -> u64 {
        self.credits
    }

    /// Time elapsed since the last promotion.
    pub fn elapsed(&self) -> Duration {
        self.last_promotion.elapsed()
    }

    /// The configured heartbeat period N.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Restores the timer to a freshly constructed state, clearing credits
    /// and any cached clock calibration.
    pub fn reset(&mut self) {
        self.last_promotion = Instant::now();
        self.credits = 0;
        self.clock_overhead = None;
    }

    /// Measures the cost of reading the monotonic clock, through repeated
    /// paired samples with a warmup pass. The result is cached until
    /// [`Timer::reset`].
    pub fn calibrate(&mut self) -> Duration {
        if let Some(overhead) = self.clock_overhead {
            return overhead;
        }

        for _ in 0..CLOCK_CALIBRATION_WARMUP {
            let _ = Instant::now();
        }

        let mut total = Duration::ZERO;
        for _ in 0..CLOCK_CALIBRATION_ITERATIONS {
            let start = Instant::now();
            let end = Instant::now();
            total += end.duration_since(start);
        }

        let overhead = total / CLOCK_CALIBRATION_ITERATIONS;
        self.clock_overhead = Some(overhead);
        overhead
    }

    /// The measured clock-read overhead, calibrating on first use.
    pub fn clock_overhead(&mut self) -> Duration {
        self.calibrate()
    }

    /// An immutable snapshot of the timer state.
    pub fn stats(&self) -> TimerStats {
        TimerStats {
            elapsed: self.elapsed(),
            period: self.period,
            credits: self.credits,
            clock_overhead: self.clock_overhead,
        }
    }
}

/// Point-in-time snapshot of a [`Timer`].
#[derive(Debug, Clone, Copy)]
pub struct TimerStats {
    /// Time elapsed since the last promotion when the snapshot was taken.
    pub elapsed: Duration,
    /// The configured heartbeat period N.
    pub period: Duration,
    /// Credits accumulated since the last promotion.
    pub credits: u64,
    /// Cached clock-read overhead, if calibration has run.
    pub clock_overhead: Option<Duration>,
}

impl TimerStats {
    /// Whether the snapshot was taken past the promotion threshold.
    pub fn should_promote(&self) -> bool {
        self.elapsed >= self.period
    }
}

// -----------------------------------------------------------------------------
// Tests
