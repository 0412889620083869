//! The per-worker context: the binding of timer, polling strategy, tracker,
//! and statistics for one logical worker.
//!
//! A context is created when a task is admitted on a worker and torn down
//! when that worker finishes its top-level task. It is exclusively owned:
//! reached only through `&mut`, never shared, never sent, so none of its
//! parts need synchronization. A promoted child's worker does not inherit
//! its parent's context: inheritance would alias the timer and tracker and
//! reset the parent's polling counter across unrelated workers, so every
//! promoted worker builds a fresh context from the shared immutable config.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::poll::PollingStrategy;
use crate::timer::Timer;
use crate::tracker::Tracker;

/// The outcome of a heartbeat check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Heartbeat {
    /// The heartbeat fired: the oldest outstanding fork may be promoted.
    Promote,
    /// Not time yet; continue sequentially.
    Skip,
}

/// Per-worker scheduling state: timer, polling strategy, promotion tracker,
/// and operation counters.
pub struct WorkerContext {
    timer: Timer,
    strategy: PollingStrategy,
    tracker: Tracker,
    config: Arc<Config>,
    operations: u64,
    polls: u64,
    promotions: u64,
}

impl WorkerContext {
    /// Creates a context from the shared config with the executor's default
    /// polling strategy: count-based with interval 1, i.e. the timer is
    /// consulted on every fork. Correct but unamortized; see
    /// [`WorkerContext::with_strategy`] and
    /// [`PollingStrategy::for_period`] for tuned alternatives.
    pub fn new(config: Arc<Config>) -> WorkerContext {
        let strategy = PollingStrategy::every(1).expect("a unit poll interval is valid");
        Self::with_strategy(config, strategy)
    }

    /// Creates a context with an explicit polling strategy.
    pub fn with_strategy(config: Arc<Config>, strategy: PollingStrategy) -> WorkerContext {
        WorkerContext {
            timer: Timer::new(config.heartbeat_period()),
            strategy,
            tracker: Tracker::new(),
            config,
            operations: 0,
            polls: 0,
            promotions: 0,
        }
    }

    /// The heartbeat entrypoint: counts the operation, asks the strategy
    /// whether to consult the timer, and if so asks the timer whether a
    /// promotion may occur. This is the only place the polling strategy and
    /// the timer are coupled.
    pub fn check_heartbeat(&mut self) -> Heartbeat {
        let stats = self.config.stats_enabled();
        if stats {
            self.operations += 1;
        }

        if self.strategy.should_poll() {
            if stats {
                self.polls += 1;
            }
            self.strategy.record_poll();

            if self.timer.should_promote() {
                return Heartbeat::Promote;
            }
        }

        Heartbeat::Skip
    }

    /// Records that a promotion occurred, resetting the timer window.
    pub fn record_promotion(&mut self) {
        self.timer.record_promotion();
        if self.config.stats_enabled() {
            self.promotions += 1;
        }
    }

    /// Adds work credits to the timer.
    pub fn add_credits(&mut self, credits: u64) {
        self.timer.add_credits(credits);
    }

    /// The context's timer.
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// The context's promotion tracker.
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub(crate) fn tracker_mut(&mut self) -> &mut Tracker {
        &mut self.tracker
    }

    /// The shared configuration this context was built from.
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Clears the timer, polling strategy, and statistics together.
    pub fn reset(&mut self) {
        self.timer.reset();
        self.strategy.reset();
        self.operations = 0;
        self.polls = 0;
        self.promotions = 0;
    }

    /// An immutable snapshot of this worker's counters.
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            operations: self.operations,
            polls: self.polls,
            promotions: self.promotions,
            time_since_promotion: self.timer.elapsed(),
            credits: self.timer.credits(),
        }
    }
}

/// Point-in-time snapshot of a [`WorkerContext`]. All counters are zero
/// when statistics are disabled in the config.
#[derive(Debug, Clone, Copy)]
pub struct WorkerStats {
    /// Heartbeat checks performed.
    pub operations: u64,
    /// Checks that consulted the timer.
    pub polls: u64,
    /// Promotions admitted.
    pub promotions: u64,
    /// Time since the last promotion on this worker.
    pub time_since_promotion: Duration,
    /// Credits accumulated since the last promotion.
    pub credits: u64,
}

impl WorkerStats {
    /// Fraction of operations that consulted the timer.
    pub fn polling_rate(&self) -> f64 {
        if self.operations > 0 {
            self.polls as f64 / self.operations as f64
        } else {
            0.0
        }
    }

    /// Fraction of polls that admitted a promotion.
    pub fn promotion_rate(&self) -> f64 {
        if self.polls > 0 {
            self.promotions as f64 / self.polls as f64
        } else {
            0.0
        }
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::thread;

    fn config(period: Duration) -> Arc<Config> {
        Arc::new(
            Config::builder()
                .heartbeat_period(period)
                .promotion_cost(Duration::from_nanos(1))
                .worker_count(1)
                .stats_enabled(true)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn skips_until_the_period_elapses() {
        let mut context = WorkerContext::new(config(Duration::from_secs(3600)));
        for _ in 0..100 {
            assert_eq!(context.check_heartbeat(), Heartbeat::Skip);
        }
        let stats = context.stats();
        assert_eq!(stats.operations, 100);
        assert_eq!(stats.polls, 100);
        assert_eq!(stats.promotions, 0);
    }

    #[test]
    fn promotes_after_the_period() {
        let mut context = WorkerContext::new(config(Duration::from_millis(1)));
        thread::sleep(Duration::from_millis(5));
        assert_eq!(context.check_heartbeat(), Heartbeat::Promote);

        context.record_promotion();
        assert_eq!(context.check_heartbeat(), Heartbeat::Skip);
        assert_eq!(context.stats().promotions, 1);
    }

    #[test]
    fn polling_strategy_gates_the_timer() {
        let strategy = PollingStrategy::every(4).unwrap();
        let mut context =
            WorkerContext::with_strategy(config(Duration::from_millis(1)), strategy);
        thread::sleep(Duration::from_millis(5));

        // The timer is ready, but only every fourth operation consults it.
        assert_eq!(context.check_heartbeat(), Heartbeat::Skip);
        assert_eq!(context.check_heartbeat(), Heartbeat::Skip);
        assert_eq!(context.check_heartbeat(), Heartbeat::Skip);
        assert_eq!(context.check_heartbeat(), Heartbeat::Promote);

        let stats = context.stats();
        assert_eq!(stats.operations, 4);
        assert_eq!(stats.polls, 1);
    }

    #[test]
    fn counters_are_ordered() {
        let strategy = PollingStrategy::every(3).unwrap();
        let mut context =
            WorkerContext::with_strategy(config(Duration::from_millis(1)), strategy);
        for _ in 0..50 {
            if context.check_heartbeat() == Heartbeat::Promote {
                context.record_promotion();
            }
        }
        let stats = context.stats();
        assert!(stats.operations >= stats.polls);
        assert!(stats.polls >= stats.promotions);
    }

    #[test]
    fn disabled_stats_stay_zero() {
        let config = Arc::new(
            Config::builder()
                .heartbeat_period(Duration::from_millis(1))
                .promotion_cost(Duration::from_nanos(1))
                .worker_count(1)
                .build()
                .unwrap(),
        );
        let mut context = WorkerContext::new(config);
        thread::sleep(Duration::from_millis(5));
        // The heartbeat still functions with statistics off.
        assert_eq!(context.check_heartbeat(), Heartbeat::Promote);
        context.record_promotion();

        let stats = context.stats();
        assert_eq!(stats.operations, 0);
        assert_eq!(stats.polls, 0);
        assert_eq!(stats.promotions, 0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut context = WorkerContext::new(config(Duration::from_millis(1)));
        thread::sleep(Duration::from_millis(5));
        let _ = context.check_heartbeat();
        context.add_credits(7);

        context.reset();
        let stats = context.stats();
        assert_eq!(stats.operations, 0);
        assert_eq!(stats.credits, 0);
        assert!(stats.time_since_promotion < Duration::from_secs(1));
    }
}
