//! Executor configuration: the heartbeat period N, the promotion cost τ,
//! and the worker pool size.
//!
//! The two durations carry the scheduling guarantee: sequential overhead is
//! bounded by τ/N and parallel span inflation by 1 + N/τ. For a target
//! overhead of k%, set N = (100/k)·τ, which is what
//! [`ConfigBuilder::target_overhead_percent`] does. Measured values for τ come from
//! [`calibrate`](crate::calibrate).
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `heartbeat_period` | 30 µs |
//! | `promotion_cost` | 1.5 µs |
//! | `worker_count` | available CPU parallelism |
//! | `stats_enabled` | `false` |

use std::num::NonZeroUsize;
use std::thread::available_parallelism;
use std::time::Duration;

use crate::error::{Error, Result};

/// Immutable executor configuration. Built with [`Config::builder`] and
/// validated at build time: `N > τ > 0` and `worker_count ≥ 1`.
#[derive(Debug, Clone)]
pub struct Config {
    heartbeat_period: Duration,
    promotion_cost: Duration,
    worker_count: usize,
    stats_enabled: bool,
}

impl Config {
    /// Starts building a config from the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// The minimum elapsed time between promotions on one worker (N).
    pub fn heartbeat_period(&self) -> Duration {
        self.heartbeat_period
    }

    /// The empirical cost of promoting a fork to an independent worker (τ).
    pub fn promotion_cost(&self) -> Duration {
        self.promotion_cost
    }

    /// The size of the worker pool.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Whether statistics counters are maintained.
    pub fn stats_enabled(&self) -> bool {
        self.stats_enabled
    }

    /// The expected sequential overhead fraction, τ/N.
    pub fn expected_overhead_fraction(&self) -> f64 {
        self.promotion_cost.as_nanos() as f64 / self.heartbeat_period.as_nanos() as f64
    }

    /// The expected sequential overhead as a percentage.
    pub fn expected_overhead_percent(&self) -> f64 {
        self.expected_overhead_fraction() * 100.0
    }

    /// The worst-case parallel span inflation factor, 1 + N/τ.
    pub fn span_inflation(&self) -> f64 {
        1.0 + self.heartbeat_period.as_nanos() as f64 / self.promotion_cost.as_nanos() as f64
    }
}

/// Builder for [`Config`] with sensible defaults.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    heartbeat_period: Duration,
    promotion_cost: Duration,
    worker_count: usize,
    stats_enabled: bool,
    target_overhead_percent: Option<f64>,
}

impl Default for ConfigBuilder {
    fn default() -> ConfigBuilder {
        ConfigBuilder {
            heartbeat_period: Duration::from_micros(30),
            promotion_cost: Duration::from_nanos(1_500),
            worker_count: available_parallelism().map(NonZeroUsize::get).unwrap_or(1),
            stats_enabled: false,
            target_overhead_percent: None,
        }
    }
}

impl ConfigBuilder {
    /// Sets the heartbeat period N.
    pub fn heartbeat_period(mut self, period: Duration) -> ConfigBuilder {
        self.heartbeat_period = period;
        self.target_overhead_percent = None;
        self
    }

    /// Sets the heartbeat period N in microseconds.
    pub fn heartbeat_period_micros(self, micros: u64) -> ConfigBuilder {
        self.heartbeat_period(Duration::from_micros(micros))
    }

    /// Sets the promotion cost τ.
    pub fn promotion_cost(mut self, cost: Duration) -> ConfigBuilder {
        self.promotion_cost = cost;
        self
    }

    /// Sets the promotion cost τ in microseconds.
    pub fn promotion_cost_micros(self, micros: u64) -> ConfigBuilder {
        self.promotion_cost(Duration::from_micros(micros))
    }

    /// Targets a sequential overhead of `percent`%, deriving
    /// N = (100/percent)·τ from the final promotion cost at build time.
    /// Overrides any explicitly set heartbeat period.
    pub fn target_overhead_percent(mut self, percent: f64) -> ConfigBuilder {
        self.target_overhead_percent = Some(percent);
        self
    }

    /// Sets the worker pool size.
    pub fn worker_count(mut self, count: usize) -> ConfigBuilder {
        self.worker_count = count;
        self
    }

    /// Enables or disables statistics counters.
    pub fn stats_enabled(mut self, enabled: bool) -> ConfigBuilder {
        self.stats_enabled = enabled;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<Config> {
        if self.promotion_cost.is_zero() {
            return Err(Error::InvalidConfig(
                "promotion cost must be positive".into(),
            ));
        }

        let heartbeat_period = match self.target_overhead_percent {
            Some(percent) => {
                if !(percent > 0.0 && percent < 100.0) {
                    return Err(Error::InvalidConfig(format!(
                        "target overhead must be between 0 and 100 percent, got {percent}"
                    )));
                }
                let nanos = (100.0 / percent) * self.promotion_cost.as_nanos() as f64;
                Duration::from_nanos(nanos as u64)
            }
            None => self.heartbeat_period,
        };

        if heartbeat_period.is_zero() {
            return Err(Error::InvalidConfig(
                "heartbeat period must be positive".into(),
            ));
        }
        if heartbeat_period <= self.promotion_cost {
            return Err(Error::InvalidConfig(format!(
                "heartbeat period ({:?}) must exceed promotion cost ({:?}) \
                 for the overhead bound to stay below 100%",
                heartbeat_period, self.promotion_cost
            )));
        }
        if self.worker_count == 0 {
            return Err(Error::InvalidConfig("worker count must be at least 1".into()));
        }

        Ok(Config {
            heartbeat_period,
            promotion_cost: self.promotion_cost,
            worker_count: self.worker_count,
            stats_enabled: self.stats_enabled,
        })
    }
}

// -----------------------------------------------------------------------------
// Tests
