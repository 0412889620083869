//! Empirical calibration of the promotion cost τ.
//!
//! The heartbeat guarantee is only as good as the τ it was configured with,
//! so this module measures it: the mean wall-clock cost of promoting an
//! empty child to the pool and awaiting its completion, round-tripped
//! through a scratch single-worker executor. The recommended heartbeat
//! period is N = 20τ, which targets 5% sequential overhead.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::executor::Executor;
use crate::job::{ChildJob, PoolJob, SpawnedChild};
use crate::signal;
use crate::task::task_fn;

/// Warmup round trips before measurement begins.
const WARMUP_ITERATIONS: u32 = 100;

/// Default measurement round trips for [`calibrate`].
const DEFAULT_ITERATIONS: u32 = 1_000;

/// The N/τ ratio recommended by calibration (5% overhead).
const RECOMMENDED_PERIOD_FACTOR: u32 = 20;

/// The result of a calibration run.
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    /// Measured mean promotion cost τ.
    pub promotion_cost: Duration,
    /// Recommended heartbeat period, N = 20τ.
    pub recommended_period: Duration,
    /// Expected sequential overhead for the recommendation, τ/N as a
    /// percentage.
    pub expected_overhead_percent: f64,
}

impl Calibration {
    /// Builds a config from the measured cost and recommended period.
    pub fn to_config(&self) -> Result<Config> {
        Config::builder()
            .promotion_cost(self.promotion_cost)
            .heartbeat_period(self.recommended_period)
            .build()
    }
}

/// Measures the mean cost of promoting an empty child and awaiting it, over
/// the given number of round trips (after a warmup pass).
pub fn measure_promotion_cost(iterations: u32) -> Duration {
    let iterations = iterations.max(1);
    debug!(iterations, "measuring promotion cost");

    let config = Config::builder()
        .worker_count(1)
        .build()
        .expect("the calibration config is valid");
    let executor = Executor::new(config);

    for _ in 0..WARMUP_ITERATIONS {
        round_trip(&executor);
    }

    let mut total = Duration::ZERO;
    for _ in 0..iterations {
        let start = Instant::now();
        round_trip(&executor);
        total += start.elapsed();
    }

    total / iterations
}

/// Runs a calibration with the default number of round trips.
pub fn calibrate() -> Calibration {
    calibrate_with(DEFAULT_ITERATIONS)
}

/// Runs a calibration with a custom number of round trips.
pub fn calibrate_with(iterations: u32) -> Calibration {
    // Floor at 1 ns so the derived config always validates.
    let promotion_cost = measure_promotion_cost(iterations).max(Duration::from_nanos(1));
    let recommended_period = promotion_cost * RECOMMENDED_PERIOD_FACTOR;
    let expected_overhead_percent =
        promotion_cost.as_nanos() as f64 / recommended_period.as_nanos() as f64 * 100.0;

    debug!(
        tau_ns = promotion_cost.as_nanos() as u64,
        period_ns = recommended_period.as_nanos() as u64,
        overhead_percent = expected_overhead_percent,
        "calibration complete"
    );

    Calibration {
        promotion_cost,
        recommended_period,
        expected_overhead_percent,
    }
}

/// Dispatches an empty promoted child and waits for its signal, exactly the
/// path a real promotion takes.
fn round_trip(executor: &Executor) {
    let (sender, mut receiver) = signal::channel();
    let job: Box<dyn ChildJob> = Box::new(SpawnedChild::new(task_fn(|_| ()), sender));
    executor.core().dispatch(PoolJob::Promoted(job));
    receiver
        .wait()
        .expect("the calibration worker disappeared")
        .expect("an empty calibration body cannot fail");
}

// -----------------------------------------------------------------------------
// Tests
