//! A fork/join executor with heartbeat scheduling.
//!
//! Downbeat lets programs express fine-grained parallelism freely (fork at
//! every opportunity, no cutoffs) and converts those latent forks into
//! actual parallelism only when the amortized cost is worthwhile. Forks stay
//! sequential by default; on a "heartbeat" (at least one period N since the
//! last promotion on the worker) the *oldest* outstanding fork is promoted
//! to an independent worker on the pool. For a promotion cost τ this bounds
//! sequential overhead by τ/N and parallel span inflation by 1 + N/τ,
//! with no tuning knob in the algorithm itself.
//!
//! ```
//! use downbeat::{task_fn, Config, Executor, Scope, Task};
//!
//! struct Fib(u64);
//!
//! impl Task for Fib {
//!     type Output = u64;
//!
//!     fn compute(&mut self, scope: &mut Scope<'_>) -> u64 {
//!         if self.0 < 2 {
//!             return self.0;
//!         }
//!         // Fork freely: almost every fork runs inline, and roughly one
//!         // per heartbeat period becomes an independent worker.
//!         let left = scope.fork(Fib(self.0 - 1));
//!         let right = scope.invoke(Fib(self.0 - 2));
//!         scope.join(left) + right
//!     }
//! }
//!
//! let executor = Executor::new(Config::builder().build().unwrap());
//! assert_eq!(executor.submit(Fib(20)).unwrap(), 6765);
//! ```
//!
//! Pick N and τ with [`Config::builder`], or measure τ on the current
//! machine with [`calibrate`].
//!
//! # Acknowledgments
//!
//! The scheduling discipline follows the heartbeat scheduling literature,
//! and the pool internals owe much to the rayon family of thread pools.

// -----------------------------------------------------------------------------
// Modules

mod blocker;
mod calibrate;
mod config;
mod context;
mod error;
mod executor;
mod job;
mod join_counter;
mod poll;
mod signal;
mod task;
mod timer;
mod tracker;
mod unwind;

// -----------------------------------------------------------------------------
// Top-level exports

pub use calibrate::Calibration;
pub use calibrate::calibrate;
pub use calibrate::calibrate_with;
pub use calibrate::measure_promotion_cost;
pub use config::Config;
pub use config::ConfigBuilder;
pub use context::Heartbeat;
pub use context::WorkerContext;
pub use context::WorkerStats;
pub use error::Error;
pub use error::Result;
pub use error::TaskFailure;
pub use executor::Executor;
pub use executor::ExecutorStats;
pub use executor::Forked;
pub use executor::JoinHandle;
pub use executor::Scope;
pub use join_counter::JoinCounter;
pub use poll::PollingStrategy;
pub use task::Task;
pub use task::TaskFn;
pub use task::task_fn;
pub use timer::Timer;
pub use timer::TimerStats;
pub use tracker::Tracker;
pub use tracker::TrackerStats;

// -----------------------------------------------------------------------------
// Prelude

/// Convenience re-exports of the common surface.
pub mod prelude {
    pub use crate::Config;
    pub use crate::Executor;
    pub use crate::Scope;
    pub use crate::Task;
    pub use crate::task_fn;
}
