//! Execution machinery for forked children and pool jobs.
//!
//! A forked child is erased into a [`ChildJob`] so frames of different
//! output types can share one tracker. The job runs in one of two ways:
//! inline on the forking worker at join time (sharing that worker's
//! context), or as an independent worker after promotion (building a fresh
//! context from the shared config). Either way the outcome travels through
//! the one-shot signal the fork handle holds the other end of.

use std::sync::Arc;
use std::thread::Result as ThreadResult;

use async_task::Runnable;

use crate::context::WorkerContext;
use crate::executor::{Core, Scope};
use crate::signal::Sender;
use crate::task::Task;
use crate::unwind;

// -----------------------------------------------------------------------------
// Child jobs

/// A type-erased forked child, owned by its frame until it runs.
pub(crate) trait ChildJob: Send {
    /// Runs the child on the current worker, inside the joining task's
    /// scope. Nested forks land on that worker's tracker.
    fn run_inline(self: Box<Self>, scope: &mut Scope<'_>);

    /// Runs the child as an independent worker with a freshly initialized
    /// context derived from the executor's config.
    fn run_promoted(self: Box<Self>, core: &Arc<Core>);
}

/// The concrete child job: the user's task plus the sending half of its
/// completion signal.
pub(crate) struct SpawnedChild<T: Task> {
    task: T,
    sender: Sender<ThreadResult<T::Output>>,
}

impl<T: Task> SpawnedChild<T> {
    pub(crate) fn new(task: T, sender: Sender<ThreadResult<T::Output>>) -> SpawnedChild<T> {
        SpawnedChild { task, sender }
    }
}

impl<T: Task> ChildJob for SpawnedChild<T> {
    fn run_inline(self: Box<Self>, scope: &mut Scope<'_>) {
        let SpawnedChild { mut task, sender } = *self;
        let result = unwind::halt_unwinding(|| task.compute(scope));
        sender.send(result);
    }

    fn run_promoted(self: Box<Self>, core: &Arc<Core>) {
        let SpawnedChild { mut task, sender } = *self;
        let mut context = WorkerContext::new(core.config().clone());
        let result = {
            let mut scope = Scope::new(&mut context, core);
            unwind::halt_unwinding(|| task.compute(&mut scope))
        };
        context.tracker_mut().clear();
        sender.send(result);
    }
}

// -----------------------------------------------------------------------------
// Pool jobs

/// A unit of work queued on the executor's worker pool.
pub(crate) enum PoolJob {
    /// A promoted child, to be run as an independent worker.
    Promoted(Box<dyn ChildJob>),
    /// A scheduled async submission.
    Runnable(Runnable),
}

impl PoolJob {
    /// Executes the job on the current thread.
    pub(crate) fn execute(self, core: &Arc<Core>) {
        match self {
            PoolJob::Promoted(job) => job.run_promoted(core),
            PoolJob::Runnable(runnable) => {
                runnable.run();
            }
        }
    }
}
