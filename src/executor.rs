//! The fork/join executor: the public surface of the crate and the owner of
//! the worker pool.
//!
//! Forks stay sequential by default. Each fork parks the child in the
//! worker's promotion tracker and performs a heartbeat check; when the
//! heartbeat fires, the *oldest* outstanding fork on that worker is promoted
//! (handed to the pool to run as an independent worker with a freshly
//! initialized context) and its completion is recorded in the one-shot
//! future its fork handle holds. A join either awaits that future (promoted
//! path) or pops the still-sequential frame and runs the child inline
//! (unpromoted path, the common case).
//!
//! Join order is LIFO on the tracker head while promotion is FIFO on the
//! tail, so the two ends cannot collide unless a single frame remains, in
//! which case they coincide and the child is promoted and immediately
//! awaited.

use std::cell::Cell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use std::thread;
use std::thread::Result as ThreadResult;
use std::time::{Duration, Instant};

use async_task::FallibleTask;
use tracing::{debug, trace};

use crate::blocker::Blocker;
use crate::config::Config;
use crate::context::{Heartbeat, WorkerContext};
use crate::error::{Error, Result, TaskFailure};
use crate::job::{ChildJob, PoolJob, SpawnedChild};
use crate::signal::{self, Receiver, TryTake};
use crate::task::Task;
use crate::tracker::Frame;
use crate::unwind;

// -----------------------------------------------------------------------------
// Shared executor state

/// State shared between the executor handle, its worker threads, and every
/// scope derived from it.
pub(crate) struct Core {
    state: Mutex<PoolState>,
    /// Signaled when a job is queued.
    job_ready: Condvar,
    /// Signaled when the last worker thread exits.
    quiesced: Condvar,
    config: Arc<Config>,
    shutdown: AtomicBool,
    tasks_executed: AtomicU64,
    promotions: AtomicU64,
}

struct PoolState {
    queue: VecDeque<PoolJob>,
    live_workers: usize,
}

impl Core {
    pub(crate) fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Queues a job on the pool and wakes a worker to run it.
    ///
    /// Dispatch stays open after shutdown: promotions performed by in-flight
    /// tasks are part of work that must run to completion.
    pub(crate) fn dispatch(&self, job: PoolJob) {
        let mut state = self.state.lock().unwrap();
        state.queue.push_back(job);
        self.job_ready.notify_one();
    }

    /// Claims the next queued job without blocking.
    fn claim(&self) -> Option<PoolJob> {
        self.state.lock().unwrap().queue.pop_front()
    }

    /// Waits for a value on `receiver`, executing queued pool jobs while it
    /// is pending. Because the joining worker drains the queue itself before
    /// parking, a promoted child is always either done, running on some
    /// thread, or about to be run right here, so the pool cannot deadlock on
    /// a join. Returns `None` if the completing side disappeared.
    pub(crate) fn wait_for<T: Send>(core: &Arc<Core>, receiver: &mut Receiver<T>) -> Option<T> {
        loop {
            match receiver.try_take() {
                TryTake::Ready(value) => return Some(value),
                TryTake::Disconnected => return None,
                TryTake::Pending => {}
            }
            match core.claim() {
                Some(job) => job.execute(core),
                None => return receiver.wait(),
            }
        }
    }

    fn count_task(&self) {
        if self.config.stats_enabled() {
            self.tasks_executed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn count_promotion(&self) {
        if self.config.stats_enabled() {
            self.promotions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// The main loop for a pool worker thread: run queued jobs, sleep when there
/// are none, exit once shut down with an empty queue (so queued work always
/// runs to completion).
fn worker_loop(core: Arc<Core>) {
    trace!("worker thread started");

    loop {
        let job = {
            let mut state = core.state.lock().unwrap();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    break Some(job);
                }
                if core.shutdown.load(Ordering::Relaxed) {
                    break None;
                }
                state = core.job_ready.wait(state).unwrap();
            }
        };

        match job {
            Some(job) => job.execute(&core),
            None => break,
        }
    }

    let mut state = core.state.lock().unwrap();
    state.live_workers -= 1;
    if state.live_workers == 0 {
        core.quiesced.notify_all();
    }
    drop(state);

    trace!("worker thread exiting");
}

// -----------------------------------------------------------------------------
// Executor

/// A fork/join executor with heartbeat scheduling.
///
/// ```
/// use downbeat::{task_fn, Config, Executor};
///
/// let executor = Executor::new(Config::builder().build().unwrap());
///
/// let result = executor
///     .submit(task_fn(|scope| {
///         let left = scope.fork(task_fn(|_| 20));
///         let right = scope.invoke(task_fn(|_| 22));
///         scope.join(left) + right
///     }))
///     .unwrap();
///
/// assert_eq!(result, 42);
/// ```
pub struct Executor {
    core: Arc<Core>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl Executor {
    /// Builds an executor with `config.worker_count()` pool threads.
    pub fn new(config: Config) -> Executor {
        let config = Arc::new(config);
        let worker_count = config.worker_count();

        debug!(
            workers = worker_count,
            period_ns = config.heartbeat_period().as_nanos() as u64,
            "starting executor"
        );

        let core = Arc::new(Core {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                live_workers: worker_count,
            }),
            job_ready: Condvar::new(),
            quiesced: Condvar::new(),
            config,
            shutdown: AtomicBool::new(false),
            tasks_executed: AtomicU64::new(0),
            promotions: AtomicU64::new(0),
        });

        let workers = (0..worker_count)
            .map(|index| {
                let core = core.clone();
                thread::Builder::new()
                    .name(format!("downbeat-worker-{index}"))
                    .spawn(move || worker_loop(core))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Executor { core, workers }
    }

    /// Runs a task to completion on the calling thread, under a fresh worker
    /// context. Returns the task's value, or [`Error::TaskFailed`] carrying
    /// the panic payload if the computation panicked.
    ///
    /// # Panics
    ///
    /// Panics if the executor has been shut down. Scheduler contract
    /// violations raised inside the computation (such as an out-of-order
    /// join) are not captured as task failures; they propagate out of
    /// `submit` unhandled.
    pub fn submit<T: Task>(&self, mut task: T) -> Result<T::Output> {
        self.ensure_accepting();

        let mut context = WorkerContext::new(self.core.config.clone());
        let outcome = {
            let mut scope = Scope::new(&mut context, &self.core);
            unwind::halt_unwinding(|| task.compute(&mut scope))
        };
        // Frames abandoned by the task (or stranded by a panic) are
        // discarded with the context.
        context.tracker_mut().clear();

        match outcome {
            Ok(value) => {
                self.core.count_task();
                Ok(value)
            }
            Err(payload) => Err(Error::TaskFailed(TaskFailure::capture(payload))),
        }
    }

    /// Dispatches a task onto the pool and returns a handle to its result.
    /// Otherwise identical in semantics to [`Executor::submit`]; a contract
    /// violation raised inside the computation resumes unhandled at the
    /// point the handle is awaited.
    ///
    /// # Panics
    ///
    /// Panics if the executor has been shut down.
    pub fn submit_async<T: Task>(&self, task: T) -> JoinHandle<T::Output> {
        self.ensure_accepting();

        // The future carries the raw captured outcome; classifying the
        // panic payload is deferred to the join handle so a contract
        // violation unwinds at the awaiting caller, not on a pool worker.
        let core = self.core.clone();
        let future = async move {
            let mut task = task;
            let mut context = WorkerContext::new(core.config.clone());
            let outcome = {
                let mut scope = Scope::new(&mut context, &core);
                unwind::halt_unwinding(|| task.compute(&mut scope))
            };
            context.tracker_mut().clear();
            if outcome.is_ok() {
                core.count_task();
            }
            outcome
        };

        // Scheduling pushes a runnable for the task onto the pool queue.
        // The task body never suspends, so this happens exactly once.
        let schedule_core = self.core.clone();
        let schedule = move |runnable| {
            schedule_core.dispatch(PoolJob::Runnable(runnable));
        };

        let (runnable, handle) = async_task::spawn(future, schedule);
        runnable.schedule();

        JoinHandle {
            task: Some(handle.fallible()),
        }
    }

    /// Stops accepting new submissions. Queued and in-flight work runs to
    /// completion; idempotent.
    pub fn shutdown(&self) {
        // Flip the flag under the state lock so a worker that just saw it
        // unset cannot park before the wakeup below.
        let state = self.core.state.lock().unwrap();
        let already = self.core.shutdown.swap(true, Ordering::SeqCst);
        self.core.job_ready.notify_all();
        drop(state);

        if !already {
            debug!("executor shutting down");
        }
    }

    /// Waits for the worker pool to quiesce after [`Executor::shutdown`].
    /// Returns whether every worker thread exited within the timeout.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.core.state.lock().unwrap();
        while state.live_workers > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .core
                .quiesced
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
        }
        true
    }

    /// Whether [`Executor::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.core.shutdown.load(Ordering::SeqCst)
    }

    /// The executor's configuration.
    pub fn config(&self) -> &Config {
        &self.core.config
    }

    /// An immutable snapshot of the executor-wide counters. All counts are
    /// zero when statistics are disabled in the config.
    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            tasks_executed: self.core.tasks_executed.load(Ordering::Relaxed),
            promotions: self.core.promotions.load(Ordering::Relaxed),
            worker_count: self.core.config.worker_count(),
            shut_down: self.is_shut_down(),
        }
    }

    pub(crate) fn core(&self) -> &Arc<Core> {
        &self.core
    }

    fn ensure_accepting(&self) {
        if self.core.shutdown.load(Ordering::SeqCst) {
            unwind::contract_violation("task submitted after executor shutdown");
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Point-in-time snapshot of an [`Executor`]'s counters.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorStats {
    /// Tasks that ran to successful completion.
    pub tasks_executed: u64,
    /// Forks promoted to independent workers.
    pub promotions: u64,
    /// Size of the worker pool.
    pub worker_count: usize,
    /// Whether the executor has been shut down.
    pub shut_down: bool,
}

impl ExecutorStats {
    /// Promotions per executed task.
    pub fn promotion_rate(&self) -> f64 {
        if self.tasks_executed > 0 {
            self.promotions as f64 / self.tasks_executed as f64
        } else {
            0.0
        }
    }
}

// -----------------------------------------------------------------------------
// Scope

/// The fork/join capability handed to [`Task::compute`]: a borrow of the
/// current worker's context plus the executor it belongs to.
pub struct Scope<'a> {
    context: &'a mut WorkerContext,
    core: &'a Arc<Core>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(context: &'a mut WorkerContext, core: &'a Arc<Core>) -> Scope<'a> {
        Scope { context, core }
    }

    /// Declares a child task for possibly-parallel execution.
    ///
    /// The child is parked in this worker's promotion tracker and stays
    /// sequential unless a heartbeat elevates it (or an older sibling) to
    /// the pool. Consumes the task; the returned handle is joined with
    /// [`Scope::join`]. A handle that is dropped instead of joined abandons
    /// the child: if unpromoted it is discarded unexecuted when this task
    /// finishes, if promoted it runs detached and its result is discarded.
    pub fn fork<T: Task>(&mut self, task: T) -> Forked<T::Output> {
        let label = task.label();
        let (sender, receiver) = signal::channel();
        let promoted = Rc::new(Cell::new(false));

        let job: Box<dyn ChildJob> = Box::new(SpawnedChild::new(task, sender));
        self.context
            .tracker_mut()
            .push(Frame::new(job, promoted.clone(), label));

        if self.context.check_heartbeat() == Heartbeat::Promote {
            // The tracker is non-empty (we just pushed), so this always
            // yields a frame: the oldest outstanding fork on this worker,
            // which is not necessarily the one just created.
            if let Some(frame) = self.context.tracker_mut().promote_oldest() {
                trace!(
                    label = frame.label(),
                    age_ns = frame.age().as_nanos() as u64,
                    "promoting oldest frame"
                );
                self.core.count_promotion();
                self.core.dispatch(PoolJob::Promoted(frame.into_job()));
                self.context.record_promotion();
            }
        }

        Forked { receiver, promoted }
    }

    /// Waits for a forked child and returns its result.
    ///
    /// If the child was promoted, this blocks on its completion, executing
    /// other queued pool jobs in the meantime. Otherwise the child is popped
    /// from the tracker and run inline on this worker. A panic in the child
    /// is resumed here, on the joining worker.
    ///
    /// # Panics
    ///
    /// Panics if an unpromoted child is joined before a younger sibling
    /// (fork/join must be well nested), and resumes the child's panic if its
    /// computation failed.
    pub fn join<T: Send + 'static>(&mut self, forked: Forked<T>) -> T {
        let Forked {
            mut receiver,
            promoted,
        } = forked;

        if promoted.get() {
            match Core::wait_for(self.core, &mut receiver) {
                Some(Ok(value)) => value,
                Some(Err(payload)) => unwind::resume_unwinding(payload),
                None => panic!("join interrupted: the promoted worker disappeared"),
            }
        } else {
            let Some(frame) = self.context.tracker_mut().pop_newest() else {
                unwind::contract_violation("join without a matching fork on this worker");
            };
            if !frame.belongs_to(&promoted) {
                unwind::contract_violation(
                    "out-of-order join: a forked child must be joined before its ancestors",
                );
            }
            debug_assert!(!frame.is_promoted(), "a tracked frame cannot be promoted");

            frame.into_job().run_inline(self);

            match receiver.try_take() {
                TryTake::Ready(Ok(value)) => value,
                TryTake::Ready(Err(payload)) => unwind::resume_unwinding(payload),
                _ => unreachable!("inline child finished without completing its signal"),
            }
        }
    }

    /// Forks a child and immediately joins it.
    pub fn invoke<T: Task>(&mut self, task: T) -> T::Output {
        let forked = self.fork(task);
        self.join(forked)
    }

    /// Adds work credits to this worker's timer.
    pub fn add_credits(&mut self, credits: u64) {
        self.context.add_credits(credits);
    }

    /// The current worker's context, for observability.
    pub fn context(&self) -> &WorkerContext {
        self.context
    }

    /// The current worker's counters.
    pub fn worker_stats(&self) -> crate::context::WorkerStats {
        self.context.stats()
    }

    /// The executor's configuration.
    pub fn config(&self) -> &Config {
        self.context.config()
    }
}

// -----------------------------------------------------------------------------
// Fork handles

/// A handle to a forked child, consumed by [`Scope::join`].
///
/// Handles are worker-local (they are `!Send`): a child is joined on the
/// worker that forked it.
pub struct Forked<T: Send + 'static> {
    receiver: Receiver<ThreadResult<T>>,
    promoted: Rc<Cell<bool>>,
}

impl<T: Send + 'static> Forked<T> {
    /// Whether the child has been promoted to an independent worker.
    pub fn is_promoted(&self) -> bool {
        self.promoted.get()
    }
}

// -----------------------------------------------------------------------------
// Async join handles

/// A handle to a task submitted with [`Executor::submit_async`].
///
/// It is a `Future` resolving to the task's result and can also be awaited
/// synchronously with [`JoinHandle::wait`]. Dropping the handle detaches the
/// task; it still runs to completion.
///
/// A scheduler contract violation committed by the task resumes unwinding
/// here, out of `poll` or [`JoinHandle::wait`], rather than appearing as an
/// [`Error::TaskFailed`].
pub struct JoinHandle<T> {
    task: Option<FallibleTask<ThreadResult<T>>>,
}

impl<T> JoinHandle<T> {
    /// Blocks the calling thread until the task completes.
    pub fn wait(mut self) -> Result<T> {
        let blocker = Arc::new(Blocker::new());
        let waker = Waker::from(blocker.clone());
        let mut cx = Context::from_waker(&waker);

        loop {
            match Pin::new(&mut self).poll(&mut cx) {
                Poll::Ready(result) => return result,
                Poll::Pending => blocker.block(),
            }
        }
    }

    /// Explicitly detaches the task, letting it run to completion without a
    /// handle.
    pub fn detach(mut self) {
        if let Some(task) = self.task.take() {
            task.detach();
        }
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<T>> {
        let this = self.get_mut();
        let task = this
            .task
            .as_mut()
            .expect("join handle polled after completion");
        match Pin::new(task).poll(cx) {
            Poll::Ready(Some(Ok(value))) => {
                this.task = None;
                Poll::Ready(Ok(value))
            }
            Poll::Ready(Some(Err(payload))) => {
                this.task = None;
                // A contract violation resumes unwinding here instead of
                // being wrapped.
                Poll::Ready(Err(Error::TaskFailed(TaskFailure::capture(payload))))
            }
            Poll::Ready(None) => {
                this.task = None;
                Poll::Ready(Err(Error::Interrupted))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for JoinHandle<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.detach();
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
