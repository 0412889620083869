//! The task protocol: the capability a user computation implements to run
//! under the executor.
//!
//! A [`Task`] exposes a single [`compute`](Task::compute) that receives a
//! [`Scope`], the handle through which it may fork children, join them, and
//! read its worker's statistics. Forking consumes the child task and joining
//! consumes the fork handle, so "each child is forked once and joined at
//! most once" holds by ownership.

use crate::executor::Scope;

/// A user computation producing a value, with access to fork/join through
/// the scope it is given.
///
/// Implement it directly for named task types:
///
/// ```
/// use downbeat::{Scope, Task};
///
/// struct Fib(u64);
///
/// impl Task for Fib {
///     type Output = u64;
///
///     fn compute(&mut self, scope: &mut Scope<'_>) -> u64 {
///         if self.0 < 2 {
///             return self.0;
///         }
///         let left = scope.fork(Fib(self.0 - 1));
///         let right = scope.invoke(Fib(self.0 - 2));
///         scope.join(left) + right
///     }
/// }
/// ```
///
/// or build one from a closure with [`task_fn`].
pub trait Task: Send + 'static {
    /// The value this task produces.
    type Output: Send + 'static;

    /// Performs the computation. Called exactly once.
    fn compute(&mut self, scope: &mut Scope<'_>) -> Self::Output;

    /// A short name used in trace output.
    fn label(&self) -> &'static str {
        "task"
    }
}

/// Wraps a closure as a [`Task`]. See [`task_fn`].
pub struct TaskFn<F> {
    f: Option<F>,
}

impl<F, T> Task for TaskFn<F>
where
    F: FnOnce(&mut Scope<'_>) -> T + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn compute(&mut self, scope: &mut Scope<'_>) -> T {
        let f = self.f.take().expect("task computed twice");
        f(scope)
    }

    fn label(&self) -> &'static str {
        "closure"
    }
}

/// Builds a task from a closure.
///
/// ```
/// use downbeat::{task_fn, Config, Executor};
///
/// let executor = Executor::new(Config::builder().build().unwrap());
/// let sum = executor
///     .submit(task_fn(|scope| {
///         let a = scope.fork(task_fn(|_| 1 + 2));
///         let b = scope.invoke(task_fn(|_| 3 + 4));
///         scope.join(a) + b
///     }))
///     .unwrap();
/// assert_eq!(sum, 10);
/// ```
pub fn task_fn<F, T>(f: F) -> TaskFn<F>
where
    F: FnOnce(&mut Scope<'_>) -> T + Send + 'static,
    T: Send + 'static,
{
    TaskFn { f: Some(f) }
}
