//! Submission rejection handling.

use std::fmt;

use crate::task::Task;

/// Why a submission could not be accepted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RejectReason {
    /// The queue is full and the pool is at its maximum worker count.
    Saturated,

    /// The pool is shutting down and no longer accepts work.
    Shutdown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Saturated => f.write_str("pool and queue are saturated"),
            RejectReason::Shutdown => f.write_str("pool is shut down"),
        }
    }
}

/// A handler invoked by the pool when a submission cannot be accepted.
///
/// The handler receives ownership of the rejected task, so it may drop it,
/// run it in place, or hand it somewhere else. Rejection is the *only* way a
/// caller of [`WorkerPool::execute`](crate::WorkerPool::execute) observes
/// that a task was not accepted; `execute` itself never returns an error.
///
/// Implementations must not block and must not panic.
///
/// Any `Fn(Task, RejectReason)` closure is a valid policy:
///
/// ```
/// use workpool::{RejectReason, Task, WorkerPool};
///
/// let pool = WorkerPool::builder()
///     .size(1)
///     .rejection_policy(|task: Task, reason: RejectReason| {
///         eprintln!("dropped a task: {}", reason);
///         drop(task);
///     })
///     .build();
/// # pool.shutdown();
/// ```
pub trait RejectionPolicy: Send + Sync {
    fn reject(&self, task: Task, reason: RejectReason);
}

impl<F> RejectionPolicy for F
where
    F: Fn(Task, RejectReason) + Send + Sync,
{
    fn reject(&self, task: Task, reason: RejectReason) {
        self(task, reason)
    }
}

/// The default policy: log the rejection at `warn` and drop the task.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogAndDrop;

impl RejectionPolicy for LogAndDrop {
    fn reject(&self, task: Task, reason: RejectReason) {
        log::warn!("rejected a task: {}", reason);
        drop(task);
    }
}

/// Drop rejected tasks without any side effect.
#[derive(Clone, Copy, Debug, Default)]
pub struct Discard;

impl RejectionPolicy for Discard {
    fn reject(&self, task: Task, _reason: RejectReason) {
        drop(task);
    }
}
