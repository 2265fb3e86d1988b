use std::fmt;

/// An opaque unit of work submitted to a [`WorkerPool`](crate::WorkerPool).
///
/// A task is a boxed closure with no observable return value. Ownership
/// moves from the submitter into the pool on acceptance, to a worker for
/// execution, or back out through
/// [`WorkerPool::shutdown_now`](crate::WorkerPool::shutdown_now) if it never
/// started.
pub struct Task(Box<dyn FnOnce() + Send + 'static>);

impl Task {
    /// Wrap a closure as a task.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Box::new(f))
    }

    /// Pair a background computation with a completion callback.
    ///
    /// The producer runs on a worker thread and its output is handed to the
    /// consumer *on that same worker thread*; the pool performs no hand-off
    /// to any other context. Because the intermediate value never crosses a
    /// thread boundary it does not need to be `Send`.
    ///
    /// # Examples
    ///
    /// ```
    /// use workpool::Task;
    ///
    /// let task = Task::with_callback(|| 2 + 2, |sum| assert_eq!(sum, 4));
    /// task.run();
    /// ```
    pub fn with_callback<T, F, C>(producer: F, consumer: C) -> Self
    where
        T: 'static,
        F: FnOnce() -> T + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        Self::new(move || consumer(producer()))
    }

    /// Execute the task, consuming it.
    pub fn run(self) {
        (self.0)()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task(..)")
    }
}
