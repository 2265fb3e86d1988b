use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{atomic::Ordering, Arc, Mutex},
};

use crate::{
    pool::{AtomicCounter, Shared},
    queue::Interrupt,
    task::Task,
};

/// Per-worker state shared between the pool and the worker's thread.
pub(crate) struct WorkerState {
    pub(crate) id: usize,

    /// Held for the duration of each task execution. The pool probes it
    /// with a non-blocking lock attempt to tell idle workers from busy ones
    /// during a graceful shutdown.
    pub(crate) run_lock: Mutex<()>,

    /// One-shot retirement signal observed by the worker's queue waits.
    pub(crate) interrupt: Interrupt,

    /// Tasks this worker has finished.
    pub(crate) completed: AtomicCounter,
}

impl WorkerState {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            run_lock: Mutex::new(()),
            interrupt: Interrupt::new(),
            completed: AtomicCounter::new(0),
        }
    }
}

/// A single worker bound to one execution thread.
///
/// Runs its first task if it was given one, then pulls tasks from the
/// pool's queue until a fetch comes back empty, at which point it retires
/// and deregisters itself.
pub(crate) struct Worker {
    shared: Arc<Shared>,
    state: Arc<WorkerState>,
    first_task: Option<Task>,
}

impl Worker {
    pub(crate) fn new(shared: Arc<Shared>, state: Arc<WorkerState>, first_task: Option<Task>) -> Self {
        Self {
            shared,
            state,
            first_task,
        }
    }

    pub(crate) fn run(mut self) {
        let mut task = self.first_task.take();

        loop {
            let next = match task.take() {
                Some(task) => task,
                None => match self.shared.next_task(&self.state) {
                    Some(task) => task,
                    None => break,
                },
            };

            self.run_task(next);
        }

        log::debug!(
            "worker {} retiring after {} tasks",
            self.state.id,
            self.state.completed.load(Ordering::Relaxed)
        );

        Shared::worker_exited(&self.shared, self.state.id);
    }

    fn run_task(&self, task: Task) {
        let _busy = self.state.run_lock.lock().unwrap();

        // A panicking task must not take the worker down with it; contain
        // it here and keep serving the queue.
        let result = catch_unwind(AssertUnwindSafe(|| task.run()));

        self.state.completed.fetch_add(1, Ordering::Relaxed);
        self.shared.task_finished(result.is_err());

        if result.is_err() {
            log::error!("task panicked on worker {}", self.state.id);
        }
    }
}
