//! Implementation of the worker pool itself.

use std::{
    collections::HashMap,
    fmt,
    ops::{Range, RangeInclusive},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    time::Duration,
};

use once_cell::sync::Lazy;

use crate::{
    factory::{NamedThreadFactory, ThreadFactory},
    queue::BoundedQueue,
    reject::{LogAndDrop, RejectReason, RejectionPolicy},
    task::Task,
    worker::{Worker, WorkerState},
};

#[cfg(target_has_atomic = "64")]
pub(crate) type AtomicCounter = std::sync::atomic::AtomicU64;

#[cfg(not(target_has_atomic = "64"))]
pub(crate) type AtomicCounter = std::sync::atomic::AtomicU32;

/// A value describing a size constraint for a worker pool.
///
/// Any size constraint can be wrapped in [`PerCore`] to be made relative to
/// the number of available CPU cores on the current system.
///
/// See [`Builder::size`] for details.
pub trait SizeConstraint {
    /// The minimum number of standing workers (the core size).
    fn core(&self) -> usize;

    /// The hard cap on concurrently live workers.
    fn max(&self) -> usize;
}

impl SizeConstraint for usize {
    fn core(&self) -> usize {
        *self
    }

    fn max(&self) -> usize {
        *self
    }
}

impl SizeConstraint for Range<usize> {
    fn core(&self) -> usize {
        self.start
    }

    fn max(&self) -> usize {
        self.end
    }
}

impl SizeConstraint for RangeInclusive<usize> {
    fn core(&self) -> usize {
        *self.start()
    }

    fn max(&self) -> usize {
        *self.end()
    }
}

/// Modifies a size constraint to be per available CPU core.
///
/// # Examples
///
/// ```
/// # use workpool::PerCore;
/// // two workers per core
/// let size = PerCore(2);
///
/// // at least one worker per core, at most four per core
/// let size = PerCore(1..4);
/// ```
pub struct PerCore<T>(pub T);

static CORE_COUNT: Lazy<usize> = Lazy::new(|| num_cpus::get().max(1));

impl<T: SizeConstraint> SizeConstraint for PerCore<T> {
    fn core(&self) -> usize {
        *CORE_COUNT * self.0.core()
    }

    fn max(&self) -> usize {
        *CORE_COUNT * self.0.max()
    }
}

/// A builder for constructing a customized [`WorkerPool`].
///
/// # Examples
///
/// ```
/// let pool = workpool::WorkerPool::builder()
///     .name("my-pool")
///     .size(2..=4)
///     .queue_capacity(64)
///     .build();
/// # pool.shutdown();
/// ```
pub struct Builder {
    name: Option<String>,
    size: Option<(usize, usize)>,
    stack_size: Option<usize>,
    queue_capacity: Option<usize>,
    keep_alive: Duration,
    factory: Option<Box<dyn ThreadFactory>>,
    rejection: Option<Box<dyn RejectionPolicy>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            name: None,
            size: None,
            stack_size: None,
            queue_capacity: None,
            keep_alive: Duration::from_secs(60),
            factory: None,
            rejection: None,
        }
    }
}

impl Builder {
    /// Set a custom thread name prefix for threads spawned by this pool.
    ///
    /// Worker threads are named `{name}-{M}` with a per-pool counter.
    /// Ignored if a custom [`thread_factory`](Self::thread_factory) is set.
    ///
    /// # Panics
    ///
    /// Panics if the name contains null bytes (`\0`).
    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        let name = name.into();

        if name.as_bytes().contains(&0) {
            panic!("worker pool name must not contain null bytes");
        }

        self.name = Some(name);
        self
    }

    /// Set the number of workers managed by this pool.
    ///
    /// If a `usize` is supplied, core and max size are the same and the pool
    /// never scales. If a range is supplied, the lower bound is the core
    /// size and the upper bound is the maximum the pool may burst up to when
    /// the queue is full.
    ///
    /// If not set, both default to one more than twice the number of CPU
    /// cores.
    ///
    /// # Panics
    ///
    /// Panics if the core size is larger than the maximum, or if the maximum
    /// is 0.
    pub fn size<S: SizeConstraint>(mut self, size: S) -> Self {
        let (core, max) = (size.core(), size.max());

        if core > max {
            panic!("worker pool core size cannot be larger than maximum size");
        }

        if max == 0 {
            panic!("worker pool maximum size must be non-zero");
        }

        self.size = Some((core, max));
        self
    }

    /// Set the size of the stack (in bytes) for this pool's worker threads.
    ///
    /// Ignored if a custom [`thread_factory`](Self::thread_factory) is set.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Set the number of pending tasks the queue holds before submissions
    /// start spawning non-core workers (and, past the maximum size, being
    /// rejected).
    ///
    /// If not set, the queue is effectively unbounded.
    ///
    /// # Panics
    ///
    /// Panics (in [`build`](Self::build)) if set to 0.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set how long an idle worker beyond the core size waits for work
    /// before retiring.
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.keep_alive = duration;
        self
    }

    /// Use a custom [`ThreadFactory`] for creating worker threads.
    pub fn thread_factory<F: ThreadFactory + 'static>(mut self, factory: F) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    /// Use a custom [`RejectionPolicy`] for submissions the pool cannot
    /// accept. The default logs a warning and drops the task.
    pub fn rejection_policy<R: RejectionPolicy + 'static>(mut self, policy: R) -> Self {
        self.rejection = Some(Box::new(policy));
        self
    }

    /// Create a worker pool according to this configuration.
    ///
    /// No threads are started up front; core workers are created one per
    /// submission until the core size is reached.
    pub fn build(self) -> WorkerPool {
        let (core_size, max_size) = self.size.unwrap_or_else(|| {
            let size = 2 * *CORE_COUNT + 1;

            (size, size)
        });

        let factory = self.factory.unwrap_or_else(|| {
            let mut factory = match self.name {
                Some(name) => NamedThreadFactory::new(format!("{}-", name)),
                None => NamedThreadFactory::default(),
            };

            if let Some(size) = self.stack_size {
                factory = factory.stack_size(size);
            }

            Box::new(factory)
        });

        let queue = match self.queue_capacity {
            Some(capacity) => BoundedQueue::new(capacity),
            None => BoundedQueue::unbounded(),
        };

        WorkerPool {
            shared: Arc::new(Shared {
                core_size,
                max_size,
                keep_alive: self.keep_alive,
                queue,
                workers: Mutex::new(HashMap::new()),
                worker_count: AtomicUsize::new(0),
                next_worker_id: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
                completed_tasks: Default::default(),
                panicked_tasks: Default::default(),
                factory,
                rejection: self.rejection.unwrap_or_else(|| Box::new(LogAndDrop)),
            }),
        }
    }
}

/// A pool of worker threads fed by a bounded work queue.
///
/// # Sizing
///
/// Every pool has a core and a maximum worker count. Core workers are
/// created eagerly, one per submission, until the core size is reached and
/// are kept alive indefinitely. Once the core is busy, further submissions
/// are queued; only when the queue is full does the pool burst beyond the
/// core size, up to the maximum. Workers beyond the core size retire after
/// sitting idle for the configured keep-alive duration.
///
/// # Backpressure and rejection
///
/// [`execute`](Self::execute) never blocks the caller. When the queue is
/// full and the pool is at its maximum size, the submission is handed to the
/// configured [`RejectionPolicy`] instead; there is no return value
/// signalling acceptance.
///
/// # Ordering
///
/// Queued tasks are delivered to workers in strict FIFO order. No order is
/// guaranteed between a queued task and a later submission that started a
/// fresh worker directly; the direct dispatch may run first.
pub struct WorkerPool {
    shared: Arc<Shared>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    /// Create a new worker pool with the default configuration.
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Get a builder for creating a customized worker pool.
    #[inline]
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Get the number of live workers in the pool.
    ///
    /// Note that the number returned may become immediately outdated after
    /// invocation.
    pub fn threads(&self) -> usize {
        self.shared.worker_count.load(Ordering::SeqCst)
    }

    /// Get the number of tasks queued for execution, but not yet started.
    pub fn queued_tasks(&self) -> usize {
        self.shared.queue.len()
    }

    /// Get the number of tasks completed (successfully or otherwise) by this
    /// pool since it was created.
    #[allow(clippy::useless_conversion)]
    pub fn completed_tasks(&self) -> u64 {
        self.shared.completed_tasks.load(Ordering::Relaxed).into()
    }

    /// Get the number of tasks that have panicked since the pool was
    /// created.
    #[allow(clippy::useless_conversion)]
    pub fn panicked_tasks(&self) -> u64 {
        self.shared.panicked_tasks.load(Ordering::Relaxed).into()
    }

    /// Submit a closure to be executed by the pool.
    ///
    /// This call never blocks. If the submission cannot be accepted (the
    /// pool is shut down, or the queue and the worker count are both at
    /// their limits) it is handed to the pool's [`RejectionPolicy`].
    ///
    /// # Examples
    ///
    /// ```
    /// let pool = workpool::WorkerPool::builder().size(2).build();
    ///
    /// pool.execute(|| {
    ///     // expensive work
    /// });
    /// # pool.shutdown();
    /// ```
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Task::new(f));
    }

    /// Submit an already-constructed [`Task`].
    pub fn submit(&self, task: Task) {
        let shared = &self.shared;

        if shared.is_shutdown() {
            shared.reject(task, RejectReason::Shutdown);
            return;
        }

        // Below the core size, dispatch directly on a fresh core worker.
        let mut task = if shared.worker_count.load(Ordering::SeqCst) < shared.core_size {
            match Shared::add_worker(shared, Some(task), shared.core_size) {
                Ok(()) => return,
                // Rejected by the shutdown re-check inside the lock.
                Err(None) => return,
                // Lost the race for a core slot; fall through to the queue.
                Err(Some(task)) => task,
            }
        } else {
            task
        };

        match shared.queue.offer(task) {
            Ok(()) => {
                // The queue accepted the task but nobody may be alive to
                // consume it; make sure at least one worker exists.
                if shared.worker_count.load(Ordering::SeqCst) == 0 {
                    let _ = Shared::add_worker(shared, None, shared.max_size);
                }
                return;
            }
            Err(returned) => task = returned,
        }

        // Queue full: burst beyond the core size if allowed.
        if shared.worker_count.load(Ordering::SeqCst) < shared.max_size {
            match Shared::add_worker(shared, Some(task), shared.max_size) {
                Ok(()) | Err(None) => return,
                Err(Some(returned)) => task = returned,
            }
        }

        shared.reject(task, RejectReason::Saturated);
    }

    /// Whether the pool has begun shutting down.
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }

    /// Begin a graceful shutdown.
    ///
    /// New submissions are rejected from this point on. Workers that appear
    /// idle (not mid-task) are woken so they can retire; busy workers finish
    /// their current task and keep draining the queue. As workers retire no
    /// replacements are spawned, so the live worker count trends to zero
    /// once the queue is empty.
    ///
    /// Idle detection is a non-blocking probe of each worker's run lock and
    /// is best-effort; a worker can start a task between the probe and the
    /// wakeup.
    pub fn shutdown(&self) {
        let shared = &self.shared;
        let workers = shared.workers.lock().unwrap();

        shared.shutdown.store(true, Ordering::SeqCst);

        for state in workers.values() {
            // The run lock is held for the duration of each task, so a
            // successful try_lock means the worker is between tasks.
            if let Ok(_idle) = state.run_lock.try_lock() {
                state.interrupt.interrupt();
            }
        }

        drop(workers);

        shared.queue.wake_consumers();
        log::debug!("pool shutting down gracefully");
    }

    /// Shut down immediately, abandoning queued work.
    ///
    /// Every worker is flagged for retirement, and all tasks that were
    /// queued but not yet started are drained and returned in their original
    /// FIFO order. Tasks already mid-execution run to completion; there is
    /// no way to abort them.
    pub fn shutdown_now(&self) -> Vec<Task> {
        let shared = &self.shared;
        let workers = shared.workers.lock().unwrap();

        shared.shutdown.store(true, Ordering::SeqCst);

        for state in workers.values() {
            state.interrupt.interrupt();
        }

        let drained = shared.queue.drain();

        drop(workers);

        shared.queue.wake_consumers();
        shared.queue.wake_producers();
        log::debug!("pool shut down, {} queued tasks abandoned", drained.len());

        drained
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .field("queued_tasks", &self.queued_tasks())
            .field("completed_tasks", &self.completed_tasks())
            .field("is_shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Pool state shared by the owner and the worker threads.
pub(crate) struct Shared {
    core_size: usize,
    max_size: usize,
    keep_alive: Duration,
    queue: BoundedQueue<Task>,

    /// The worker set. This mutex is the pool's main lock: every mutation
    /// of the set and of `worker_count` happens while holding it, so the two
    /// can never disagree.
    workers: Mutex<HashMap<usize, Arc<WorkerState>>>,
    worker_count: AtomicUsize,
    next_worker_id: AtomicUsize,

    shutdown: AtomicBool,
    completed_tasks: AtomicCounter,
    panicked_tasks: AtomicCounter,

    factory: Box<dyn ThreadFactory>,
    rejection: Box<dyn RejectionPolicy>,
}

impl Shared {
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn reject(&self, task: Task, reason: RejectReason) {
        self.rejection.reject(task, reason);
    }

    /// Register and start one worker, respecting `limit` as the ceiling on
    /// the live worker count.
    ///
    /// `Err(Some(task))` hands the first task back when the limit was
    /// reached; `Err(None)` means the task was already dealt with (rejected
    /// during a shutdown race, or lost with a failed thread spawn).
    fn add_worker(this: &Arc<Self>, first_task: Option<Task>, limit: usize) -> Result<(), Option<Task>> {
        let state = {
            let mut workers = this.workers.lock().unwrap();

            // A shutdown that lands between the caller's check and this
            // lock must still reject the task.
            if this.is_shutdown() {
                if let Some(task) = first_task {
                    this.reject(task, RejectReason::Shutdown);
                }
                return Err(None);
            }

            if this.worker_count.load(Ordering::SeqCst) >= limit {
                return Err(first_task);
            }

            let id = this.next_worker_id.fetch_add(1, Ordering::Relaxed);
            let state = Arc::new(WorkerState::new(id));

            workers.insert(id, Arc::clone(&state));
            this.worker_count.fetch_add(1, Ordering::SeqCst);

            state
        };

        // The thread is started outside the main lock.
        Self::spawn_worker(this, state, first_task)
    }

    /// Start the execution thread for an already-registered worker. On
    /// failure the worker is rolled back so no orphan entry remains.
    fn spawn_worker(this: &Arc<Self>, state: Arc<WorkerState>, first_task: Option<Task>) -> Result<(), Option<Task>> {
        let id = state.id;
        let worker = Worker::new(Arc::clone(this), Arc::clone(&state), first_task);

        match this.factory.spawn(Box::new(move || worker.run())) {
            Ok(()) => {
                log::debug!("started worker {}", id);
                Ok(())
            }
            Err(e) => {
                log::error!("failed to spawn worker thread: {}", e);

                let mut workers = this.workers.lock().unwrap();
                workers.remove(&id);
                this.worker_count.fetch_sub(1, Ordering::SeqCst);

                // The first task was consumed by the spawn attempt.
                Err(None)
            }
        }
    }

    /// Fetch the next task for a worker, or `None` to retire it.
    ///
    /// Workers beyond the core size wait at most the keep-alive duration;
    /// core workers wait indefinitely. Once the pool is shut down and the
    /// queue runs dry, every fetch returns `None` immediately.
    pub(crate) fn next_task(&self, state: &WorkerState) -> Option<Task> {
        if self.is_shutdown() && self.queue.is_empty() {
            return None;
        }

        if self.worker_count.load(Ordering::SeqCst) > self.core_size {
            self.queue.poll(self.keep_alive, &state.interrupt)
        } else {
            self.queue.take(&state.interrupt)
        }
    }

    pub(crate) fn task_finished(&self, panicked: bool) {
        self.completed_tasks.fetch_add(1, Ordering::Relaxed);

        if panicked {
            self.panicked_tasks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove a retiring worker from the set.
    ///
    /// If the pool is still running and losing this worker would drop the
    /// live count below the core size, a fresh idle worker is started in its
    /// place. The retiring worker's slot in the count is handed to the
    /// replacement, so the count is not decremented in that case.
    pub(crate) fn worker_exited(this: &Arc<Self>, id: usize) {
        let replacement = {
            let mut workers = this.workers.lock().unwrap();

            workers.remove(&id);

            let remaining = this.worker_count.load(Ordering::SeqCst).saturating_sub(1);

            if !this.is_shutdown() && remaining < this.core_size {
                let replacement_id = this.next_worker_id.fetch_add(1, Ordering::Relaxed);
                let state = Arc::new(WorkerState::new(replacement_id));

                workers.insert(replacement_id, Arc::clone(&state));

                Some(state)
            } else {
                this.worker_count.fetch_sub(1, Ordering::SeqCst);
                None
            }
        };

        if let Some(state) = replacement {
            // spawn_worker rolls the count back if the thread fails to
            // start.
            let _ = Self::spawn_worker(this, state, None);
        }
    }
}
