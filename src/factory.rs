//! Thread creation for worker pools.

use std::{
    io,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

/// A capability for creating the execution threads a pool runs workers on.
///
/// Given a runnable body, the factory must start a thread that runs it and
/// then detach. Returning an error means no thread was started; the pool
/// rolls back the worker it was creating.
pub trait ThreadFactory: Send + Sync {
    fn spawn(&self, body: Box<dyn FnOnce() + Send>) -> io::Result<()>;
}

static POOL_SEQ: AtomicUsize = AtomicUsize::new(1);

/// The default factory: named, non-daemon threads numbered per pool.
///
/// Threads are named `pool-N-worker-M` where `N` is a process-wide pool
/// sequence number and `M` counts threads created by this factory. A custom
/// prefix replaces the `pool-N-worker-` part.
#[derive(Debug)]
pub struct NamedThreadFactory {
    prefix: String,
    stack_size: Option<usize>,
    next_thread: AtomicUsize,
}

impl Default for NamedThreadFactory {
    fn default() -> Self {
        Self::new(format!("pool-{}-worker-", POOL_SEQ.fetch_add(1, Ordering::Relaxed)))
    }
}

impl NamedThreadFactory {
    /// Create a factory that names threads `{prefix}{M}`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            stack_size: None,
            next_thread: AtomicUsize::new(1),
        }
    }

    /// Request a minimum stack size (in bytes) for created threads.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }
}

impl ThreadFactory for NamedThreadFactory {
    fn spawn(&self, body: Box<dyn FnOnce() + Send>) -> io::Result<()> {
        let name = format!("{}{}", self.prefix, self.next_thread.fetch_add(1, Ordering::Relaxed));

        let mut builder = thread::Builder::new().name(name);

        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        builder.spawn(body).map(drop)
    }
}
