//! A self-scaling worker pool over a bounded two-lock work queue.
//!
//! The pool keeps a configurable number of core workers alive, bursts up to
//! a maximum when its queue fills, and retires surplus workers that sit
//! idle past a keep-alive duration. Submissions never block: when both the
//! queue and the worker count are at their limits the task is handed to a
//! pluggable [`RejectionPolicy`] instead.
//!
//! The queue underneath ([`BoundedQueue`]) locks its producer and consumer
//! ends independently so enqueues and dequeues proceed in parallel, with
//! explicit cross-signalling between the two sides.
//!
//! # Examples
//!
//! ```
//! use workpool::WorkerPool;
//!
//! let pool = WorkerPool::builder()
//!     .name("demo")
//!     .size(2..=4)
//!     .queue_capacity(128)
//!     .build();
//!
//! pool.execute(|| {
//!     // expensive work
//! });
//!
//! pool.shutdown();
//! ```
//!
//! Results can be routed through a completion callback that runs on the
//! same worker thread as the computation:
//!
//! ```
//! use workpool::{Task, WorkerPool};
//!
//! let pool = WorkerPool::builder().size(1).build();
//!
//! pool.submit(Task::with_callback(
//!     || 2 + 2,
//!     |sum| println!("the answer is {}", sum),
//! ));
//! # pool.shutdown();
//! ```

pub mod cache;
mod factory;
mod loader;
mod pool;
mod queue;
mod reject;
mod task;
mod worker;

pub use crate::{
    factory::{NamedThreadFactory, ThreadFactory},
    loader::{Loader, Source},
    pool::{Builder, PerCore, SizeConstraint, WorkerPool},
    queue::{BoundedQueue, Interrupt},
    reject::{Discard, LogAndDrop, RejectReason, RejectionPolicy},
    task::Task,
};
