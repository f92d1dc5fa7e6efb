//! gatework - resource-gated streaming task execution
//!
//! Callers submit streaming tasks that a fixed pool of worker threads drains,
//! each task holding one token from a finite [`ResourcePool`] for its whole
//! run. Tasks are created through a [`TaskGroup`], which tracks how many of
//! its tasks have finished and remembers the first failure.
//!
//! # Quick Start
//!
//! ```no_run
//! use gatework::prelude::*;
//! use std::sync::Arc;
//!
//! let pool = WorkerPool::new(4).unwrap();
//! pool.start().unwrap();
//!
//! // Two "connections" shared by every task.
//! let connections = Arc::new(ResourcePool::new([1u32, 2]));
//! let exec = executor_fn(|total: Option<u64>, n: u64, _conn: &mut u32| {
//!     Ok(total.unwrap_or(0) + n)
//! });
//!
//! let group = TaskGroup::new(pool.dispatch_queue());
//! for chunk in 0..8u64 {
//!     let task = group.enqueue_task(exec.clone(), connections.clone()).unwrap();
//!     for n in 0..100 {
//!         task.add_data(chunk * 100 + n).unwrap();
//!     }
//!     task.set_complete();
//! }
//!
//! group.wait_complete();
//! assert!(group.error().is_none());
//! ```
//!
//! # Model
//!
//! - **No blocking primitives**: every wait is a polling loop with bounded
//!   backoff, including token acquisition and [`TaskGroup::wait_complete`].
//! - **One task per worker**: a worker runs the task it dequeued until the
//!   task is drained or fails, so a task still waiting for data keeps both
//!   its worker and its token.
//! - **Fail fast**: the first executor fault poisons the group. Later
//!   `enqueue_task` calls re-raise it and queued tasks of the group finish
//!   without touching any data.

#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod executor;
pub mod prelude;
pub mod resource;
pub mod task;
pub mod util;

pub use config::{Config, ConfigBuilder};
pub use error::{BoxError, Error, Result, TaskFault};
pub use executor::{DispatchQueue, ExecutorPanic, PoolStats, Runnable, WorkerPool};
pub use resource::ResourcePool;
pub use task::{executor_fn, Executor, FnExecutor, GroupId, Notifiable, TaskGroup, TaskItem, WaitStatus};
