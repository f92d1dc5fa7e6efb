//! Worker threads and the shared dispatch queue.
//!
//! Every worker of a [`WorkerPool`] pulls from one [`DispatchQueue`] and runs
//! whatever it gets to completion before pulling again.

pub mod panic_handler;
pub mod pool;
pub mod worker;

pub use panic_handler::ExecutorPanic;
pub use pool::{PoolStats, WorkerPool};

use crossbeam_deque::Injector;
use std::sync::Arc;

/// Work a worker can run. Implemented by every task item.
pub trait Runnable: Send + Sync {
    fn run(&self);
}

/// FIFO of runnable work shared by all workers of a pool.
pub type DispatchQueue = Arc<Injector<Arc<dyn Runnable>>>;
