pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{BoxError, Error, Result, TaskFault};
pub use crate::executor::{PoolStats, WorkerPool};
pub use crate::resource::ResourcePool;
pub use crate::task::{executor_fn, Executor, Notifiable, TaskGroup, TaskItem, WaitStatus};
