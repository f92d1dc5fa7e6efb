use super::worker::{Worker, WorkerId};
use super::DispatchQueue;
use crate::config::Config;
use crate::error::{Error, Result};
use crossbeam_deque::Injector;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub running: usize,
    pub queued_tasks: usize,
    pub tasks_executed: u64,
}

/// A fixed set of worker threads sharing one dispatch queue.
///
/// Nothing runs until [`start`](Self::start). [`stop`](Self::stop) only asks
/// workers to leave their loop; a worker inside a task finishes that task
/// first. Dropping the pool stops and joins every worker, so a worker stuck
/// in a task that never gets [`set_complete`](crate::TaskItem::set_complete)
/// keeps the drop waiting. During a panic the drop only stops the workers
/// and does not join them.
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
    queue: DispatchQueue,
    threads: Mutex<Vec<(WorkerId, JoinHandle<()>)>>,
    config: Config,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self> {
        let config = Config::builder().num_threads(size).build()?;
        Self::with_config(config)
    }

    pub fn with_config(config: Config) -> Result<Self> {
        config.validate()?;

        let workers = (0..config.worker_threads())
            .map(|id| Arc::new(Worker::new(id)))
            .collect();

        Ok(Self {
            workers,
            queue: Arc::new(Injector::new()),
            threads: Mutex::new(Vec::new()),
            config,
        })
    }

    /// Spawn one thread per worker.
    ///
    /// Fails with [`Error::AlreadyStarted`] while threads from an earlier
    /// start have not been joined.
    pub fn start(&self) -> Result<()> {
        let mut threads = self.threads.lock();
        if !threads.is_empty() {
            return Err(Error::AlreadyStarted);
        }

        for worker in &self.workers {
            worker.running.store(true, Ordering::SeqCst);

            let name = format!("{}-{}", self.config.thread_name_prefix, worker.id);
            let mut builder = thread::Builder::new().name(name);
            if let Some(stack_size) = self.config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let runner = worker.clone();
            let queue = self.queue.clone();
            match builder.spawn(move || runner.run(queue)) {
                Ok(handle) => threads.push((worker.id, handle)),
                Err(e) => {
                    warn!(worker = worker.id, error = %e, "failed to spawn worker");
                    self.signal_stop();
                    return Err(Error::Spawn(e));
                }
            }
        }

        debug!(workers = self.workers.len(), "worker pool started");
        Ok(())
    }

    /// Ask every worker to exit after its current task. Does not wait.
    pub fn stop(&self) {
        self.signal_stop();
        debug!("worker pool stopping");
    }

    /// Wait for stopped workers to exit.
    ///
    /// Blocks for as long as any worker is still inside a task, so call it
    /// only once outstanding tasks have been marked complete.
    pub fn join(&self) {
        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        for (id, handle) in handles {
            if handle.join().is_err() {
                warn!(worker = id, "worker thread panicked");
            }
        }
    }

    /// Stop and join.
    pub fn shutdown(&self) {
        self.stop();
        self.join();
    }

    /// Queue to bind task groups to.
    pub fn dispatch_queue(&self) -> DispatchQueue {
        self.queue.clone()
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn is_running(&self) -> bool {
        self.workers
            .iter()
            .any(|w| w.running.load(Ordering::SeqCst))
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers.len(),
            running: self
                .workers
                .iter()
                .filter(|w| w.running.load(Ordering::SeqCst))
                .count(),
            queued_tasks: self.queue.len(),
            tasks_executed: self
                .workers
                .iter()
                .map(|w| w.state.tasks_executed.load(Ordering::SeqCst))
                .sum(),
        }
    }

    fn signal_stop(&self) {
        for worker in &self.workers {
            worker.running.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Joining while unwinding could wait forever on a task still polling
        // for data; stop the workers and leave them detached instead.
        if thread::panicking() {
            self.stop();
            return;
        }
        self.shutdown();
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size())
            .field("stats", &self.stats())
            .finish()
    }
}
