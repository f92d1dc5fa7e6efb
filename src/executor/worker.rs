// worker thread loop
use super::panic_handler::catch_panic;
use super::{DispatchQueue, Runnable};
use crate::util::Backoff;
use crossbeam_deque::Steal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

pub type WorkerId = usize;

// stats for each worker
#[derive(Debug, Default)]
pub struct WorkerState {
    pub tasks_executed: AtomicU64,
}

#[derive(Debug)]
pub(crate) struct Worker {
    pub id: WorkerId,
    pub running: Arc<AtomicBool>,
    pub state: Arc<WorkerState>,
}

impl Worker {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(WorkerState::default()),
        }
    }

    // main loop: one task at a time, run to completion
    pub fn run(&self, queue: DispatchQueue) {
        debug!(worker = self.id, "worker started");
        let mut backoff = Backoff::new();

        while self.running.load(Ordering::SeqCst) {
            match Self::next_task(&queue) {
                Some(task) => {
                    backoff.reset();
                    self.execute_task(task);
                }
                None => backoff.snooze(),
            }
        }

        debug!(
            worker = self.id,
            executed = self.state.tasks_executed.load(Ordering::Relaxed),
            "worker stopped"
        );
    }

    fn next_task(queue: &DispatchQueue) -> Option<Arc<dyn Runnable>> {
        loop {
            match queue.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    fn execute_task(&self, task: Arc<dyn Runnable>) {
        // Executor panics are handled inside the task; this only guards the
        // worker against a panicking notification callback.
        if let Err(panic) = catch_panic(|| task.run()) {
            error!(worker = self.id, message = %panic.message, "task panicked outside its executor");
        }

        self.state.tasks_executed.fetch_add(1, Ordering::SeqCst);
    }
}
