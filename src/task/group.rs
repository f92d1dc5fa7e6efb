use super::{Executor, Notifiable, TaskItem};
use crate::error::{Error, Result, TaskFault};
use crate::executor::{DispatchQueue, Runnable};
use crate::resource::ResourcePool;
use crate::util::Backoff;
use crossbeam_utils::CachePadded;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

static GROUP_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a task group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u64);

impl GroupId {
    fn next() -> Self {
        GroupId(GROUP_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group-{}", self.0)
    }
}

/// How a wait on a group ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Complete,
    Interrupted,
    TimedOut,
}

struct GroupState {
    id: GroupId,
    created: CachePadded<AtomicUsize>,
    finished: CachePadded<AtomicUsize>,
    error: AtomicBool,
    fault: OnceLock<TaskFault>,
    interrupted: AtomicBool,
}

impl Notifiable for GroupState {
    fn notify_completed(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_exception(&self, fault: TaskFault) {
        // First fault wins; the flag goes up only once a fault is stored.
        if self.fault.set(fault).is_err() {
            debug!(group = %self.id, "group already failed, dropping later fault");
        } else {
            warn!(group = %self.id, "task failed, group no longer admits work");
        }
        self.error.store(true, Ordering::SeqCst);
    }

    fn invalid(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }
}

/// A set of task items sharing completion and first-failure accounting.
///
/// Cloning yields another handle to the same group.
///
/// ```no_run
/// use gatework::prelude::*;
/// use std::sync::Arc;
///
/// let pool = WorkerPool::new(2).unwrap();
/// pool.start().unwrap();
///
/// let connections = Arc::new(ResourcePool::new(["conn-a", "conn-b"]));
/// let exec = executor_fn(|prev: Option<usize>, line: String, _conn: &mut &'static str| {
///     Ok(prev.unwrap_or(0) + line.len())
/// });
///
/// let group = TaskGroup::new(pool.dispatch_queue());
/// let task = group.enqueue_task(exec, connections).unwrap();
/// task.add_data("hello".to_string()).unwrap();
/// task.set_complete();
///
/// group.wait_complete();
/// assert!(!group.error_state());
/// ```
#[derive(Clone)]
pub struct TaskGroup {
    state: Arc<GroupState>,
    queue: DispatchQueue,
}

impl TaskGroup {
    pub fn new(queue: DispatchQueue) -> Self {
        Self {
            state: Arc::new(GroupState {
                id: GroupId::next(),
                created: CachePadded::new(AtomicUsize::new(0)),
                finished: CachePadded::new(AtomicUsize::new(0)),
                error: AtomicBool::new(false),
                fault: OnceLock::new(),
                interrupted: AtomicBool::new(false),
            }),
            queue,
        }
    }

    /// Create a task item and push it onto the dispatch queue.
    ///
    /// Once the group has failed this re-raises the stored fault as
    /// [`Error::Handler`] and schedules nothing.
    pub fn enqueue_task<E: Executor>(
        &self,
        executor: Arc<E>,
        resources: Arc<ResourcePool<E::Token>>,
    ) -> Result<Arc<TaskItem<E>>> {
        if let Some(fault) = self.error() {
            return Err(Error::Handler(fault));
        }

        // Count before the push so the group cannot look complete while a
        // freshly queued task is already running.
        self.state.created.fetch_add(1, Ordering::SeqCst);

        let owner: Arc<dyn Notifiable> = self.state.clone();
        let task = Arc::new(TaskItem::new(executor, resources, owner));
        self.queue.push(task.clone() as Arc<dyn Runnable>);

        debug!(group = %self.state.id, created = self.created_count(), "task enqueued");
        Ok(task)
    }

    pub fn id(&self) -> GroupId {
        self.state.id
    }

    pub fn created_count(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn finished_count(&self) -> usize {
        self.state.finished.load(Ordering::SeqCst)
    }

    /// Every created task has reported completion.
    pub fn is_complete(&self) -> bool {
        let finished = self.state.finished.load(Ordering::SeqCst);
        finished == self.state.created.load(Ordering::SeqCst)
    }

    pub fn error_state(&self) -> bool {
        self.state.error.load(Ordering::SeqCst)
    }

    /// The first fault any task in this group raised.
    pub fn error(&self) -> Option<TaskFault> {
        if !self.error_state() {
            return None;
        }
        self.state.fault.get().cloned()
    }

    /// Release anyone blocked in [`wait_complete`](Self::wait_complete).
    ///
    /// Running tasks are not affected.
    pub fn interrupt(&self) {
        self.state.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.interrupted.load(Ordering::SeqCst)
    }

    /// Poll until every task has finished or the group is interrupted.
    pub fn wait_complete(&self) -> WaitStatus {
        let mut backoff = Backoff::new();
        loop {
            if let Some(status) = self.poll_status() {
                return status;
            }
            backoff.snooze();
        }
    }

    /// Like [`wait_complete`](Self::wait_complete), giving up after `timeout`.
    ///
    /// A timeout too large to represent waits without a deadline.
    pub fn wait_complete_timeout(&self, timeout: Duration) -> WaitStatus {
        let deadline = Instant::now().checked_add(timeout);
        let mut backoff = Backoff::new();
        loop {
            if let Some(status) = self.poll_status() {
                return status;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return WaitStatus::TimedOut;
            }
            backoff.snooze();
        }
    }

    fn poll_status(&self) -> Option<WaitStatus> {
        if self.is_complete() {
            Some(WaitStatus::Complete)
        } else if self.is_interrupted() {
            Some(WaitStatus::Interrupted)
        } else {
            None
        }
    }
}

impl fmt::Debug for TaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskGroup")
            .field("id", &self.state.id)
            .field("created", &self.created_count())
            .field("finished", &self.finished_count())
            .field("error", &self.error_state())
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::task::executor_fn;
    use crossbeam_deque::{Injector, Steal};

    fn drain(queue: &DispatchQueue) {
        loop {
            match queue.steal() {
                Steal::Success(task) => task.run(),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
    }

    fn failing_on(bad: u32) -> Arc<impl Executor<Data = u32, Token = ()>> {
        executor_fn(move |_: Option<()>, data: u32, _: &mut ()| -> std::result::Result<(), BoxError> {
            if data == bad {
                return Err(format!("bad item {}", data).into());
            }
            Ok(())
        })
    }

    #[test]
    fn test_group_ids_are_unique() {
        let queue: DispatchQueue = Arc::new(Injector::new());
        let a = TaskGroup::new(queue.clone());
        let b = TaskGroup::new(queue);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn test_counts_track_completion() {
        let queue: DispatchQueue = Arc::new(Injector::new());
        let group = TaskGroup::new(queue.clone());
        let resources = Arc::new(ResourcePool::new([()]));
        assert!(group.is_complete());

        for _ in 0..3 {
            let task = group.enqueue_task(failing_on(0), resources.clone()).unwrap();
            task.add_data(1).unwrap();
            task.set_complete();
        }

        assert_eq!(group.created_count(), 3);
        assert!(!group.is_complete());
        assert_eq!(queue.len(), 3);

        drain(&queue);

        assert_eq!(group.finished_count(), 3);
        assert!(group.is_complete());
        assert_eq!(group.wait_complete(), WaitStatus::Complete);
        assert!(!group.error_state());
        assert!(group.error().is_none());
    }

    #[test]
    fn test_failed_group_rejects_new_tasks() {
        let queue: DispatchQueue = Arc::new(Injector::new());
        let group = TaskGroup::new(queue.clone());
        let resources = Arc::new(ResourcePool::new([()]));

        let task = group.enqueue_task(failing_on(2), resources.clone()).unwrap();
        task.add_data(2).unwrap();
        task.set_complete();
        drain(&queue);

        assert!(group.error_state());
        let stored = group.error().unwrap();
        assert!(stored.ptr_eq(&task.error().unwrap()));

        let err = group.enqueue_task(failing_on(0), resources).unwrap_err();
        assert!(err.fault().unwrap().ptr_eq(&stored));
        assert_eq!(group.created_count(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queued_tasks_short_circuit_after_failure() {
        let queue: DispatchQueue = Arc::new(Injector::new());
        let group = TaskGroup::new(queue.clone());
        let resources = Arc::new(ResourcePool::new([()]));

        let first = group.enqueue_task(failing_on(1), resources.clone()).unwrap();
        let second = group.enqueue_task(failing_on(0), resources.clone()).unwrap();
        for task in [&first, &second] {
            task.add_data(1).unwrap();
            task.set_complete();
        }

        drain(&queue);

        assert!(first.error_state());
        assert_eq!(second.handled_count(), 0);
        assert!(!second.error_state());
        assert!(group.is_complete());
        assert_eq!(resources.available(), 1);
    }

    #[test]
    fn test_first_fault_wins() {
        let queue: DispatchQueue = Arc::new(Injector::new());
        let group = TaskGroup::new(queue);
        let first = TaskFault::new("first");

        group.state.notify_exception(first.clone());
        group.state.notify_exception(TaskFault::new("second"));

        assert!(group.error().unwrap().ptr_eq(&first));
    }

    #[test]
    fn test_interrupt_releases_waiter() {
        let queue: DispatchQueue = Arc::new(Injector::new());
        let group = TaskGroup::new(queue);
        let resources = Arc::new(ResourcePool::new([()]));
        let _task = group.enqueue_task(failing_on(0), resources).unwrap();

        assert_eq!(
            group.wait_complete_timeout(Duration::from_millis(5)),
            WaitStatus::TimedOut
        );

        let waiter = {
            let group = group.clone();
            std::thread::spawn(move || group.wait_complete())
        };
        group.interrupt();

        assert_eq!(waiter.join().unwrap(), WaitStatus::Interrupted);
        assert!(!group.is_complete());
    }

    #[test]
    fn test_unbounded_timeout_does_not_overflow() {
        let queue: DispatchQueue = Arc::new(Injector::new());
        let group = TaskGroup::new(queue.clone());
        assert_eq!(group.wait_complete_timeout(Duration::MAX), WaitStatus::Complete);

        let resources = Arc::new(ResourcePool::new([()]));
        let task = group.enqueue_task(failing_on(0), resources).unwrap();
        task.set_complete();

        let waiter = {
            let group = group.clone();
            std::thread::spawn(move || group.wait_complete_timeout(Duration::MAX))
        };
        drain(&queue);

        assert_eq!(waiter.join().unwrap(), WaitStatus::Complete);
    }
}
