use super::{Executor, Notifiable};
use crate::error::{Error, Result, TaskFault};
use crate::executor::panic_handler::catch_panic;
use crate::executor::Runnable;
use crate::resource::ResourcePool;
use crate::util::Backoff;
use crossbeam_deque::{Injector, Steal};
use crossbeam_utils::CachePadded;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

/// One unit of streaming work.
///
/// The caller feeds data with [`add_data`](Self::add_data) and closes the
/// stream with [`set_complete`](Self::set_complete). A single worker runs
/// [`execute`](Self::execute), which borrows one resource token for the whole
/// run and hands every queued item to the executor in FIFO order.
///
/// `handled_count <= queued_count` always holds, and the task is drained once
/// it is complete and both counts agree.
pub struct TaskItem<E: Executor> {
    pending: Injector<E::Data>,
    executor: Arc<E>,
    resources: Arc<ResourcePool<E::Token>>,
    owner: Arc<dyn Notifiable>,
    queued: CachePadded<AtomicUsize>,
    handled: CachePadded<AtomicUsize>,
    complete: AtomicBool,
    error: AtomicBool,
    started: AtomicBool,
    fault: OnceLock<TaskFault>,
}

impl<E: Executor> TaskItem<E> {
    pub fn new(
        executor: Arc<E>,
        resources: Arc<ResourcePool<E::Token>>,
        owner: Arc<dyn Notifiable>,
    ) -> Self {
        Self {
            pending: Injector::new(),
            executor,
            resources,
            owner,
            queued: CachePadded::new(AtomicUsize::new(0)),
            handled: CachePadded::new(AtomicUsize::new(0)),
            complete: AtomicBool::new(false),
            error: AtomicBool::new(false),
            started: AtomicBool::new(false),
            fault: OnceLock::new(),
        }
    }

    /// Queue one data item for the executor.
    ///
    /// Fails with [`Error::InvalidOperation`] once the task is marked complete
    /// or has failed; the item is dropped in that case.
    pub fn add_data(&self, data: E::Data) -> Result<()> {
        if self.complete.load(Ordering::SeqCst) {
            return Err(Error::invalid_operation("task already marked complete"));
        }
        if self.error.load(Ordering::SeqCst) {
            return Err(Error::invalid_operation("task is in error state"));
        }

        // Count first: a worker must never see an item the counter does not
        // cover, or it could report the task drained too early.
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.pending.push(data);
        Ok(())
    }

    /// Signal that no further data will be added. Idempotent.
    pub fn set_complete(&self) {
        self.complete.store(true, Ordering::SeqCst);
    }

    pub fn queued_count(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn handled_count(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    /// Complete, and every queued item has been handed to the executor.
    pub fn is_drained(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
            && self.handled.load(Ordering::SeqCst) == self.queued.load(Ordering::SeqCst)
    }

    pub fn error_state(&self) -> bool {
        self.error.load(Ordering::SeqCst)
    }

    /// The fault that stopped this task, if any.
    pub fn error(&self) -> Option<TaskFault> {
        self.fault.get().cloned()
    }

    /// Drive the task to completion on the calling thread.
    ///
    /// Meant to be called once, by the worker that dequeued the task; later
    /// calls return without doing anything.
    pub fn execute(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("task item executed more than once; ignoring");
            return;
        }

        if self.owner.invalid() {
            trace!(
                queued = self.queued_count(),
                "owner already failed, skipping task"
            );
            self.owner.notify_completed();
            return;
        }

        let mut token = self.resources.acquire();
        let mut previous = None;
        let mut backoff = Backoff::new();

        loop {
            match self.next_data() {
                Some(data) => {
                    backoff.reset();
                    self.handled.fetch_add(1, Ordering::SeqCst);

                    let outcome = catch_panic(|| {
                        self.executor
                            .handle_data(previous.take(), data, &mut token)
                    });
                    let fault = match outcome {
                        Ok(Ok(output)) => {
                            previous = Some(output);
                            continue;
                        }
                        Ok(Err(err)) => TaskFault::from(err),
                        Err(panic) => TaskFault::new(panic),
                    };

                    self.resources.release(token);
                    self.fail(fault);
                    return;
                }
                None if self.is_drained() => break,
                None => backoff.snooze(),
            }
        }

        self.resources.release(token);
        debug!(handled = self.handled_count(), "task drained");
        self.owner.notify_completed();
    }

    fn next_data(&self) -> Option<E::Data> {
        loop {
            match self.pending.steal() {
                Steal::Success(data) => return Some(data),
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    fn fail(&self, fault: TaskFault) {
        let abandoned = self.queued_count() - self.handled_count();
        warn!(
            error = %fault,
            handled = self.handled_count(),
            abandoned,
            "executor failed, abandoning task"
        );

        let _ = self.fault.set(fault.clone());
        self.error.store(true, Ordering::SeqCst);
        self.owner.notify_exception(fault);
        self.owner.notify_completed();
    }
}

impl<E: Executor> Runnable for TaskItem<E> {
    fn run(&self) {
        self.execute();
    }
}

impl<E: Executor> fmt::Debug for TaskItem<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskItem")
            .field("queued", &self.queued_count())
            .field("handled", &self.handled_count())
            .field("complete", &self.is_complete())
            .field("error", &self.error_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::task::executor_fn;
    use parking_lot::Mutex;
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Exception(String),
        Completed,
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
        invalid: AtomicBool,
    }

    impl Notifiable for Recorder {
        fn notify_completed(&self) {
            self.events.lock().push(Event::Completed);
        }

        fn notify_exception(&self, fault: TaskFault) {
            self.events.lock().push(Event::Exception(fault.to_string()));
        }

        fn invalid(&self) -> bool {
            self.invalid.load(Ordering::SeqCst)
        }
    }

    type Seen = Arc<Mutex<Vec<(Option<u32>, u32)>>>;

    fn summing(
        seen: Seen,
    ) -> impl Fn(Option<u32>, u32, &mut &'static str) -> std::result::Result<u32, BoxError>
           + Send
           + Sync
           + 'static {
        move |prev: Option<u32>, data: u32, _token: &mut &'static str| {
            seen.lock().push((prev, data));
            Ok(prev.unwrap_or(0) + data)
        }
    }

    fn task_with<E: Executor<Token = &'static str>>(
        exec: Arc<E>,
    ) -> (Arc<TaskItem<E>>, Arc<Recorder>, Arc<ResourcePool<&'static str>>) {
        let owner = Arc::new(Recorder::default());
        let pool = Arc::new(ResourcePool::new(["conn"]));
        let task = Arc::new(TaskItem::new(exec, pool.clone(), owner.clone()));
        (task, owner, pool)
    }

    #[test]
    fn test_items_handled_in_order_with_previous_result() {
        let seen: Seen = Arc::default();
        let (task, owner, pool) = task_with(executor_fn(summing(seen.clone())));

        for n in [1, 2, 3] {
            task.add_data(n).unwrap();
        }
        task.set_complete();
        task.execute();

        assert_eq!(*seen.lock(), vec![(None, 1), (Some(1), 2), (Some(3), 3)]);
        assert_eq!(task.handled_count(), 3);
        assert!(task.is_drained());
        assert!(!task.error_state());
        assert_eq!(*owner.events.lock(), vec![Event::Completed]);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_add_data_after_complete_is_rejected() {
        let seen: Seen = Arc::default();
        let (task, _owner, _pool) = task_with(executor_fn(summing(seen)));

        task.add_data(1).unwrap();
        task.set_complete();
        task.set_complete();

        let err = task.add_data(2).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
        assert_eq!(task.queued_count(), 1);
    }

    #[test]
    fn test_failure_abandons_remaining_items() {
        let calls = Arc::new(AtomicUsize::new(0));
        let exec = {
            let calls = calls.clone();
            executor_fn(move |_: Option<()>, data: u32, _: &mut &'static str| {
                calls.fetch_add(1, Ordering::SeqCst);
                if data == 2 {
                    return Err("bad item".into());
                }
                Ok(())
            })
        };
        let (task, owner, pool) = task_with(exec);

        for n in 1..=4 {
            task.add_data(n).unwrap();
        }
        task.set_complete();
        task.execute();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(task.error_state());
        assert_eq!(task.error().unwrap().to_string(), "bad item");
        assert_eq!(
            *owner.events.lock(),
            vec![Event::Exception("bad item".into()), Event::Completed]
        );
        assert_eq!(pool.available(), 1);

        let err = task.add_data(5).unwrap_err();
        assert!(matches!(err, Error::InvalidOperation(_)));
    }

    #[test]
    fn test_panic_is_captured_as_fault() {
        let exec = executor_fn(|_: Option<()>, _: u32, _: &mut &'static str| -> std::result::Result<(), BoxError> {
            panic!("handler exploded")
        });
        let (task, owner, pool) = task_with(exec);

        task.add_data(1).unwrap();
        task.set_complete();
        task.execute();

        let fault = task.error().unwrap();
        assert!(fault.to_string().contains("handler exploded"));
        assert_eq!(owner.events.lock().len(), 2);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_invalid_owner_short_circuits() {
        let seen: Seen = Arc::default();
        let (task, owner, pool) = task_with(executor_fn(summing(seen.clone())));
        owner.invalid.store(true, Ordering::SeqCst);

        // Hold the only token: a short-circuited task must not wait for it.
        let token = pool.acquire();

        task.add_data(1).unwrap();
        task.set_complete();
        task.execute();

        assert!(seen.lock().is_empty());
        assert_eq!(task.handled_count(), 0);
        assert_eq!(*owner.events.lock(), vec![Event::Completed]);
        pool.release(token);
    }

    #[test]
    fn test_waits_for_late_data_until_complete() {
        let seen: Seen = Arc::default();
        let (task, owner, pool) = task_with(executor_fn(summing(seen.clone())));

        let runner = {
            let task = task.clone();
            thread::spawn(move || task.execute())
        };

        task.add_data(10).unwrap();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(pool.available(), 0);
        assert!(owner.events.lock().is_empty());

        task.add_data(20).unwrap();
        task.set_complete();
        runner.join().unwrap();

        assert_eq!(*seen.lock(), vec![(None, 10), (Some(10), 20)]);
        assert_eq!(*owner.events.lock(), vec![Event::Completed]);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_empty_task_completes() {
        let seen: Seen = Arc::default();
        let (task, owner, pool) = task_with(executor_fn(summing(seen.clone())));

        task.set_complete();
        task.execute();
        task.execute();

        assert!(seen.lock().is_empty());
        assert_eq!(*owner.events.lock(), vec![Event::Completed]);
        assert_eq!(pool.available(), 1);
    }
}
