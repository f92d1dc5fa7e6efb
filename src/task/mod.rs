//! Streaming tasks and the groups that account for them.
//!
//! A [`TaskItem`] is fed data by the caller and drained by exactly one worker,
//! which hands every item to an [`Executor`] while holding one resource token.
//! A [`TaskGroup`] creates task items on a shared dispatch queue and tracks
//! their collective completion and first failure through [`Notifiable`].

pub mod group;
pub mod item;

pub use group::{GroupId, TaskGroup, WaitStatus};
pub use item::TaskItem;

use crate::error::{BoxError, TaskFault};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Caller-supplied handler invoked once per data item of a task.
///
/// Calls for one task are strictly sequential, in submission order, with the
/// task's resource token held exclusively. `previous` is the value returned
/// by the prior call for the same task, or `None` on the first call.
pub trait Executor: Send + Sync + 'static {
    type Data: Send + 'static;
    type Output: 'static;
    type Token: Send + 'static;

    fn handle_data(
        &self,
        previous: Option<Self::Output>,
        data: Self::Data,
        token: &mut Self::Token,
    ) -> Result<Self::Output, BoxError>;
}

/// Callbacks a task item makes into whoever owns it.
///
/// `notify_completed` is called exactly once per execution. On failure
/// `notify_exception` is called once, immediately before it. `invalid` is
/// queried once when execution begins; `true` skips the task entirely.
pub trait Notifiable: Send + Sync {
    fn notify_completed(&self);

    fn notify_exception(&self, fault: TaskFault);

    fn invalid(&self) -> bool;
}

/// Executor backed by a closure.
pub struct FnExecutor<F, D, O, T> {
    f: F,
    _marker: PhantomData<fn(Option<O>, D, &mut T) -> O>,
}

impl<F, D, O, T> FnExecutor<F, D, O, T>
where
    F: Fn(Option<O>, D, &mut T) -> Result<O, BoxError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<F, D, O, T> Executor for FnExecutor<F, D, O, T>
where
    F: Fn(Option<O>, D, &mut T) -> Result<O, BoxError> + Send + Sync + 'static,
    D: Send + 'static,
    O: 'static,
    T: Send + 'static,
{
    type Data = D;
    type Output = O;
    type Token = T;

    fn handle_data(&self, previous: Option<O>, data: D, token: &mut T) -> Result<O, BoxError> {
        (self.f)(previous, data, token)
    }
}

impl<F, D, O, T> fmt::Debug for FnExecutor<F, D, O, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnExecutor").finish_non_exhaustive()
    }
}

/// Wrap a closure as a shareable executor.
pub fn executor_fn<F, D, O, T>(f: F) -> Arc<FnExecutor<F, D, O, T>>
where
    F: Fn(Option<O>, D, &mut T) -> Result<O, BoxError> + Send + Sync + 'static,
{
    Arc::new(FnExecutor::new(f))
}
