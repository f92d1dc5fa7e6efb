use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// A panic raised by an executor, reported as a handler fault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("executor panicked: {message}")]
pub struct ExecutorPanic {
    pub message: String,
}

impl ExecutorPanic {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };

        Self { message }
    }
}

/// Run `f`, turning an unwinding panic into an `ExecutorPanic`.
pub(crate) fn catch_panic<F, R>(f: F) -> Result<R, ExecutorPanic>
where
    F: FnOnce() -> R,
{
    catch_unwind(AssertUnwindSafe(f)).map_err(ExecutorPanic::from_payload)
}
