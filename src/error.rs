use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error an executor may return from `handle_data`.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("task group failed: {0}")]
    Handler(#[source] TaskFault),

    #[error("config error: {0}")]
    Config(String),

    #[error("worker pool already started")]
    AlreadyStarted,

    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        Error::InvalidOperation(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// The stored fault, if this error re-raises a failed group.
    pub fn fault(&self) -> Option<&TaskFault> {
        match self {
            Error::Handler(fault) => Some(fault),
            _ => None,
        }
    }
}

/// A fault raised by an executor while a task was handling its data.
///
/// Clones share the same underlying error, so a fault stored by a group
/// and re-raised later is the very value the executor produced.
#[derive(Clone)]
pub struct TaskFault(Arc<dyn StdError + Send + Sync + 'static>);

impl TaskFault {
    pub fn new<E: Into<BoxError>>(err: E) -> Self {
        TaskFault(Arc::from(err.into()))
    }

    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// True when both handles refer to the same captured error.
    pub fn ptr_eq(&self, other: &TaskFault) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<BoxError> for TaskFault {
    fn from(err: BoxError) -> Self {
        TaskFault(Arc::from(err))
    }
}

impl fmt::Debug for TaskFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TaskFault").field(&self.0).finish()
    }
}

impl fmt::Display for TaskFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for TaskFault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}
