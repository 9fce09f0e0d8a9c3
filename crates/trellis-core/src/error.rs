//! Error types for Trellis.
//!
//! Every error exposes an [`ErrorKind`] so callers can branch on the broad
//! failure class without matching on each subsystem's enum.

use std::fmt;

use crate::object::ObjectId;
use crate::timer::TimerId;

/// Broad classification shared by all Trellis errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The operation is not valid in the current state (double parenting,
    /// arming an armed timer, running a stopped application, ...).
    InvalidState,
    /// An id did not resolve to a live object, child or timer.
    NotFound,
    /// Submission or posting after shutdown began.
    QueueClosed,
    /// A bounded queue had no room and the caller asked not to block.
    QueueFull,
    /// A task or timer was cancelled before producing a result.
    Cancelled,
    /// A submitted task panicked while running.
    TaskFailed,
    /// An event handler returned an error on the dispatch thread.
    HandlerFailed,
    /// A configuration value could not be interpreted.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidState => "invalid state",
            Self::NotFound => "not found",
            Self::QueueClosed => "queue closed",
            Self::QueueFull => "queue full",
            Self::Cancelled => "cancelled",
            Self::TaskFailed => "task failed",
            Self::HandlerFailed => "handler failed",
            Self::Config => "configuration",
        };
        f.write_str(name)
    }
}

/// The main error type for Trellis operations.
#[derive(Debug)]
pub enum TrellisError {
    /// Object tree error.
    Object(ObjectError),
    /// Timer error.
    Timer(TimerError),
    /// Thread pool error.
    ThreadPool(ThreadPoolError),
    /// Fatal failure on the dispatch thread.
    Dispatch(DispatchError),
    /// Configuration error.
    Config(ConfigError),
    /// The event queue no longer accepts events (a quit was requested or the
    /// application shut down).
    EventQueueClosed,
    /// `run()` was called while the dispatch loop is already running.
    AlreadyRunning,
    /// `run()` was called after the application has stopped.
    ApplicationStopped,
}

impl TrellisError {
    /// The broad class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Object(err) => err.kind(),
            Self::Timer(err) => err.kind(),
            Self::ThreadPool(err) => err.kind(),
            Self::Dispatch(_) => ErrorKind::HandlerFailed,
            Self::Config(_) => ErrorKind::Config,
            Self::EventQueueClosed => ErrorKind::QueueClosed,
            Self::AlreadyRunning | Self::ApplicationStopped => ErrorKind::InvalidState,
        }
    }

    /// Process exit code to report for this error. Always non-zero.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::HandlerFailed => 70,
            ErrorKind::Config => 78,
            _ => 1,
        }
    }
}

impl fmt::Display for TrellisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object(err) => write!(f, "Object error: {err}"),
            Self::Timer(err) => write!(f, "Timer error: {err}"),
            Self::ThreadPool(err) => write!(f, "Thread pool error: {err}"),
            Self::Dispatch(err) => write!(f, "Dispatch error: {err}"),
            Self::Config(err) => write!(f, "Configuration error: {err}"),
            Self::EventQueueClosed => write!(f, "The event queue is closed"),
            Self::AlreadyRunning => write!(f, "The dispatch loop is already running"),
            Self::ApplicationStopped => write!(f, "The application has already stopped"),
        }
    }
}

impl std::error::Error for TrellisError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Object(err) => Some(err),
            Self::Timer(err) => Some(err),
            Self::ThreadPool(err) => Some(err),
            Self::Dispatch(err) => Some(err),
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

/// Object tree errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectError {
    /// The object ID is invalid or has been destroyed.
    InvalidObjectId(ObjectId),
    /// The child already has a parent; detach it first.
    AlreadyParented {
        /// The child that was being attached.
        child: ObjectId,
        /// Its current owner.
        parent: ObjectId,
    },
    /// Attaching would make an object its own ancestor.
    CircularParentage,
    /// The tree root cannot be re-parented or destroyed.
    ProtectedRoot,
    /// The object is not a direct child of the given parent.
    NotAChild {
        /// The parent that was searched.
        parent: ObjectId,
        /// The id that was not among its children.
        child: ObjectId,
    },
}

impl ObjectError {
    /// The broad class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidObjectId(_) | Self::NotAChild { .. } => ErrorKind::NotFound,
            Self::AlreadyParented { .. } | Self::CircularParentage | Self::ProtectedRoot => {
                ErrorKind::InvalidState
            }
        }
    }
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidObjectId(id) => write!(f, "Invalid or destroyed object ID {id:?}"),
            Self::AlreadyParented { child, parent } => {
                write!(f, "Object {child:?} is already owned by {parent:?}")
            }
            Self::CircularParentage => {
                write!(f, "Cannot set an object as its own parent or ancestor")
            }
            Self::ProtectedRoot => write!(f, "The tree root cannot be re-parented or destroyed"),
            Self::NotAChild { parent, child } => {
                write!(f, "Object {child:?} is not a child of {parent:?}")
            }
        }
    }
}

impl std::error::Error for ObjectError {}

/// Timer-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    /// The timer ID is invalid or the timer was cancelled.
    InvalidTimerId(TimerId),
    /// The timer is already armed.
    AlreadyArmed(TimerId),
    /// Only an armed timer can be paused.
    NotArmed(TimerId),
    /// Only a paused timer can be resumed.
    NotPaused(TimerId),
    /// A frequency must be positive and finite.
    InvalidFrequency(String),
    /// The timer service has shut down.
    ServiceStopped,
    /// The timing thread could not be spawned.
    SpawnFailed(String),
}

impl TimerError {
    /// The broad class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTimerId(_) => ErrorKind::NotFound,
            Self::AlreadyArmed(_)
            | Self::NotArmed(_)
            | Self::NotPaused(_)
            | Self::InvalidFrequency(_)
            | Self::SpawnFailed(_) => ErrorKind::InvalidState,
            Self::ServiceStopped => ErrorKind::QueueClosed,
        }
    }
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTimerId(id) => write!(f, "Invalid or cancelled timer ID {id:?}"),
            Self::AlreadyArmed(id) => write!(f, "Timer {id:?} is already armed"),
            Self::NotArmed(id) => write!(f, "Timer {id:?} is not armed"),
            Self::NotPaused(id) => write!(f, "Timer {id:?} is not paused"),
            Self::InvalidFrequency(hz) => write!(f, "Invalid timer frequency {hz} Hz"),
            Self::ServiceStopped => write!(f, "The timer service has stopped"),
            Self::SpawnFailed(msg) => write!(f, "Failed to start the timer thread: {msg}"),
        }
    }
}

impl std::error::Error for TimerError {}

/// Thread pool errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadPoolError {
    /// A pool needs at least one worker.
    InvalidThreadCount(usize),
    /// A bounded queue needs room for at least one task.
    InvalidQueueCapacity,
    /// Failed to spawn a worker thread.
    CreationFailed(String),
    /// Shutdown has begun; no more tasks are accepted.
    QueueClosed,
    /// The bounded queue is full (only returned by non-blocking submission).
    QueueFull,
}

impl ThreadPoolError {
    /// The broad class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidThreadCount(_)
            | Self::InvalidQueueCapacity
            | Self::CreationFailed(_) => ErrorKind::InvalidState,
            Self::QueueClosed => ErrorKind::QueueClosed,
            Self::QueueFull => ErrorKind::QueueFull,
        }
    }
}

impl fmt::Display for ThreadPoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidThreadCount(n) => {
                write!(f, "A thread pool needs at least one worker, got {n}")
            }
            Self::InvalidQueueCapacity => write!(f, "Queue capacity must be at least 1"),
            Self::CreationFailed(msg) => write!(f, "Failed to create thread pool: {msg}"),
            Self::QueueClosed => write!(f, "The thread pool is shutting down"),
            Self::QueueFull => write!(f, "The thread pool queue is full"),
        }
    }
}

impl std::error::Error for ThreadPoolError {}

/// Error type a handler may return from [`Object::handle`](crate::Object::handle).
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A handler failed on the dispatch thread.
#[derive(Debug)]
pub struct DispatchError {
    /// The object whose handler failed.
    pub object: ObjectId,
    /// Name of the event kind being dispatched.
    pub event: &'static str,
    /// The handler's error.
    pub source: HandlerError,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler of {:?} failed on {} event: {}",
            self.object, self.event, self.source
        )
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A setting held a value that could not be parsed.
    InvalidValue {
        /// The settings key.
        key: String,
        /// The raw value found.
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value } => {
                write!(f, "invalid value {value:?} for setting {key}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ObjectError> for TrellisError {
    fn from(err: ObjectError) -> Self {
        Self::Object(err)
    }
}

impl From<TimerError> for TrellisError {
    fn from(err: TimerError) -> Self {
        Self::Timer(err)
    }
}

impl From<ThreadPoolError> for TrellisError {
    fn from(err: ThreadPoolError) -> Self {
        Self::ThreadPool(err)
    }
}

impl From<DispatchError> for TrellisError {
    fn from(err: DispatchError) -> Self {
        Self::Dispatch(err)
    }
}

impl From<ConfigError> for TrellisError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

/// A specialized Result type for Trellis operations.
pub type Result<T> = std::result::Result<T, TrellisError>;
