//! Fixed-size thread pool with a shared FIFO task queue.
//!
//! Tasks are dequeued strictly in submission order; completion order across
//! workers is unspecified. Each submitted task resolves exactly once through
//! its [`TaskHandle`]: with its value, with [`TaskError::Failed`] if it
//! panicked, or with [`TaskError::Cancelled`] if shutdown discarded it before
//! it started.
//!
//! # Example
//!
//! ```
//! use trellis_core::threadpool::{ThreadPool, ThreadPoolConfig};
//!
//! let pool = ThreadPool::new(ThreadPoolConfig::with_threads(2)).unwrap();
//! let handle = pool.submit(|| 6 * 7).unwrap();
//! assert_eq!(handle.wait(), Ok(42));
//!
//! let report = pool.shutdown(true);
//! assert_eq!(report.cancelled, 0);
//! ```
//!
//! # Backpressure
//!
//! With [`ThreadPoolConfig::queue_capacity`] set, [`ThreadPool::submit`]
//! blocks while the queue is full and [`ThreadPool::try_submit`] fails with
//! [`ThreadPoolError::QueueFull`]. Blocking submission from inside a task of
//! the same pool can deadlock when every worker does it at once.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::task::{Context as TaskContext, Poll, Waker};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use parking_lot::{Condvar, Mutex};

use crate::error::{ErrorKind, ThreadPoolError};

/// Why a task produced no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task panicked; the payload message is kept.
    Failed(String),
    /// The task was discarded before it started.
    Cancelled,
}

impl TaskError {
    /// The broad class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Failed(_) => ErrorKind::TaskFailed,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(msg) => write!(f, "task panicked: {msg}"),
            Self::Cancelled => write!(f, "task was cancelled"),
        }
    }
}

impl std::error::Error for TaskError {}

/// Observable progress of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    /// Queued or running.
    Pending = 0,
    /// Finished with a value.
    Completed = 1,
    /// Panicked.
    Failed = 2,
    /// Discarded before it started.
    Cancelled = 3,
}

impl TaskStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Completed,
            2 => Self::Failed,
            3 => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

/// Lifecycle of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Waiting for a task.
    Idle = 0,
    /// Executing a task.
    Running = 1,
    /// Shutdown observed; finishing up.
    Stopping = 2,
    /// Thread has exited.
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::Stopping,
            3 => Self::Stopped,
            _ => Self::Idle,
        }
    }
}

/// State shared between a handle and the worker that resolves it.
#[derive(Debug)]
struct TaskShared {
    status: AtomicU8,
    waker: Mutex<Option<Waker>>,
}

impl TaskShared {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(TaskStatus::Pending as u8),
            waker: Mutex::new(None),
        }
    }

    fn wake(&self) {
        if let Some(waker) = self.waker.lock().take() {
            waker.wake();
        }
    }
}

type Callback<T> = Box<dyn FnOnce(Result<T, TaskError>) + Send>;

enum Sink<T> {
    Channel(Sender<Result<T, TaskError>>),
    Callback(Callback<T>),
}

/// Delivers a task's outcome exactly once.
///
/// If dropped without an outcome (the task was discarded) it delivers
/// [`TaskError::Cancelled`].
struct Completion<T> {
    sink: Option<Sink<T>>,
    shared: Arc<TaskShared>,
}

impl<T> Completion<T> {
    fn resolve(&mut self, result: Result<T, TaskError>) {
        let Some(sink) = self.sink.take() else {
            return;
        };
        let status = match &result {
            Ok(_) => TaskStatus::Completed,
            Err(TaskError::Failed(_)) => TaskStatus::Failed,
            Err(TaskError::Cancelled) => TaskStatus::Cancelled,
        };
        match sink {
            Sink::Channel(sender) => {
                let _ = sender.send(result);
            }
            Sink::Callback(callback) => {
                if catch_unwind(AssertUnwindSafe(|| callback(result))).is_err() {
                    tracing::error!(target: "trellis_core::threadpool", "task callback panicked");
                }
            }
        }
        // Published after delivery so a finished handle always has its outcome.
        self.shared.status.store(status as u8, Ordering::Release);
        self.shared.wake();
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        self.resolve(Err(TaskError::Cancelled));
    }
}

/// A handle to a submitted task.
///
/// Besides the blocking accessors, the handle is a [`Future`] resolving to the
/// task's outcome.
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: u64,
    receiver: Receiver<Result<T, TaskError>>,
    shared: Arc<TaskShared>,
    taken: bool,
}

impl<T> TaskHandle<T> {
    /// Get the task id, unique within its pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current status of the task.
    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.shared.status.load(Ordering::Acquire))
    }

    /// Check if the task has resolved.
    pub fn is_finished(&self) -> bool {
        self.status() != TaskStatus::Pending
    }

    /// Take the outcome without blocking.
    ///
    /// Returns `None` while the task is pending or after the outcome was
    /// already taken.
    pub fn try_take(&mut self) -> Option<Result<T, TaskError>> {
        if self.taken {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(result) => {
                self.taken = true;
                Some(result)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.taken = true;
                Some(Err(TaskError::Cancelled))
            }
        }
    }

    /// Block until the task resolves.
    ///
    /// If the outcome was already taken through [`try_take`](Self::try_take),
    /// this returns [`TaskError::Cancelled`].
    pub fn wait(self) -> Result<T, TaskError> {
        if self.taken {
            return Err(TaskError::Cancelled);
        }
        self.receiver.recv().unwrap_or(Err(TaskError::Cancelled))
    }

    /// Block for at most `timeout`.
    ///
    /// Returns `None` if the task is still pending when the timeout elapses.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<T, TaskError>> {
        if self.taken {
            return None;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(result) => {
                self.taken = true;
                Some(result)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.taken = true;
                Some(Err(TaskError::Cancelled))
            }
        }
    }
}

impl<T> Unpin for TaskHandle<T> {}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(result) = this.try_take() {
            return Poll::Ready(result);
        }
        *this.shared.waker.lock() = Some(cx.waker().clone());
        // The worker may have resolved between the first check and registering.
        match this.try_take() {
            Some(result) => Poll::Ready(result),
            None if this.taken => Poll::Ready(Err(TaskError::Cancelled)),
            None => Poll::Pending,
        }
    }
}

/// Configuration for creating a thread pool.
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Number of worker threads. `None` means use the number of CPU cores.
    pub num_threads: Option<usize>,
    /// Name prefix for worker threads; workers are named `"{prefix}-{index}"`.
    pub thread_name: String,
    /// Stack size for worker threads in bytes.
    pub stack_size: Option<usize>,
    /// Maximum number of queued (not yet running) tasks. `None` is unbounded.
    pub queue_capacity: Option<usize>,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            thread_name: "trellis-worker".to_string(),
            stack_size: None,
            queue_capacity: None,
        }
    }
}

impl ThreadPoolConfig {
    /// Create a new configuration with custom thread count.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
            ..Default::default()
        }
    }

    /// Bound the task queue.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set the worker thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    fn resolved_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }
}

/// What [`ThreadPool::shutdown`] observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that finished while shutdown was waiting for the workers.
    pub executed_before_return: usize,
    /// Queued tasks resolved as cancelled instead of running.
    pub cancelled: usize,
}

type Job = Box<dyn FnOnce() + Send>;

struct QueuedTask {
    id: u64,
    job: Job,
}

#[derive(Default)]
struct PoolQueue {
    tasks: VecDeque<QueuedTask>,
    closed: bool,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
    work_available: Condvar,
    space_available: Condvar,
    capacity: Option<usize>,
    next_task_id: AtomicU64,
    active: AtomicUsize,
    executed: AtomicUsize,
    workers: Box<[AtomicU8]>,
}

impl PoolShared {
    fn set_state(&self, index: usize, state: WorkerState) {
        self.workers[index].store(state as u8, Ordering::Release);
    }

    fn has_room(&self, queue: &PoolQueue) -> bool {
        self.capacity.is_none_or(|cap| queue.tasks.len() < cap)
    }
}

/// A fixed set of named worker threads draining a FIFO queue.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
    shutdown_started: AtomicBool,
}

impl ThreadPool {
    /// Create a pool and start its workers.
    ///
    /// Fails if the worker count or queue capacity is zero, or a worker thread
    /// could not be spawned.
    pub fn new(config: ThreadPoolConfig) -> Result<Self, ThreadPoolError> {
        let num_threads = config.resolved_threads();
        if num_threads == 0 {
            return Err(ThreadPoolError::InvalidThreadCount(num_threads));
        }
        if config.queue_capacity == Some(0) {
            return Err(ThreadPoolError::InvalidQueueCapacity);
        }

        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PoolQueue::default()),
            work_available: Condvar::new(),
            space_available: Condvar::new(),
            capacity: config.queue_capacity,
            next_task_id: AtomicU64::new(1),
            active: AtomicUsize::new(0),
            executed: AtomicUsize::new(0),
            workers: (0..num_threads)
                .map(|_| AtomicU8::new(WorkerState::Idle as u8))
                .collect(),
        });

        let mut handles = Vec::with_capacity(num_threads);
        for index in 0..num_threads {
            let mut builder = thread::Builder::new().name(format!("{}-{}", config.thread_name, index));
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }
            let worker_shared = shared.clone();
            match builder.spawn(move || worker_loop(index, worker_shared)) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    shared.queue.lock().closed = true;
                    shared.work_available.notify_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(ThreadPoolError::CreationFailed(err.to_string()));
                }
            }
        }

        tracing::debug!(target: "trellis_core::threadpool", num_threads, capacity = ?config.queue_capacity, "thread pool started");

        Ok(Self {
            worker_ids: handles.iter().map(|h| h.thread().id()).collect(),
            handles: Mutex::new(handles),
            shared,
            shutdown_started: AtomicBool::new(false),
        })
    }

    /// Get the number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.shared.workers.len()
    }

    /// Number of queued tasks not yet picked up by a worker.
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.lock().tasks.len()
    }

    /// Number of tasks currently executing.
    pub fn active_tasks(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Snapshot of every worker's state, by worker index.
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.shared
            .workers
            .iter()
            .map(|s| WorkerState::from_u8(s.load(Ordering::Acquire)))
            .collect()
    }

    /// Number of workers whose thread has not exited.
    pub fn live_workers(&self) -> usize {
        self.worker_states()
            .into_iter()
            .filter(|s| *s != WorkerState::Stopped)
            .count()
    }

    /// Whether shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.shared.queue.lock().closed
    }

    /// Submit a task.
    ///
    /// With a bounded queue this blocks until there is room. Fails with
    /// [`ThreadPoolError::QueueClosed`] once shutdown has begun, including
    /// while blocked.
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, ThreadPoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (handle, completion) = self.handle_pair();
        self.enqueue(handle.id, true, move || wrap(task, completion))?;
        Ok(handle)
    }

    /// Submit a task without ever blocking.
    ///
    /// Fails with [`ThreadPoolError::QueueFull`] when the bound is reached.
    pub fn try_submit<F, T>(&self, task: F) -> Result<TaskHandle<T>, ThreadPoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (handle, completion) = self.handle_pair();
        self.enqueue(handle.id, false, move || wrap(task, completion))?;
        Ok(handle)
    }

    /// Submit a task whose outcome is passed to `callback` on the worker.
    ///
    /// The callback also runs, with [`TaskError::Cancelled`], if shutdown
    /// discards the queued task. A submission the pool refuses never invokes
    /// the callback. Returns the task id.
    pub fn submit_with_callback<F, T, C>(&self, task: F, callback: C) -> Result<u64, ThreadPoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
        C: FnOnce(Result<T, TaskError>) + Send + 'static,
    {
        let id = self.next_id();
        // The completion only exists once the task is admitted.
        self.enqueue(id, true, move || {
            let completion = Completion {
                sink: Some(Sink::Callback(Box::new(callback))),
                shared: Arc::new(TaskShared::new()),
            };
            wrap(task, completion)
        })?;
        Ok(id)
    }

    /// Stop accepting tasks and join every worker.
    ///
    /// With `drain`, queued tasks still run; otherwise they resolve as
    /// [`TaskError::Cancelled`]. Running tasks are never interrupted. Later
    /// calls return an empty report immediately.
    #[tracing::instrument(skip(self), target = "trellis_core::threadpool", level = "debug")]
    pub fn shutdown(&self, drain: bool) -> ShutdownReport {
        if self.shutdown_started.swap(true, Ordering::AcqRel) {
            return ShutdownReport::default();
        }

        let executed_at_start = self.shared.executed.load(Ordering::Acquire);
        let discarded = {
            let mut queue = self.shared.queue.lock();
            queue.closed = true;
            if drain {
                Vec::new()
            } else {
                queue.tasks.drain(..).collect::<Vec<_>>()
            }
        };
        for slot in self.shared.workers.iter() {
            let _ = slot.compare_exchange(
                WorkerState::Idle as u8,
                WorkerState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        self.shared.work_available.notify_all();
        self.shared.space_available.notify_all();

        let cancelled = discarded.len();
        for task in discarded {
            tracing::trace!(target: "trellis_core::threadpool", id = task.id, "cancelling queued task");
            drop(task.job);
        }

        let current = thread::current().id();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.thread().id() == current {
                tracing::warn!(target: "trellis_core::threadpool", "shutdown called from a worker; not joining itself");
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!(target: "trellis_core::threadpool", "worker thread panicked outside a task");
            }
        }

        let report = ShutdownReport {
            executed_before_return: self.shared.executed.load(Ordering::Acquire) - executed_at_start,
            cancelled,
        };
        tracing::debug!(target: "trellis_core::threadpool", ?report, "thread pool stopped");
        report
    }

    /// Whether the calling thread is one of this pool's workers.
    pub fn is_worker_thread(&self) -> bool {
        self.worker_ids.contains(&thread::current().id())
    }

    fn next_id(&self) -> u64 {
        self.shared.next_task_id.fetch_add(1, Ordering::Relaxed)
    }

    fn handle_pair<T>(&self) -> (TaskHandle<T>, Completion<T>) {
        let (sender, receiver) = bounded(1);
        let shared = Arc::new(TaskShared::new());
        let handle = TaskHandle {
            id: self.next_id(),
            receiver,
            shared: shared.clone(),
            taken: false,
        };
        let completion = Completion {
            sink: Some(Sink::Channel(sender)),
            shared,
        };
        (handle, completion)
    }

    /// Admit a task, building its job only once there is room for it.
    fn enqueue(&self, id: u64, block: bool, job: impl FnOnce() -> Job) -> Result<(), ThreadPoolError> {
        let mut queue = self.shared.queue.lock();
        loop {
            if queue.closed {
                return Err(ThreadPoolError::QueueClosed);
            }
            if self.shared.has_room(&queue) {
                break;
            }
            if !block {
                return Err(ThreadPoolError::QueueFull);
            }
            self.shared.space_available.wait(&mut queue);
        }
        queue.tasks.push_back(QueuedTask { id, job: job() });
        drop(queue);
        tracing::trace!(target: "trellis_core::threadpool", id, "task queued");
        self.shared.work_available.notify_one();
        Ok(())
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("num_threads", &self.num_threads())
            .field("pending_tasks", &self.pending_tasks())
            .field("active_tasks", &self.active_tasks())
            .finish()
    }
}

/// Box a task so that its outcome, or panic, reaches `completion`.
fn wrap<F, T>(task: F, mut completion: Completion<T>) -> Job
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Box::new(move || {
        let result = catch_unwind(AssertUnwindSafe(task))
            .map_err(|payload| TaskError::Failed(panic_message(payload.as_ref())));
        completion.resolve(result);
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "task panicked".to_string()
    }
}

fn worker_loop(index: usize, shared: Arc<PoolShared>) {
    tracing::trace!(target: "trellis_core::threadpool", index, "worker started");
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(task) = queue.tasks.pop_front() {
                    break Some(task);
                }
                if queue.closed {
                    break None;
                }
                shared.work_available.wait(&mut queue);
            }
        };
        let Some(task) = task else {
            break;
        };
        shared.space_available.notify_one();

        shared.set_state(index, WorkerState::Running);
        shared.active.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(target: "trellis_core::threadpool", index, id = task.id, "running task");
        // Panics are caught inside the job.
        (task.job)();
        shared.active.fetch_sub(1, Ordering::AcqRel);
        shared.executed.fetch_add(1, Ordering::AcqRel);

        let closed = shared.queue.lock().closed;
        shared.set_state(
            index,
            if closed {
                WorkerState::Stopping
            } else {
                WorkerState::Idle
            },
        );
    }
    shared.set_state(index, WorkerState::Stopped);
    tracing::trace!(target: "trellis_core::threadpool", index, "worker stopped");
}

static_assertions::assert_impl_all!(ThreadPool: Send, Sync);
static_assertions::assert_impl_all!(TaskHandle<i32>: Send, Sync, Unpin);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn test_submit_and_wait() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(2)).unwrap();
        let handle = pool.submit(|| 42).unwrap();
        assert_eq!(handle.wait(), Ok(42));
    }

    #[test]
    fn test_zero_threads_rejected() {
        let err = ThreadPool::new(ThreadPoolConfig::with_threads(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = ThreadPoolConfig::with_threads(1).with_queue_capacity(0);
        assert_eq!(
            ThreadPool::new(config).unwrap_err(),
            ThreadPoolError::InvalidQueueCapacity
        );
    }

    #[test]
    fn test_workers_are_named() {
        let config = ThreadPoolConfig::with_threads(1).with_thread_name("crunch");
        let pool = ThreadPool::new(config).unwrap();
        let name = pool
            .submit(|| thread::current().name().map(str::to_string))
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(name.as_deref(), Some("crunch-0"));
    }

    #[test]
    fn test_panic_is_captured() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(1)).unwrap();
        let bad = pool.submit(|| -> i32 { panic!("kaboom") }).unwrap();
        assert_eq!(bad.wait(), Err(TaskError::Failed("kaboom".to_string())));

        // The single worker survived.
        let good = pool.submit(|| 1).unwrap();
        assert_eq!(good.wait(), Ok(1));
        assert_eq!(pool.live_workers(), 1);
    }

    #[test]
    fn test_status_transitions() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(1)).unwrap();
        let gate = Arc::new(Barrier::new(2));
        let task_gate = gate.clone();
        let mut handle = pool
            .submit(move || {
                task_gate.wait();
                5
            })
            .unwrap();

        assert_eq!(handle.status(), TaskStatus::Pending);
        assert!(handle.try_take().is_none());
        gate.wait();

        assert_eq!(handle.wait_timeout(Duration::from_secs(5)), Some(Ok(5)));
        assert_eq!(handle.status(), TaskStatus::Completed);
        assert!(handle.is_finished());
        assert!(handle.try_take().is_none());
    }

    #[test]
    fn test_wait_timeout_expires() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(1)).unwrap();
        let gate = Arc::new(Barrier::new(2));
        let task_gate = gate.clone();
        let mut handle = pool.submit(move || task_gate.wait()).unwrap();

        assert!(handle.wait_timeout(Duration::from_millis(20)).is_none());
        gate.wait();
        assert!(handle.wait_timeout(Duration::from_secs(5)).is_some());
    }

    #[test]
    fn test_fifo_dequeue_on_single_worker() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(1)).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..20)
            .map(|i| {
                let order = order.clone();
                pool.submit(move || order.lock().push(i)).unwrap()
            })
            .collect();
        for handle in handles {
            handle.wait().unwrap();
        }
        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_discarding_shutdown_cancels_queued() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(1)).unwrap();
        let gate = Arc::new(Barrier::new(2));
        let task_gate = gate.clone();
        let blocker = pool.submit(move || task_gate.wait()).unwrap();
        let queued: Vec<_> = (0..5).map(|i| pool.submit(move || i).unwrap()).collect();

        // Let the blocker start before shutting down.
        while pool.active_tasks() == 0 {
            thread::yield_now();
        }
        let release = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            gate.wait();
        });
        let report = pool.shutdown(false);
        release.join().unwrap();

        assert_eq!(report.cancelled, 5);
        assert!(blocker.wait().is_ok());
        for handle in queued {
            assert_eq!(handle.status(), TaskStatus::Cancelled);
            assert_eq!(handle.wait(), Err(TaskError::Cancelled));
        }
        assert_eq!(pool.live_workers(), 0);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(2)).unwrap();
        pool.shutdown(true);
        assert!(pool.is_shutdown());
        let err = pool.submit(|| ()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::QueueClosed);
        // Idempotent.
        assert_eq!(pool.shutdown(true), ShutdownReport::default());
    }

    #[test]
    fn test_try_submit_reports_full() {
        let pool =
            ThreadPool::new(ThreadPoolConfig::with_threads(1).with_queue_capacity(1)).unwrap();
        let gate = Arc::new(Barrier::new(2));
        let task_gate = gate.clone();
        let _blocker = pool.submit(move || task_gate.wait()).unwrap();
        while pool.active_tasks() == 0 {
            thread::yield_now();
        }

        let _queued = pool.try_submit(|| ()).unwrap();
        assert_eq!(pool.try_submit(|| ()).unwrap_err(), ThreadPoolError::QueueFull);
        gate.wait();
    }

    #[test]
    fn test_callback_receives_result() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(2)).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        pool.submit_with_callback(|| 7, move |result| tx.send(result).unwrap())
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Ok(7));
    }

    #[test]
    fn test_refused_callback_never_runs() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(1)).unwrap();
        pool.shutdown(true);

        let calls = Arc::new(AtomicI32::new(0));
        let counter = calls.clone();
        let err = pool
            .submit_with_callback(
                || 1,
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap_err();

        assert_eq!(err, ThreadPoolError::QueueClosed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_discarded_callback_sees_cancelled() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(1)).unwrap();
        let gate = Arc::new(Barrier::new(2));
        let task_gate = gate.clone();
        let _blocker = pool.submit(move || task_gate.wait()).unwrap();
        while pool.active_tasks() == 0 {
            thread::yield_now();
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        pool.submit_with_callback(|| 3, move |result| tx.send(result).unwrap())
            .unwrap();

        let release = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            gate.wait();
        });
        assert_eq!(pool.shutdown(false).cancelled, 1);
        release.join().unwrap();

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![Err(TaskError::Cancelled)]);
    }

    #[test]
    fn test_finished_handle_always_has_outcome() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(4)).unwrap();
        for i in 0..200 {
            let mut handle = pool.submit(move || i).unwrap();
            while !handle.is_finished() {
                thread::yield_now();
            }
            assert_eq!(handle.try_take(), Some(Ok(i)));
        }
    }

    #[test]
    fn test_drop_drains() {
        let counter = Arc::new(AtomicI32::new(0));
        {
            let pool = ThreadPool::new(ThreadPoolConfig::with_threads(2)).unwrap();
            for _ in 0..10 {
                let counter = counter.clone();
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_handle_is_awaitable() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(2)).unwrap();
        let handle = pool
            .submit(|| {
                thread::sleep(Duration::from_millis(10));
                "done"
            })
            .unwrap();
        assert_eq!(handle.await, Ok("done"));
    }
}
