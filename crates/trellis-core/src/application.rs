//! The Application: tree root, event queue, pool, timers and dispatch loop.

use std::str::FromStr;
use std::sync::Arc;

use crate::context::{Context, SettingsStore};
use crate::dispatch::{Outcome, Services, dispatch};
use crate::error::{ConfigError, Result, TrellisError};
use crate::event::Event;
use crate::event_queue::{EventQueue, Next};
use crate::object::{Object, ObjectId, ObjectTree, PlainObject};
use crate::threadpool::{ThreadPool, ThreadPoolConfig};
use crate::timer::TimerService;

/// Cloneable, thread-safe handle onto an application's event queue.
///
/// Workers, the timing thread and foreign threads use this to feed the
/// dispatch loop; it never gives access to the object tree.
#[derive(Clone, Debug)]
pub struct AppProxy {
    queue: Arc<EventQueue>,
}

impl AppProxy {
    pub(crate) fn new(queue: Arc<EventQueue>) -> Self {
        Self { queue }
    }

    /// Post an event and return the sequence number it was given.
    ///
    /// Fails with [`TrellisError::EventQueueClosed`] once a quit was requested.
    pub fn post_event(&self, event: Event) -> Result<u64> {
        self.queue.push(event)
    }

    /// Ask the loop to stop once everything queued so far is dispatched.
    ///
    /// Returns `false` if a quit was already requested.
    pub fn quit_after_drain(&self, code: i32) -> bool {
        self.queue.quit_after_drain(code)
    }

    /// Ask the loop to stop after the current event, discarding the rest.
    ///
    /// Overrides a pending drain request.
    pub fn quit_now(&self, code: i32) -> bool {
        self.queue.quit_now(code)
    }

    /// Whether a quit was requested.
    pub fn is_quitting(&self) -> bool {
        self.queue.is_quitting()
    }

    /// Number of events waiting to be dispatched.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }
}

/// Lifecycle of an [`Application`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// Built but not yet running.
    Created,
    /// Inside [`Application::run`].
    Running,
    /// Shutting down its pool, timers and tree.
    Stopping,
    /// Finished; cannot run again.
    Stopped,
}

/// Settings an [`Application`] is built from.
#[derive(Debug, Clone)]
pub struct ApplicationConfig {
    /// Application name; also the root node's name.
    pub name: String,
    /// Thread pool configuration.
    pub pool: ThreadPoolConfig,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "trellis".to_string(),
            pool: ThreadPoolConfig::default(),
        }
    }
}

impl ApplicationConfig {
    /// Config with the given name and defaults otherwise.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Replace the pool configuration.
    pub fn with_pool(mut self, pool: ThreadPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Read the configuration from a settings store.
    ///
    /// Recognised keys: `application.name`, `threadpool.workers`,
    /// `threadpool.queue_capacity`, `threadpool.thread_name` and
    /// `threadpool.stack_size`. Missing keys keep their defaults.
    pub fn from_settings(settings: &dyn SettingsStore) -> std::result::Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(name) = settings.get("application.name") {
            config.name = name;
        }
        if let Some(workers) = parse_setting(settings, "threadpool.workers")? {
            config.pool.num_threads = Some(workers);
        }
        if let Some(capacity) = parse_setting(settings, "threadpool.queue_capacity")? {
            config.pool.queue_capacity = Some(capacity);
        }
        if let Some(thread_name) = settings.get("threadpool.thread_name") {
            config.pool.thread_name = thread_name;
        }
        if let Some(stack_size) = parse_setting(settings, "threadpool.stack_size")? {
            config.pool.stack_size = Some(stack_size);
        }
        Ok(config)
    }
}

fn parse_setting<T: FromStr>(
    settings: &dyn SettingsStore,
    key: &str,
) -> std::result::Result<Option<T>, ConfigError> {
    settings
        .get(key)
        .map(|raw| {
            raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            })
        })
        .transpose()
}

/// The root of an application: owns the tree, the event queue, the thread
/// pool and the timers, and runs the single dispatch loop.
///
/// # Example
///
/// ```
/// use trellis_core::{Application, ApplicationConfig, Event, EventResult, FnObject, ThreadPoolConfig};
///
/// let config = ApplicationConfig::named("demo").with_pool(ThreadPoolConfig::with_threads(2));
/// let mut app = Application::new(config)?.with_root(FnObject::new(|event, cx| {
///     if let trellis_core::EventKind::Custom { kind: 1, .. } = event.kind() {
///         cx.quit_after_drain(0);
///     }
///     Ok(EventResult::Handled)
/// }));
///
/// let proxy = app.proxy();
/// app.pool().submit(move || proxy.post_event(Event::custom(1)))?;
/// assert_eq!(app.run()?, 0);
/// # Ok::<(), trellis_core::TrellisError>(())
/// ```
pub struct Application {
    name: String,
    args: Vec<String>,
    state: AppState,
    queue: Arc<EventQueue>,
    services: Services,
    tree: ObjectTree,
}

impl Application {
    /// Create an application with the default [`Context`].
    pub fn new(config: ApplicationConfig) -> Result<Self> {
        Self::with_context(config, Context::default())
    }

    /// Create an application with explicit collaborators.
    pub fn with_context(config: ApplicationConfig, context: Context) -> Result<Self> {
        let queue = Arc::new(EventQueue::new());
        let proxy = AppProxy::new(queue.clone());
        let pool = ThreadPool::new(config.pool)?;
        let timers = TimerService::new(proxy.clone())?;

        let mut tree = ObjectTree::new(PlainObject);
        tree.set_name(tree.root(), config.name.clone())?;

        tracing::debug!(target: "trellis_core::event_loop", name = %config.name, workers = pool.num_threads(), "application created");

        Ok(Self {
            name: config.name,
            args: Vec::new(),
            state: AppState::Created,
            queue,
            services: Services {
                proxy,
                timers,
                pool,
                context,
            },
            tree,
        })
    }

    /// Create an application configured from the context's settings store.
    pub fn from_context(context: Context) -> Result<Self> {
        let config = ApplicationConfig::from_settings(context.settings())?;
        Self::with_context(config, context)
    }

    /// Install the handler of the root node.
    pub fn with_root<T: Object>(mut self, root: T) -> Self {
        let id = self.tree.root();
        if let Err(err) = self.tree.replace(id, root) {
            tracing::warn!(target: "trellis_core::event_loop", %err, "could not install root handler");
        }
        self
    }

    /// Record command-line arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// The application name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command-line arguments recorded with [`with_args`](Self::with_args).
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AppState {
        self.state
    }

    /// The root node.
    pub fn root(&self) -> ObjectId {
        self.tree.root()
    }

    /// The object tree.
    pub fn tree(&self) -> &ObjectTree {
        &self.tree
    }

    /// Mutable access to the object tree (outside of dispatch).
    pub fn tree_mut(&mut self) -> &mut ObjectTree {
        &mut self.tree
    }

    /// A cloneable handle for posting from other threads.
    pub fn proxy(&self) -> AppProxy {
        self.services.proxy.clone()
    }

    /// The timers.
    pub fn timers(&self) -> &TimerService {
        &self.services.timers
    }

    /// The thread pool.
    pub fn pool(&self) -> &ThreadPool {
        &self.services.pool
    }

    /// The collaborators.
    pub fn context(&self) -> &Context {
        &self.services.context
    }

    /// Post an event; see [`AppProxy::post_event`].
    pub fn post_event(&self, event: Event) -> Result<u64> {
        self.services.proxy.post_event(event)
    }

    /// See [`AppProxy::quit_after_drain`].
    pub fn quit_after_drain(&self, code: i32) -> bool {
        self.services.proxy.quit_after_drain(code)
    }

    /// See [`AppProxy::quit_now`].
    pub fn quit_now(&self, code: i32) -> bool {
        self.services.proxy.quit_now(code)
    }

    /// Run the dispatch loop on the calling thread until a quit request is
    /// honoured, then shut down and return the exit code.
    ///
    /// A handler error stops the loop, shuts down and is returned as
    /// [`TrellisError::Dispatch`].
    #[tracing::instrument(skip(self), target = "trellis_core::event_loop", level = "debug")]
    pub fn run(&mut self) -> Result<i32> {
        self.begin()?;
        tracing::info!(target: "trellis_core::event_loop", name = %self.name, "starting event loop");

        loop {
            match self.queue.wait_next() {
                Next::Dispatch(queued) => self.dispatch_one(queued)?,
                Next::Quit(code) => {
                    tracing::info!(target: "trellis_core::event_loop", code, "event loop finished");
                    self.shutdown();
                    return Ok(code);
                }
                Next::Closed => {
                    self.shutdown();
                    return Ok(0);
                }
            }
        }
    }

    /// Dispatch whatever is queued right now without blocking.
    ///
    /// Returns `Some(code)` if a quit request was honoured (the application is
    /// then stopped), `None` if the queue ran dry first.
    pub fn process_pending_events(&mut self) -> Result<Option<i32>> {
        if matches!(self.state, AppState::Stopping | AppState::Stopped) {
            return Err(TrellisError::ApplicationStopped);
        }
        while let Some(next) = self.queue.try_next() {
            match next {
                Next::Dispatch(queued) => self.dispatch_one(queued)?,
                Next::Quit(code) => {
                    self.shutdown();
                    return Ok(Some(code));
                }
                Next::Closed => {
                    self.shutdown();
                    return Ok(Some(0));
                }
            }
        }
        Ok(None)
    }

    fn begin(&mut self) -> Result<()> {
        match self.state {
            AppState::Created => {
                self.state = AppState::Running;
                Ok(())
            }
            AppState::Running => Err(TrellisError::AlreadyRunning),
            AppState::Stopping | AppState::Stopped => Err(TrellisError::ApplicationStopped),
        }
    }

    fn dispatch_one(&mut self, queued: crate::event_queue::QueuedEvent) -> Result<()> {
        match dispatch(&mut self.tree, &self.services, queued) {
            Ok(Outcome::Handled(_) | Outcome::Unhandled | Outcome::StaleTimer) => Ok(()),
            Err(err) => {
                tracing::error!(target: "trellis_core::event_loop", %err, "handler failed, stopping");
                self.shutdown();
                Err(err.into())
            }
        }
    }

    /// Stop everything: drain the pool, cancel timers, close the queue and
    /// release the tree. Idempotent; also run on drop.
    pub fn shutdown(&mut self) {
        if self.state == AppState::Stopped {
            return;
        }
        self.state = AppState::Stopping;

        let report = self.services.pool.shutdown(true);
        self.services.timers.shutdown();
        let dropped = self.queue.close();
        self.tree.clear();

        self.state = AppState::Stopped;
        tracing::debug!(target: "trellis_core::event_loop", executed = report.executed_before_return, dropped, "application stopped");
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("tree", &self.tree)
            .field("pool", &self.services.pool)
            .finish()
    }
}

static_assertions::assert_impl_all!(AppProxy: Send, Sync, Clone);
static_assertions::assert_impl_all!(Application: Send);
