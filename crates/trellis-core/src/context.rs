//! Collaborators handed to the application: a log sink and a settings store.
//!
//! There are no process-wide singletons. A [`Context`] value is passed to
//! [`Application::with_context`](crate::Application::with_context) and handed
//! to every handler through [`DispatchContext::context`](crate::DispatchContext::context).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Very detailed tracing.
    Trace,
    /// Debugging detail.
    Debug,
    /// Normal operation.
    Info,
    /// Something unexpected but recoverable.
    Warn,
    /// A failure.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        })
    }
}

/// Where application code sends log lines.
pub trait LogSink: Send + Sync {
    /// Record one message.
    fn log(&self, level: LogLevel, message: &str);
}

/// Forwards to `tracing` under the `trellis::app` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => tracing::trace!(target: "trellis::app", "{message}"),
            LogLevel::Debug => tracing::debug!(target: "trellis::app", "{message}"),
            LogLevel::Info => tracing::info!(target: "trellis::app", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "trellis::app", "{message}"),
            LogLevel::Error => tracing::error!(target: "trellis::app", "{message}"),
        }
    }
}

/// Keeps every line in memory. Useful in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(LogLevel, String)>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything logged so far.
    pub fn lines(&self) -> Vec<(LogLevel, String)> {
        self.lines.lock().clone()
    }

    /// Whether any line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|(_, line)| line.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn log(&self, level: LogLevel, message: &str) {
        self.lines.lock().push((level, message.to_string()));
    }
}

/// Read access to configuration values.
///
/// Keys are paths such as `threadpool.workers`; `/` is accepted as a
/// separator too.
pub trait SettingsStore: Send + Sync {
    /// Look up the raw string value for `key`.
    fn get(&self, key: &str) -> Option<String>;
}

pub(crate) fn normalize_key(key: &str) -> String {
    key.replace('/', ".")
}

/// In-memory settings.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySettings {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, replacing any previous one.
    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.values.write().insert(normalize_key(key), value.into());
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Remove a value.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.write().remove(&normalize_key(key))
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(&normalize_key(key)).cloned()
    }
}

/// Explicit bundle of collaborators.
#[derive(Clone)]
pub struct Context {
    logger: Arc<dyn LogSink>,
    settings: Arc<dyn SettingsStore>,
}

impl Context {
    /// Bundle a log sink and a settings store.
    pub fn new(logger: Arc<dyn LogSink>, settings: Arc<dyn SettingsStore>) -> Self {
        Self { logger, settings }
    }

    /// Replace the log sink.
    pub fn with_logger(mut self, logger: Arc<dyn LogSink>) -> Self {
        self.logger = logger;
        self
    }

    /// Replace the settings store.
    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    /// The log sink.
    pub fn logger(&self) -> &dyn LogSink {
        self.logger.as_ref()
    }

    /// The settings store.
    pub fn settings(&self) -> &dyn SettingsStore {
        self.settings.as_ref()
    }

    /// Shorthand for `self.logger().log(level, message)`.
    pub fn log(&self, level: LogLevel, message: &str) {
        self.logger.log(level, message);
    }

    /// Shorthand for `self.settings().get(key)`.
    pub fn setting(&self, key: &str) -> Option<String> {
        self.settings.get(key)
    }
}

impl Default for Context {
    /// Logs through `tracing`, with no settings.
    fn default() -> Self {
        Self::new(Arc::new(TracingSink), Arc::new(MemorySettings::new()))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(Context: Send, Sync);
