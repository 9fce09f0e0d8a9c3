//! Core systems for Trellis.
//!
//! This crate provides the runtime of an event-driven application:
//!
//! - **Object Tree**: Parent-child ownership with bubbling event handlers
//! - **Application**: The FIFO event queue and its single dispatch loop
//! - **Thread Pool**: FIFO background workers with result handles
//! - **Timers**: One-shot and repeating timers that post timeout events
//! - **Context**: Explicit log sink and settings store collaborators
//!
//! All object handlers run on the thread that calls [`Application::run`].
//! Other threads talk to the application only by posting events through an
//! [`AppProxy`].
//!
//! # Object Tree Example
//!
//! ```
//! use trellis_core::{ObjectTree, PlainObject};
//!
//! let mut tree = ObjectTree::default();
//! let panel = tree.insert_child(tree.root(), PlainObject)?;
//! let button = tree.insert_child(panel, PlainObject)?;
//!
//! assert_eq!(tree.ancestors(button)?, vec![panel, tree.root()]);
//!
//! // Destroying a node destroys its subtree.
//! tree.destroy(panel)?;
//! assert!(!tree.contains(button));
//! # Ok::<(), trellis_core::ObjectError>(())
//! ```
//!
//! # Event Loop Example
//!
//! ```
//! use std::time::Duration;
//! use trellis_core::{Application, ApplicationConfig, EventKind, EventResult, FnObject};
//!
//! let mut app = Application::new(ApplicationConfig::named("ticker"))?
//!     .with_root(FnObject::new(|event, cx| match event.kind() {
//!         EventKind::Timeout { tick, .. } if *tick >= 3 => {
//!             cx.quit_after_drain(0);
//!             Ok(EventResult::Handled)
//!         }
//!         _ => Ok(EventResult::Unhandled),
//!     }));
//!
//! app.timers().repeating(Duration::from_millis(5), None)?;
//! assert_eq!(app.run()?, 0);
//! # Ok::<(), trellis_core::TrellisError>(())
//! ```

mod application;
mod context;
mod dispatch;
mod error;
mod event;
mod event_queue;
pub mod logging;
mod object;
pub mod threadpool;
mod timer;

pub use application::{AppProxy, AppState, Application, ApplicationConfig};
pub use context::{Context, LogLevel, LogSink, MemorySettings, MemorySink, SettingsStore, TracingSink};
pub use dispatch::DispatchContext;
pub use error::{
    ConfigError, DispatchError, ErrorKind, HandlerError, ObjectError, Result, ThreadPoolError,
    TimerError, TrellisError,
};
pub use event::{Event, EventKind, EventResult, HandlerResult};
pub use event_queue::{EventQueue, QueuedEvent, QuitMode};
pub use logging::{ObjectTreeDebug, PerfSpan, TreeFormatOptions, TreeStyle};
pub use object::{FnObject, Object, ObjectId, ObjectResult, ObjectTree, PlainObject};
pub use threadpool::{
    ShutdownReport, TaskError, TaskHandle, TaskStatus, ThreadPool, ThreadPoolConfig, WorkerState,
};
pub use timer::{TimerId, TimerManager, TimerResult, TimerService, TimerState};
