//! Prelude module for Trellis.
//!
//! This module re-exports the most commonly used types for convenient importing:
//!
//! ```
//! use trellis::prelude::*;
//! ```

// ============================================================================
// Core Application
// ============================================================================

pub use crate::{AppProxy, Application, ApplicationConfig, Context, LogLevel};

// ============================================================================
// Object System
// ============================================================================

pub use crate::{DispatchContext, FnObject, Object, ObjectId, ObjectTree, PlainObject};

// ============================================================================
// Events
// ============================================================================

pub use crate::{Event, EventKind, EventResult, HandlerResult};

// ============================================================================
// Background Work and Timers
// ============================================================================

pub use crate::{TaskHandle, ThreadPool, ThreadPoolConfig, TimerId, TimerState};

// ============================================================================
// Errors
// ============================================================================

pub use crate::{ErrorKind, TrellisError};
