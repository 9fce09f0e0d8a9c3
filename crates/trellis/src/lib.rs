//! Trellis - an embeddable, event-driven application runtime.
//!
//! This is the main umbrella crate that re-exports the core runtime and adds
//! an INI-backed settings store.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trellis::prelude::*;
//! use trellis::settings::IniSettings;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = IniSettings::load_default()?;
//!     let context = Context::default().with_settings(Arc::new(settings));
//!     let mut app = Application::from_context(context)?;
//!     // Build the object tree and start timers here...
//!     app.quit_after_drain(0);
//!     let code = app.run()?;
//!     std::process::exit(code)
//! }
//! ```

pub use trellis_core::*;

pub mod prelude;
pub mod settings;

pub use settings::{DEFAULT_SETTINGS_FILE, IniSettings, SettingsError};
