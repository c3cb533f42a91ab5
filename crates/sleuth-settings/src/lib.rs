//! # sleuth-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SleuthSettings::default()`]
//! 2. **User file**: `~/.sleuth/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `SLEUTH_*` overrides
//!
//! ```no_run
//! let settings = sleuth_settings::load_settings().unwrap_or_default();
//! println!("model: {}", settings.model.model);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
