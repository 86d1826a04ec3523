//! # vigil-settings
//!
//! Database settings for the vigil persistence layer, loaded from three
//! layers (in priority order):
//!
//! 1. **Compiled defaults**: [`DatabaseSettings::default()`]
//! 2. **Settings file**: `~/.vigil/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `VIGIL_DB_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use vigil_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("database host: {}", settings.database.host);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{DatabaseSettings, Settings, SslMode};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
