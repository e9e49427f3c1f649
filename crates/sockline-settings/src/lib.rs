//! # sockline-settings
//!
//! Client configuration with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ClientSettings::default()`]
//! 2. **User file**: `~/.sockline/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `SOCKLINE_*` overrides (highest priority)
//!
//! Every connection parameter, including extra handshake fields, is an
//! explicit settings value handed to the client at construction.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
