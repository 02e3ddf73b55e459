//! # allot-settings
//!
//! Layered configuration for the allot budget engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`AllotSettings::default()`]
//! 2. **User file**: `~/.allot/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `ALLOT_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton, filled on first access.
static SETTINGS: OnceLock<AllotSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// The first call loads `~/.allot/settings.json` with env overrides and falls
/// back to compiled defaults if that fails.
pub fn get_settings() -> &'static AllotSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            AllotSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the value back if the global was already set.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: AllotSettings) -> std::result::Result<(), AllotSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
