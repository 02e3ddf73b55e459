//! # allot-telemetry
//!
//! Tracing subscriber setup for the `allot` binary, plus an in-memory capture
//! layer for asserting on log output in tests.
//!
//! Logs go to stderr so command output on stdout stays machine-readable.
//! `RUST_LOG` always wins over the configured levels.

#![deny(unsafe_code)]

pub mod test_utils;

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Configuration for the subscriber.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-target level overrides (e.g. `allot_engine` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::WARN,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from string levels as they appear in settings files.
    ///
    /// Unparseable levels fall back to the default (base) or are dropped
    /// (per-module); the dropped names are returned so the caller can log
    /// them once the subscriber is up.
    pub fn from_levels(
        level: &str,
        json: bool,
        module_levels: &BTreeMap<String, String>,
    ) -> (Self, Vec<String>) {
        let mut rejected = Vec::new();
        let log_level = parse_level(level).unwrap_or_else(|| {
            rejected.push(level.to_owned());
            Level::WARN
        });

        let mut modules = Vec::with_capacity(module_levels.len());
        for (module, raw) in module_levels {
            match parse_level(raw) {
                Some(l) => modules.push((module.clone(), l)),
                None => rejected.push(format!("{module}={raw}")),
            }
        }

        (
            Self {
                log_level,
                module_levels: modules,
                json,
            },
            rejected,
        )
    }

    /// The `EnvFilter` directive string this config describes.
    pub fn filter_directive(&self) -> String {
        let mut directive = self.log_level.as_str().to_lowercase();
        for (module, level) in &self.module_levels {
            let _ = write!(directive, ",{module}={}", level.as_str().to_lowercase());
        }
        directive
    }
}

/// Parse a level name (`warn`, `INFO`, ...).
pub fn parse_level(raw: &str) -> Option<Level> {
    Level::from_str(raw.trim()).ok()
}

/// Install the global subscriber. Call once at startup.
///
/// Returns `false` if a global subscriber was already set.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let registry = tracing_subscriber::registry().with(filter);

    if config.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_list(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .is_ok()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .is_ok()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_warn_compact() {
        let config = TelemetryConfig::default();
        assert_eq!(config.log_level, Level::WARN);
        assert!(!config.json);
        assert_eq!(config.filter_directive(), "warn");
    }

    #[test]
    fn directive_includes_module_levels() {
        let config = TelemetryConfig {
            log_level: Level::INFO,
            module_levels: vec![
                ("allot_engine".into(), Level::DEBUG),
                ("allot_core::store".into(), Level::TRACE),
            ],
            json: true,
        };
        assert_eq!(
            config.filter_directive(),
            "info,allot_engine=debug,allot_core::store=trace"
        );
    }

    #[test]
    fn from_levels_parses_and_reports_rejects() {
        let mut modules = BTreeMap::new();
        let _ = modules.insert("allot_engine".to_string(), "DEBUG".to_string());
        let _ = modules.insert("allot_core".to_string(), "loud".to_string());

        let (config, rejected) = TelemetryConfig::from_levels("info", false, &modules);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.module_levels, [("allot_engine".to_string(), Level::DEBUG)]);
        assert_eq!(rejected, ["allot_core=loud"]);
    }

    #[test]
    fn bad_base_level_falls_back_to_warn() {
        let (config, rejected) = TelemetryConfig::from_levels("chatty", false, &BTreeMap::new());
        assert_eq!(config.log_level, Level::WARN);
        assert_eq!(rejected, ["chatty"]);
    }

    #[test]
    fn parse_level_is_case_insensitive() {
        assert_eq!(parse_level("Trace"), Some(Level::TRACE));
        assert_eq!(parse_level(" error "), Some(Level::ERROR));
        assert_eq!(parse_level("nope"), None);
    }
}
