//! Settings types.
//!
//! Every struct deserializes with `#[serde(default)]`, so a settings file only
//! needs the keys it changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AllotSettings {
    /// Budget engine tuning.
    pub engine: EngineSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Where Context Window Types come from.
    pub types: TypeCatalogSettings,
}

impl AllotSettings {
    /// Reject values the engine cannot work with.
    pub fn check(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.default_capacity_tokens == 0 {
            return Err(SettingsError::InvalidValue(
                "engine.defaultCapacityTokens must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&engine.high_confidence_rag) {
            return Err(SettingsError::InvalidValue(format!(
                "engine.highConfidenceRag must be in [0, 1], got {}",
                engine.high_confidence_rag
            )));
        }
        if !(engine.hint_target_ratio > 0.0 && engine.hint_target_ratio <= 1.0) {
            return Err(SettingsError::InvalidValue(format!(
                "engine.hintTargetRatio must be in (0, 1], got {}",
                engine.hint_target_ratio
            )));
        }
        Ok(())
    }
}

/// Budget engine tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Window size used when a turn does not state one.
    pub default_capacity_tokens: u64,
    /// Turn count at which `long_conversation` fires.
    pub long_conversation_turns: u32,
    /// Retrieval confidence at which `high_confidence_rag` fires.
    pub high_confidence_rag: f64,
    /// Share of its request a hinted module is condensed down to.
    pub hint_target_ratio: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_capacity_tokens: 200_000,
            long_conversation_turns: 10,
            high_confidence_rag: 0.8,
            hint_target_ratio: 0.5,
        }
    }
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Base level filter (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
    /// Per-target level overrides, e.g. `{"allot_engine": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}

/// Where Context Window Types come from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypeCatalogSettings {
    /// Directory of `*.json` type files loaded alongside the presets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    /// Type used when a command does not name one.
    pub default_type: String,
}

impl Default for TypeCatalogSettings {
    fn default() -> Self {
        Self {
            directory: None,
            default_type: "balanced".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults() {
        let e = EngineSettings::default();
        assert_eq!(e.default_capacity_tokens, 200_000);
        assert_eq!(e.long_conversation_turns, 10);
        assert!((e.high_confidence_rag - 0.8).abs() < f64::EPSILON);
        assert!((e.hint_target_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn defaults_pass_check() {
        assert!(AllotSettings::default().check().is_ok());
    }

    #[test]
    fn check_rejects_out_of_range() {
        let mut s = AllotSettings::default();
        s.engine.hint_target_ratio = 0.0;
        assert!(s.check().is_err());

        let mut s = AllotSettings::default();
        s.engine.high_confidence_rag = 1.5;
        assert!(s.check().is_err());

        let mut s = AllotSettings::default();
        s.engine.default_capacity_tokens = 0;
        assert!(s.check().is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(AllotSettings::default()).unwrap();
        assert_eq!(json["engine"]["defaultCapacityTokens"], 200_000);
        assert_eq!(json["logging"]["level"], "warn");
        assert_eq!(json["types"]["defaultType"], "balanced");
        assert!(json["types"].get("directory").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: AllotSettings =
            serde_json::from_str(r#"{"logging": {"json": true}}"#).unwrap();
        assert!(s.logging.json);
        assert_eq!(s.logging.level, "warn");
        assert_eq!(s.engine, EngineSettings::default());
    }
}
