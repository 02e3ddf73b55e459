//! Dynamic adjustment rules.
//!
//! [`RuleEvaluator::evaluate`] walks a type's rules in order and folds every
//! rule whose condition holds into an [`OverrideSet`]. Allocation overrides
//! are keyed by the module they primarily affect and a later rule replaces an
//! earlier one on the same module. Condense hints accumulate.

use std::collections::{BTreeMap, BTreeSet};

use allot_core::{Action, Condition, ContextWindowType, ModuleId, TurnContext};
use allot_settings::EngineSettings;
use serde::Serialize;
use tracing::debug;

/// Thresholds for the numeric conditions.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConditionThresholds {
    /// `long_conversation` fires at this many turns.
    pub long_conversation_turns: u32,
    /// `high_confidence_rag` fires at this retrieval score.
    pub high_confidence_rag: f64,
}

impl Default for ConditionThresholds {
    fn default() -> Self {
        Self {
            long_conversation_turns: 10,
            high_confidence_rag: 0.8,
        }
    }
}

impl From<&EngineSettings> for ConditionThresholds {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            long_conversation_turns: settings.long_conversation_turns,
            high_confidence_rag: settings.high_confidence_rag,
        }
    }
}

/// Allocation change for one module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Override {
    /// Take `max_pct`, unclamped and unscaled.
    ForceFull,
    /// Hand unused budget to another module.
    Transfer {
        /// Receiving module.
        to: ModuleId,
    },
    /// Shrink the target.
    Reduce {
        /// Percentage removed from the target.
        #[serde(rename = "byPct")]
        by_pct: u8,
    },
}

/// Result of rule evaluation for one turn.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideSet {
    /// Allocation overrides keyed by affected module.
    pub overrides: BTreeMap<ModuleId, Override>,
    /// Modules to condense even if they fit.
    pub condense_hints: BTreeSet<ModuleId>,
    /// Distinct conditions that fired, in first-fired order.
    pub rules_fired: Vec<Condition>,
}

impl OverrideSet {
    /// Override for a module.
    pub fn get(&self, module: &ModuleId) -> Option<&Override> {
        self.overrides.get(module)
    }

    /// Whether nothing fired.
    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty() && self.condense_hints.is_empty() && self.rules_fired.is_empty()
    }

    fn merge(&mut self, action: &Action) {
        match action {
            Action::ForceFull { module } => {
                let _ = self.overrides.insert(module.clone(), Override::ForceFull);
            }
            Action::Transfer { from, to } => {
                let _ = self
                    .overrides
                    .insert(from.clone(), Override::Transfer { to: to.clone() });
            }
            Action::Reduce { module, by_pct } => {
                let _ = self
                    .overrides
                    .insert(module.clone(), Override::Reduce { by_pct: *by_pct });
            }
            Action::Condense { module } => {
                let _ = self.condense_hints.insert(module.clone());
            }
        }
    }
}

/// Evaluates a type's rules against a turn.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuleEvaluator {
    thresholds: ConditionThresholds,
}

impl RuleEvaluator {
    /// Evaluator with the given thresholds.
    pub fn new(thresholds: ConditionThresholds) -> Self {
        Self { thresholds }
    }

    /// Thresholds in use.
    pub fn thresholds(&self) -> ConditionThresholds {
        self.thresholds
    }

    /// Whether a condition holds for this turn.
    pub fn holds(&self, condition: Condition, ctx: &TurnContext) -> bool {
        match condition {
            Condition::FirstTurn => ctx.is_first_turn,
            Condition::NoDocumentsAttached => !ctx.has_attached_documents,
            Condition::LongConversation => {
                ctx.turn_count >= self.thresholds.long_conversation_turns
            }
            Condition::HighConfidenceRag => ctx
                .rag_confidence
                .is_some_and(|c| c >= self.thresholds.high_confidence_rag),
        }
    }

    /// Fold every firing rule into an override set.
    pub fn evaluate(&self, window_type: &ContextWindowType, ctx: &TurnContext) -> OverrideSet {
        let mut set = OverrideSet::default();

        for rule in &window_type.dynamic_adjustments {
            if !self.holds(rule.condition, ctx) {
                continue;
            }
            if !set.rules_fired.contains(&rule.condition) {
                set.rules_fired.push(rule.condition);
            }
            set.merge(&rule.action);
            debug!(
                condition = %rule.condition,
                action = rule.action.kind(),
                module = %rule.action.primary_module(),
                "rule fired"
            );
        }

        set
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
