//! Context Window Type: the per-deployment budget preset.
//!
//! A type describes how the non-reserved part of the window is split among
//! modules, which modules are condensed first under pressure, and which
//! runtime conditions adjust the split for a single turn. Values of this type
//! are plain data; [`crate::validation::validate`] decides whether one is
//! usable.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{ModuleId, WindowTypeId};

/// Budget bounds for one module inside a type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleBudgetConfig {
    /// Module this config applies to. Must equal its map key.
    pub module_id: ModuleId,
    /// Inactive modules receive no budget and are not condensed.
    pub active: bool,
    /// Preferred share of the available window.
    pub target_pct: u8,
    /// Floor share.
    pub min_pct: u8,
    /// Ceiling share.
    pub max_pct: u8,
    /// Surplus is handed out in descending priority.
    pub priority: u8,
}

impl ModuleBudgetConfig {
    /// Replace the target share.
    #[must_use]
    pub fn with_target(mut self, target_pct: u8) -> Self {
        self.target_pct = target_pct;
        self
    }

    /// Replace the floor and ceiling.
    #[must_use]
    pub fn with_bounds(mut self, min_pct: u8, max_pct: u8) -> Self {
        self.min_pct = min_pct;
        self.max_pct = max_pct;
        self
    }

    /// Replace the active flag.
    #[must_use]
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Runtime predicate a rule is gated on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// The session's first turn.
    FirstTurn,
    /// The user has not attached any documents.
    NoDocumentsAttached,
    /// The session has run for many turns.
    LongConversation,
    /// Retrieval returned a high-confidence match.
    HighConfidenceRag,
}

impl Condition {
    /// Wire name of the condition.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstTurn => "first_turn",
            Self::NoDocumentsAttached => "no_documents_attached",
            Self::LongConversation => "long_conversation",
            Self::HighConfidenceRag => "high_confidence_rag",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a rule does once its condition holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Give the module its full `max_pct`, skipping clamp and scaling.
    ForceFull {
        /// Target module.
        module: ModuleId,
    },
    /// Hand the unused part of `from`'s allocation to `to`.
    Transfer {
        /// Module giving up budget.
        from: ModuleId,
        /// Module receiving it.
        to: ModuleId,
    },
    /// Shrink the module's target by a percentage.
    Reduce {
        /// Target module.
        module: ModuleId,
        /// Percentage to remove from the target (0–100).
        #[serde(rename = "byPct")]
        by_pct: u8,
    },
    /// Condense the module even if it fits.
    Condense {
        /// Target module.
        module: ModuleId,
    },
}

impl Action {
    /// Module whose override slot this action occupies.
    pub fn primary_module(&self) -> &ModuleId {
        match self {
            Self::ForceFull { module } | Self::Reduce { module, .. } | Self::Condense { module } => {
                module
            }
            Self::Transfer { from, .. } => from,
        }
    }

    /// Every module the action names.
    pub fn referenced_modules(&self) -> Vec<&ModuleId> {
        match self {
            Self::ForceFull { module } | Self::Reduce { module, .. } | Self::Condense { module } => {
                vec![module]
            }
            Self::Transfer { from, to } => vec![from, to],
        }
    }

    /// Short wire name of the action kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ForceFull { .. } => "force_full",
            Self::Transfer { .. } => "transfer",
            Self::Reduce { .. } => "reduce",
            Self::Condense { .. } => "condense",
        }
    }
}

/// A condition → action pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// When the rule fires.
    pub condition: Condition,
    /// What it does.
    pub action: Action,
}

impl Rule {
    /// Build a rule.
    pub fn new(condition: Condition, action: Action) -> Self {
        Self { condition, action }
    }
}

/// A named budget preset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextWindowType {
    /// Unique id.
    pub id: WindowTypeId,
    /// Display name. Must not be empty.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Share of the window held back for the response (5–30).
    pub output_reserve_pct: u8,
    /// Budget config per module.
    pub modules: BTreeMap<ModuleId, ModuleBudgetConfig>,
    /// Condense-first order. A permutation of the active module ids.
    pub condensation_order: Vec<ModuleId>,
    /// Rules evaluated in order each turn.
    #[serde(default)]
    pub dynamic_adjustments: Vec<Rule>,
    /// Whether this is the deployment default.
    #[serde(default)]
    pub is_default: bool,
}

impl ContextWindowType {
    /// Start an empty type with the given id and name.
    pub fn new(id: impl Into<WindowTypeId>, name: impl Into<String>, output_reserve_pct: u8) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            output_reserve_pct,
            modules: BTreeMap::new(),
            condensation_order: Vec::new(),
            dynamic_adjustments: Vec::new(),
            is_default: false,
        }
    }

    /// Add or replace a module config, keyed by its id.
    pub fn insert_module(&mut self, config: ModuleBudgetConfig) {
        let _ = self.modules.insert(config.module_id.clone(), config);
    }

    /// Config for one module.
    pub fn module(&self, id: &ModuleId) -> Option<&ModuleBudgetConfig> {
        self.modules.get(id)
    }

    /// Whether the module is configured and active.
    pub fn is_active(&self, id: &ModuleId) -> bool {
        self.modules.get(id).is_some_and(|m| m.active)
    }

    /// Active module configs in id order.
    pub fn active_modules(&self) -> impl Iterator<Item = &ModuleBudgetConfig> {
        self.modules.values().filter(|m| m.active)
    }

    /// Share of the window left after the output reserve.
    pub fn module_share_ceiling(&self) -> u8 {
        100u8.saturating_sub(self.output_reserve_pct)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
