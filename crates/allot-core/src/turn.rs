//! Per-turn inputs and outputs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{ContentHandle, ModuleId, WindowTypeId};
use crate::window_type::Condition;

/// Snapshot of everything a turn's budget depends on.
///
/// Producers fill `requested_tokens` with the size of the content each module
/// wants to include; the engine never looks at the content itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TurnContext {
    /// First turn of the session.
    pub is_first_turn: bool,
    /// The user attached at least one document.
    pub has_attached_documents: bool,
    /// Turns completed so far, including this one.
    pub turn_count: u32,
    /// Best retrieval match score (0.0–1.0), if retrieval ran.
    pub rag_confidence: Option<f64>,
    /// Content size each module would like to send.
    pub requested_tokens: BTreeMap<ModuleId, u64>,
    /// Content reference each module hands to the condenser.
    pub content_handles: BTreeMap<ModuleId, ContentHandle>,
    /// The model's total context size.
    pub window_capacity_tokens: u64,
}

impl TurnContext {
    /// Empty context for a window of the given size.
    pub fn new(window_capacity_tokens: u64) -> Self {
        Self {
            window_capacity_tokens,
            ..Self::default()
        }
    }

    /// Mark as the session's first turn.
    #[must_use]
    pub fn first_turn(mut self) -> Self {
        self.is_first_turn = true;
        self.turn_count = self.turn_count.max(1);
        self
    }

    /// Set the turn counter.
    #[must_use]
    pub fn with_turn_count(mut self, turn_count: u32) -> Self {
        self.turn_count = turn_count;
        self
    }

    /// Set the documents flag.
    #[must_use]
    pub fn with_documents(mut self, attached: bool) -> Self {
        self.has_attached_documents = attached;
        self
    }

    /// Set the retrieval confidence.
    #[must_use]
    pub fn with_rag_confidence(mut self, confidence: f64) -> Self {
        self.rag_confidence = Some(confidence);
        self
    }

    /// Record a module's requested size.
    #[must_use]
    pub fn with_request(mut self, module: impl Into<ModuleId>, tokens: u64) -> Self {
        let _ = self.requested_tokens.insert(module.into(), tokens);
        self
    }

    /// Requested size for a module, zero when it asked for nothing.
    pub fn requested(&self, module: &ModuleId) -> u64 {
        self.requested_tokens.get(module).copied().unwrap_or(0)
    }
}

/// Final budget for one active module.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleAllocation {
    /// Module this row describes.
    pub module_id: ModuleId,
    /// Tokens the module may send.
    pub allocated_tokens: u64,
    /// Tokens it will send after condensation.
    pub used_tokens: u64,
    /// `used / allocated` as a percentage; zero when nothing was allocated.
    pub utilization_pct: f64,
    /// Whether the condenser ran on this module.
    pub condensed: bool,
}

impl ModuleAllocation {
    /// Build a row, deriving utilization.
    pub fn new(module_id: ModuleId, allocated_tokens: u64, used_tokens: u64, condensed: bool) -> Self {
        Self {
            module_id,
            allocated_tokens,
            used_tokens,
            utilization_pct: utilization_pct(used_tokens, allocated_tokens),
            condensed,
        }
    }
}

/// `used / total` as a percentage, zero for an empty total.
#[allow(clippy::cast_precision_loss)]
pub fn utilization_pct(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

/// Something the engine ignored or compensated for during a turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeWarning {
    /// A rule override named a module that is not active in the type.
    UnknownOverrideTarget {
        /// The ignored module.
        module: ModuleId,
    },
    /// A condense hint named a module outside the condensation order.
    UnknownCondenseHint {
        /// The ignored module.
        module: ModuleId,
    },
    /// A condense hint named a module the registry marks as fixed.
    NotCondensable {
        /// The ignored module.
        module: ModuleId,
    },
    /// A producer requested tokens for a module that is not active.
    InactiveRequest {
        /// The ignored module.
        module: ModuleId,
        /// Tokens it asked for.
        tokens: u64,
    },
    /// Floors and forced shares did not fit the window; they were scaled.
    FloorsExceedBudget {
        /// Share the fixed parts wanted.
        required_pct: f64,
        /// Share that was available to modules.
        ceiling_pct: f64,
    },
}

impl fmt::Display for RuntimeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownOverrideTarget { module } => {
                write!(f, "override for inactive module {module} ignored")
            }
            Self::UnknownCondenseHint { module } => {
                write!(f, "condense hint for {module} ignored: not in condensation order")
            }
            Self::NotCondensable { module } => {
                write!(f, "condense hint for {module} ignored: module cannot be condensed")
            }
            Self::InactiveRequest { module, tokens } => {
                write!(f, "request of {tokens} tokens for inactive module {module} ignored")
            }
            Self::FloorsExceedBudget {
                required_pct,
                ceiling_pct,
            } => write!(
                f,
                "floors need {required_pct:.1}% but only {ceiling_pct:.1}% is available; scaled"
            ),
        }
    }
}

/// Everything the engine decided for one turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnBudgetResult {
    /// Type the turn was planned with.
    pub type_id: WindowTypeId,
    /// Total context size.
    pub capacity_tokens: u64,
    /// Window left for modules after the reserve.
    pub available_tokens: u64,
    /// Tokens held back for the response.
    pub reserve_tokens: u64,
    /// Tokens all modules will send.
    pub used_tokens: u64,
    /// `used / available` as a percentage.
    pub utilization_pct: f64,
    /// One row per active module, in id order.
    pub allocations: Vec<ModuleAllocation>,
    /// Conditions that fired, in first-fired order.
    pub rules_fired: Vec<Condition>,
    /// Some module was cut off after condensation ran out of options.
    pub truncated: bool,
    /// No budget was available at all.
    pub exhausted: bool,
    /// Ignored references and compensations.
    pub warnings: Vec<RuntimeWarning>,
}

impl TurnBudgetResult {
    /// Row for a module.
    pub fn allocation(&self, module: &ModuleId) -> Option<&ModuleAllocation> {
        self.allocations.iter().find(|a| &a.module_id == module)
    }

    /// Sum of allocated tokens across modules.
    pub fn allocated_tokens(&self) -> u64 {
        self.allocations.iter().map(|a| a.allocated_tokens).sum()
    }

    /// Modules the condenser ran on.
    pub fn condensed_modules(&self) -> impl Iterator<Item = &ModuleId> {
        self.allocations
            .iter()
            .filter(|a| a.condensed)
            .map(|a| &a.module_id)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
