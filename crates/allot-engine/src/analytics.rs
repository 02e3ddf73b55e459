//! Session-level rollups of per-turn results.
//!
//! [`SessionAggregate::fold`] is pure: it returns a new aggregate and leaves
//! the input untouched, so callers can keep earlier snapshots around.

use std::collections::BTreeMap;

use allot_core::turn::utilization_pct;
use allot_core::{Condition, ModuleId, SessionId, TurnBudgetResult};
use serde::{Deserialize, Serialize};

/// Running totals for one module.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleStats {
    /// Turns this module had a budget row in.
    pub samples: u64,
    /// Sum of per-turn utilization percentages.
    pub utilization_sum: f64,
    /// Turns the condenser ran on this module.
    pub condensations: u64,
    /// Sum of allocated tokens.
    pub allocated_tokens: u64,
    /// Sum of used tokens.
    pub used_tokens: u64,
}

impl ModuleStats {
    /// Mean utilization over all samples, 0 when there are none.
    #[allow(clippy::cast_precision_loss)]
    pub fn average_utilization_pct(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.utilization_sum / self.samples as f64
        }
    }
}

/// Append-only rollup of a session's turns.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionAggregate {
    /// Session the turns belong to, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Turns folded in.
    pub turns: u64,
    /// Turns that needed hard truncation.
    pub truncated_turns: u64,
    /// Turns with no budget at all.
    pub exhausted_turns: u64,
    /// Sum of used tokens across turns.
    pub used_tokens: u64,
    /// Sum of available tokens across turns.
    pub available_tokens: u64,
    /// Per-module totals.
    pub modules: BTreeMap<ModuleId, ModuleStats>,
    /// How often each condition fired.
    pub rule_frequency: BTreeMap<Condition, u64>,
}

impl SessionAggregate {
    /// Empty aggregate tagged with a session.
    pub fn for_session(session_id: SessionId) -> Self {
        Self {
            session_id: Some(session_id),
            ..Self::default()
        }
    }

    /// Aggregate with one more turn folded in.
    #[must_use]
    pub fn fold(&self, turn: &TurnBudgetResult) -> Self {
        let mut next = self.clone();
        next.turns += 1;
        next.truncated_turns += u64::from(turn.truncated);
        next.exhausted_turns += u64::from(turn.exhausted);
        next.used_tokens = next.used_tokens.saturating_add(turn.used_tokens);
        next.available_tokens = next.available_tokens.saturating_add(turn.available_tokens);

        for row in &turn.allocations {
            let stats = next.modules.entry(row.module_id.clone()).or_default();
            stats.samples += 1;
            stats.utilization_sum += row.utilization_pct;
            stats.condensations += u64::from(row.condensed);
            stats.allocated_tokens = stats.allocated_tokens.saturating_add(row.allocated_tokens);
            stats.used_tokens = stats.used_tokens.saturating_add(row.used_tokens);
        }

        for condition in &turn.rules_fired {
            *next.rule_frequency.entry(*condition).or_default() += 1;
        }

        next
    }

    /// Fold a sequence of turns from empty.
    pub fn from_turns<'a>(turns: impl IntoIterator<Item = &'a TurnBudgetResult>) -> Self {
        turns
            .into_iter()
            .fold(Self::default(), |agg, turn| agg.fold(turn))
    }

    /// Session-wide `used / available` as a percentage.
    pub fn utilization_pct(&self) -> f64 {
        utilization_pct(self.used_tokens, self.available_tokens)
    }

    /// Presentation-ready summary.
    pub fn report(&self) -> SessionReport {
        let mut modules: Vec<ModuleReportRow> = self
            .modules
            .iter()
            .map(|(module_id, stats)| ModuleReportRow {
                module_id: module_id.clone(),
                samples: stats.samples,
                average_utilization_pct: stats.average_utilization_pct(),
                condensations: stats.condensations,
            })
            .collect();
        modules.sort_by(|a, b| {
            b.average_utilization_pct
                .total_cmp(&a.average_utilization_pct)
                .then_with(|| a.module_id.cmp(&b.module_id))
        });

        let mut conditions: Vec<ConditionCount> = self
            .rule_frequency
            .iter()
            .map(|(condition, count)| ConditionCount {
                condition: *condition,
                count: *count,
            })
            .collect();
        conditions.sort_by(|a, b| b.count.cmp(&a.count).then(a.condition.cmp(&b.condition)));

        SessionReport {
            session_id: self.session_id.clone(),
            turns: self.turns,
            truncated_turns: self.truncated_turns,
            exhausted_turns: self.exhausted_turns,
            utilization_pct: self.utilization_pct(),
            modules,
            conditions,
        }
    }
}

/// One module's line in a [`SessionReport`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleReportRow {
    /// Module.
    pub module_id: ModuleId,
    /// Turns sampled.
    pub samples: u64,
    /// Mean utilization.
    pub average_utilization_pct: f64,
    /// Times condensed.
    pub condensations: u64,
}

/// Firing count for one condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionCount {
    /// Condition.
    pub condition: Condition,
    /// Turns it fired in.
    pub count: u64,
}

/// Sorted view of a [`SessionAggregate`].
///
/// Modules are ordered by average utilization (highest first, ties by id) and
/// conditions by frequency (highest first).
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    /// Session the report covers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Turns folded in.
    pub turns: u64,
    /// Turns that needed hard truncation.
    pub truncated_turns: u64,
    /// Turns with no budget.
    pub exhausted_turns: u64,
    /// Session-wide utilization.
    pub utilization_pct: f64,
    /// Per-module rows.
    pub modules: Vec<ModuleReportRow>,
    /// Condition frequencies.
    pub conditions: Vec<ConditionCount>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
