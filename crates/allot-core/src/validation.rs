//! Validation of Context Window Types.
//!
//! [`validate`] is the one place editing mistakes are caught. It collects
//! every violation instead of stopping at the first so an editor can show all
//! of them at once. Soft problems (shares summing past 100) are kept as
//! warnings on the [`ValidatedType`]; the allocator scales them away at
//! runtime.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Deref;

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::constants::{MAX_PCT, OUTPUT_RESERVE_MAX_PCT, OUTPUT_RESERVE_MIN_PCT, PRIORITY_MAX, PRIORITY_MIN};
use crate::ids::ModuleId;
use crate::modules::ModuleRegistry;
use crate::window_type::{Action, ContextWindowType};

/// Whether a violation blocks the type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The type is rejected.
    Error,
    /// The type is accepted; the allocator compensates.
    Warning,
}

/// What went wrong.
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    #[error("name must not be empty")]
    EmptyName,
    #[error("output reserve {value}% outside 5..=30")]
    ReserveOutOfRange { value: u8 },
    #[error("bounds must satisfy min <= target <= max (got {min}/{target}/{max})")]
    BoundsOrder { min: u8, target: u8, max: u8 },
    #[error("max {value}% exceeds 100")]
    MaxOutOfRange { value: u8 },
    #[error("priority {value} outside 1..=100")]
    PriorityOutOfRange { value: u8 },
    #[error("map key {key} does not match moduleId {module}")]
    KeyMismatch { key: ModuleId, module: ModuleId },
    #[error("module {module} is not in the registry")]
    UnknownModule { module: ModuleId },
    #[error("required module {module} is not configured")]
    RequiredMissing { module: ModuleId },
    #[error("required module {module} is inactive")]
    RequiredInactive { module: ModuleId },
    #[error("active targets plus reserve total {total}%")]
    TargetSumExceeds { total: u32 },
    #[error("active floors plus reserve total {total}%")]
    MinSumExceeds { total: u32 },
    #[error("module {module} appears more than once")]
    DuplicateInOrder { module: ModuleId },
    #[error("active module {module} is missing")]
    MissingFromOrder { module: ModuleId },
    #[error("module {module} is not an active module")]
    ExtraneousInOrder { module: ModuleId },
    #[error("module {module} is not configured in this type")]
    UnknownRuleTarget { module: ModuleId },
    #[error("transfer source and destination are both {module}")]
    TransferToSelf { module: ModuleId },
    #[error("reduction {by_pct}% exceeds 100")]
    ReduceOutOfRange { by_pct: u8 },
    #[error("module {module} cannot be condensed; the hint will be ignored")]
    NotCondensable { module: ModuleId },
}

/// One field-level finding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    /// Dotted path of the offending field (`modules.rag_cases.maxPct`).
    pub field: String,
    /// What went wrong.
    #[serde(flatten)]
    pub kind: ViolationKind,
    /// Error or warning.
    pub severity: Severity,
}

impl Violation {
    fn error(field: impl Into<String>, kind: ViolationKind) -> Self {
        Self {
            field: field.into(),
            kind,
            severity: Severity::Error,
        }
    }

    fn warning(field: impl Into<String>, kind: ViolationKind) -> Self {
        Self {
            field: field.into(),
            kind,
            severity: Severity::Warning,
        }
    }

    /// Whether this violation blocks the type.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.kind)
    }
}

/// A rejected type with every violation found.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[error("invalid context window type ({} violation(s)): {}", .violations.len(), join(.violations))]
pub struct ValidationErrors {
    /// All findings, errors and warnings alike.
    pub violations: Vec<Violation>,
}

impl ValidationErrors {
    /// Only the blocking findings.
    pub fn errors(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.is_error())
    }
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .filter(|v| v.is_error())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A type that passed validation, with any warnings it carries.
///
/// Only [`validate`] constructs one. It dereferences to the underlying
/// [`ContextWindowType`] and serializes exactly as that value does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedType {
    inner: ContextWindowType,
    warnings: Vec<Violation>,
    condensable: BTreeSet<ModuleId>,
}

impl ValidatedType {
    /// The validated value.
    pub fn as_type(&self) -> &ContextWindowType {
        &self.inner
    }

    /// Non-blocking findings.
    pub fn warnings(&self) -> &[Violation] {
        &self.warnings
    }

    /// Configured modules the registry allows to be condensed.
    pub fn condensable_modules(&self) -> &BTreeSet<ModuleId> {
        &self.condensable
    }

    /// Give back the value.
    pub fn into_inner(self) -> ContextWindowType {
        self.inner
    }

    /// Copy with a different default flag. The flag takes no part in
    /// validation, so the result is still valid.
    #[must_use]
    pub fn with_default(&self, is_default: bool) -> Self {
        let mut next = self.clone();
        next.inner.is_default = is_default;
        next
    }
}

impl Deref for ValidatedType {
    type Target = ContextWindowType;

    fn deref(&self) -> &ContextWindowType {
        &self.inner
    }
}

impl Serialize for ValidatedType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.serialize(serializer)
    }
}

/// Check a candidate type against the registry.
pub fn validate(
    candidate: ContextWindowType,
    registry: &dyn ModuleRegistry,
) -> Result<ValidatedType, ValidationErrors> {
    let mut violations = Vec::new();

    if candidate.name.trim().is_empty() {
        violations.push(Violation::error("name", ViolationKind::EmptyName));
    }

    let reserve = candidate.output_reserve_pct;
    if !(OUTPUT_RESERVE_MIN_PCT..=OUTPUT_RESERVE_MAX_PCT).contains(&reserve) {
        violations.push(Violation::error(
            "outputReservePct",
            ViolationKind::ReserveOutOfRange { value: reserve },
        ));
    }

    check_modules(&candidate, registry, &mut violations);
    check_sums(&candidate, &mut violations);
    check_order(&candidate, &mut violations);
    check_rules(&candidate, registry, &mut violations);

    if violations.iter().any(Violation::is_error) {
        tracing::debug!(
            type_id = %candidate.id,
            count = violations.len(),
            "context window type rejected"
        );
        return Err(ValidationErrors { violations });
    }

    let condensable = candidate
        .modules
        .keys()
        .filter(|m| registry.get(m).is_some_and(|d| d.capabilities.condensable))
        .cloned()
        .collect();

    Ok(ValidatedType {
        inner: candidate,
        warnings: violations,
        condensable,
    })
}

fn check_modules(t: &ContextWindowType, registry: &dyn ModuleRegistry, out: &mut Vec<Violation>) {
    for (key, config) in &t.modules {
        let field = format!("modules.{key}");

        if key != &config.module_id {
            out.push(Violation::error(
                format!("{field}.moduleId"),
                ViolationKind::KeyMismatch {
                    key: key.clone(),
                    module: config.module_id.clone(),
                },
            ));
        }
        if !registry.contains(key) {
            out.push(Violation::error(
                field.clone(),
                ViolationKind::UnknownModule { module: key.clone() },
            ));
        }
        if config.max_pct > MAX_PCT {
            out.push(Violation::error(
                format!("{field}.maxPct"),
                ViolationKind::MaxOutOfRange {
                    value: config.max_pct,
                },
            ));
        }
        if config.min_pct > config.target_pct || config.target_pct > config.max_pct {
            out.push(Violation::error(
                format!("{field}.targetPct"),
                ViolationKind::BoundsOrder {
                    min: config.min_pct,
                    target: config.target_pct,
                    max: config.max_pct,
                },
            ));
        }
        if !(PRIORITY_MIN..=PRIORITY_MAX).contains(&config.priority) {
            out.push(Violation::error(
                format!("{field}.priority"),
                ViolationKind::PriorityOutOfRange {
                    value: config.priority,
                },
            ));
        }
    }

    for descriptor in registry.list().into_iter().filter(|d| d.required) {
        let id = descriptor.module_id;
        match t.modules.get(&id) {
            None => out.push(Violation::error(
                format!("modules.{id}"),
                ViolationKind::RequiredMissing { module: id },
            )),
            Some(config) if !config.active => out.push(Violation::error(
                format!("modules.{id}.active"),
                ViolationKind::RequiredInactive { module: id },
            )),
            Some(_) => {}
        }
    }
}

fn check_sums(t: &ContextWindowType, out: &mut Vec<Violation>) {
    let reserve = u32::from(t.output_reserve_pct);
    let targets: u32 = t.active_modules().map(|m| u32::from(m.target_pct)).sum();
    let floors: u32 = t.active_modules().map(|m| u32::from(m.min_pct)).sum();

    if targets + reserve > 100 {
        out.push(Violation::warning(
            "modules",
            ViolationKind::TargetSumExceeds {
                total: targets + reserve,
            },
        ));
    }
    if floors + reserve > 100 {
        out.push(Violation::warning(
            "modules",
            ViolationKind::MinSumExceeds {
                total: floors + reserve,
            },
        ));
    }
}

fn check_order(t: &ContextWindowType, out: &mut Vec<Violation>) {
    let mut seen: BTreeMap<&ModuleId, usize> = BTreeMap::new();
    for (idx, id) in t.condensation_order.iter().enumerate() {
        let count = seen.entry(id).or_insert(0);
        *count += 1;
        if *count == 2 {
            out.push(Violation::error(
                format!("condensationOrder[{idx}]"),
                ViolationKind::DuplicateInOrder { module: id.clone() },
            ));
        }
        if *count == 1 && !t.is_active(id) {
            out.push(Violation::error(
                format!("condensationOrder[{idx}]"),
                ViolationKind::ExtraneousInOrder { module: id.clone() },
            ));
        }
    }

    for config in t.active_modules() {
        if !seen.contains_key(&config.module_id) {
            out.push(Violation::error(
                "condensationOrder",
                ViolationKind::MissingFromOrder {
                    module: config.module_id.clone(),
                },
            ));
        }
    }
}

fn check_rules(t: &ContextWindowType, registry: &dyn ModuleRegistry, out: &mut Vec<Violation>) {
    for (idx, rule) in t.dynamic_adjustments.iter().enumerate() {
        let field = format!("dynamicAdjustments[{idx}].action");

        let mut reported = BTreeSet::new();
        for module in rule.action.referenced_modules() {
            if !t.modules.contains_key(module) && reported.insert(module) {
                out.push(Violation::error(
                    field.clone(),
                    ViolationKind::UnknownRuleTarget {
                        module: module.clone(),
                    },
                ));
            }
        }

        match &rule.action {
            Action::Transfer { from, to } if from == to => out.push(Violation::error(
                field,
                ViolationKind::TransferToSelf { module: from.clone() },
            )),
            Action::Reduce { by_pct, .. } if *by_pct > 100 => out.push(Violation::error(
                format!("{field}.byPct"),
                ViolationKind::ReduceOutOfRange { by_pct: *by_pct },
            )),
            Action::Condense { module }
                if registry.get(module).is_some_and(|d| !d.capabilities.condensable) =>
            {
                out.push(Violation::warning(
                    format!("{field}.module"),
                    ViolationKind::NotCondensable { module: module.clone() },
                ));
            }
            _ => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
