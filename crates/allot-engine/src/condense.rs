//! Condensation of over-budget modules.
//!
//! When requested usage exceeds the allocation, [`CondensationResolver`]
//! walks the type's condensation order and asks a [`Condenser`] to shrink
//! modules until usage fits. Only modules the registry marks condensable are
//! handed to the condenser. Anything still over afterwards is cut to its
//! allocation and the turn is flagged truncated.

use std::collections::{BTreeMap, BTreeSet};

use allot_core::{ContentHandle, ModuleId, RuntimeWarning};
use allot_settings::EngineSettings;
use serde::Serialize;
use tracing::{debug, warn};

/// Shrinks a module's content toward a token target.
///
/// Returns the token count actually produced. Implementations may overshoot;
/// the resolver clamps the answer.
pub trait Condenser: Send + Sync {
    /// Condense `module` (optionally identified by `content`) to about
    /// `target_tokens`.
    fn condense(&self, module: &ModuleId, content: Option<&ContentHandle>, target_tokens: u64) -> u64;
}

/// Reports every module condensed exactly to its target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TargetCondenser;

impl Condenser for TargetCondenser {
    fn condense(&self, _module: &ModuleId, _content: Option<&ContentHandle>, target_tokens: u64) -> u64 {
        target_tokens
    }
}

/// Final usage of one module.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleUsage {
    /// Tokens the module ends up using.
    pub used: u64,
    /// Whether the condenser ran on it.
    pub condensed: bool,
}

/// Output of [`CondensationResolver::resolve`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    /// Usage per allocated module.
    pub usage: BTreeMap<ModuleId, ModuleUsage>,
    /// Some module had to be hard-capped.
    pub truncated: bool,
    /// Hints that were ignored.
    pub warnings: Vec<RuntimeWarning>,
}

impl Resolution {
    /// Tokens used by a module, zero if unknown.
    pub fn used(&self, module: &ModuleId) -> u64 {
        self.usage.get(module).map_or(0, |u| u.used)
    }

    /// Sum of usage.
    pub fn used_total(&self) -> u64 {
        self.usage.values().map(|u| u.used).sum()
    }
}

/// Default share of the request a hinted module is condensed to.
pub const DEFAULT_HINT_TARGET_RATIO: f64 = 0.5;

/// Walks the condensation order.
#[derive(Clone, Copy, Debug)]
pub struct CondensationResolver {
    hint_target_ratio: f64,
}

impl Default for CondensationResolver {
    fn default() -> Self {
        Self::new(DEFAULT_HINT_TARGET_RATIO)
    }
}

impl From<&EngineSettings> for CondensationResolver {
    fn from(settings: &EngineSettings) -> Self {
        Self::new(settings.hint_target_ratio)
    }
}

impl CondensationResolver {
    /// Resolver condensing hinted modules to `hint_target_ratio` of their
    /// request. Ratios outside `(0, 1]` fall back to the default.
    pub fn new(hint_target_ratio: f64) -> Self {
        let hint_target_ratio = if hint_target_ratio > 0.0 && hint_target_ratio <= 1.0 {
            hint_target_ratio
        } else {
            DEFAULT_HINT_TARGET_RATIO
        };
        Self { hint_target_ratio }
    }

    /// Configured hint ratio.
    pub fn hint_target_ratio(&self) -> f64 {
        self.hint_target_ratio
    }

    /// Fit requested usage into the allocations.
    ///
    /// Only modules present in `allocations` get usage rows. Modules missing
    /// from `order` or from `condensable` are never condensed.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve(
        &self,
        allocations: &BTreeMap<ModuleId, u64>,
        requested: &BTreeMap<ModuleId, u64>,
        handles: &BTreeMap<ModuleId, ContentHandle>,
        order: &[ModuleId],
        condensable: &BTreeSet<ModuleId>,
        hints: &BTreeSet<ModuleId>,
        condenser: &dyn Condenser,
    ) -> Resolution {
        let request = |m: &ModuleId| requested.get(m).copied().unwrap_or(0);

        let mut usage: BTreeMap<ModuleId, ModuleUsage> = allocations
            .keys()
            .map(|m| {
                (
                    m.clone(),
                    ModuleUsage {
                        used: request(m),
                        condensed: false,
                    },
                )
            })
            .collect();

        let mut warnings = Vec::new();
        let mut live_hints = BTreeSet::new();
        for hint in hints {
            if !(order.contains(hint) && allocations.contains_key(hint)) {
                warn!(module = %hint, "condense hint names module outside condensation order, ignoring");
                warnings.push(RuntimeWarning::UnknownCondenseHint {
                    module: hint.clone(),
                });
            } else if condensable.contains(hint) {
                let _ = live_hints.insert(hint);
            } else {
                warn!(module = %hint, "condense hint names fixed module, ignoring");
                warnings.push(RuntimeWarning::NotCondensable {
                    module: hint.clone(),
                });
            }
        }

        let mut overflow: u64 = allocations
            .iter()
            .map(|(m, alloc)| request(m).saturating_sub(*alloc))
            .sum();

        if overflow == 0 && live_hints.is_empty() {
            return Resolution {
                usage,
                truncated: false,
                warnings,
            };
        }

        debug!(overflow, hints = live_hints.len(), "condensation needed");

        let mut seen = BTreeSet::new();
        for module in order {
            if !seen.insert(module) {
                continue;
            }
            let Some(&alloc) = allocations.get(module) else {
                continue;
            };
            if !condensable.contains(module) {
                continue;
            }
            let req = request(module);
            let hinted = live_hints.contains(module);
            let over = req > alloc;
            if req == 0 || !(hinted || (over && overflow > 0)) {
                continue;
            }

            let target = if hinted {
                alloc.min(self.hint_target(req))
            } else {
                alloc
            };
            let actual = condenser
                .condense(module, handles.get(module), target)
                .min(req);

            let relieved = req.saturating_sub(alloc) - actual.saturating_sub(alloc);
            overflow = overflow.saturating_sub(relieved);

            debug!(module = %module, requested = req, target, actual, overflow, "module condensed");
            let _ = usage.insert(
                module.clone(),
                ModuleUsage {
                    used: actual,
                    condensed: true,
                },
            );
        }

        let mut truncated = false;
        for (module, row) in &mut usage {
            let alloc = allocations.get(module).copied().unwrap_or(0);
            if row.used > alloc {
                warn!(module = %module, used = row.used, allocated = alloc, "usage still over budget, truncating");
                row.used = alloc;
                truncated = true;
            }
        }

        Resolution {
            usage,
            truncated,
            warnings,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn hint_target(&self, requested: u64) -> u64 {
        (requested as f64 * self.hint_target_ratio).ceil() as u64
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
