//! Budget allocation.
//!
//! Turns a type plus its per-turn overrides into token budgets for every
//! active module. All percentages are shares of the *available* window, i.e.
//! what is left after the output reserve.
//!
//! ## Algorithm
//!
//! 1. `available = capacity * (100 - reserve) / 100`, rounded down.
//! 2. Effective share per active module: `Reduce` then clamp to
//!    `[min, max]`; `ForceFull` takes `max` unclamped.
//! 3. If shares exceed `100 - reserve`, scale non-forced modules down
//!    proportionally, pinning any that would drop below their floor
//!    (water-filling). If floors plus forced shares still don't fit, scale
//!    floors, then forced shares, and record a warning.
//! 4. Transfers: each source keeps what it asked for, the rest goes to the
//!    destination up to its ceiling, and anything left over is handed out by
//!    descending priority to modules below their ceiling.
//! 5. Largest-remainder rounding to whole tokens.

use std::collections::{BTreeMap, BTreeSet};

use allot_core::{ContextWindowType, ModuleBudgetConfig, ModuleId, RuntimeWarning};
use serde::Serialize;
use tracing::{debug, warn};

use crate::rules::{Override, OverrideSet};

/// Slack for comparing percentage sums.
const EPSILON: f64 = 1e-9;

/// Slack for flooring exact token shares that land a hair under an integer.
const ROUNDING_SLACK: f64 = 1e-6;

/// Final budget for one module.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleShare {
    /// Module this share belongs to.
    pub module_id: ModuleId,
    /// Share of the available window after scaling and transfers.
    pub effective_pct: f64,
    /// Whole tokens granted.
    pub allocated_tokens: u64,
    /// Whether a `ForceFull` override applied.
    pub forced: bool,
}

/// Output of [`BudgetAllocator::allocate`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    /// Total window.
    pub capacity_tokens: u64,
    /// Window left for modules.
    pub available_tokens: u64,
    /// Window held back for the response.
    pub reserve_tokens: u64,
    /// One entry per active module, in id order.
    pub shares: Vec<ModuleShare>,
    /// Nothing was available to allocate.
    pub exhausted: bool,
    /// Ignored overrides and scaling fallbacks.
    pub warnings: Vec<RuntimeWarning>,
}

impl Allocation {
    /// Tokens granted to a module, zero if it has no share.
    pub fn tokens(&self, module: &ModuleId) -> u64 {
        self.shares
            .iter()
            .find(|s| &s.module_id == module)
            .map_or(0, |s| s.allocated_tokens)
    }

    /// Tokens per module.
    pub fn token_map(&self) -> BTreeMap<ModuleId, u64> {
        self.shares
            .iter()
            .map(|s| (s.module_id.clone(), s.allocated_tokens))
            .collect()
    }

    /// Sum of granted tokens.
    pub fn allocated_total(&self) -> u64 {
        self.shares.iter().map(|s| s.allocated_tokens).sum()
    }
}

/// Working state for one active module.
#[derive(Debug)]
struct Slot<'a> {
    config: &'a ModuleBudgetConfig,
    pct: f64,
    forced: bool,
}

impl Slot<'_> {
    fn floor(&self) -> f64 {
        f64::from(self.config.min_pct)
    }

    fn ceiling(&self) -> f64 {
        f64::from(self.config.max_pct)
    }

    fn headroom(&self) -> f64 {
        (self.ceiling() - self.pct).max(0.0)
    }
}

/// Splits the window among active modules.
#[derive(Clone, Copy, Debug, Default)]
pub struct BudgetAllocator;

impl BudgetAllocator {
    /// Create an allocator.
    pub fn new() -> Self {
        Self
    }

    /// Allocate the window for one turn.
    ///
    /// `requested` is only consulted for transfer sources. Never fails: bad
    /// references become warnings and an empty window yields zeros.
    pub fn allocate(
        &self,
        window_type: &ContextWindowType,
        overrides: &OverrideSet,
        requested: &BTreeMap<ModuleId, u64>,
        capacity_tokens: u64,
    ) -> Allocation {
        let (available, reserve_tokens) =
            split_window(capacity_tokens, window_type.output_reserve_pct);
        let mut warnings = Vec::new();

        let live = live_overrides(window_type, overrides, &mut warnings);
        let mut slots = effective_shares(window_type, &live);
        fit_to_ceiling(
            &mut slots,
            f64::from(window_type.module_share_ceiling()),
            &mut warnings,
        );

        let exhausted = available == 0;
        let tokens = if exhausted {
            warn!(
                capacity = capacity_tokens,
                reserve_pct = window_type.output_reserve_pct,
                "no budget available, allocating zero to every module"
            );
            vec![0; slots.len()]
        } else {
            apply_transfers(&mut slots, &live, requested, available);
            to_tokens(&slots, available)
        };

        let shares: Vec<ModuleShare> = slots
            .iter()
            .zip(tokens)
            .map(|(slot, allocated_tokens)| ModuleShare {
                module_id: slot.config.module_id.clone(),
                effective_pct: slot.pct,
                allocated_tokens,
                forced: slot.forced,
            })
            .collect();

        debug!(
            type_id = %window_type.id,
            capacity = capacity_tokens,
            available,
            allocated = shares.iter().map(|s| s.allocated_tokens).sum::<u64>(),
            modules = shares.len(),
            "allocation computed"
        );

        Allocation {
            capacity_tokens,
            available_tokens: available,
            reserve_tokens,
            shares,
            exhausted,
            warnings,
        }
    }
}

/// `(available, reserve)` with `available + reserve == capacity`.
pub fn split_window(capacity_tokens: u64, reserve_pct: u8) -> (u64, u64) {
    let module_pct = u128::from(100 - reserve_pct.min(100));
    let available = u64::try_from(u128::from(capacity_tokens) * module_pct / 100)
        .unwrap_or(capacity_tokens);
    (available, capacity_tokens - available)
}

/// Overrides that point at active modules; the rest become warnings.
fn live_overrides<'a>(
    window_type: &ContextWindowType,
    overrides: &'a OverrideSet,
    warnings: &mut Vec<RuntimeWarning>,
) -> BTreeMap<&'a ModuleId, &'a Override> {
    let mut live = BTreeMap::new();
    for (module, ov) in &overrides.overrides {
        let target = match ov {
            Override::Transfer { to } if !window_type.is_active(to) => Some(to),
            _ if !window_type.is_active(module) => Some(module),
            _ => None,
        };
        if let Some(missing) = target {
            warn!(module = %missing, "override names inactive module, ignoring");
            warnings.push(RuntimeWarning::UnknownOverrideTarget {
                module: missing.clone(),
            });
            continue;
        }
        let _ = live.insert(module, ov);
    }
    live
}

fn effective_shares<'a>(
    window_type: &'a ContextWindowType,
    live: &BTreeMap<&ModuleId, &Override>,
) -> Vec<Slot<'a>> {
    window_type
        .active_modules()
        .map(|config| {
            let floor = f64::from(config.min_pct);
            let ceiling = f64::from(config.max_pct);
            let target = f64::from(config.target_pct);
            match live.get(&config.module_id) {
                Some(Override::ForceFull) => Slot {
                    config,
                    pct: ceiling,
                    forced: true,
                },
                Some(Override::Reduce { by_pct }) => {
                    let keep = f64::from(100 - (*by_pct).min(100)) / 100.0;
                    Slot {
                        config,
                        pct: (target * keep).max(floor).min(ceiling),
                        forced: false,
                    }
                }
                Some(Override::Transfer { .. }) | None => Slot {
                    config,
                    pct: target.max(floor).min(ceiling),
                    forced: false,
                },
            }
        })
        .collect()
}

fn fit_to_ceiling(slots: &mut [Slot<'_>], ceiling: f64, warnings: &mut Vec<RuntimeWarning>) {
    let fixed: f64 = slots.iter().filter(|s| s.forced).map(|s| s.pct).sum();
    let flex: f64 = slots.iter().filter(|s| !s.forced).map(|s| s.pct).sum();
    if fixed + flex <= ceiling + EPSILON {
        return;
    }

    let room = ceiling - fixed;
    let floors: f64 = slots.iter().filter(|s| !s.forced).map(Slot::floor).sum();
    if floors <= room + EPSILON {
        debug!(total = fixed + flex, ceiling, "scaling shares to fit");
        water_fill(slots, room.max(0.0));
        return;
    }

    warn!(
        required = fixed + floors,
        ceiling, "module floors exceed available share, scaling floors"
    );
    warnings.push(RuntimeWarning::FloorsExceedBudget {
        required_pct: fixed + floors,
        ceiling_pct: ceiling,
    });

    if room >= 0.0 {
        let factor = room / floors;
        for slot in slots.iter_mut().filter(|s| !s.forced) {
            slot.pct = slot.floor() * factor;
        }
    } else {
        let factor = ceiling / fixed;
        for slot in slots.iter_mut() {
            slot.pct = if slot.forced { slot.pct * factor } else { 0.0 };
        }
    }
}

/// Scale non-forced shares so they sum to `room`, never below a floor.
fn water_fill(slots: &mut [Slot<'_>], room: f64) {
    let mut pinned: Vec<bool> = slots.iter().map(|s| s.forced).collect();

    let factor = loop {
        let pinned_floors: f64 = slots
            .iter()
            .zip(&pinned)
            .filter(|(s, p)| **p && !s.forced)
            .map(|(s, _)| s.floor())
            .sum();
        let free: f64 = slots
            .iter()
            .zip(&pinned)
            .filter(|(_, p)| !**p)
            .map(|(s, _)| s.pct)
            .sum();
        if free <= EPSILON {
            break 0.0;
        }

        let factor = ((room - pinned_floors) / free).clamp(0.0, 1.0);
        let mut newly_pinned = false;
        for (slot, p) in slots.iter().zip(pinned.iter_mut()) {
            if !*p && slot.pct * factor < slot.floor() {
                *p = true;
                newly_pinned = true;
            }
        }
        if !newly_pinned {
            break factor;
        }
    };

    for (slot, p) in slots.iter_mut().zip(&pinned) {
        if slot.forced {
            continue;
        }
        slot.pct = if *p { slot.floor() } else { slot.pct * factor };
    }
}

#[allow(clippy::cast_precision_loss)]
fn apply_transfers(
    slots: &mut [Slot<'_>],
    live: &BTreeMap<&ModuleId, &Override>,
    requested: &BTreeMap<ModuleId, u64>,
    available: u64,
) {
    let index: BTreeMap<ModuleId, usize> = slots
        .iter()
        .enumerate()
        .map(|(i, s)| (s.config.module_id.clone(), i))
        .collect();

    let mut pool = 0.0;
    let mut sources = BTreeSet::new();

    for (from, ov) in live {
        let Override::Transfer { to } = ov else {
            continue;
        };
        let (Some(&src), Some(&dst)) = (index.get(*from), index.get(to)) else {
            continue;
        };

        let wanted =
            requested.get(*from).copied().unwrap_or(0) as f64 / available as f64 * 100.0;
        let kept = slots[src].pct.min(wanted);
        let surplus = slots[src].pct - kept;
        slots[src].pct = kept;
        let _ = sources.insert(src);

        let moved = surplus.min(slots[dst].headroom());
        slots[dst].pct += moved;
        pool += surplus - moved;

        debug!(from = %from, to = %to, moved, spilled = surplus - moved, "transfer applied");
    }

    if pool <= EPSILON {
        return;
    }

    let mut order: Vec<usize> = (0..slots.len()).filter(|i| !sources.contains(i)).collect();
    order.sort_by(|&a, &b| {
        slots[b]
            .config
            .priority
            .cmp(&slots[a].config.priority)
            .then_with(|| slots[a].config.module_id.cmp(&slots[b].config.module_id))
    });

    for i in order {
        if pool <= EPSILON {
            break;
        }
        let give = pool.min(slots[i].headroom());
        slots[i].pct += give;
        pool -= give;
    }

    if pool > EPSILON {
        debug!(idle_pct = pool, "transfer surplus left idle");
    }
}

/// Largest-remainder rounding of shares to whole tokens.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn to_tokens(slots: &[Slot<'_>], available: u64) -> Vec<u64> {
    let avail = available as f64;
    let exact: Vec<f64> = slots
        .iter()
        .map(|s| s.pct.max(0.0) * avail / 100.0)
        .collect();
    let mut tokens: Vec<u64> = exact
        .iter()
        .map(|e| (e + ROUNDING_SLACK).floor() as u64)
        .collect();

    let target = ((exact.iter().sum::<f64>() + ROUNDING_SLACK).floor() as u64).min(available);
    let assigned: u64 = tokens.iter().sum();

    let mut by_remainder: Vec<usize> = (0..slots.len()).collect();
    by_remainder.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });

    if assigned < target {
        let extra = usize::try_from(target - assigned).unwrap_or(usize::MAX);
        for &i in by_remainder.iter().take(extra) {
            tokens[i] += 1;
        }
    } else if assigned > target {
        let mut excess = assigned - target;
        for &i in by_remainder.iter().rev() {
            if excess == 0 {
                break;
            }
            if tokens[i] > 0 {
                tokens[i] -= 1;
                excess -= 1;
            }
        }
    }

    tokens
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use allot_core::constants::{CONVERSATION_HISTORY, KNOWLEDGE_CONTEXT, SYSTEM_PROMPT, TOOL_DEFINITIONS};

    fn id(s: &str) -> ModuleId {
        ModuleId::from(s)
    }

    fn cfg(name: &str, target: u8, min: u8, max: u8, priority: u8) -> ModuleBudgetConfig {
        ModuleBudgetConfig {
            module_id: id(name),
            active: true,
            target_pct: target,
            min_pct: min,
            max_pct: max,
            priority,
        }
    }

    fn three_module_type() -> ContextWindowType {
        let mut t = ContextWindowType::new("t", "T", 12);
        t.insert_module(cfg(SYSTEM_PROMPT, 10, 5, 15, 100));
        t.insert_module(cfg(CONVERSATION_HISTORY, 22, 10, 60, 90));
        t.insert_module(cfg(TOOL_DEFINITIONS, 22, 0, 40, 70));
        t
    }

    fn overrides(pairs: &[(&str, Override)]) -> OverrideSet {
        let mut set = OverrideSet::default();
        for (m, o) in pairs {
            let _ = set.overrides.insert(id(m), o.clone());
        }
        set
    }

    fn allocate(t: &ContextWindowType, set: &OverrideSet, capacity: u64) -> Allocation {
        BudgetAllocator::new().allocate(t, set, &BTreeMap::new(), capacity)
    }

    // ── window split ──

    #[test]
    fn split_window_conserves_capacity() {
        assert_eq!(split_window(10_000, 12), (8_800, 1_200));
        assert_eq!(split_window(999, 10), (899, 100));
        assert_eq!(split_window(0, 12), (0, 0));
        assert_eq!(split_window(u64::MAX, 5).0 + split_window(u64::MAX, 5).1, u64::MAX);
    }

    // ── baseline ──

    #[test]
    fn targets_under_100_leave_remainder_idle() {
        let a = allocate(&three_module_type(), &OverrideSet::default(), 10_000);
        assert_eq!(a.available_tokens, 8_800);
        assert_eq!(a.reserve_tokens, 1_200);
        assert_eq!(a.tokens(&id(SYSTEM_PROMPT)), 880);
        assert_eq!(a.tokens(&id(CONVERSATION_HISTORY)), 1_936);
        assert_eq!(a.tokens(&id(TOOL_DEFINITIONS)), 1_936);
        assert_eq!(a.allocated_total(), 4_752);
        assert!(!a.exhausted);
        assert!(a.warnings.is_empty());
    }

    #[test]
    fn inactive_modules_get_no_share() {
        let mut t = three_module_type();
        t.insert_module(cfg(KNOWLEDGE_CONTEXT, 20, 0, 40, 50).with_active(false));
        let a = allocate(&t, &OverrideSet::default(), 10_000);
        assert_eq!(a.shares.len(), 3);
        assert_eq!(a.tokens(&id(KNOWLEDGE_CONTEXT)), 0);
    }

    // ── overrides ──

    #[test]
    fn force_full_takes_max() {
        let set = overrides(&[(TOOL_DEFINITIONS, Override::ForceFull)]);
        let a = allocate(&three_module_type(), &set, 10_000);
        assert_eq!(a.tokens(&id(TOOL_DEFINITIONS)), 3_520);
        assert!(a.shares.iter().any(|s| s.forced));
    }

    #[test]
    fn reduce_then_clamp_to_floor() {
        let set = overrides(&[
            (TOOL_DEFINITIONS, Override::Reduce { by_pct: 50 }),
            (SYSTEM_PROMPT, Override::Reduce { by_pct: 90 }),
        ]);
        let a = allocate(&three_module_type(), &set, 10_000);
        assert_eq!(a.tokens(&id(TOOL_DEFINITIONS)), 968);
        // 10% * 0.1 = 1% is below the 5% floor
        assert_eq!(a.tokens(&id(SYSTEM_PROMPT)), 440);
    }

    #[test]
    fn override_on_inactive_module_warns() {
        let set = overrides(&[
            (KNOWLEDGE_CONTEXT, Override::ForceFull),
            (TOOL_DEFINITIONS, Override::Transfer { to: id("rag_cases") }),
        ]);
        let a = allocate(&three_module_type(), &set, 10_000);
        assert_eq!(
            a.warnings,
            [
                RuntimeWarning::UnknownOverrideTarget {
                    module: id(KNOWLEDGE_CONTEXT)
                },
                RuntimeWarning::UnknownOverrideTarget {
                    module: id("rag_cases")
                },
            ]
        );
        assert_eq!(a.tokens(&id(TOOL_DEFINITIONS)), 1_936);
    }

    // ── scaling ──

    #[test]
    fn over_100_scales_proportionally() {
        let mut t = ContextWindowType::new("t", "T", 20);
        t.insert_module(cfg("a", 60, 0, 100, 50));
        t.insert_module(cfg("b", 40, 0, 100, 50));
        let a = allocate(&t, &OverrideSet::default(), 1_000);
        // 100% of shares squeezed into 80%: 48% / 32% of 800
        assert_eq!(a.tokens(&id("a")), 384);
        assert_eq!(a.tokens(&id("b")), 256);
        assert!(a.warnings.is_empty());
    }

    #[test]
    fn scaling_respects_floors() {
        let mut t = ContextWindowType::new("t", "T", 20);
        t.insert_module(cfg("a", 60, 0, 100, 50));
        t.insert_module(cfg("b", 40, 35, 100, 50));
        let a = allocate(&t, &OverrideSet::default(), 1_000);
        // b pinned at 35%, a absorbs the rest: 45%
        assert_eq!(a.tokens(&id("b")), 280);
        assert_eq!(a.tokens(&id("a")), 360);
    }

    #[test]
    fn forced_modules_are_not_scaled() {
        let mut t = ContextWindowType::new("t", "T", 10);
        t.insert_module(cfg("a", 30, 0, 60, 50));
        t.insert_module(cfg("b", 40, 0, 60, 50));
        let set = overrides(&[("a", Override::ForceFull)]);
        let a = allocate(&t, &set, 1_000);
        assert_eq!(a.tokens(&id("a")), 540);
        assert_eq!(a.tokens(&id("b")), 270);
    }

    #[test]
    fn floors_that_cannot_fit_are_scaled_with_warning() {
        let mut t = ContextWindowType::new("t", "T", 30);
        t.insert_module(cfg("a", 60, 60, 60, 50));
        t.insert_module(cfg("b", 30, 30, 30, 50));
        let a = allocate(&t, &OverrideSet::default(), 1_000);
        // floors 90% into 70%
        assert_eq!(a.tokens(&id("a")) + a.tokens(&id("b")), 700);
        assert_eq!(a.tokens(&id("a")), 467);
        assert!(matches!(
            a.warnings[0],
            RuntimeWarning::FloorsExceedBudget { .. }
        ));
    }

    #[test]
    fn forced_shares_over_ceiling_are_scaled_last() {
        let mut t = ContextWindowType::new("t", "T", 10);
        t.insert_module(cfg("a", 10, 0, 60, 50));
        t.insert_module(cfg("b", 10, 0, 60, 50));
        t.insert_module(cfg("c", 10, 5, 20, 50));
        let set = overrides(&[("a", Override::ForceFull), ("b", Override::ForceFull)]);
        let a = allocate(&t, &set, 1_000);
        // 120% forced into 90%
        assert_eq!(a.tokens(&id("a")), 405);
        assert_eq!(a.tokens(&id("b")), 405);
        assert_eq!(a.tokens(&id("c")), 0);
        assert_eq!(a.warnings.len(), 1);
    }

    // ── transfers ──

    #[test]
    fn transfer_moves_unused_budget() {
        let mut t = three_module_type();
        t.insert_module(cfg(KNOWLEDGE_CONTEXT, 10, 0, 20, 60));
        let set = overrides(&[(TOOL_DEFINITIONS, Override::Transfer { to: id(KNOWLEDGE_CONTEXT) })]);
        let mut requested = BTreeMap::new();
        let _ = requested.insert(id(TOOL_DEFINITIONS), 880);

        let a = BudgetAllocator::new().allocate(&t, &set, &requested, 10_000);
        // tools keeps 10%, knowledge takes +10% up to its 20% ceiling,
        // remaining 2% goes to the highest-priority module below its ceiling
        assert_eq!(a.tokens(&id(TOOL_DEFINITIONS)), 880);
        assert_eq!(a.tokens(&id(KNOWLEDGE_CONTEXT)), 1_760);
        assert_eq!(a.tokens(&id(SYSTEM_PROMPT)), 1_056);
        assert_eq!(a.tokens(&id(CONVERSATION_HISTORY)), 1_936);
    }

    #[test]
    fn transfer_source_keeps_what_it_needs() {
        let mut t = three_module_type();
        t.insert_module(cfg(KNOWLEDGE_CONTEXT, 10, 0, 40, 60));
        let set = overrides(&[(TOOL_DEFINITIONS, Override::Transfer { to: id(KNOWLEDGE_CONTEXT) })]);
        let mut requested = BTreeMap::new();
        let _ = requested.insert(id(TOOL_DEFINITIONS), 5_000);

        let a = BudgetAllocator::new().allocate(&t, &set, &requested, 10_000);
        assert_eq!(a.tokens(&id(TOOL_DEFINITIONS)), 1_936);
        assert_eq!(a.tokens(&id(KNOWLEDGE_CONTEXT)), 880);
    }

    #[test]
    fn spill_goes_idle_when_everyone_is_full() {
        let mut t = ContextWindowType::new("t", "T", 10);
        t.insert_module(cfg("a", 40, 0, 40, 50));
        t.insert_module(cfg("b", 20, 0, 20, 50));
        let set = overrides(&[("a", Override::Transfer { to: id("b") })]);
        let a = BudgetAllocator::new().allocate(&t, &set, &BTreeMap::new(), 1_000);
        assert_eq!(a.tokens(&id("a")), 0);
        assert_eq!(a.tokens(&id("b")), 180);
    }

    // ── degenerate ──

    #[test]
    fn zero_capacity_is_exhausted() {
        let a = allocate(&three_module_type(), &OverrideSet::default(), 0);
        assert!(a.exhausted);
        assert_eq!(a.allocated_total(), 0);
        assert_eq!(a.shares.len(), 3);
    }

    #[test]
    fn tiny_window_rounds_within_available() {
        let a = allocate(&three_module_type(), &OverrideSet::default(), 7);
        assert_eq!(a.available_tokens, 6);
        assert!(a.allocated_total() <= 6);
    }

    #[test]
    fn largest_remainder_distributes_leftover() {
        let mut t = ContextWindowType::new("t", "T", 10);
        t.insert_module(cfg("a", 30, 0, 100, 50));
        t.insert_module(cfg("b", 30, 0, 100, 50));
        t.insert_module(cfg("c", 30, 0, 100, 50));
        // available 10, 3.0 each; sum exact = 9
        let a = allocate(&t, &OverrideSet::default(), 11);
        assert_eq!(a.available_tokens, 9);
        assert_eq!(a.allocated_total(), 8);
        let a = allocate(&t, &OverrideSet::default(), 12);
        assert_eq!(a.available_tokens, 10);
        assert_eq!(a.allocated_total(), 9);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_config(name: &'static str) -> impl Strategy<Value = ModuleBudgetConfig> {
            (0u8..=40, 0u8..=40, 0u8..=40, 1u8..=100).prop_map(move |(min, up, extra, priority)| {
                cfg(name, min + up, min, (min + up + extra).min(100), priority)
            })
        }

        fn arb_type() -> impl Strategy<Value = ContextWindowType> {
            (
                5u8..=30,
                arb_config("a"),
                arb_config("b"),
                arb_config("c"),
                arb_config("d"),
            )
                .prop_map(|(reserve, a, b, c, d)| {
                    let mut t = ContextWindowType::new("p", "P", reserve);
                    for m in [a, b, c, d] {
                        t.insert_module(m);
                    }
                    t
                })
        }

        fn arb_override() -> impl Strategy<Value = Option<Override>> {
            prop_oneof![
                Just(None),
                Just(Some(Override::ForceFull)),
                (0u8..=100).prop_map(|by_pct| Some(Override::Reduce { by_pct })),
                prop_oneof![Just("a"), Just("b"), Just("c"), Just("d")]
                    .prop_map(|to| Some(Override::Transfer { to: id(to) })),
            ]
        }

        fn arb_overrides() -> impl Strategy<Value = OverrideSet> {
            prop::collection::vec(arb_override(), 4).prop_map(|ovs| {
                let mut set = OverrideSet::default();
                for (name, ov) in ["a", "b", "c", "d"].into_iter().zip(ovs) {
                    if let Some(ov) = ov {
                        let _ = set.overrides.insert(id(name), ov);
                    }
                }
                set
            })
        }

        fn arb_requests() -> impl Strategy<Value = BTreeMap<ModuleId, u64>> {
            prop::collection::vec(0u64..200_000, 4).prop_map(|v| {
                ["a", "b", "c", "d"].into_iter().map(id).zip(v).collect()
            })
        }

        proptest! {
            #[test]
            fn budget_is_conserved(
                t in arb_type(),
                set in arb_overrides(),
                requested in arb_requests(),
                capacity in 0u64..2_000_000,
            ) {
                let a = BudgetAllocator::new().allocate(&t, &set, &requested, capacity);
                prop_assert_eq!(a.available_tokens + a.reserve_tokens, capacity);
                prop_assert!(a.allocated_total() <= a.available_tokens);
                let pct_total: f64 = a.shares.iter().map(|s| s.effective_pct).sum();
                prop_assert!(pct_total <= f64::from(t.module_share_ceiling()) + 1e-6);
            }

            #[test]
            fn unforced_shares_within_bounds_when_floors_fit(
                t in arb_type(),
                by_pct in 0u8..=100,
                capacity in 1_000u64..2_000_000,
            ) {
                let floors: u32 = t.active_modules().map(|m| u32::from(m.min_pct)).sum();
                prop_assume!(floors <= u32::from(t.module_share_ceiling()));

                let mut set = OverrideSet::default();
                let _ = set.overrides.insert(id("a"), Override::ForceFull);
                let _ = set.overrides.insert(id("b"), Override::Reduce { by_pct });
                let forced = f64::from(t.modules[&id("a")].max_pct);
                prop_assume!(f64::from(floors) + forced <= f64::from(t.module_share_ceiling()));

                let a = BudgetAllocator::new().allocate(&t, &set, &BTreeMap::new(), capacity);
                for share in a.shares.iter().filter(|s| !s.forced) {
                    let config = &t.modules[&share.module_id];
                    prop_assert!(share.effective_pct >= f64::from(config.min_pct) - 1e-6);
                    prop_assert!(share.effective_pct <= f64::from(config.max_pct) + 1e-6);
                }
                prop_assert!(a.warnings.is_empty());
            }
        }
    }
}
