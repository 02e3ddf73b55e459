//! # allot-engine
//!
//! Per-turn context budget pipeline.
//!
//! - **Rules** ([`rules`]): fire a type's dynamic adjustments against the
//!   turn context, producing an [`OverrideSet`]
//! - **Allocation** ([`allocator`]): split the available window into whole
//!   token budgets per active module
//! - **Condensation** ([`condense`]): shrink over-budget modules in the type's
//!   condensation order, truncating as a last resort
//! - **Analytics** ([`analytics`]): fold turn results into session totals
//! - **Planner** ([`planner`]): runs the stages above for one turn
//!
//! Every stage is a pure function of its inputs. Degenerate budgets and bad
//! references surface as data on the result, never as errors.

#![deny(unsafe_code)]

pub mod allocator;
pub mod analytics;
pub mod condense;
pub mod planner;
pub mod rules;

pub use allocator::{Allocation, BudgetAllocator, ModuleShare};
pub use analytics::{ModuleStats, SessionAggregate, SessionReport};
pub use condense::{CondensationResolver, Condenser, ModuleUsage, Resolution, TargetCondenser};
pub use planner::TurnPlanner;
pub use rules::{ConditionThresholds, Override, OverrideSet, RuleEvaluator};
