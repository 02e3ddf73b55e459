//! Per-turn pipeline: rules, allocation, condensation.

use std::collections::BTreeMap;

use allot_core::turn::utilization_pct;
use allot_core::{
    ContextWindowTypeStore, ModuleAllocation, ModuleId, RuntimeWarning, SessionId, StoreError,
    TurnBudgetResult, TurnContext, ValidatedType, WindowTypeId,
};
use allot_settings::EngineSettings;
use tracing::{debug, debug_span, warn};

use crate::allocator::BudgetAllocator;
use crate::analytics::SessionAggregate;
use crate::condense::{CondensationResolver, Condenser};
use crate::rules::{ConditionThresholds, RuleEvaluator};

/// Runs the budget pipeline for one turn at a time.
#[derive(Clone, Copy, Debug, Default)]
pub struct TurnPlanner {
    evaluator: RuleEvaluator,
    allocator: BudgetAllocator,
    resolver: CondensationResolver,
}

impl TurnPlanner {
    /// Planner from explicit stages.
    pub fn new(evaluator: RuleEvaluator, allocator: BudgetAllocator, resolver: CondensationResolver) -> Self {
        Self {
            evaluator,
            allocator,
            resolver,
        }
    }

    /// Planner using the thresholds and hint ratio from settings.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(
            RuleEvaluator::new(ConditionThresholds::from(settings)),
            BudgetAllocator::new(),
            CondensationResolver::from(settings),
        )
    }

    /// Plan one turn against a validated type.
    pub fn plan(&self, window_type: &ValidatedType, ctx: &TurnContext, condenser: &dyn Condenser) -> TurnBudgetResult {
        let span = debug_span!(
            "plan_turn",
            type_id = %window_type.id,
            turn = ctx.turn_count,
            capacity = ctx.window_capacity_tokens
        );
        let _entered = span.enter();

        let mut warnings = Vec::new();
        let mut requested: BTreeMap<ModuleId, u64> = BTreeMap::new();
        for (module, &tokens) in &ctx.requested_tokens {
            if window_type.is_active(module) {
                let _ = requested.insert(module.clone(), tokens);
            } else {
                warn!(module = %module, tokens, "request for inactive module ignored");
                warnings.push(RuntimeWarning::InactiveRequest {
                    module: module.clone(),
                    tokens,
                });
            }
        }

        let overrides = self.evaluator.evaluate(window_type, ctx);
        let allocation = self
            .allocator
            .allocate(window_type, &overrides, &requested, ctx.window_capacity_tokens);
        let resolution = self.resolver.resolve(
            &allocation.token_map(),
            &requested,
            &ctx.content_handles,
            &window_type.condensation_order,
            window_type.condensable_modules(),
            &overrides.condense_hints,
            condenser,
        );

        let allocations: Vec<ModuleAllocation> = allocation
            .shares
            .iter()
            .map(|share| {
                let usage = resolution.usage.get(&share.module_id).copied().unwrap_or_default();
                ModuleAllocation::new(
                    share.module_id.clone(),
                    share.allocated_tokens,
                    usage.used,
                    usage.condensed,
                )
            })
            .collect();

        warnings.extend(allocation.warnings);
        warnings.extend(resolution.warnings);

        let used_tokens: u64 = allocations.iter().map(|a| a.used_tokens).sum();
        let result = TurnBudgetResult {
            type_id: window_type.id.clone(),
            capacity_tokens: allocation.capacity_tokens,
            available_tokens: allocation.available_tokens,
            reserve_tokens: allocation.reserve_tokens,
            used_tokens,
            utilization_pct: utilization_pct(used_tokens, allocation.available_tokens),
            allocations,
            rules_fired: overrides.rules_fired,
            truncated: resolution.truncated,
            exhausted: allocation.exhausted,
            warnings,
        };

        debug!(
            used = result.used_tokens,
            available = result.available_tokens,
            utilization_pct = result.utilization_pct,
            truncated = result.truncated,
            warnings = result.warnings.len(),
            "turn planned"
        );
        result
    }

    /// Plan a turn with a type looked up in a store, or the store default.
    pub fn plan_from_store(
        &self,
        store: &dyn ContextWindowTypeStore,
        type_id: Option<&WindowTypeId>,
        ctx: &TurnContext,
        condenser: &dyn Condenser,
    ) -> Result<TurnBudgetResult, StoreError> {
        let window_type = match type_id {
            Some(id) => store.get(id)?,
            None => store.default_type()?,
        };
        Ok(self.plan(&window_type, ctx, condenser))
    }

    /// Plan a sequence of turns and fold them into the session's aggregate.
    pub fn plan_session<'a>(
        &self,
        session_id: SessionId,
        window_type: &ValidatedType,
        turns: impl IntoIterator<Item = &'a TurnContext>,
        condenser: &dyn Condenser,
    ) -> (Vec<TurnBudgetResult>, SessionAggregate) {
        let span = debug_span!("plan_session", session_id = %session_id, type_id = %window_type.id);
        let _entered = span.enter();

        let mut aggregate = SessionAggregate::for_session(session_id);
        let mut results = Vec::new();
        for ctx in turns {
            let result = self.plan(window_type, ctx, condenser);
            aggregate = aggregate.fold(&result);
            results.push(result);
        }
        (results, aggregate)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use allot_core::constants::{
        ATTACHED_DOCUMENTS, CONVERSATION_HISTORY, KNOWLEDGE_CONTEXT, RAG_CASES, SYSTEM_PROMPT,
        TOOL_DEFINITIONS,
    };
    use allot_core::{Condition, InMemoryTypeStore, StaticModuleRegistry, presets, validate};
    use allot_telemetry::capture_logs;
    use allot_core::ContentHandle;
    use std::sync::{Arc, Mutex};
    use tracing::Level;

    use crate::condense::TargetCondenser;

    fn id(s: &str) -> ModuleId {
        ModuleId::from(s)
    }

    fn registry() -> StaticModuleRegistry {
        StaticModuleRegistry::builtin()
    }

    fn preset(name: &str) -> ValidatedType {
        let t = presets::preset(name, &registry()).unwrap();
        validate(t, &registry()).unwrap()
    }

    // ── basics ──

    #[test]
    fn balanced_turn_fits() {
        let t = preset("balanced");
        let ctx = TurnContext::new(100_000)
            .with_turn_count(2)
            .with_documents(true)
            .with_request(SYSTEM_PROMPT, 2_000)
            .with_request(CONVERSATION_HISTORY, 5_000);

        let r = TurnPlanner::default().plan(&t, &ctx, &TargetCondenser);
        assert_eq!(r.available_tokens, 88_000);
        assert_eq!(r.reserve_tokens, 12_000);
        assert_eq!(r.used_tokens, 7_000);
        assert!(r.rules_fired.is_empty());
        assert!(!r.truncated);
        assert!(r.warnings.is_empty());
        assert_eq!(r.allocations.len(), 6);
        assert_eq!(r.allocation(&id(SYSTEM_PROMPT)).unwrap().allocated_tokens, 8_800);
        assert!(r.allocated_tokens() <= r.available_tokens);
    }

    #[test]
    fn request_for_inactive_module_is_ignored_with_warning() {
        let t = preset("tool_heavy");
        let ctx = TurnContext::new(100_000)
            .with_turn_count(2)
            .with_request(RAG_CASES, 4_000)
            .with_request(TOOL_DEFINITIONS, 1_000);

        let (logs, _guard) = capture_logs();
        let r = TurnPlanner::default().plan(&t, &ctx, &TargetCondenser);

        assert_eq!(
            r.warnings,
            [RuntimeWarning::InactiveRequest {
                module: id(RAG_CASES),
                tokens: 4_000
            }]
        );
        assert!(r.allocation(&id(RAG_CASES)).is_none());
        assert_eq!(r.used_tokens, 1_000);
        assert!(logs.has_event(Level::WARN, "request for inactive module ignored"));
        assert!(logs.has_span("plan_turn"));
    }

    // ── rules through the pipeline ──

    #[test]
    fn no_documents_moves_budget_to_knowledge() {
        let t = preset("balanced");
        let ctx = TurnContext::new(100_000).with_turn_count(2);
        let r = TurnPlanner::default().plan(&t, &ctx, &TargetCondenser);

        assert_eq!(r.rules_fired, [Condition::NoDocumentsAttached]);
        assert_eq!(r.allocation(&id(ATTACHED_DOCUMENTS)).unwrap().allocated_tokens, 0);
        // knowledge 12% + documents' 10%
        assert_eq!(r.allocation(&id(KNOWLEDGE_CONTEXT)).unwrap().allocated_tokens, 19_360);
    }

    #[test]
    fn long_conversation_hint_condenses_history() {
        let t = preset("balanced");
        let ctx = TurnContext::new(100_000)
            .with_turn_count(12)
            .with_documents(true)
            .with_request(CONVERSATION_HISTORY, 10_000);

        let r = TurnPlanner::default().plan(&t, &ctx, &TargetCondenser);
        let history = r.allocation(&id(CONVERSATION_HISTORY)).unwrap();
        assert!(history.condensed);
        assert_eq!(history.used_tokens, 5_000);
        assert!(r.rules_fired.contains(&Condition::LongConversation));
    }

    #[test]
    fn settings_thresholds_are_honored() {
        let settings = EngineSettings {
            long_conversation_turns: 3,
            hint_target_ratio: 0.25,
            ..EngineSettings::default()
        };
        let t = preset("balanced");
        let ctx = TurnContext::new(100_000)
            .with_turn_count(3)
            .with_documents(true)
            .with_request(CONVERSATION_HISTORY, 10_000);

        let r = TurnPlanner::from_settings(&settings).plan(&t, &ctx, &TargetCondenser);
        assert_eq!(r.allocation(&id(CONVERSATION_HISTORY)).unwrap().used_tokens, 2_500);
    }

    // ── capabilities ──

    /// Condenses to the target and records which modules were touched.
    #[derive(Default)]
    struct Recorder(Mutex<Vec<ModuleId>>);

    impl Condenser for Recorder {
        fn condense(&self, module: &ModuleId, _: Option<&ContentHandle>, target_tokens: u64) -> u64 {
            self.0.lock().unwrap().push(module.clone());
            target_tokens
        }
    }

    #[test]
    fn oversized_system_prompt_is_truncated_not_condensed() {
        let t = preset("balanced");
        let ctx = TurnContext::new(10_000)
            .with_turn_count(2)
            .with_documents(true)
            .with_request(SYSTEM_PROMPT, 5_000);
        let recorder = Recorder::default();

        let (logs, _guard) = capture_logs();
        let r = TurnPlanner::default().plan(&t, &ctx, &recorder);

        assert!(recorder.0.lock().unwrap().is_empty());
        let prompt = r.allocation(&id(SYSTEM_PROMPT)).unwrap();
        assert_eq!(prompt.allocated_tokens, 880);
        assert_eq!(prompt.used_tokens, 880);
        assert!(!prompt.condensed);
        assert!(r.truncated);
        assert!(logs.has_event(Level::WARN, "usage still over budget, truncating"));
    }

    // ── degenerate ──

    #[test]
    fn zero_capacity_is_exhausted() {
        let t = preset("balanced");
        let ctx = TurnContext::new(0)
            .with_documents(true)
            .with_request(SYSTEM_PROMPT, 100);
        let r = TurnPlanner::default().plan(&t, &ctx, &TargetCondenser);
        assert!(r.exhausted);
        assert!(r.truncated);
        assert!(!r.allocation(&id(SYSTEM_PROMPT)).unwrap().condensed);
        assert_eq!(r.used_tokens, 0);
        assert!(r.utilization_pct.abs() < f64::EPSILON);
    }

    // ── store ──

    #[test]
    fn plan_from_store_uses_default_or_named_type() {
        let store = InMemoryTypeStore::with_presets(Arc::new(registry())).unwrap();
        let ctx = TurnContext::new(10_000).with_documents(true);
        let planner = TurnPlanner::default();

        let r = planner.plan_from_store(&store, None, &ctx, &TargetCondenser).unwrap();
        assert_eq!(r.type_id.as_str(), "balanced");

        let r = planner
            .plan_from_store(&store, Some(&WindowTypeId::from("research")), &ctx, &TargetCondenser)
            .unwrap();
        assert_eq!(r.type_id.as_str(), "research");

        let err = planner
            .plan_from_store(&store, Some(&WindowTypeId::from("missing")), &ctx, &TargetCondenser)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    // ── session ──

    #[test]
    fn session_folds_every_turn() {
        let t = preset("balanced");
        let turns: Vec<TurnContext> = (1..=12)
            .map(|n| {
                let ctx = TurnContext::new(50_000)
                    .with_turn_count(n)
                    .with_request(CONVERSATION_HISTORY, u64::from(n) * 1_500);
                if n == 1 { ctx.first_turn() } else { ctx }
            })
            .collect();

        let session = SessionId::new();
        let (logs, _guard) = capture_logs();
        let (results, aggregate) = TurnPlanner::default().plan_session(session.clone(), &t, &turns, &TargetCondenser);
        assert_eq!(results.len(), 12);
        assert_eq!(aggregate.session_id.as_ref(), Some(&session));
        assert_eq!(aggregate.turns, 12);
        assert_eq!(aggregate.rule_frequency[&Condition::NoDocumentsAttached], 12);
        assert_eq!(aggregate.rule_frequency[&Condition::LongConversation], 3);
        let expected = results
            .iter()
            .fold(SessionAggregate::for_session(session), |agg, r| agg.fold(r));
        assert_eq!(aggregate, expected);
        assert!(logs.has_span("plan_session"));
    }
}
