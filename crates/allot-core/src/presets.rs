//! Built-in Context Window Types.
//!
//! Each preset starts from the registry's default bounds and adjusts targets
//! for its workload. Modules the registry does not know are skipped, so a
//! trimmed-down registry still yields a (possibly invalid) type rather than a
//! panic.

use crate::constants::{
    ATTACHED_DOCUMENTS, CONVERSATION_HISTORY, KNOWLEDGE_CONTEXT, RAG_CASES, SYSTEM_PROMPT,
    TOOL_DEFINITIONS,
};
use crate::ids::ModuleId;
use crate::modules::ModuleRegistry;
use crate::window_type::{Action, Condition, ContextWindowType, Rule};

/// Names accepted by [`preset`].
pub const PRESET_NAMES: [&str; 4] = ["balanced", "research", "tool_heavy", "long_conversation"];

/// One module entry in a preset table: id, active, target override.
type Slot = (&'static str, bool, Option<u8>);

#[allow(clippy::too_many_arguments)]
fn build(
    registry: &dyn ModuleRegistry,
    id: &str,
    name: &str,
    description: &str,
    reserve: u8,
    slots: &[Slot],
    order: &[&str],
    rules: Vec<Rule>,
) -> ContextWindowType {
    let mut t = ContextWindowType::new(id, name, reserve);
    t.description = description.to_owned();

    for &(module, active, target) in slots {
        let Some(descriptor) = registry.get(&ModuleId::from(module)) else {
            continue;
        };
        let mut config = descriptor.default_config(active);
        if let Some(target) = target {
            config.target_pct = target;
        }
        t.insert_module(config);
    }

    t.condensation_order = order
        .iter()
        .map(|m| ModuleId::from(*m))
        .filter(|m| t.is_active(m))
        .collect();
    t.dynamic_adjustments = rules;
    t
}

fn force_full(module: &str) -> Action {
    Action::ForceFull {
        module: ModuleId::from(module),
    }
}

fn transfer(from: &str, to: &str) -> Action {
    Action::Transfer {
        from: ModuleId::from(from),
        to: ModuleId::from(to),
    }
}

fn reduce(module: &str, by_pct: u8) -> Action {
    Action::Reduce {
        module: ModuleId::from(module),
        by_pct,
    }
}

fn condense(module: &str) -> Action {
    Action::Condense {
        module: ModuleId::from(module),
    }
}

/// General-purpose split. The deployment default.
pub fn balanced(registry: &dyn ModuleRegistry) -> ContextWindowType {
    let mut t = build(
        registry,
        "balanced",
        "Balanced",
        "Even split across every built-in module.",
        12,
        &[
            (SYSTEM_PROMPT, true, None),
            (CONVERSATION_HISTORY, true, None),
            (TOOL_DEFINITIONS, true, None),
            (KNOWLEDGE_CONTEXT, true, None),
            (ATTACHED_DOCUMENTS, true, None),
            (RAG_CASES, true, None),
        ],
        &[
            RAG_CASES,
            KNOWLEDGE_CONTEXT,
            ATTACHED_DOCUMENTS,
            TOOL_DEFINITIONS,
            CONVERSATION_HISTORY,
            SYSTEM_PROMPT,
        ],
        vec![
            Rule::new(
                Condition::NoDocumentsAttached,
                transfer(ATTACHED_DOCUMENTS, KNOWLEDGE_CONTEXT),
            ),
            Rule::new(Condition::LongConversation, condense(CONVERSATION_HISTORY)),
        ],
    );
    t.is_default = true;
    t
}

/// Retrieval-heavy split for question answering over a knowledge base.
pub fn research(registry: &dyn ModuleRegistry) -> ContextWindowType {
    build(
        registry,
        "research",
        "Research",
        "Favors retrieved knowledge and solved cases over tools.",
        15,
        &[
            (SYSTEM_PROMPT, true, None),
            (CONVERSATION_HISTORY, true, Some(17)),
            (TOOL_DEFINITIONS, true, Some(8)),
            (KNOWLEDGE_CONTEXT, true, Some(25)),
            (ATTACHED_DOCUMENTS, true, None),
            (RAG_CASES, true, Some(15)),
        ],
        &[
            TOOL_DEFINITIONS,
            ATTACHED_DOCUMENTS,
            RAG_CASES,
            CONVERSATION_HISTORY,
            KNOWLEDGE_CONTEXT,
            SYSTEM_PROMPT,
        ],
        vec![
            Rule::new(
                Condition::NoDocumentsAttached,
                transfer(ATTACHED_DOCUMENTS, KNOWLEDGE_CONTEXT),
            ),
            Rule::new(
                Condition::HighConfidenceRag,
                transfer(KNOWLEDGE_CONTEXT, RAG_CASES),
            ),
        ],
    )
}

/// Agentic split with a large tool catalog.
pub fn tool_heavy(registry: &dyn ModuleRegistry) -> ContextWindowType {
    build(
        registry,
        "tool_heavy",
        "Tool Heavy",
        "Room for large tool catalogs; retrieval disabled.",
        20,
        &[
            (SYSTEM_PROMPT, true, None),
            (CONVERSATION_HISTORY, true, Some(20)),
            (TOOL_DEFINITIONS, true, Some(35)),
            (KNOWLEDGE_CONTEXT, true, Some(10)),
            (ATTACHED_DOCUMENTS, false, None),
            (RAG_CASES, false, None),
        ],
        &[
            KNOWLEDGE_CONTEXT,
            CONVERSATION_HISTORY,
            TOOL_DEFINITIONS,
            SYSTEM_PROMPT,
        ],
        vec![
            Rule::new(Condition::FirstTurn, force_full(TOOL_DEFINITIONS)),
            Rule::new(Condition::LongConversation, reduce(TOOL_DEFINITIONS, 25)),
        ],
    )
}

/// Chat-first split that keeps as much history as possible.
pub fn long_conversation(registry: &dyn ModuleRegistry) -> ContextWindowType {
    build(
        registry,
        "long_conversation",
        "Long Conversation",
        "Keeps long chat history; condenses it once sessions grow.",
        10,
        &[
            (SYSTEM_PROMPT, true, Some(8)),
            (CONVERSATION_HISTORY, true, Some(45)),
            (TOOL_DEFINITIONS, true, Some(15)),
            (KNOWLEDGE_CONTEXT, true, Some(12)),
            (ATTACHED_DOCUMENTS, false, None),
            (RAG_CASES, false, None),
        ],
        &[
            KNOWLEDGE_CONTEXT,
            TOOL_DEFINITIONS,
            CONVERSATION_HISTORY,
            SYSTEM_PROMPT,
        ],
        vec![
            Rule::new(Condition::FirstTurn, reduce(CONVERSATION_HISTORY, 50)),
            Rule::new(Condition::LongConversation, condense(CONVERSATION_HISTORY)),
        ],
    )
}

/// Look up a preset by name.
pub fn preset(name: &str, registry: &dyn ModuleRegistry) -> Option<ContextWindowType> {
    match name {
        "balanced" => Some(balanced(registry)),
        "research" => Some(research(registry)),
        "tool_heavy" => Some(tool_heavy(registry)),
        "long_conversation" => Some(long_conversation(registry)),
        _ => None,
    }
}

/// All presets, default first.
pub fn all_presets(registry: &dyn ModuleRegistry) -> Vec<ContextWindowType> {
    PRESET_NAMES
        .iter()
        .filter_map(|name| preset(name, registry))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::StaticModuleRegistry;
    use crate::validation::validate;

    #[test]
    fn every_preset_validates_cleanly() {
        let registry = StaticModuleRegistry::builtin();
        for t in all_presets(&registry) {
            let id = t.id.clone();
            let validated = validate(t, &registry).unwrap_or_else(|e| panic!("{id}: {e}"));
            assert!(validated.warnings().is_empty(), "{id}: {:?}", validated.warnings());
        }
    }

    #[test]
    fn exactly_one_default() {
        let registry = StaticModuleRegistry::builtin();
        let defaults: Vec<_> = all_presets(&registry)
            .into_iter()
            .filter(|t| t.is_default)
            .map(|t| t.id.into_inner())
            .collect();
        assert_eq!(defaults, ["balanced"]);
    }

    #[test]
    fn lookup_by_name() {
        let registry = StaticModuleRegistry::builtin();
        assert_eq!(preset("research", &registry).unwrap().output_reserve_pct, 15);
        assert!(preset("nope", &registry).is_none());
        assert_eq!(all_presets(&registry).len(), PRESET_NAMES.len());
    }

    #[test]
    fn inactive_modules_left_out_of_order() {
        let registry = StaticModuleRegistry::builtin();
        let t = tool_heavy(&registry);
        assert!(!t.is_active(&ModuleId::from(RAG_CASES)));
        assert!(!t.condensation_order.contains(&ModuleId::from(RAG_CASES)));
        assert_eq!(t.condensation_order.len(), 4);
    }

    #[test]
    fn empty_registry_yields_empty_modules() {
        let registry = StaticModuleRegistry::new();
        let t = balanced(&registry);
        assert!(t.modules.is_empty());
        assert!(t.condensation_order.is_empty());
    }
}
