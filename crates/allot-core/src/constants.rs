//! Shared bounds for Context Window Type configuration.

// =============================================================================
// Output reserve
// =============================================================================

/// Smallest share of the window that may be held back for the response.
pub const OUTPUT_RESERVE_MIN_PCT: u8 = 5;

/// Largest share of the window that may be held back for the response.
pub const OUTPUT_RESERVE_MAX_PCT: u8 = 30;

// =============================================================================
// Module budgets
// =============================================================================

/// Upper bound for any module percentage.
pub const MAX_PCT: u8 = 100;

/// Lowest module priority.
pub const PRIORITY_MIN: u8 = 1;

/// Highest module priority.
pub const PRIORITY_MAX: u8 = 100;

// =============================================================================
// Built-in module ids
// =============================================================================

/// Base instructions for the model.
pub const SYSTEM_PROMPT: &str = "system_prompt";

/// Prior user/assistant turns.
pub const CONVERSATION_HISTORY: &str = "conversation_history";

/// Tool schemas offered to the model.
pub const TOOL_DEFINITIONS: &str = "tool_definitions";

/// Retrieved knowledge-base passages.
pub const KNOWLEDGE_CONTEXT: &str = "knowledge_context";

/// Retrieved solved cases.
pub const RAG_CASES: &str = "rag_cases";

/// Chunks of documents the user attached.
pub const ATTACHED_DOCUMENTS: &str = "attached_documents";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_bounds_are_ordered() {
        assert!(OUTPUT_RESERVE_MIN_PCT < OUTPUT_RESERVE_MAX_PCT);
        assert!(OUTPUT_RESERVE_MAX_PCT < MAX_PCT);
    }

    #[test]
    fn priority_bounds_are_ordered() {
        assert!(PRIORITY_MIN < PRIORITY_MAX);
    }
}
