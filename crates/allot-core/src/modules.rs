//! Module catalog: the known kinds of prompt content and their defaults.
//!
//! The registry is a read-only input to validation and allocation. The
//! [`StaticModuleRegistry`] ships the built-in catalog and accepts extra
//! descriptors for deployments that install their own modules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{
    ATTACHED_DOCUMENTS, CONVERSATION_HISTORY, KNOWLEDGE_CONTEXT, RAG_CASES, SYSTEM_PROMPT,
    TOOL_DEFINITIONS,
};
use crate::ids::ModuleId;
use crate::window_type::ModuleBudgetConfig;

/// What the runtime is allowed to do with a module's content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleCapabilities {
    /// Content can be lossily reduced to fit a smaller budget.
    pub condensable: bool,
    /// Content can be dropped entirely.
    pub purgeable: bool,
}

/// Default budget bounds a new type starts from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefaultBounds {
    /// Preferred share of the available window.
    pub target_pct: u8,
    /// Floor share.
    pub min_pct: u8,
    /// Ceiling share.
    pub max_pct: u8,
    /// Priority (1–100, higher wins surplus first).
    pub priority: u8,
}

/// Static description of a module kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    /// Stable module name.
    pub module_id: ModuleId,
    /// Human-readable label.
    pub display_name: String,
    /// Condensation/purge capabilities.
    pub capabilities: ModuleCapabilities,
    /// Required modules can never be deactivated.
    pub required: bool,
    /// Bounds used when a type does not override them.
    pub defaults: DefaultBounds,
}

impl ModuleDescriptor {
    /// Build a budget config from this descriptor's defaults.
    #[must_use]
    pub fn default_config(&self, active: bool) -> ModuleBudgetConfig {
        ModuleBudgetConfig {
            module_id: self.module_id.clone(),
            active: active || self.required,
            target_pct: self.defaults.target_pct,
            min_pct: self.defaults.min_pct,
            max_pct: self.defaults.max_pct,
            priority: self.defaults.priority,
        }
    }
}

/// Catalog of installed module kinds.
pub trait ModuleRegistry: Send + Sync {
    /// All known descriptors, ordered by module id.
    fn list(&self) -> Vec<ModuleDescriptor>;

    /// Look up one descriptor.
    fn get(&self, id: &ModuleId) -> Option<ModuleDescriptor> {
        self.list().into_iter().find(|d| &d.module_id == id)
    }

    /// Whether the module id is known.
    fn contains(&self, id: &ModuleId) -> bool {
        self.get(id).is_some()
    }
}

/// In-process registry backed by a sorted map.
#[derive(Clone, Debug, Default)]
pub struct StaticModuleRegistry {
    modules: BTreeMap<ModuleId, ModuleDescriptor>,
}

impl StaticModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in catalog.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for descriptor in builtin_descriptors() {
            registry.register(descriptor);
        }
        registry
    }

    /// Register (or replace) a descriptor.
    pub fn register(&mut self, descriptor: ModuleDescriptor) {
        let _ = self
            .modules
            .insert(descriptor.module_id.clone(), descriptor);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, descriptor: ModuleDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    /// Number of registered modules.
    pub fn count(&self) -> usize {
        self.modules.len()
    }
}

impl ModuleRegistry for StaticModuleRegistry {
    fn list(&self) -> Vec<ModuleDescriptor> {
        self.modules.values().cloned().collect()
    }

    fn get(&self, id: &ModuleId) -> Option<ModuleDescriptor> {
        self.modules.get(id).cloned()
    }

    fn contains(&self, id: &ModuleId) -> bool {
        self.modules.contains_key(id)
    }
}

fn descriptor(
    id: &str,
    display_name: &str,
    required: bool,
    capabilities: ModuleCapabilities,
    (target_pct, min_pct, max_pct, priority): (u8, u8, u8, u8),
) -> ModuleDescriptor {
    ModuleDescriptor {
        module_id: ModuleId::from(id),
        display_name: display_name.to_owned(),
        capabilities,
        required,
        defaults: DefaultBounds {
            target_pct,
            min_pct,
            max_pct,
            priority,
        },
    }
}

/// The built-in module catalog.
pub fn builtin_descriptors() -> Vec<ModuleDescriptor> {
    let fixed = ModuleCapabilities::default();
    let condense_only = ModuleCapabilities {
        condensable: true,
        purgeable: false,
    };
    let disposable = ModuleCapabilities {
        condensable: true,
        purgeable: true,
    };

    vec![
        descriptor(SYSTEM_PROMPT, "System Prompt", true, fixed, (10, 5, 15, 100)),
        descriptor(
            CONVERSATION_HISTORY,
            "Conversation History",
            true,
            condense_only,
            (22, 10, 60, 90),
        ),
        descriptor(
            TOOL_DEFINITIONS,
            "Tool Definitions",
            false,
            disposable,
            (22, 0, 40, 70),
        ),
        descriptor(
            KNOWLEDGE_CONTEXT,
            "Knowledge Context",
            false,
            disposable,
            (12, 0, 40, 60),
        ),
        descriptor(
            ATTACHED_DOCUMENTS,
            "Attached Documents",
            false,
            disposable,
            (10, 0, 40, 55),
        ),
        descriptor(RAG_CASES, "RAG Cases", false, disposable, (8, 0, 30, 50)),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
