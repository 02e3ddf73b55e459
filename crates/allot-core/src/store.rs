//! Context Window Type storage interface and an in-memory reference store.
//!
//! Readers get `Arc<ValidatedType>` snapshots. A write replaces the `Arc` in
//! the map, so a snapshot a running turn already holds never changes.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::{Result, StoreError};
use crate::ids::WindowTypeId;
use crate::modules::ModuleRegistry;
use crate::presets::all_presets;
use crate::validation::{ValidatedType, validate};
use crate::window_type::ContextWindowType;

/// Read side of type storage, as the engine sees it.
pub trait ContextWindowTypeStore: Send + Sync {
    /// Fetch one validated type.
    fn get(&self, id: &WindowTypeId) -> Result<Arc<ValidatedType>>;

    /// All stored types, ordered by id.
    fn list(&self) -> Vec<Arc<ValidatedType>>;

    /// The deployment default.
    fn default_type(&self) -> Result<Arc<ValidatedType>>;
}

/// Map-backed store that validates on write and enforces the default rules:
/// at most one default, and the default can be neither deleted nor demoted.
pub struct InMemoryTypeStore {
    registry: Arc<dyn ModuleRegistry>,
    types: RwLock<BTreeMap<WindowTypeId, Arc<ValidatedType>>>,
}

impl InMemoryTypeStore {
    /// Empty store.
    pub fn new(registry: Arc<dyn ModuleRegistry>) -> Self {
        Self {
            registry,
            types: RwLock::new(BTreeMap::new()),
        }
    }

    /// Store seeded with the built-in presets.
    pub fn with_presets(registry: Arc<dyn ModuleRegistry>) -> Result<Self> {
        let store = Self::new(registry);
        for t in all_presets(store.registry.as_ref()) {
            let _ = store.put(t)?;
        }
        Ok(store)
    }

    /// Validate and insert or replace a type.
    ///
    /// Storing a default demotes the previous default. Replacing the current
    /// default with a non-default version is refused.
    pub fn put(&self, candidate: ContextWindowType) -> Result<Arc<ValidatedType>> {
        let validated = Arc::new(validate(candidate, self.registry.as_ref())?);
        let id = validated.id.clone();

        let mut types = self.types.write();
        if !validated.is_default && types.get(&id).is_some_and(|t| t.is_default) {
            return Err(StoreError::DefaultUndeletable(id));
        }

        if validated.is_default {
            let demoted: Vec<WindowTypeId> = types
                .values()
                .filter(|t| t.is_default && t.id != id)
                .map(|t| t.id.clone())
                .collect();
            for other in demoted {
                if let Some(previous) = types.get(&other) {
                    let replacement = Arc::new(previous.with_default(false));
                    let _ = types.insert(other.clone(), replacement);
                    tracing::info!(type_id = %other, "default context window type demoted");
                }
            }
        }

        for warning in validated.warnings() {
            tracing::warn!(type_id = %id, %warning, "context window type stored with warning");
        }
        let _ = types.insert(id.clone(), Arc::clone(&validated));
        tracing::debug!(type_id = %id, is_default = validated.is_default, "context window type stored");
        Ok(validated)
    }

    /// Remove a type. The default cannot be removed.
    pub fn delete(&self, id: &WindowTypeId) -> Result<Arc<ValidatedType>> {
        let mut types = self.types.write();
        let is_default = match types.get(id) {
            None => return Err(StoreError::NotFound(id.clone())),
            Some(t) => t.is_default,
        };
        if is_default {
            return Err(StoreError::DefaultUndeletable(id.clone()));
        }
        types
            .remove(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Number of stored types.
    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    /// Whether the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

impl ContextWindowTypeStore for InMemoryTypeStore {
    fn get(&self, id: &WindowTypeId) -> Result<Arc<ValidatedType>> {
        self.types
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    fn list(&self) -> Vec<Arc<ValidatedType>> {
        self.types.read().values().cloned().collect()
    }

    fn default_type(&self) -> Result<Arc<ValidatedType>> {
        self.types
            .read()
            .values()
            .find(|t| t.is_default)
            .cloned()
            .ok_or(StoreError::NoDefault)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
