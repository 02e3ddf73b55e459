//! Type catalog and input files for the CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use allot_core::{
    ContextWindowType, ContextWindowTypeStore, InMemoryTypeStore, StaticModuleRegistry,
    TurnContext, ValidatedType, WindowTypeId, validate,
};
use allot_settings::TypeCatalogSettings;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

/// Presets plus any `*.json` types found in the configured directory.
pub fn build_catalog(
    settings: &TypeCatalogSettings,
    registry: &Arc<StaticModuleRegistry>,
) -> Result<InMemoryTypeStore> {
    let store = InMemoryTypeStore::with_presets(registry.clone())
        .context("Failed to load built-in presets")?;

    if let Some(dir) = &settings.directory {
        for path in json_files(Path::new(dir))? {
            let candidate: ContextWindowType = read_json(&path)?;
            let stored = store
                .put(candidate)
                .with_context(|| format!("Invalid context window type: {}", path.display()))?;
            info!(type_id = %stored.id, path = %path.display(), "loaded context window type");
        }
    }

    Ok(store)
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read type directory: {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Resolve `--type`: an existing file, a catalog id, or the configured default.
pub fn resolve_type(
    spec: Option<&str>,
    store: &InMemoryTypeStore,
    registry: &StaticModuleRegistry,
    default_type: &str,
) -> Result<Arc<ValidatedType>> {
    let Some(spec) = spec else {
        let configured = store.get(&WindowTypeId::from(default_type));
        return match configured {
            Ok(t) => Ok(t),
            Err(e) => {
                debug!(default_type, error = %e, "configured default missing, using store default");
                store.default_type().context("No default context window type")
            }
        };
    };

    let path = Path::new(spec);
    if path.is_file() {
        let candidate: ContextWindowType = read_json(path)?;
        let validated = validate(candidate, registry)
            .with_context(|| format!("Invalid context window type: {}", path.display()))?;
        return Ok(Arc::new(validated));
    }

    store
        .get(&WindowTypeId::from(spec))
        .with_context(|| format!("Unknown context window type: {spec}"))
}

/// One turn as written in a turn or session file.
///
/// `windowCapacityTokens` may be left out, in which case the configured
/// default applies. An explicit `0` is kept and plans an exhausted window.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInput {
    window_capacity_tokens: Option<u64>,
    #[serde(flatten)]
    context: TurnContext,
}

impl TurnInput {
    /// The turn context, with the window size filled in if it was absent.
    pub fn into_context(self, default_capacity: u64) -> TurnContext {
        let mut ctx = self.context;
        ctx.window_capacity_tokens = self.window_capacity_tokens.unwrap_or(default_capacity);
        ctx
    }
}
