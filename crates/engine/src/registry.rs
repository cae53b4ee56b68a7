//! Strategy registry
//!
//! Holds the descriptor table that backtests resolve strategy ids against.
//! The table is immutable once built: a reload constructs a complete new
//! table off to the side, validates every entry, and swaps a single `Arc`
//! under the write lock. Runs that took a snapshot before the swap keep
//! using the old table until they finish.
//!
//! External strategies are JSON files in a configured directory. Each one
//! specializes a built-in strategy with preset parameter defaults:
//!
//! ```json
//! { "id": "fast_cross", "name": "Fast cross", "description": "5/10 SMA",
//!   "base": "dual_ma", "params": { "short_period": 5, "long_period": 10 } }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{InputError, InputResult, ParamResult, RegistryError, RegistryLoadError};
use crate::params::{normalize, validate_schema, with_defaults, ParamSpec, StrategyParams};
use crate::strategies::{builtin_strategies, BuiltinStrategy, StrategyFactory};
use crate::strategy::Strategy;

/// Where a descriptor came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyOrigin {
    Builtin,
    External { path: PathBuf, base: String },
}

/// One entry of the strategy table
#[derive(Clone, Serialize)]
pub struct StrategyDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub origin: StrategyOrigin,
    #[serde(skip)]
    factory: StrategyFactory,
    #[serde(skip)]
    source: Arc<str>,
    /// Values for required parameters, used only to validate the factory
    #[serde(skip)]
    probe: StrategyParams,
}

impl fmt::Debug for StrategyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("params", &self.params.len())
            .field("origin", &self.origin)
            .finish()
    }
}

impl StrategyDescriptor {
    fn from_builtin(builtin: &BuiltinStrategy) -> Self {
        Self {
            id: builtin.id.to_string(),
            name: builtin.name.to_string(),
            description: builtin.description.to_string(),
            params: (builtin.schema)(),
            origin: StrategyOrigin::Builtin,
            factory: builtin.factory,
            source: Arc::from(builtin.source),
            probe: (builtin.probe)(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Normalize `params` against the schema and build a fresh strategy
    pub fn instantiate(&self, params: &StrategyParams) -> InputResult<Box<dyn Strategy>> {
        let invalid = |source| InputError::InvalidParams {
            strategy: self.id.clone(),
            source,
        };
        let resolved = normalize(&self.params, params).map_err(invalid)?;
        self.factory.build(&resolved).map_err(invalid)
    }

    /// Schema is complete and the factory builds from defaults plus probes
    fn validate(&self) -> ParamResult<()> {
        validate_schema(&self.params)?;
        let resolved = normalize(&self.params, &self.probe)?;
        self.factory.build(&resolved).map(|_| ())
    }
}

/// An immutable, versioned set of descriptors
#[derive(Debug, Default)]
pub struct StrategyTable {
    version: u64,
    entries: Vec<StrategyDescriptor>,
    diagnostics: Vec<String>,
}

impl StrategyTable {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, id: &str) -> Option<&StrategyDescriptor> {
        self.entries.iter().find(|d| d.id == id)
    }

    pub fn resolve(&self, id: &str) -> InputResult<&StrategyDescriptor> {
        self.get(id)
            .ok_or_else(|| InputError::UnknownStrategy(id.to_string()))
    }

    /// Built-ins in display order, then external strategies by file name
    pub fn list(&self) -> &[StrategyDescriptor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load problems recorded while the table was built
    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }
}

/// Result of a reload request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReloadOutcome {
    pub success: bool,
    pub message: String,
    pub version: u64,
    pub loaded: usize,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExternalDefinition {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    base: String,
    #[serde(default)]
    params: StrategyParams,
}

/// Process-wide strategy registry with an explicit reload lifecycle
pub struct StrategyRegistry {
    external_dir: Option<PathBuf>,
    current: RwLock<Arc<StrategyTable>>,
    reload_lock: Mutex<()>,
}

impl StrategyRegistry {
    /// Registry with the built-in strategies only
    pub fn with_builtins() -> Self {
        let mut diagnostics = Vec::new();
        let entries = builtin_entries(&mut diagnostics);
        Self::from_table(
            None,
            StrategyTable {
                version: 1,
                entries,
                diagnostics,
            },
        )
    }

    /// Registry with built-ins plus the definitions found in `external_dir`.
    /// Fails only when the directory itself cannot be read.
    pub fn new(external_dir: Option<PathBuf>) -> Result<Self, RegistryLoadError> {
        let table = build_table(1, external_dir.as_deref())?;
        info!(
            strategies = table.len(),
            diagnostics = table.diagnostics.len(),
            "Strategy registry loaded"
        );
        Ok(Self::from_table(external_dir, table))
    }

    fn from_table(external_dir: Option<PathBuf>, table: StrategyTable) -> Self {
        Self {
            external_dir,
            current: RwLock::new(Arc::new(table)),
            reload_lock: Mutex::new(()),
        }
    }

    pub fn external_dir(&self) -> Option<&Path> {
        self.external_dir.as_deref()
    }

    /// The current table. Holders keep a consistent view across reloads.
    pub fn snapshot(&self) -> Arc<StrategyTable> {
        Arc::clone(&self.current.read())
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    pub fn list_strategies(&self) -> Vec<StrategyDescriptor> {
        self.snapshot().list().to_vec()
    }

    /// Literal source text behind a strategy id
    pub fn get_source(&self, id: &str) -> Result<String, RegistryError> {
        self.snapshot()
            .get(id)
            .map(|d| d.source().to_string())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Rebuild the table and swap it in. On failure the current table stays.
    pub fn reload(&self) -> ReloadOutcome {
        let _serial = self.reload_lock.lock();
        let current = self.snapshot();

        match build_table(current.version + 1, self.external_dir.as_deref()) {
            Ok(table) => {
                let outcome = ReloadOutcome {
                    success: true,
                    message: format!(
                        "Loaded {} strategies ({} skipped)",
                        table.len(),
                        table.diagnostics.len()
                    ),
                    version: table.version,
                    loaded: table.len(),
                    diagnostics: table.diagnostics.clone(),
                };
                *self.current.write() = Arc::new(table);
                info!(version = outcome.version, loaded = outcome.loaded, "Strategy registry reloaded");
                outcome
            }
            Err(e) => {
                warn!(error = %e, "Strategy reload failed, keeping current table");
                ReloadOutcome {
                    success: false,
                    message: e.to_string(),
                    version: current.version,
                    loaded: current.len(),
                    diagnostics: vec![e.to_string()],
                }
            }
        }
    }
}

fn builtin_entries(diagnostics: &mut Vec<String>) -> Vec<StrategyDescriptor> {
    let mut entries = Vec::new();
    for builtin in builtin_strategies() {
        let descriptor = StrategyDescriptor::from_builtin(&builtin);
        match descriptor.validate() {
            Ok(()) => entries.push(descriptor),
            Err(e) => {
                let err = RegistryLoadError::Validation {
                    id: descriptor.id,
                    reason: e.to_string(),
                };
                warn!(error = %err, "Skipping built-in strategy");
                diagnostics.push(err.to_string());
            }
        }
    }
    entries
}

fn build_table(version: u64, external_dir: Option<&Path>) -> Result<StrategyTable, RegistryLoadError> {
    let mut diagnostics = Vec::new();
    let mut entries = builtin_entries(&mut diagnostics);

    if let Some(dir) = external_dir {
        for path in definition_files(dir)? {
            match load_external(&path, &entries) {
                Ok(descriptor) => {
                    debug!(id = %descriptor.id, path = %path.display(), "Loaded external strategy");
                    entries.push(descriptor);
                }
                Err(e) => {
                    warn!(error = %e, "Skipping external strategy");
                    diagnostics.push(e.to_string());
                }
            }
        }
    }

    Ok(StrategyTable {
        version,
        entries,
        diagnostics,
    })
}

/// `*.json` files in `dir`, sorted by name so load order is stable
fn definition_files(dir: &Path) -> Result<Vec<PathBuf>, RegistryLoadError> {
    let directory = |source| RegistryLoadError::Directory {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(directory)? {
        let path = entry.map_err(directory)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn load_external(path: &Path, loaded: &[StrategyDescriptor]) -> Result<StrategyDescriptor, RegistryLoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| RegistryLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let def: ExternalDefinition = serde_json::from_str(&text).map_err(|source| RegistryLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let validation = |reason: String| RegistryLoadError::Validation {
        id: def.id.clone(),
        reason,
    };
    if def.id.trim().is_empty() || def.id.chars().any(char::is_whitespace) {
        return Err(validation(format!("invalid id `{}`", def.id)));
    }
    if let Some(existing) = loaded.iter().find(|d| d.id == def.id) {
        return Err(match existing.origin {
            StrategyOrigin::Builtin => RegistryLoadError::BuiltinCollision {
                id: def.id.clone(),
                path: path.to_path_buf(),
            },
            StrategyOrigin::External { .. } => RegistryLoadError::DuplicateId {
                id: def.id.clone(),
                path: path.to_path_buf(),
            },
        });
    }

    let base = loaded
        .iter()
        .find(|d| d.id == def.base && d.origin == StrategyOrigin::Builtin)
        .ok_or_else(|| RegistryLoadError::UnknownBase {
            id: def.id.clone(),
            base: def.base.clone(),
        })?;

    let params = with_defaults(&base.params, &def.params).map_err(|e| validation(e.to_string()))?;
    // Probe only what the preset left without a default
    let mut probe = base.probe.clone();
    probe.retain(|name, _| params.iter().any(|s| &s.name == name && s.default.is_none()));

    let descriptor = StrategyDescriptor {
        id: def.id.clone(),
        name: def.name.clone(),
        description: def.description.clone(),
        params,
        origin: StrategyOrigin::External {
            path: path.to_path_buf(),
            base: def.base.clone(),
        },
        factory: base.factory,
        source: Arc::from(text.as_str()),
        probe,
    };
    descriptor.validate().map_err(|e| validation(e.to_string()))?;
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::write_file;
    use serde_json::json;
    use tempfile::tempdir;

    fn params(value: serde_json::Value) -> StrategyParams {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_builtins_listed_in_order() {
        let registry = StrategyRegistry::with_builtins();
        let ids: Vec<String> = registry.list_strategies().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, ["dual_ma", "grid", "macd", "rsi", "kdj", "bollinger", "hybrid"]);
        assert_eq!(registry.version(), 1);
        assert!(registry.snapshot().diagnostics().is_empty());
    }

    #[test]
    fn test_get_source() {
        let registry = StrategyRegistry::with_builtins();
        let source = registry.get_source("rsi").unwrap();
        assert!(source.contains("pub struct RsiStrategy"));
        assert_eq!(
            registry.get_source("nope"),
            Err(RegistryError::NotFound("nope".to_string()))
        );
    }

    #[test]
    fn test_descriptor_serializes_schema_without_source() {
        let registry = StrategyRegistry::with_builtins();
        let table = registry.snapshot();
        let value = serde_json::to_value(table.get("rsi").unwrap()).unwrap();
        assert_eq!(value["id"], "rsi");
        assert_eq!(value["origin"]["kind"], "builtin");
        assert_eq!(value["params"][0]["type"], "int");
        assert!(value.get("source").is_none());
    }

    #[test]
    fn test_instantiate_rejects_bad_params() {
        let table = StrategyRegistry::with_builtins().snapshot();
        let rsi = table.get("rsi").unwrap();
        assert!(rsi.instantiate(&StrategyParams::new()).is_ok());
        let err = rsi
            .instantiate(&params(json!({ "period": 1000 })))
            .err()
            .unwrap();
        assert!(matches!(err, InputError::InvalidParams { ref strategy, .. } if strategy == "rsi"));
        assert!(table.resolve("missing").is_err());
    }

    #[test]
    fn test_external_preset_becomes_default() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "fast.json",
            r#"{"id":"fast_cross","name":"Fast cross","base":"dual_ma","params":{"short_period":3,"long_period":8}}"#,
        );
        let registry = StrategyRegistry::new(Some(dir.path().to_path_buf())).unwrap();
        let table = registry.snapshot();
        let fast = table.get("fast_cross").unwrap();
        let short = fast.params.iter().find(|p| p.name == "short_period").unwrap();
        assert_eq!(short.default, Some(json!(3)));
        assert!(matches!(fast.origin, StrategyOrigin::External { ref base, .. } if base == "dual_ma"));
        assert!(registry.get_source("fast_cross").unwrap().contains("\"fast_cross\""));
        assert!(fast.instantiate(&StrategyParams::new()).is_ok());
    }

    #[test]
    fn test_external_grid_uses_preset_bounds() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            "btc_grid.json",
            r#"{"id":"btc_grid","name":"BTC grid","base":"grid","params":{"upper_price":50000,"lower_price":40000}}"#,
        );
        let registry = StrategyRegistry::new(Some(dir.path().to_path_buf())).unwrap();
        assert!(registry.snapshot().get("btc_grid").is_some());
    }

    #[test]
    fn test_bad_definitions_are_skipped_with_diagnostics() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a_collision.json", r#"{"id":"rsi","name":"x","base":"rsi"}"#);
        write_file(dir.path(), "b_broken.json", "{ not json");
        write_file(dir.path(), "c_unknown_base.json", r#"{"id":"c","name":"c","base":"nope"}"#);
        write_file(dir.path(), "d_range.json", r#"{"id":"d","name":"d","base":"rsi","params":{"period":0}}"#);
        write_file(dir.path(), "e_ok.json", r#"{"id":"e","name":"e","base":"rsi"}"#);
        write_file(dir.path(), "f_dup.json", r#"{"id":"e","name":"e again","base":"macd"}"#);
        write_file(dir.path(), "g_hybrid.json", r#"{"id":"g","name":"g","base":"hybrid","params":{"use_rsi":false,"use_macd":false}}"#);
        write_file(dir.path(), "notes.txt", "ignored");

        let registry = StrategyRegistry::new(Some(dir.path().to_path_buf())).unwrap();
        let table = registry.snapshot();
        assert_eq!(table.len(), 8);
        assert!(table.get("e").is_some());
        let diagnostics = table.diagnostics();
        assert_eq!(diagnostics.len(), 6);
        assert!(diagnostics[0].contains("collides with a built-in"));
        assert!(diagnostics[1].contains("Malformed"));
        assert!(diagnostics[2].contains("unknown base"));
        assert!(diagnostics[3].contains("failed validation"));
        assert!(diagnostics[4].contains("already defined"));
        assert!(diagnostics[5].contains("at least two"));
        // the built-in survives the collision
        assert!(table.get("rsi").unwrap().origin == StrategyOrigin::Builtin);
    }

    #[test]
    fn test_missing_directory_fails_construction() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(matches!(
            StrategyRegistry::new(Some(missing)),
            Err(RegistryLoadError::Directory { .. })
        ));
    }

    #[test]
    fn test_reload_swaps_table_and_keeps_snapshots() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "one.json", r#"{"id":"one","name":"One","base":"rsi"}"#);
        let registry = StrategyRegistry::new(Some(dir.path().to_path_buf())).unwrap();
        let before = registry.snapshot();

        write_file(dir.path(), "two.json", r#"{"id":"two","name":"Two","base":"macd"}"#);
        let outcome = registry.reload();
        assert!(outcome.success);
        assert_eq!(outcome.version, 2);
        assert_eq!(outcome.loaded, 9);
        assert!(outcome.diagnostics.is_empty());

        assert!(before.get("two").is_none());
        assert_eq!(before.version(), 1);
        assert!(registry.snapshot().get("two").is_some());
    }

    #[test]
    fn test_failed_reload_keeps_current_table() {
        let dir = tempdir().unwrap();
        let ext = dir.path().join("ext");
        std::fs::create_dir_all(&ext).unwrap();
        std::fs::write(ext.join("one.json"), r#"{"id":"one","name":"One","base":"rsi"}"#).unwrap();
        let registry = StrategyRegistry::new(Some(ext.clone())).unwrap();

        std::fs::remove_dir_all(&ext).unwrap();
        let outcome = registry.reload();
        assert!(!outcome.success);
        assert_eq!(outcome.version, 1);
        assert!(outcome.message.contains("Cannot read strategy directory"));
        assert!(registry.snapshot().get("one").is_some());
    }

    #[test]
    fn test_builtin_only_reload_bumps_version() {
        let registry = StrategyRegistry::with_builtins();
        assert_eq!(registry.reload().version, 2);
        assert_eq!(registry.reload().version, 3);
        assert!(registry.external_dir().is_none());
    }
}
