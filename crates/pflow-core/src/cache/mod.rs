//! # Execution Cache
//!
//! The `registry run` path executes a single node for exploration and keeps
//! its full outputs on disk, keyed by execution id, so later invocations can
//! retrieve exactly the fields they need without re-running the tool.
//!
//! Layout: `<cache-root>/registry-run/<execution-id>.json`, UTF-8 JSON with
//! sorted keys, written atomically (temp file + rename). Binary blobs are
//! carried as `{"__type": "base64", "data": "..."}` envelopes. `ttl_hours`
//! is recorded (default 24) but advisory; `list` and `remove` give callers
//! the tools for their own retention policy.

pub mod render;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::node::execute_node;
use crate::registry::RegistrySnapshot;
use crate::store::SharedStore;
use crate::template;
use crate::template::resolver::traverse;

/// Envelope marker for binary payloads.
pub const BASE64_TYPE_TAG: &str = "base64";

/// Default advisory TTL recorded on new entries.
pub const DEFAULT_TTL_HOURS: f64 = 24.0;

/// Fresh execution id: `exec-{unix_seconds}-{8 hex}`.
pub fn generate_execution_id() -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let suffix: u32 = rand::thread_rng().gen();
    format!("exec-{}-{:08x}", seconds, suffix)
}

/// Wrap raw bytes in the cache's base64 envelope.
pub fn bytes_to_value(bytes: &[u8]) -> Value {
    serde_json::json!({
        "__type": BASE64_TYPE_TAG,
        "data": base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

/// Unwrap a base64 envelope back into raw bytes.
pub fn value_to_bytes(value: &Value) -> Option<Vec<u8>> {
    let map = value.as_object()?;
    if map.get("__type")?.as_str()? != BASE64_TYPE_TAG {
        return None;
    }
    base64::engine::general_purpose::STANDARD
        .decode(map.get("data")?.as_str()?)
        .ok()
}

/// One durable entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub execution_id: String,
    pub node_type: String,
    /// Seconds since the epoch, fractional.
    pub timestamp: f64,
    pub ttl_hours: f64,
    pub params: Value,
    pub outputs: Value,
}

/// Result of a single-node exploration run.
#[derive(Debug, Clone)]
pub struct RegistryRunResult {
    pub execution_id: String,
    /// Flattened `(path, type)` pairs over the outputs.
    pub structure: Vec<(String, String)>,
    pub entry: CacheEntry,
}

/// The on-disk cache. Single writer, many readers; writes are atomic.
#[derive(Debug, Clone)]
pub struct ExecutionCache {
    root: PathBuf,
}

impl ExecutionCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &crate::config::EngineConfig) -> Self {
        Self::new(config.cache_root.clone())
    }

    fn run_dir(&self) -> PathBuf {
        self.root.join("registry-run")
    }

    fn entry_path(&self, execution_id: &str) -> PathBuf {
        self.run_dir().join(format!("{}.json", execution_id))
    }

    /// Execute one node against an empty shared store and persist the
    /// result. This path serves exploration only; full workflow runs never
    /// write here.
    pub fn registry_run(
        &self,
        snapshot: &RegistrySnapshot,
        type_id: &str,
        params: Map<String, Value>,
    ) -> Result<RegistryRunResult> {
        let resolved = snapshot.resolve(type_id)?;
        let mut node = snapshot.instantiate(&resolved.canonical_id)?;
        node.set_params(params.clone())?;

        let mut shared = SharedStore::new();
        execute_node(node.as_mut(), &mut shared)?;
        let outputs = Value::Object(shared.root().clone());

        let entry = CacheEntry {
            execution_id: generate_execution_id(),
            node_type: resolved.canonical_id,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            ttl_hours: DEFAULT_TTL_HOURS,
            params: Value::Object(params),
            outputs,
        };
        self.store(&entry)?;
        Ok(RegistryRunResult {
            execution_id: entry.execution_id.clone(),
            structure: render::structure_of(&entry.outputs),
            entry,
        })
    }

    /// Persist an entry atomically.
    pub fn store(&self, entry: &CacheEntry) -> Result<PathBuf> {
        let path = atomic_write_json(
            &self.run_dir(),
            &format!("{}.json", entry.execution_id),
            entry,
        )?;
        debug!(execution_id = %entry.execution_id, "cache entry written");
        Ok(path)
    }

    pub fn load(&self, execution_id: &str) -> Result<CacheEntry> {
        let path = self.entry_path(execution_id);
        let text = std::fs::read_to_string(&path).map_err(|_| {
            EngineError::resource(format!("no cached execution '{}'", execution_id))
                .with_details(Value::String(path.display().to_string()))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Selective retrieval: resolve each path against the cached outputs
    /// with the template path grammar. Unknown paths yield null, not errors.
    pub fn read_fields(
        &self,
        execution_id: &str,
        paths: &[String],
    ) -> Result<Map<String, Value>> {
        let entry = self.load(execution_id)?;
        let mut fields = Map::new();
        for path in paths {
            let value = template::parse_path(path)
                .ok()
                .and_then(|parsed| {
                    let mut segments = vec![template::PathSegment::Key(parsed.root.clone())];
                    segments.extend(parsed.path);
                    traverse(&entry.outputs, &segments).cloned()
                })
                .unwrap_or(Value::Null);
            fields.insert(path.clone(), value);
        }
        Ok(fields)
    }

    /// Known execution ids, oldest first by the unix-seconds component of
    /// the id. Ids minted within the same second carry no ordering beyond
    /// that; ties break lexically.
    pub fn list(&self) -> Result<Vec<String>> {
        let dir = self.run_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for dirent in std::fs::read_dir(&dir)? {
            let name = dirent?.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json") {
                if !id.starts_with('.') {
                    ids.push(id.to_string());
                }
            }
        }
        ids.sort_by(|a, b| {
            id_seconds(a)
                .cmp(&id_seconds(b))
                .then_with(|| a.cmp(b))
        });
        Ok(ids)
    }

    pub fn remove(&self, execution_id: &str) -> Result<()> {
        let path = self.entry_path(execution_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// The unix-seconds component of an `exec-<seconds>-<hex>` id.
fn id_seconds(id: &str) -> u64 {
    id.split('-')
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Shared atomic-write helper for sibling stores. Serialization goes
/// through an intermediate `Value` so every key, the top-level struct
/// fields included, lands in sorted order on disk.
pub fn atomic_write_json<T: Serialize>(dir: &Path, file_name: &str, value: &T) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(file_name);
    let tmp = dir.join(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, serde_json::to_string(&serde_json::to_value(value)?)?)?;
    std::fs::rename(&tmp, &path)?;
    Ok(path)
}
