//! # Shared Store
//!
//! A single mutable mapping lives for the duration of one workflow run. It
//! holds declared inputs at the root, each node's outputs under the node's
//! own namespace, and a coordination block the engine uses for checkpointing
//! and diagnostics.
//!
//! The source of this design kept coordination state under reserved
//! `__`-prefixed keys inside the same mapping. Here the reserved keys are
//! fields of [`Coordination`], carried alongside the user-visible values, so
//! the engine cannot collide with user data by construction. The IR
//! validator still refuses user ids starting with `__`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key injected into batch-isolated stores with the item position.
pub const BATCH_INDEX_KEY: &str = "__index__";

/// The mutable mapping threaded through a run.
#[derive(Debug, Clone, Default)]
pub struct SharedStore {
    values: Map<String, Value>,
    pub coordination: Coordination,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with declared workflow inputs at the root.
    pub fn with_inputs(inputs: Map<String, Value>) -> Self {
        Self {
            values: inputs,
            coordination: Coordination::default(),
        }
    }

    /// Assemble a store from explicit parts. Used by the namespaced wrapper
    /// to build merged view stores.
    pub fn from_parts(values: Map<String, Value>, coordination: Coordination) -> Self {
        Self {
            values,
            coordination,
        }
    }

    pub fn root(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn root_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// A node's namespace object, if it has written anything yet.
    pub fn namespace(&self, node_id: &str) -> Option<&Map<String, Value>> {
        self.values.get(node_id).and_then(Value::as_object)
    }

    /// Namespaced read: the node's namespace first, then the root.
    pub fn namespaced_read(&self, node_id: &str, key: &str) -> Option<&Value> {
        self.namespace(node_id)
            .and_then(|ns| ns.get(key))
            .or_else(|| self.values.get(key))
    }

    /// Namespaced write: `shared[node_id][key] = value`, creating the
    /// namespace object lazily on first write.
    pub fn namespaced_write(&mut self, node_id: &str, key: impl Into<String>, value: Value) {
        let entry = self
            .values
            .entry(node_id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            // A root input shadowed by node output: the namespace wins.
            *entry = Value::Object(Map::new());
        }
        if let Some(ns) = entry.as_object_mut() {
            ns.insert(key.into(), value);
        }
    }

    /// Build the isolated store for one batch item: shallow copy of the
    /// parent values plus the item binding and its position, fresh
    /// diagnostics, shared cancellation.
    pub fn child_for_item(&self, as_name: &str, item: Value, index: usize) -> SharedStore {
        let mut values = self.values.clone();
        values.insert(as_name.to_string(), item);
        values.insert(BATCH_INDEX_KEY.to_string(), Value::from(index));
        SharedStore {
            values,
            coordination: self.coordination.child(),
        }
    }

    /// Merge a finished batch item's cost attribution and diagnostics back
    /// into this store. Dropping the child without this call silently loses
    /// cost records.
    pub fn absorb_child(&mut self, child: SharedStore) {
        self.coordination
            .llm_calls
            .extend(child.coordination.llm_calls);
        for (node_id, mut warnings) in child.coordination.warnings {
            self.coordination
                .warnings
                .entry(node_id)
                .or_default()
                .append(&mut warnings);
        }
        for (node_id, mut errors) in child.coordination.template_errors {
            self.coordination
                .template_errors
                .entry(node_id)
                .or_default()
                .append(&mut errors);
        }
    }
}

/// The engine-owned coordination block: checkpoint, cost attribution,
/// diagnostics, cancellation, progress.
#[derive(Clone, Default)]
pub struct Coordination {
    /// The checkpoint enabling resumption.
    pub execution: Checkpoint,
    /// LLM usage records, append-ordered by completion.
    pub llm_calls: Vec<LlmCallRecord>,
    /// Node ids served from the checkpoint instead of executed.
    pub cache_hits: Vec<String>,
    /// Non-fatal diagnostics keyed by node id.
    pub warnings: BTreeMap<String, Vec<String>>,
    /// Template failures recorded in permissive mode, keyed by node id.
    pub template_errors: BTreeMap<String, Vec<String>>,
    /// Node ids whose configuration a repair pass mutated.
    pub modified_nodes: Vec<String>,
    /// Opaque id of the owning execution, when one exists.
    pub execution_id: Option<String>,
    /// Cooperative cancellation flag shared across batch workers.
    pub cancelled: Arc<AtomicBool>,
    /// Optional per-node progress sink.
    pub progress: Option<Arc<dyn ProgressSink>>,
    /// Workflow-executor invocation stack for cycle detection.
    pub executor_stack: Vec<WorkflowFrame>,
    /// Run context for nested workflow invocations, seeded by the runtime.
    pub executor_context: Option<Arc<crate::executor_node::ExecutorContext>>,
    /// Opaque planner hints forwarded to the repair collaborator.
    pub planner_cache_chunks: Option<Value>,
}

impl Coordination {
    /// Coordination block for a batch-isolated child store.
    pub fn child(&self) -> Coordination {
        Coordination {
            execution: Checkpoint::default(),
            llm_calls: Vec::new(),
            cache_hits: Vec::new(),
            warnings: BTreeMap::new(),
            template_errors: BTreeMap::new(),
            modified_nodes: Vec::new(),
            execution_id: self.execution_id.clone(),
            cancelled: Arc::clone(&self.cancelled),
            progress: None,
            executor_stack: self.executor_stack.clone(),
            executor_context: self.executor_context.clone(),
            planner_cache_chunks: self.planner_cache_chunks.clone(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn emit_progress(&self, event: ProgressEvent) {
        if let Some(sink) = &self.progress {
            sink.on_event(&event);
        }
    }
}

impl fmt::Debug for Coordination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordination")
            .field("execution", &self.execution)
            .field("llm_calls", &self.llm_calls.len())
            .field("cache_hits", &self.cache_hits)
            .field("modified_nodes", &self.modified_nodes)
            .field("execution_id", &self.execution_id)
            .field("cancelled", &self.is_cancelled())
            .field("executor_stack", &self.executor_stack)
            .finish_non_exhaustive()
    }
}

/// The resumption checkpoint. A caller who wants resumption passes the prior
/// store back in; the core never persists this to disk on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub completed_nodes: Vec<String>,
    pub node_actions: BTreeMap<String, String>,
    pub node_hashes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<String>,
}

impl Checkpoint {
    pub fn record_success(&mut self, node_id: &str, action: &str, config_hash: String) {
        if !self.completed_nodes.iter().any(|n| n == node_id) {
            self.completed_nodes.push(node_id.to_string());
        }
        self.node_actions
            .insert(node_id.to_string(), action.to_string());
        self.node_hashes.insert(node_id.to_string(), config_hash);
        if self.failed_node.as_deref() == Some(node_id) {
            self.failed_node = None;
        }
    }

    pub fn is_completed(&self, node_id: &str) -> bool {
        self.completed_nodes.iter().any(|n| n == node_id)
    }
}

/// One LLM usage record, as reported by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

/// A workflow-executor stack frame: name plus content identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowFrame {
    pub name: String,
    pub content_hash: String,
}

/// Sink for per-node progress events.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// Progress events emitted around each node.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEvent {
    NodeStart {
        node_id: String,
    },
    NodeEnd {
        node_id: String,
        action: Option<String>,
        error: Option<String>,
        duration_ms: u64,
        cached: bool,
    },
}
