//! # Trace Collector
//!
//! One collector accompanies each run and records everything that happened:
//! per-node blocks with resolved params, actions, durations and errors, LLM
//! call records, repair attempts with IR diffs, and an append-ordered event
//! stream. The finished document has a versioned schema and is the
//! agent-consumable debugging surface; it is stable enough to diff across
//! runs.
//!
//! Five knobs bound the document size. Exceeding a limit substitutes a
//! truncation marker instead of the payload, never an error.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::EnvLoader;
use crate::error::{EngineError, Result};
use crate::ir::WorkflowIr;
use crate::store::{LlmCallRecord, SharedStore};

/// Version of the trace document schema.
pub const TRACE_SCHEMA_VERSION: &str = "1.2.0";

/// Size limits applied while collecting. A `max_snapshot_bytes` of zero
/// disables shared-store snapshots entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceLimits {
    pub max_events: usize,
    pub max_event_payload_bytes: usize,
    pub max_snapshot_bytes: usize,
    pub max_param_bytes: usize,
    pub max_output_bytes: usize,
}

impl Default for TraceLimits {
    fn default() -> Self {
        Self {
            max_events: 1000,
            max_event_payload_bytes: 8 * 1024,
            max_snapshot_bytes: 0,
            max_param_bytes: 16 * 1024,
            max_output_bytes: 32 * 1024,
        }
    }
}

impl TraceLimits {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_events: EnvLoader::load_with_default("PFLOW_TRACE_MAX_EVENTS", defaults.max_events),
            max_event_payload_bytes: EnvLoader::load_with_default(
                "PFLOW_TRACE_MAX_EVENT_BYTES",
                defaults.max_event_payload_bytes,
            ),
            max_snapshot_bytes: EnvLoader::load_with_default(
                "PFLOW_TRACE_MAX_SNAPSHOT_BYTES",
                defaults.max_snapshot_bytes,
            ),
            max_param_bytes: EnvLoader::load_with_default(
                "PFLOW_TRACE_MAX_PARAM_BYTES",
                defaults.max_param_bytes,
            ),
            max_output_bytes: EnvLoader::load_with_default(
                "PFLOW_TRACE_MAX_OUTPUT_BYTES",
                defaults.max_output_bytes,
            ),
        }
    }
}

/// Bound a value to a byte budget, substituting a truncation marker.
fn bounded(value: &Value, max_bytes: usize) -> Value {
    let size = value.to_string().len();
    if size > max_bytes {
        Value::String(format!("[truncated: {} bytes]", size))
    } else {
        value.clone()
    }
}

/// One entry in the append-ordered event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub at: DateTime<Utc>,
    pub payload: Value,
}

/// Everything recorded about one node's executions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeTraceBlock {
    pub node_id: String,
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub llm_calls: Vec<LlmCallRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_before: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_after: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// One repair round: what failed, what the collaborator changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairAttempt {
    pub round: usize,
    pub failed_node: String,
    pub error: EngineError,
    pub modified_nodes: Vec<String>,
    pub ir_before: Value,
    pub ir_after: Value,
}

/// The finished, serializable trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceDocument {
    pub schema_version: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub events: Vec<TraceEvent>,
    pub truncated_events: usize,
    pub nodes: Vec<NodeTraceBlock>,
    pub llm_calls: Vec<LlmCallRecord>,
    pub repairs: Vec<RepairAttempt>,
}

impl TraceDocument {
    /// Write atomically to `<debug_root>/workflow-trace-<run-id>.json`.
    pub fn write_to(&self, debug_root: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(debug_root)?;
        let path = debug_root.join(format!("workflow-trace-{}.json", self.run_id));
        let tmp = debug_root.join(format!(".workflow-trace-{}.tmp", self.run_id));
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }
}

/// Collector for one run.
#[derive(Debug)]
pub struct TraceCollector {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    limits: TraceLimits,
    events: Vec<TraceEvent>,
    truncated_events: usize,
    nodes: Vec<NodeTraceBlock>,
    open_block: Option<usize>,
    llm_calls: Vec<LlmCallRecord>,
    repairs: Vec<RepairAttempt>,
}

impl TraceCollector {
    pub fn new(limits: TraceLimits) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            limits,
            events: Vec::new(),
            truncated_events: 0,
            nodes: Vec::new(),
            open_block: None,
            llm_calls: Vec::new(),
            repairs: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn limits(&self) -> &TraceLimits {
        &self.limits
    }

    pub fn push_event(&mut self, kind: &str, node_id: Option<&str>, payload: Value) {
        if self.events.len() >= self.limits.max_events {
            self.truncated_events += 1;
            return;
        }
        self.events.push(TraceEvent {
            kind: kind.to_string(),
            node_id: node_id.map(str::to_string),
            at: Utc::now(),
            payload: bounded(&payload, self.limits.max_event_payload_bytes),
        });
    }

    fn block_mut(&mut self, node_id: &str, node_type: &str) -> &mut NodeTraceBlock {
        if let Some(i) = self.open_block {
            if self.nodes[i].node_id == node_id {
                return &mut self.nodes[i];
            }
        }
        if let Some(i) = self.nodes.iter().rposition(|b| b.node_id == node_id) {
            return &mut self.nodes[i];
        }
        self.nodes.push(NodeTraceBlock {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            ..NodeTraceBlock::default()
        });
        self.nodes.last_mut().expect("block just pushed")
    }

    pub fn node_start(&mut self, node_id: &str, node_type: &str, params: &Value) {
        // A node may execute more than once (repair resume); every start
        // opens a fresh block.
        self.nodes.push(NodeTraceBlock {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            ..NodeTraceBlock::default()
        });
        self.open_block = Some(self.nodes.len() - 1);
        let bounded_params = bounded(params, self.limits.max_param_bytes);
        let block = self.block_mut(node_id, node_type);
        block.params = Some(bounded_params.clone());
        self.push_event("node_start", Some(node_id), bounded_params);
    }

    pub fn node_exec_done(&mut self, node_id: &str, node_type: &str, output: &Value) {
        let bounded_output = bounded(output, self.limits.max_output_bytes);
        let block = self.block_mut(node_id, node_type);
        block.output = Some(bounded_output.clone());
        self.push_event("node_exec_done", Some(node_id), bounded_output);
    }

    pub fn node_ok(&mut self, node_id: &str, node_type: &str, action: &str, duration_ms: u64) {
        let block = self.block_mut(node_id, node_type);
        block.action = Some(action.to_string());
        block.duration_ms = Some(duration_ms);
        self.push_event(
            "node_ok",
            Some(node_id),
            serde_json::json!({"action": action, "duration_ms": duration_ms}),
        );
    }

    pub fn node_error(
        &mut self,
        node_id: &str,
        node_type: &str,
        error: &EngineError,
        duration_ms: u64,
    ) {
        let block = self.block_mut(node_id, node_type);
        block.error = Some(error.clone());
        block.duration_ms = Some(duration_ms);
        let payload = serde_json::to_value(error).unwrap_or(Value::Null);
        self.push_event("node_error", Some(node_id), payload);
    }

    pub fn node_llm_calls(&mut self, node_id: &str, node_type: &str, records: &[LlmCallRecord]) {
        if records.is_empty() {
            return;
        }
        let block = self.block_mut(node_id, node_type);
        block.llm_calls.extend(records.iter().cloned());
        self.llm_calls.extend(records.iter().cloned());
    }

    pub fn node_cached(&mut self, node_id: &str, action: &str) {
        self.push_event(
            "node_cached",
            Some(node_id),
            serde_json::json!({"action": action}),
        );
    }

    /// Bounded snapshot of the store before a node runs. A zero snapshot
    /// budget disables these entirely.
    pub fn snapshot_before(&mut self, node_id: &str, node_type: &str, shared: &SharedStore) {
        if self.limits.max_snapshot_bytes == 0 {
            return;
        }
        let snapshot = bounded(
            &Value::Object(shared.root().clone()),
            self.limits.max_snapshot_bytes,
        );
        self.block_mut(node_id, node_type).shared_before = Some(snapshot);
    }

    pub fn snapshot_after(&mut self, node_id: &str, node_type: &str, shared: &SharedStore) {
        if self.limits.max_snapshot_bytes == 0 {
            return;
        }
        let snapshot = bounded(
            &Value::Object(shared.root().clone()),
            self.limits.max_snapshot_bytes,
        );
        self.block_mut(node_id, node_type).shared_after = Some(snapshot);
    }

    pub fn record_repair(
        &mut self,
        round: usize,
        failed_node: &str,
        error: &EngineError,
        modified_nodes: Vec<String>,
        ir_before: &WorkflowIr,
        ir_after: &WorkflowIr,
    ) {
        let attempt = RepairAttempt {
            round,
            failed_node: failed_node.to_string(),
            error: error.clone(),
            modified_nodes,
            ir_before: serde_json::to_value(ir_before).unwrap_or(Value::Null),
            ir_after: serde_json::to_value(ir_after).unwrap_or(Value::Null),
        };
        self.push_event(
            "repair",
            Some(failed_node),
            serde_json::json!({"round": round, "modified_nodes": attempt.modified_nodes}),
        );
        self.repairs.push(attempt);
    }

    /// Aggregate metrics per node, read back out of the collected blocks.
    pub fn node_durations(&self) -> Vec<(String, u64)> {
        self.nodes
            .iter()
            .filter_map(|b| b.duration_ms.map(|d| (b.node_id.clone(), d)))
            .collect()
    }

    pub fn finish(self) -> TraceDocument {
        TraceDocument {
            schema_version: TRACE_SCHEMA_VERSION.to_string(),
            run_id: self.run_id.to_string(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            events: self.events,
            truncated_events: self.truncated_events,
            nodes: self.nodes,
            llm_calls: self.llm_calls,
            repairs: self.repairs,
        }
    }
}
