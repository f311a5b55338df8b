//! # Execution Runtime
//!
//! Single-threaded and cooperative: one node advances at a time. The loop
//! consults the checkpoint before each node (cache gate), executes the
//! wrapped chain through the instrumented layer, and follows the returned
//! action to the next node. Repairable failures may round-trip through the
//! registered repair collaborator; the mutated document is recompiled and
//! execution resumes from the failed node, never from scratch.
//!
//! The checkpoint lives entirely inside the shared store: resume by passing
//! the previous store back in, or start clean with an empty one.

pub mod repair;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::compiler::{compile_ir, Flow};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor_node::{ExecutorContext, WorkflowLoader};
use crate::ir::DEFAULT_ACTION;
use crate::registry::RegistrySnapshot;
use crate::store::{ProgressEvent, SharedStore};
use crate::template::resolver::{resolve_param_value, Overlay};
use crate::trace::{TraceCollector, TraceDocument};

use repair::{modified_node_ids, RepairAgent, RepairRequest};

/// Recorded actions with this value never satisfy the cache gate.
const ERROR_ACTION: &str = "error";

/// Per-node execution metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub duration_ms: u64,
    pub llm_calls: usize,
    pub llm_input_tokens: u64,
    pub llm_output_tokens: u64,
    pub llm_cost_usd: f64,
}

/// Aggregate metrics for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_duration_ms: u64,
    pub nodes: BTreeMap<String, NodeMetrics>,
    pub llm_calls: usize,
    pub llm_cost_usd: f64,
}

/// What `run` hands back.
#[derive(Debug)]
pub struct ExecutionResult {
    pub success: bool,
    pub outputs: Map<String, Value>,
    pub errors: Vec<EngineError>,
    pub trace: Option<TraceDocument>,
    pub metrics: Metrics,
    pub cache_hits: Vec<String>,
    pub modified_nodes: Vec<String>,
}

/// Drives compiled flows.
pub struct Runtime<'a> {
    snapshot: &'a RegistrySnapshot,
    config: EngineConfig,
    repair_agent: Option<Arc<dyn RepairAgent>>,
    workflow_loader: Option<Arc<dyn WorkflowLoader>>,
    persist_trace: bool,
}

impl<'a> Runtime<'a> {
    pub fn new(snapshot: &'a RegistrySnapshot) -> Self {
        Self {
            snapshot,
            config: EngineConfig::default(),
            repair_agent: None,
            workflow_loader: None,
            persist_trace: false,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_repair_agent(mut self, agent: Arc<dyn RepairAgent>) -> Self {
        self.repair_agent = Some(agent);
        self
    }

    /// Loader handed to nested workflow-executor nodes.
    pub fn with_workflow_loader(mut self, loader: Arc<dyn WorkflowLoader>) -> Self {
        self.workflow_loader = Some(loader);
        self
    }

    /// Also write the finished trace to `<debug_root>`.
    pub fn with_persisted_trace(mut self, persist: bool) -> Self {
        self.persist_trace = persist;
        self
    }

    /// Execute a compiled flow against a shared store.
    pub fn run(&self, mut flow: Flow, shared: &mut SharedStore) -> ExecutionResult {
        let started = Instant::now();
        let mut trace = TraceCollector::new(self.config.trace_limits.clone());
        let mut errors = Vec::new();

        if shared.coordination.execution_id.is_none() {
            shared.coordination.execution_id = Some(crate::cache::generate_execution_id());
        }
        if shared.coordination.executor_context.is_none() {
            shared.coordination.executor_context = Some(Arc::new(ExecutorContext {
                snapshot: self.snapshot.clone(),
                loader: self.workflow_loader.clone(),
                config: self.config.clone(),
            }));
        }

        if let Err(err) = self.seed_inputs(&flow, shared) {
            return self.finish(false, Map::new(), vec![err], trace, shared, started);
        }

        let mut repair_rounds = 0;
        let mut current = Some(flow.start_id().to_string());
        let mut success = true;

        while let Some(node_id) = current.take() {
            if shared.coordination.is_cancelled() {
                warn!(node_id = %node_id, "run cancelled; checkpoint preserved");
                errors.push(
                    EngineError::runtime("run cancelled before node started")
                        .with_node_id(node_id)
                        .with_fixable(false),
                );
                success = false;
                break;
            }

            let Some(node) = flow.node_mut(&node_id) else {
                errors.push(EngineError::internal(format!(
                    "flow has no node '{}' bound in the chain",
                    node_id
                )));
                success = false;
                break;
            };
            let config_hash = node.config_hash().to_string();

            // Cache gate: completed before, identical resolved config, and a
            // non-error recorded action replay without executing.
            let checkpoint = &shared.coordination.execution;
            let recorded = checkpoint.node_actions.get(&node_id).cloned();
            if checkpoint.is_completed(&node_id)
                && checkpoint.node_hashes.get(&node_id) == Some(&config_hash)
                && recorded.as_deref().is_some_and(|a| a != ERROR_ACTION)
            {
                let action = recorded.unwrap_or_else(|| DEFAULT_ACTION.to_string());
                shared.coordination.cache_hits.push(node_id.clone());
                trace.node_cached(&node_id, &action);
                shared.coordination.emit_progress(ProgressEvent::NodeEnd {
                    node_id: node_id.clone(),
                    action: Some(action.clone()),
                    error: None,
                    duration_ms: 0,
                    cached: true,
                });
                info!(node_id = %node_id, %action, "checkpoint hit");
                current = flow.successor(&node_id, &action).map(str::to_string);
                continue;
            }

            match node.run(shared, &mut trace) {
                Ok(action) => {
                    shared
                        .coordination
                        .execution
                        .record_success(&node_id, &action, config_hash);
                    current = flow.successor(&node_id, &action).map(str::to_string);
                }
                Err(err) => {
                    shared.coordination.execution.failed_node = Some(node_id.clone());

                    if err.is_repairable() && repair_rounds < self.config.max_repair_rounds {
                        if let Some(new_flow) = self.attempt_repair(
                            &flow,
                            &node_id,
                            &err,
                            shared,
                            &mut trace,
                            repair_rounds,
                        ) {
                            flow = new_flow;
                            repair_rounds += 1;
                            current = Some(node_id);
                            continue;
                        }
                    }

                    errors.push(err);
                    success = false;
                    break;
                }
            }
        }

        let mut outputs = Map::new();
        if success {
            match self.populate_outputs(&flow, shared) {
                Ok(resolved) => outputs = resolved,
                Err(err) => {
                    errors.push(err);
                    success = false;
                }
            }
        }

        self.finish(success, outputs, errors, trace, shared, started)
    }

    /// Seed declared inputs from compile-time initial params and declared
    /// defaults, then enforce presence and declared types.
    fn seed_inputs(&self, flow: &Flow, shared: &mut SharedStore) -> Result<()> {
        for (name, spec) in &flow.ir().inputs {
            if shared.get(name).is_none() {
                if let Some(value) = flow.initial_params().get(name) {
                    shared.insert(name.clone(), value.clone());
                } else if let Some(default) = &spec.default {
                    shared.insert(name.clone(), default.clone());
                }
            }
            match shared.get(name) {
                None if spec.required => {
                    return Err(EngineError::validation(format!(
                        "required input '{}' was not provided",
                        name
                    )));
                }
                Some(value) if !spec.value_type.accepts(value) => {
                    return Err(EngineError::validation(format!(
                        "input '{}' must be {}, got {}",
                        name,
                        spec.value_type.as_str(),
                        json_type_name(value)
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn attempt_repair(
        &self,
        flow: &Flow,
        failed_node: &str,
        error: &EngineError,
        shared: &mut SharedStore,
        trace: &mut TraceCollector,
        round: usize,
    ) -> Option<Flow> {
        let agent = self.repair_agent.as_ref()?;
        let request = RepairRequest {
            ir: flow.ir().clone(),
            failed_node: failed_node.to_string(),
            error: error.clone(),
            shared_snapshot: Value::Object(shared.root().clone()),
            planner_hints: shared.coordination.planner_cache_chunks.clone(),
        };
        let mutated = match agent.repair(request) {
            Ok(Some(ir)) => ir,
            Ok(None) => return None,
            Err(repair_err) => {
                warn!(node_id = %failed_node, "repair agent failed: {}", repair_err.message);
                return None;
            }
        };

        let modified = modified_node_ids(flow.ir(), &mutated);
        let new_flow =
            match compile_ir(&mutated, self.snapshot, flow.initial_params().clone()) {
                Ok(new_flow) => new_flow,
                Err(compile_err) => {
                    warn!(
                        node_id = %failed_node,
                        "repaired IR failed to compile: {}", compile_err.message
                    );
                    return None;
                }
            };
        if new_flow.node(failed_node).is_none() {
            warn!(node_id = %failed_node, "repaired IR dropped the failed node");
            return None;
        }

        trace.record_repair(
            round,
            failed_node,
            error,
            modified.clone(),
            flow.ir(),
            new_flow.ir(),
        );
        for id in modified {
            if !shared.coordination.modified_nodes.contains(&id) {
                shared.coordination.modified_nodes.push(id);
            }
        }
        info!(node_id = %failed_node, round, "repair accepted; resuming");
        Some(new_flow)
    }

    /// Resolve declared outputs against the final store and promote them to
    /// the root for consumer convenience.
    fn populate_outputs(&self, flow: &Flow, shared: &mut SharedStore) -> Result<Map<String, Value>> {
        let mut outputs = Map::new();
        for (name, spec) in &flow.ir().outputs {
            let resolved = {
                let overlay = Overlay::of_root(shared.root());
                resolve_param_value(&Value::String(spec.source.clone()), &overlay, None)?
            };
            shared.insert(name.clone(), resolved.clone());
            outputs.insert(name.clone(), resolved);
        }
        Ok(outputs)
    }

    fn finish(
        &self,
        success: bool,
        outputs: Map<String, Value>,
        errors: Vec<EngineError>,
        trace: TraceCollector,
        shared: &mut SharedStore,
        started: Instant,
    ) -> ExecutionResult {
        let metrics = self.build_metrics(&trace, shared, started);
        let document = trace.finish();
        if self.persist_trace {
            if let Err(err) = document.write_to(&self.config.debug_root) {
                warn!("trace persistence failed: {}", err.message);
            }
        }
        ExecutionResult {
            success,
            outputs,
            errors,
            trace: Some(document),
            metrics,
            cache_hits: shared.coordination.cache_hits.clone(),
            modified_nodes: shared.coordination.modified_nodes.clone(),
        }
    }

    fn build_metrics(
        &self,
        trace: &TraceCollector,
        shared: &SharedStore,
        started: Instant,
    ) -> Metrics {
        let mut metrics = Metrics {
            total_duration_ms: started.elapsed().as_millis() as u64,
            ..Metrics::default()
        };
        for (node_id, duration_ms) in trace.node_durations() {
            let entry = metrics.nodes.entry(node_id).or_default();
            entry.duration_ms += duration_ms;
        }
        for record in &shared.coordination.llm_calls {
            metrics.llm_calls += 1;
            metrics.llm_cost_usd += record.cost_usd;
            if let Some(node_id) = &record.node_id {
                let entry = metrics.nodes.entry(node_id.clone()).or_default();
                entry.llm_calls += 1;
                entry.llm_input_tokens += record.input_tokens;
                entry.llm_output_tokens += record.output_tokens;
                entry.llm_cost_usd += record.cost_usd;
            }
        }
        metrics
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
