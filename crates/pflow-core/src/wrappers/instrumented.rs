//! Instrumented wrapper: the outermost, always-present layer.
//!
//! Owns the per-node concerns the runtime relies on: the resolved-config
//! hash backing the checkpoint cache gate, wall-clock timing, LLM cost
//! attribution, progress events, trace events, and API-warning detection
//! over exec output. Failures leaving this wrapper are always categorized
//! and carry node id and type.
//!
//! Unlike the layers below it, this wrapper is a concrete type the runtime
//! holds directly: the chain is short and fixed, so explicit delegation
//! replaces the attribute forwarding the source language used.

use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{detection, EngineError, ErrorCategory, Result};
use crate::node::{Action, BoxedNode, Params};
use crate::store::{ProgressEvent, SharedStore};
use crate::template::resolver::split_params;
use crate::trace::TraceCollector;

#[derive(Debug, Clone)]
pub struct InstrumentedNode {
    inner: BoxedNode,
    node_id: String,
    node_type: String,
    params: Params,
    config_hash: String,
}

impl InstrumentedNode {
    pub fn new(inner: BoxedNode, node_id: impl Into<String>, node_type: impl Into<String>) -> Self {
        let node_type = node_type.into();
        Self {
            config_hash: hash_config(&node_type, &Params::new()),
            inner,
            node_id: node_id.into(),
            node_type,
            params: Params::new(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn node_type(&self) -> &str {
        &self.node_type
    }

    /// MD5 over the canonical JSON of the resolved static params plus the
    /// node type. Template-bearing params are excluded so the hash is known
    /// before execution; a repair that mutates them therefore invalidates
    /// the checkpoint through the static set it rewrites.
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn set_params(&mut self, params: Params) -> Result<()> {
        let (static_params, _) = split_params(&params);
        self.config_hash = hash_config(&self.node_type, &static_params);
        self.params = params.clone();
        self.inner.set_params(params)
    }

    /// Drive the wrapped chain through one full execution.
    pub fn run(&mut self, shared: &mut SharedStore, trace: &mut TraceCollector) -> Result<Action> {
        let started = Instant::now();
        shared.coordination.emit_progress(ProgressEvent::NodeStart {
            node_id: self.node_id.clone(),
        });
        trace.node_start(&self.node_id, &self.node_type, &Value::Object(self.params.clone()));
        trace.snapshot_before(&self.node_id, &self.node_type, shared);
        let llm_mark = shared.coordination.llm_calls.len();
        debug!(node_id = %self.node_id, node_type = %self.node_type, "node start");

        let outcome = self.run_phases(shared, trace);
        let duration_ms = started.elapsed().as_millis() as u64;

        // Attribute cost records added during this node.
        for record in &mut shared.coordination.llm_calls[llm_mark..] {
            if record.node_id.is_none() {
                record.node_id = Some(self.node_id.clone());
            }
        }
        let new_records = shared.coordination.llm_calls[llm_mark..].to_vec();
        trace.node_llm_calls(&self.node_id, &self.node_type, &new_records);

        match outcome {
            Ok(action) => {
                trace.snapshot_after(&self.node_id, &self.node_type, shared);
                trace.node_ok(&self.node_id, &self.node_type, &action, duration_ms);
                shared.coordination.emit_progress(ProgressEvent::NodeEnd {
                    node_id: self.node_id.clone(),
                    action: Some(action.clone()),
                    error: None,
                    duration_ms,
                    cached: false,
                });
                debug!(node_id = %self.node_id, %action, duration_ms, "node ok");
                Ok(action)
            }
            Err(err) => {
                let err = self.enrich_error(err);
                trace.node_error(&self.node_id, &self.node_type, &err, duration_ms);
                shared.coordination.emit_progress(ProgressEvent::NodeEnd {
                    node_id: self.node_id.clone(),
                    action: None,
                    error: Some(err.message.clone()),
                    duration_ms,
                    cached: false,
                });
                warn!(node_id = %self.node_id, category = %err.category, "node failed: {}", err.message);
                Err(err)
            }
        }
    }

    fn run_phases(&mut self, shared: &mut SharedStore, trace: &mut TraceCollector) -> Result<Action> {
        let prep_result = self.inner.prep(shared)?;
        let exec_result = self.inner.exec(prep_result.clone())?;
        trace.node_exec_done(&self.node_id, &self.node_type, &exec_result);

        // Transport success does not mean semantic success.
        if let Some(warning) = detection::scan_output(&exec_result) {
            return Err(warning);
        }

        self.inner.post(shared, prep_result, exec_result)
    }

    fn enrich_error(&self, mut err: EngineError) -> EngineError {
        if err.node_id.is_none() {
            err.node_id = Some(self.node_id.clone());
        }
        if err.node_type.is_none() {
            err.node_type = Some(self.node_type.clone());
        }
        // Sharpen the catch-all category when the message carries a clearer
        // signal; specific categories are left alone.
        if err.category == ErrorCategory::RuntimeError {
            let refined = detection::categorize_message(&err.message);
            if refined != ErrorCategory::RuntimeError {
                err.category = refined;
                err.fixable = refined.is_repairable();
            }
        }
        err
    }
}

fn hash_config(node_type: &str, static_params: &Params) -> String {
    let canonical = serde_json::json!({
        "params": static_params,
        "type": node_type,
    });
    format!("{:x}", md5::compute(canonical.to_string().as_bytes()))
}
