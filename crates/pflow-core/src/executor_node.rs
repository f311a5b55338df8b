//! # Workflow-Executor Node
//!
//! A pseudo-node that runs another saved workflow as a single node of the
//! parent chain. Child inputs come from `param_mapping` (templates resolve
//! in the parent scope before this node sees them); child outputs surface
//! through `output_mapping`. `storage_mode` controls what the child can see
//! of the parent store; in every mode the child's results surface through
//! this node's namespace, preserving namespace isolation.
//!
//! Circular invocation is detected through an explicit execution stack in
//! the coordination block, compared by workflow name plus content hash, and
//! fails fast with a `cycle_error` naming the full stack.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::compiler::compile_ir;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::ir::WorkflowIr;
use crate::node::{Action, BoxedNode, Node, Params};
use crate::registry::RegistrySnapshot;
use crate::runtime::Runtime;
use crate::store::{SharedStore, WorkflowFrame};

/// Registry type id under which this node is conventionally registered.
pub const WORKFLOW_EXECUTOR_TYPE: &str = "workflow-executor";

/// Resolves workflow names and paths to IR documents. Supplied by the
/// caller; the engine has no opinion on where saved workflows live.
pub trait WorkflowLoader: Send + Sync {
    fn load(&self, name_or_path: &str) -> Result<WorkflowIr>;
}

/// Run context the runtime seeds into the coordination block so nested
/// workflow invocations compile against the same registry view.
#[derive(Clone)]
pub struct ExecutorContext {
    pub snapshot: RegistrySnapshot,
    pub loader: Option<Arc<dyn WorkflowLoader>>,
    pub config: EngineConfig,
}

impl std::fmt::Debug for ExecutorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorContext")
            .field("snapshot", &self.snapshot)
            .field("has_loader", &self.loader.is_some())
            .finish_non_exhaustive()
    }
}

/// How the child's shared store relates to the parent's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Child sees mapped params only; mapped outputs surface. The default.
    #[default]
    Mapped,
    /// Child sees mapped params only; only declared child outputs surface.
    Isolated,
    /// Child sees a copy of the parent scope plus mapped params; mapped
    /// outputs surface.
    Scoped,
    /// Child sees a copy of the parent scope; every key the child changed
    /// surfaces.
    Shared,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowExecutorNode {
    workflow_name: Option<String>,
    path: Option<String>,
    inline_ir: Option<Value>,
    param_mapping: Map<String, Value>,
    output_mapping: Map<String, Value>,
    storage_mode: StorageMode,
}

impl WorkflowExecutorNode {
    pub fn new() -> Self {
        Self::default()
    }

    fn child_ir(&self, loader: Option<&Arc<dyn WorkflowLoader>>) -> Result<(String, WorkflowIr)> {
        if let Some(inline) = &self.inline_ir {
            let ir: WorkflowIr = serde_json::from_value(inline.clone()).map_err(|e| {
                EngineError::validation(format!("inline workflow ir is invalid: {}", e))
            })?;
            return Ok(("<inline>".to_string(), ir));
        }
        let reference = self
            .workflow_name
            .as_deref()
            .or(self.path.as_deref())
            .ok_or_else(|| {
                EngineError::validation(
                    "workflow-executor needs one of 'workflow_name', 'path', or 'ir'",
                )
            })?;
        let loader = loader.ok_or_else(|| {
            EngineError::validation(format!(
                "no workflow loader is configured; cannot load '{}'",
                reference
            ))
        })?;
        Ok((reference.to_string(), loader.load(reference)?))
    }

    fn check_cycle(&self, stack: &[WorkflowFrame], frame: &WorkflowFrame) -> Result<()> {
        if stack.iter().any(|f| f.content_hash == frame.content_hash) {
            let chain: Vec<&str> = stack
                .iter()
                .map(|f| f.name.as_str())
                .chain(std::iter::once(frame.name.as_str()))
                .collect();
            return Err(EngineError::cycle(format!(
                "workflow invocation cycle: {}",
                chain.join(" -> ")
            ))
            .with_details(serde_json::json!({"stack": chain})));
        }
        Ok(())
    }

    fn child_store(&self, shared: &SharedStore, frame: WorkflowFrame) -> SharedStore {
        let mut values = Map::new();
        if matches!(self.storage_mode, StorageMode::Scoped | StorageMode::Shared) {
            values = shared.root().clone();
        }
        for (name, value) in &self.param_mapping {
            values.insert(name.clone(), value.clone());
        }
        let mut child = SharedStore::with_inputs(values);
        child.coordination = shared.coordination.child();
        child.coordination.executor_stack.push(frame);
        child
    }

    fn promote_outputs(
        &self,
        shared: &mut SharedStore,
        child: &SharedStore,
        parent_root_before: &Map<String, Value>,
    ) -> Result<()> {
        match self.storage_mode {
            StorageMode::Shared => {
                for (key, value) in child.root() {
                    if parent_root_before.get(key) != Some(value) {
                        shared.insert(key.clone(), value.clone());
                    }
                }
            }
            StorageMode::Isolated => {}
            StorageMode::Mapped | StorageMode::Scoped => {}
        }
        for (parent_field, child_output) in &self.output_mapping {
            let source = child_output.as_str().ok_or_else(|| {
                EngineError::validation(format!(
                    "output_mapping entry '{}' must name a child output",
                    parent_field
                ))
            })?;
            let value = child.get(source).cloned().unwrap_or(Value::Null);
            shared.insert(parent_field.clone(), value);
        }
        Ok(())
    }
}

impl Node for WorkflowExecutorNode {
    fn node_name(&self) -> String {
        "WorkflowExecutorNode".to_string()
    }

    fn set_params(&mut self, params: Params) -> Result<()> {
        self.workflow_name = params
            .get("workflow_name")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.path = params.get("path").and_then(Value::as_str).map(str::to_string);
        self.inline_ir = params.get("ir").cloned();
        self.param_mapping = params
            .get("param_mapping")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        self.output_mapping = params
            .get("output_mapping")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        self.storage_mode = match params.get("storage_mode") {
            Some(value) => serde_json::from_value(value.clone()).map_err(|_| {
                EngineError::validation(format!(
                    "storage_mode must be one of mapped, isolated, scoped, shared; got {}",
                    value
                ))
            })?,
            None => StorageMode::default(),
        };
        Ok(())
    }

    fn prep(&mut self, _shared: &SharedStore) -> Result<Value> {
        Ok(Value::Null)
    }

    fn exec(&mut self, prep_result: Value) -> Result<Value> {
        Ok(prep_result)
    }

    fn post(
        &mut self,
        shared: &mut SharedStore,
        _prep_result: Value,
        _exec_result: Value,
    ) -> Result<Action> {
        let context = shared
            .coordination
            .executor_context
            .clone()
            .ok_or_else(|| {
                EngineError::internal("workflow-executor ran outside a runtime-managed store")
            })?;

        let (name, child_ir) = self.child_ir(context.loader.as_ref())?;
        let frame = WorkflowFrame {
            name: name.clone(),
            content_hash: child_ir.content_hash(),
        };
        self.check_cycle(&shared.coordination.executor_stack, &frame)?;
        info!(workflow = %name, mode = ?self.storage_mode, "invoking child workflow");

        let parent_root_before = shared.root().clone();
        let mut child_store = self.child_store(shared, frame);
        let flow = compile_ir(&child_ir, &context.snapshot, self.param_mapping.clone())?;
        let runtime = Runtime::new(&context.snapshot).with_config(context.config.clone());
        let result = runtime.run(flow, &mut child_store);

        if !result.success {
            // Cost attribution still merges on failure.
            let coordination = std::mem::take(&mut child_store.coordination);
            shared.coordination.llm_calls.extend(coordination.llm_calls);
            let cause = result
                .errors
                .into_iter()
                .next()
                .unwrap_or_else(|| EngineError::runtime("child workflow failed"));
            if cause.is_fatal() {
                return Err(cause);
            }
            return Err(EngineError::runtime(format!(
                "child workflow '{}' failed: {}",
                name, cause.message
            ))
            .with_details(serde_json::to_value(&cause)?));
        }

        self.promote_outputs(shared, &child_store, &parent_root_before)?;
        shared.insert("outputs", Value::Object(result.outputs));
        shared.coordination.llm_calls.extend(
            std::mem::take(&mut child_store.coordination).llm_calls,
        );
        Ok(crate::ir::DEFAULT_ACTION.to_string())
    }

    fn clone_node(&self) -> BoxedNode {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_mode_parses_and_defaults() {
        let mut node = WorkflowExecutorNode::new();
        node.set_params(
            serde_json::json!({"workflow_name": "child", "storage_mode": "scoped"})
                .as_object()
                .unwrap()
                .clone(),
        )
        .unwrap();
        assert_eq!(node.storage_mode, StorageMode::Scoped);

        let mut node = WorkflowExecutorNode::new();
        node.set_params(
            serde_json::json!({"workflow_name": "child"})
                .as_object()
                .unwrap()
                .clone(),
        )
        .unwrap();
        assert_eq!(node.storage_mode, StorageMode::Mapped);

        let mut node = WorkflowExecutorNode::new();
        let err = node
            .set_params(
                serde_json::json!({"workflow_name": "child", "storage_mode": "bogus"})
                    .as_object()
                    .unwrap()
                    .clone(),
            )
            .unwrap_err();
        assert!(err.message.contains("storage_mode"));
    }

    #[test]
    fn missing_reference_is_rejected() {
        let mut node = WorkflowExecutorNode::new();
        node.set_params(Map::new()).unwrap();
        let err = node.child_ir(None).unwrap_err();
        assert!(err.message.contains("workflow_name"));
    }

    #[test]
    fn cycle_check_reports_the_chain() {
        let node = WorkflowExecutorNode::new();
        let stack = vec![
            WorkflowFrame {
                name: "a".into(),
                content_hash: "h1".into(),
            },
            WorkflowFrame {
                name: "b".into(),
                content_hash: "h2".into(),
            },
        ];
        let frame = WorkflowFrame {
            name: "a-again".into(),
            content_hash: "h1".into(),
        };
        let err = node.check_cycle(&stack, &frame).unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::CycleError);
        assert!(err.message.contains("a -> b -> a-again"));
    }
}
