//! Repair collaborator seam.
//!
//! The engine never fixes workflows itself. On a repairable failure it hands
//! the current IR, the failed node, the categorized error, and a snapshot of
//! the shared store to a registered [`RepairAgent`]. The agent may return a
//! mutated IR; the runtime recompiles and resumes from the failed node.

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::ir::WorkflowIr;

/// Everything a repair collaborator gets to look at.
#[derive(Debug, Clone)]
pub struct RepairRequest {
    pub ir: WorkflowIr,
    pub failed_node: String,
    pub error: EngineError,
    /// Root of the shared store at failure time.
    pub shared_snapshot: Value,
    /// Opaque planner cache hints, forwarded untouched.
    pub planner_hints: Option<Value>,
}

/// External collaborator invoked on repairable failures.
pub trait RepairAgent: Send + Sync {
    /// Return `Ok(Some(ir))` with a mutated document to retry, `Ok(None)` to
    /// decline, or an error to abort the run with the original failure.
    fn repair(&self, request: RepairRequest) -> Result<Option<WorkflowIr>>;
}

/// Node ids whose specs differ between two documents (changed or added).
pub fn modified_node_ids(before: &WorkflowIr, after: &WorkflowIr) -> Vec<String> {
    after
        .nodes
        .iter()
        .filter(|node| before.node(&node.id) != Some(node))
        .map(|node| node.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn modified_ids_cover_changes_and_additions() {
        let before = WorkflowIr::from_json_str(
            &json!({
                "nodes": [
                    {"id": "a", "type": "stub-echo", "params": {"msg": "1"}},
                    {"id": "b", "type": "stub-echo", "params": {"msg": "2"}}
                ]
            })
            .to_string(),
        )
        .unwrap();
        let after = WorkflowIr::from_json_str(
            &json!({
                "nodes": [
                    {"id": "a", "type": "stub-echo", "params": {"msg": "1"}},
                    {"id": "b", "type": "stub-echo", "params": {"msg": "fixed"}},
                    {"id": "c", "type": "stub-echo", "params": {"msg": "new"}}
                ]
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(modified_node_ids(&before, &after), vec!["b", "c"]);
    }
}
