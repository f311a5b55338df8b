//! Repair round-trips: a repairable failure hands the IR to the registered
//! collaborator, the mutated document recompiles, and the run resumes from
//! the failed node with prior work intact.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pflow_core::compiler::compile_ir;
use pflow_core::ir::WorkflowIr;
use pflow_core::runtime::repair::{RepairAgent, RepairRequest};
use pflow_core::runtime::Runtime;
use pflow_core::store::SharedStore;
use pflow_core::testing::stub_registry;
use pflow_core::Result;
use serde_json::{json, Map, Value};

fn ir_from(value: Value) -> WorkflowIr {
    WorkflowIr::from_json_str(&value.to_string()).unwrap()
}

/// Repairs the classic mistake: a numeric param written as a string.
struct FixNumericParam {
    calls: AtomicUsize,
}

impl FixNumericParam {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

impl RepairAgent for FixNumericParam {
    fn repair(&self, request: RepairRequest) -> Result<Option<WorkflowIr>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut ir = request.ir;
        if let Some(node) = ir.nodes.iter_mut().find(|n| n.id == request.failed_node) {
            node.params.insert("x".to_string(), json!(6));
        }
        Ok(Some(ir))
    }
}

/// Declines every request.
struct DeclineRepair;

impl RepairAgent for DeclineRepair {
    fn repair(&self, _request: RepairRequest) -> Result<Option<WorkflowIr>> {
        Ok(None)
    }
}

fn broken_ir() -> WorkflowIr {
    ir_from(json!({
        "nodes": [
            {"id": "pre", "type": "stub-echo", "params": {"msg": "before"}},
            {"id": "double", "type": "stub-math", "params": {"x": "six"}},
            {"id": "after", "type": "stub-echo", "params": {"msg": "${double.result}"}}
        ],
        "outputs": {"final": {"source": "${after.text}"}}
    }))
}

#[test]
fn repair_resumes_from_the_failed_node() {
    let registry = stub_registry();
    let agent = FixNumericParam::new();
    let runtime = Runtime::new(&registry).with_repair_agent(agent.clone());

    let mut shared = SharedStore::new();
    let result = runtime.run(
        compile_ir(&broken_ir(), &registry, Map::new()).unwrap(),
        &mut shared,
    );

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.modified_nodes, vec!["double"]);
    assert_eq!(result.outputs["final"], json!("12"));
    assert_eq!(
        shared.coordination.execution.completed_nodes,
        vec!["pre", "double", "after"]
    );
    // The repair round is on the record.
    let trace = result.trace.unwrap();
    assert_eq!(trace.repairs.len(), 1);
    assert_eq!(trace.repairs[0].failed_node, "double");
}

#[test]
fn completed_work_survives_repair_untouched() {
    let registry = stub_registry();
    let runtime = Runtime::new(&registry).with_repair_agent(FixNumericParam::new());

    let mut shared = SharedStore::new();
    let result = runtime.run(
        compile_ir(&broken_ir(), &registry, Map::new()).unwrap(),
        &mut shared,
    );
    assert!(result.success);
    // `pre` ran exactly once, before the failure; its output is unchanged.
    assert_eq!(
        shared.namespace("pre").unwrap()["text"],
        json!("before")
    );
    let trace = result.trace.unwrap();
    let pre_blocks = trace.nodes.iter().filter(|b| b.node_id == "pre").count();
    assert_eq!(pre_blocks, 1);
}

#[test]
fn declined_repair_terminates_with_the_original_error() {
    let registry = stub_registry();
    let runtime = Runtime::new(&registry).with_repair_agent(Arc::new(DeclineRepair));

    let mut shared = SharedStore::new();
    let result = runtime.run(
        compile_ir(&broken_ir(), &registry, Map::new()).unwrap(),
        &mut shared,
    );
    assert!(!result.success);
    assert_eq!(result.errors[0].node_id.as_deref(), Some("double"));
    assert_eq!(
        shared.coordination.execution.failed_node.as_deref(),
        Some("double")
    );
    assert!(result.modified_nodes.is_empty());
}

#[test]
fn non_repairable_failures_never_reach_the_agent() {
    let registry = stub_registry();
    let agent = FixNumericParam::new();
    let runtime = Runtime::new(&registry).with_repair_agent(agent.clone());

    // A permanently missing upstream resource is not the repair agent's
    // problem.
    let ir = ir_from(json!({
        "nodes": [{"id": "gate", "type": "stub-action", "params": {"action": "default"}}]
    }));
    let mut shared = SharedStore::new();
    shared.coordination.cancel();
    let result = runtime.run(
        compile_ir(&ir, &registry, Map::new()).unwrap(),
        &mut shared,
    );
    assert!(!result.success);
    assert_eq!(agent.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn repair_rounds_are_bounded() {
    struct UselessRepair;
    impl RepairAgent for UselessRepair {
        fn repair(&self, request: RepairRequest) -> Result<Option<WorkflowIr>> {
            // Returns the document unchanged; the same failure recurs.
            Ok(Some(request.ir))
        }
    }

    let registry = stub_registry();
    let runtime = Runtime::new(&registry).with_repair_agent(Arc::new(UselessRepair));
    let mut shared = SharedStore::new();
    let result = runtime.run(
        compile_ir(&broken_ir(), &registry, Map::new()).unwrap(),
        &mut shared,
    );
    assert!(!result.success);
    assert!(!result.errors.is_empty());
}
