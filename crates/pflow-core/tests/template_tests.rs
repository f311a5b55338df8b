//! Template dataflow across node boundaries: type preservation, the
//! shell-to-structure auto-parse seam, and complex interpolation.

use pflow_core::compiler::compile_ir;
use pflow_core::ir::WorkflowIr;
use pflow_core::runtime::Runtime;
use pflow_core::store::SharedStore;
use pflow_core::testing::stub_registry;
use serde_json::{json, Map, Value};

fn ir_from(value: Value) -> WorkflowIr {
    WorkflowIr::from_json_str(&value.to_string()).unwrap()
}

#[test]
fn object_inputs_round_trip_without_stringification() {
    let registry = stub_registry();
    let ir = ir_from(json!({
        "inputs": {"x": {"type": "object", "required": true}},
        "nodes": [
            {"id": "fetch", "type": "stub-http", "params": {"cfg": "${x}"}}
        ]
    }));
    let mut shared = SharedStore::new();
    let payload = json!({"endpoint": "/v1/items", "retries": 3, "nested": {"deep": [1, 2]}});
    shared.insert("x", payload.clone());

    let result = Runtime::new(&registry).run(
        compile_ir(&ir, &registry, Map::new()).unwrap(),
        &mut shared,
    );
    assert!(result.success, "errors: {:?}", result.errors);
    // The capture node stores the params it received: `cfg` is the object
    // itself, not its JSON string.
    assert_eq!(
        shared.namespace("fetch").unwrap()["params"]["cfg"],
        payload
    );
}

#[test]
fn shell_stdout_auto_parses_into_declared_arrays() {
    let registry = stub_registry();
    let ir = ir_from(json!({
        "nodes": [
            {"id": "emit", "type": "stub-shell", "params": {"cmd": "echo '[1,2,3]'"}},
            {"id": "consume", "type": "stub-list-sum", "params": {"xs": "${emit.stdout}"}}
        ],
        "outputs": {"total": {"source": "${consume.total}"}}
    }));
    let mut shared = SharedStore::new();
    let result = Runtime::new(&registry).run(
        compile_ir(&ir, &registry, Map::new()).unwrap(),
        &mut shared,
    );
    assert!(result.success, "errors: {:?}", result.errors);
    // The newline-terminated JSON string became a real list.
    assert_eq!(result.outputs["total"], json!(6));
    // The producing node's own output is untouched.
    assert_eq!(
        shared.namespace("emit").unwrap()["stdout"],
        json!("[1,2,3]\n")
    );
}

#[test]
fn complex_templates_interpolate_into_strings() {
    let registry = stub_registry();
    let ir = ir_from(json!({
        "inputs": {
            "name": {"type": "string", "required": true},
            "count": {"type": "number", "required": true}
        },
        "nodes": [
            {"id": "report", "type": "stub-echo",
             "params": {"msg": "user ${name} has ${count} items"}}
        ],
        "outputs": {"line": {"source": "${report.text}"}}
    }));
    let mut shared = SharedStore::new();
    shared.insert("name", json!("ada"));
    shared.insert("count", json!(3));
    let result = Runtime::new(&registry).run(
        compile_ir(&ir, &registry, Map::new()).unwrap(),
        &mut shared,
    );
    assert!(result.success);
    assert_eq!(result.outputs["line"], json!("user ada has 3 items"));
}

#[test]
fn escaped_openers_pass_through_to_nodes() {
    let registry = stub_registry();
    let ir = ir_from(json!({
        "nodes": [
            {"id": "report", "type": "stub-echo", "params": {"msg": "pay $${amount} now"}}
        ]
    }));
    let mut shared = SharedStore::new();
    let result = Runtime::new(&registry).run(
        compile_ir(&ir, &registry, Map::new()).unwrap(),
        &mut shared,
    );
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(
        shared.namespace("report").unwrap()["text"],
        json!("pay ${amount} now")
    );
}

#[test]
fn array_index_paths_reach_into_upstream_outputs() {
    let registry = stub_registry();
    let ir = ir_from(json!({
        "inputs": {"items": {"type": "array", "required": true}},
        "nodes": [
            {"id": "pick", "type": "stub-echo", "params": {"msg": "${items[1]}"}}
        ]
    }));
    let mut shared = SharedStore::new();
    shared.insert("items", json!(["zero", "one", "two"]));
    let result = Runtime::new(&registry).run(
        compile_ir(&ir, &registry, Map::new()).unwrap(),
        &mut shared,
    );
    assert!(result.success);
    assert_eq!(shared.namespace("pick").unwrap()["text"], json!("one"));
}

#[test]
fn missing_runtime_reference_fails_the_node_in_strict_mode() {
    let registry = stub_registry();
    // `maybe` is declared but optional and never provided, so the static
    // check passes and the failure happens at resolution time.
    let ir = ir_from(json!({
        "inputs": {"maybe": {"type": "string"}},
        "nodes": [
            {"id": "report", "type": "stub-echo", "params": {"msg": "${maybe}"}}
        ]
    }));
    let mut shared = SharedStore::new();
    let result = Runtime::new(&registry).run(
        compile_ir(&ir, &registry, Map::new()).unwrap(),
        &mut shared,
    );
    assert!(!result.success);
    assert_eq!(
        result.errors[0].category,
        pflow_core::ErrorCategory::TemplateError
    );
    assert_eq!(result.errors[0].node_id.as_deref(), Some("report"));
}

#[test]
fn permissive_mode_records_diagnostics_and_continues() {
    let registry = stub_registry();
    let ir = ir_from(json!({
        "inputs": {"maybe": {"type": "string"}},
        "template_resolution_mode": "permissive",
        "nodes": [
            {"id": "report", "type": "stub-echo", "params": {"msg": "${maybe}"}}
        ]
    }));
    let mut shared = SharedStore::new();
    let result = Runtime::new(&registry).run(
        compile_ir(&ir, &registry, Map::new()).unwrap(),
        &mut shared,
    );
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(shared.coordination.template_errors["report"].len(), 1);
    // The unresolved parameter passed through verbatim.
    assert_eq!(
        shared.namespace("report").unwrap()["text"],
        json!("${maybe}")
    );
}
