//! Static validation failures and the enhanced error surface: available
//! fields, similar paths, and "Did you mean" suggestions.

use pflow_core::ir::validator::{validate, validate_only};
use pflow_core::ir::WorkflowIr;
use pflow_core::testing::stub_registry;
use pflow_core::ErrorCategory;
use serde_json::{json, Value};

fn ir_from(value: Value) -> WorkflowIr {
    WorkflowIr::from_json_str(&value.to_string()).unwrap()
}

#[test]
fn path_typo_fails_validation_with_fix_proposal() {
    let ir = ir_from(json!({
        "inputs": {"n": {"type": "number", "required": true}},
        "nodes": [
            {"id": "double", "type": "stub-math", "params": {"x": "${n}"}},
            {"id": "report", "type": "stub-echo", "params": {"msg": "${double.resualt}"}}
        ]
    }));
    let err = validate(&ir, &stub_registry()).unwrap_err();
    assert_eq!(err.category, ErrorCategory::ValidationError);
    assert_eq!(
        err.available_fields.as_ref().unwrap(),
        &vec!["result (number)".to_string()]
    );
    assert!(err
        .suggestion
        .as_ref()
        .unwrap()
        .contains("${double.result}"));
    // Static validation executed nothing: no side effects to observe.
}

#[test]
fn unknown_node_type_suggests_the_closest_registered_type() {
    let ir = ir_from(json!({
        "nodes": [{"id": "run", "type": "stub-eco", "params": {"msg": "hi"}}]
    }));
    let err = validate(&ir, &stub_registry()).unwrap_err();
    assert_eq!(err.category, ErrorCategory::ValidationError);
    assert_eq!(err.suggestion.as_deref(), Some("Did you mean `stub-echo`?"));
}

#[test]
fn mcp_tool_typo_lists_that_servers_tools() {
    let ir = ir_from(json!({
        "nodes": [{
            "id": "send",
            "type": "mcp-slack-composio-SLACK_SEND_MESSGE",
            "params": {"channel": "#x"}
        }]
    }));
    let err = validate(&ir, &stub_registry()).unwrap_err();
    let fields = err.available_fields.unwrap();
    assert!(fields.contains(&"SLACK_SEND_MESSAGE".to_string()));
    assert!(fields.contains(&"SLACK_LIST_CHANNELS".to_string()));
}

#[test]
fn deep_structure_paths_validate_and_mismatches_list_similar() {
    let good = ir_from(json!({
        "nodes": [
            {"id": "fetch", "type": "stub-http", "params": {}},
            {"id": "pick", "type": "stub-echo",
             "params": {"msg": "${fetch.response.items[0].name}"}}
        ]
    }));
    assert!(validate(&good, &stub_registry()).is_ok());

    let bad = ir_from(json!({
        "nodes": [
            {"id": "fetch", "type": "stub-http", "params": {}},
            {"id": "pick", "type": "stub-echo",
             "params": {"msg": "${fetch.response.item}"}}
        ]
    }));
    let err = validate(&bad, &stub_registry()).unwrap_err();
    assert!(err.message.contains("similar paths"));
    assert!(err.message.contains("response.items"));
}

#[test]
fn validate_only_surfaces_typos_without_running_nodes() {
    let bad = ir_from(json!({
        "inputs": {"n": {"type": "number", "required": true}},
        "nodes": [
            {"id": "double", "type": "stub-math", "params": {"x": "${n}"}},
            {"id": "report", "type": "stub-echo", "params": {"msg": "${double.resualt}"}}
        ]
    }));
    assert!(validate_only(&bad, &stub_registry()).is_err());

    let good = ir_from(json!({
        "inputs": {"n": {"type": "number", "required": true}},
        "nodes": [
            {"id": "double", "type": "stub-math", "params": {"x": "${n}"}},
            {"id": "report", "type": "stub-echo", "params": {"msg": "${double.result}"}}
        ]
    }));
    let report = validate_only(&good, &stub_registry()).unwrap();
    assert_eq!(report.nodes_checked, 2);
    assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
}
