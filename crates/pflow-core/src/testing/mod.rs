//! Test support: stub nodes honoring the node contract and registry
//! fixtures shared by unit and integration tests.
//!
//! Everything here is deterministic so runs are reproducible byte for byte.

pub mod stubs;

use std::sync::Arc;

use serde_json::{json, Value};

use crate::executor_node::WorkflowExecutorNode;
use crate::node::BoxedNode;
use crate::registry::{
    NodeFactory, NodeInterface, OutputPort, PortSpec, RegistryEntry, RegistrySnapshot,
    VIRTUAL_MCP_PATH,
};

pub use stubs::{
    ActionNode, CaptureParamsNode, EchoNode, ListSumNode, LlmStubNode, MathNode, ShellStubNode,
    SquareNode, WriteKeysNode,
};

/// Build a registry entry whose outputs follow a shorthand structure:
/// type-name strings at the leaves, containers becoming `structure`.
pub fn entry_with_outputs(type_id: &str, outputs: Value) -> RegistryEntry {
    let mut ports = Vec::new();
    if let Value::Object(map) = outputs {
        for (name, shape) in map {
            match shape {
                Value::String(type_name) => ports.push(OutputPort {
                    name,
                    value_type: type_name,
                    structure: None,
                }),
                container => ports.push(OutputPort {
                    name,
                    value_type: if container.is_array() { "array" } else { "object" }
                        .to_string(),
                    structure: Some(container),
                }),
            }
        }
    }
    RegistryEntry {
        type_id: type_id.to_string(),
        module: format!("pflow_core::testing::{}", type_id.replace('-', "_")),
        class_name: "Stub".to_string(),
        file_path: None,
        interface: NodeInterface {
            inputs: Vec::new(),
            outputs: ports,
        },
    }
}

fn input(name: &str, value_type: crate::ir::ValueType, required: bool) -> PortSpec {
    PortSpec {
        name: name.to_string(),
        value_type,
        required,
        description: String::new(),
        default: None,
    }
}

/// Factory that produces a params-capturing no-op node.
pub fn noop_factory() -> Arc<dyn NodeFactory> {
    Arc::new(|| Box::new(CaptureParamsNode::default()) as BoxedNode)
}

/// The registry every test suite compiles against.
pub fn stub_registry() -> RegistrySnapshot {
    use crate::ir::ValueType;

    let mut snap = RegistrySnapshot::new();

    let mut echo = entry_with_outputs("stub-echo", json!({"text": "string"}));
    echo.interface.inputs = vec![input("msg", ValueType::String, true)];
    snap.insert(echo, Arc::new(|| Box::new(EchoNode::default()) as BoxedNode));

    let mut math = entry_with_outputs("stub-math", json!({"result": "number"}));
    math.interface.inputs = vec![input("x", ValueType::Number, true)];
    snap.insert(math, Arc::new(|| Box::new(MathNode::default()) as BoxedNode));

    let square = entry_with_outputs("stub-square", json!({"result": "number"}));
    snap.insert(
        square,
        Arc::new(|| Box::new(SquareNode::default()) as BoxedNode),
    );

    let mut shell = entry_with_outputs(
        "stub-shell",
        json!({"stdout": "string", "exit_code": "number"}),
    );
    shell.interface.inputs = vec![input("cmd", ValueType::String, true)];
    snap.insert(
        shell,
        Arc::new(|| Box::new(ShellStubNode::default()) as BoxedNode),
    );

    let mut list_sum = entry_with_outputs("stub-list-sum", json!({"total": "number"}));
    list_sum.interface.inputs = vec![input("xs", ValueType::Array, true)];
    snap.insert(
        list_sum,
        Arc::new(|| Box::new(ListSumNode::default()) as BoxedNode),
    );

    let action = entry_with_outputs("stub-action", json!({"status": "string"}));
    snap.insert(
        action,
        Arc::new(|| Box::new(ActionNode::default()) as BoxedNode),
    );

    let mut llm = entry_with_outputs("stub-llm", json!({"answer": "string"}));
    llm.interface.inputs = vec![input("prompt", ValueType::String, true)];
    snap.insert(
        llm,
        Arc::new(|| Box::new(LlmStubNode::default()) as BoxedNode),
    );

    let http = entry_with_outputs(
        "stub-http",
        json!({"response": {"items": [{"id": "string", "name": "string"}], "total": "number"}}),
    );
    snap.insert(http, noop_factory());

    let mut slack = entry_with_outputs(
        "mcp-slack-composio-SLACK_SEND_MESSAGE",
        json!({"ok": "boolean", "ts": "string"}),
    );
    slack.file_path = Some(VIRTUAL_MCP_PATH.to_string());
    snap.insert(slack, noop_factory());
    snap.insert_mcp_server(
        "slack-composio",
        vec![
            "SLACK_SEND_MESSAGE".to_string(),
            "SLACK_LIST_CHANNELS".to_string(),
        ],
    );

    let executor = entry_with_outputs("workflow-executor", json!({"outputs": "object"}));
    snap.insert(
        executor,
        Arc::new(|| Box::new(WorkflowExecutorNode::new()) as BoxedNode),
    );

    snap
}
