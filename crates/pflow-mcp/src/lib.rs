//! # MCP Virtualization Layer
//!
//! External MCP tools become first-class pflow nodes without per-tool code:
//! a [`ServerManifest`] describing one server's tools expands into virtual
//! registry entries named `mcp-<server>-<tool>`, every one of them backed by
//! the single universal [`McpToolNode`]. The compiler recognizes the
//! virtual entries and injects the server/tool pair through node config;
//! the node forwards resolved params to a [`McpToolClient`] implementation.
//!
//! Transport is out of scope here: callers supply the client. stdio/HTTP
//! plumbing, connection pooling, and subprocess supervision all live behind
//! that trait.

pub mod node;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pflow_core::node::BoxedNode;
use pflow_core::registry::{
    NodeInterface, OutputPort, PortSpec, RegistryEntry, RegistrySnapshot, VIRTUAL_MCP_PATH,
};

pub use node::{McpToolClient, McpToolNode};

/// One tool a server exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    /// Output shape shorthand: type-name strings at the leaves, containers
    /// describing nesting, e.g. `{"ok": "boolean", "message": {"ts": "string"}}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_structure: Option<Value>,
}

/// Everything the registry needs to virtualize one server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerManifest {
    pub server: String,
    pub tools: Vec<ToolManifest>,
}

impl ServerManifest {
    pub fn from_json_str(text: &str) -> pflow_core::Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            pflow_core::EngineError::validation(format!("invalid server manifest: {}", e))
        })
    }
}

/// The registry key for one server/tool pair.
pub fn virtual_type_id(server: &str, tool: &str) -> String {
    format!("mcp-{}-{}", server, tool)
}

/// Expand a manifest into virtual entries backed by the universal node.
pub fn install_server(
    snapshot: &mut RegistrySnapshot,
    manifest: &ServerManifest,
    client: Arc<dyn McpToolClient>,
) {
    let tool_names: Vec<String> = manifest.tools.iter().map(|t| t.name.clone()).collect();
    for tool in &manifest.tools {
        let type_id = virtual_type_id(&manifest.server, &tool.name);
        let entry = RegistryEntry {
            type_id: type_id.clone(),
            module: "pflow_mcp::node".to_string(),
            class_name: "McpToolNode".to_string(),
            file_path: Some(VIRTUAL_MCP_PATH.to_string()),
            interface: NodeInterface {
                inputs: tool.inputs.clone(),
                outputs: output_ports(tool.output_structure.as_ref()),
            },
        };
        let factory_client = Arc::clone(&client);
        snapshot.insert(
            entry,
            Arc::new(move || Box::new(McpToolNode::new(Arc::clone(&factory_client))) as BoxedNode),
        );
    }
    snapshot.insert_mcp_server(manifest.server.clone(), tool_names);
}

fn output_ports(structure: Option<&Value>) -> Vec<OutputPort> {
    let Some(Value::Object(map)) = structure else {
        return Vec::new();
    };
    map.iter()
        .map(|(name, shape)| match shape {
            Value::String(type_name) => OutputPort {
                name: name.clone(),
                value_type: type_name.clone(),
                structure: None,
            },
            container => OutputPort {
                name: name.clone(),
                value_type: if container.is_array() { "array" } else { "object" }.to_string(),
                structure: Some(container.clone()),
            },
        })
        .collect()
}
