//! The universal MCP tool node.
//!
//! One node class serves every virtual registry entry. The compiler injects
//! the server and tool names through config; every remaining resolved param
//! becomes a tool argument. The raw tool response is written into the node's
//! scope unmodified, which is what lets the instrumented wrapper's
//! API-warning detection see `"ok": false` envelopes and error bodies.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use pflow_core::compiler::{MCP_SERVER_KEY, MCP_TOOL_KEY};
use pflow_core::error::{EngineError, Result};
use pflow_core::node::{Action, BoxedNode, Node, Params};
use pflow_core::store::SharedStore;

/// Transport seam. Implementations own connection lifecycle, including
/// supervision and cleanup of any server subprocesses they spawn; the
/// engine never manages MCP processes itself.
pub trait McpToolClient: Send + Sync {
    fn call_tool(&self, server: &str, tool: &str, args: &Map<String, Value>) -> Result<Value>;
}

pub struct McpToolNode {
    client: Arc<dyn McpToolClient>,
    server: String,
    tool: String,
    args: Map<String, Value>,
}

impl std::fmt::Debug for McpToolNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpToolNode")
            .field("server", &self.server)
            .field("tool", &self.tool)
            .field("args", &self.args.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Clone for McpToolNode {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            server: self.server.clone(),
            tool: self.tool.clone(),
            args: self.args.clone(),
        }
    }
}

impl McpToolNode {
    pub fn new(client: Arc<dyn McpToolClient>) -> Self {
        Self {
            client,
            server: String::new(),
            tool: String::new(),
            args: Map::new(),
        }
    }
}

impl Node for McpToolNode {
    fn node_name(&self) -> String {
        format!("McpToolNode({}/{})", self.server, self.tool)
    }

    fn set_params(&mut self, params: Params) -> Result<()> {
        let mut args = params;
        self.server = args
            .remove(MCP_SERVER_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        self.tool = args
            .remove(MCP_TOOL_KEY)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        self.args = args;
        Ok(())
    }

    fn prep(&mut self, _shared: &SharedStore) -> Result<Value> {
        if self.server.is_empty() || self.tool.is_empty() {
            return Err(EngineError::internal(
                "MCP node was instantiated without server/tool config",
            ));
        }
        Ok(Value::Object(self.args.clone()))
    }

    fn exec(&mut self, prep_result: Value) -> Result<Value> {
        let args = prep_result
            .as_object()
            .cloned()
            .unwrap_or_default();
        debug!(server = %self.server, tool = %self.tool, "calling MCP tool");
        self.client
            .call_tool(&self.server, &self.tool, &args)
            .map_err(|mut err| {
                if err.mcp_error.is_none() {
                    err.mcp_error = Some(Value::String(format!(
                        "{}/{} transport failure",
                        self.server, self.tool
                    )));
                }
                err
            })
    }

    fn post(
        &mut self,
        shared: &mut SharedStore,
        _prep_result: Value,
        exec_result: Value,
    ) -> Result<Action> {
        // Objects spread into the node scope so declared outputs line up;
        // anything else lands under `result`.
        match exec_result {
            Value::Object(map) => {
                for (key, value) in map {
                    shared.insert(key, value);
                }
            }
            other => shared.insert("result", other),
        }
        Ok("default".to_string())
    }

    fn clone_node(&self) -> BoxedNode {
        Box::new(self.clone())
    }
}

#[cfg(test)]
pub(crate) fn tests_client() -> Arc<dyn McpToolClient> {
    Arc::new(EchoClient::default())
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct EchoClient;

#[cfg(test)]
impl McpToolClient for EchoClient {
    fn call_tool(&self, server: &str, tool: &str, args: &Map<String, Value>) -> Result<Value> {
        Ok(serde_json::json!({
            "ok": true,
            "server": server,
            "tool": tool,
            "args": args,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{install_server, ServerManifest, ToolManifest};
    use pflow_core::compiler::compile_ir;
    use pflow_core::ir::WorkflowIr;
    use pflow_core::registry::RegistrySnapshot;
    use pflow_core::runtime::Runtime;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingClient {
        calls: Mutex<Vec<(String, String, Map<String, Value>)>>,
        response: Value,
    }

    impl RecordingClient {
        fn new(response: Value) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                response,
            })
        }
    }

    impl McpToolClient for RecordingClient {
        fn call_tool(
            &self,
            server: &str,
            tool: &str,
            args: &Map<String, Value>,
        ) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((server.to_string(), tool.to_string(), args.clone()));
            Ok(self.response.clone())
        }
    }

    fn manifest() -> ServerManifest {
        ServerManifest {
            server: "slack-composio".to_string(),
            tools: vec![ToolManifest {
                name: "SLACK_SEND_MESSAGE".to_string(),
                description: String::new(),
                inputs: Vec::new(),
                output_structure: Some(json!({"ok": "boolean", "ts": "string"})),
            }],
        }
    }

    #[test]
    fn virtual_node_calls_through_the_client() {
        let client = RecordingClient::new(json!({"ok": true, "ts": "123.456"}));
        let mut snapshot = RegistrySnapshot::new();
        install_server(&mut snapshot, &manifest(), client.clone());

        let ir = WorkflowIr::from_json_str(
            &json!({
                "inputs": {"channel": {"type": "string", "required": true}},
                "nodes": [{
                    "id": "send",
                    "type": "mcp-slack-composio-SLACK_SEND_MESSAGE",
                    "params": {"channel": "${channel}", "text": "hello"}
                }],
                "outputs": {"ts": {"source": "${send.ts}"}}
            })
            .to_string(),
        )
        .unwrap();

        let flow = compile_ir(&ir, &snapshot, Map::new()).unwrap();
        let mut shared = pflow_core::SharedStore::new();
        shared.insert("channel", json!("#general"));
        let result = Runtime::new(&snapshot).run(flow, &mut shared);
        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.outputs["ts"], json!("123.456"));

        let calls = client.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (server, tool, args) = &calls[0];
        assert_eq!(server, "slack-composio");
        assert_eq!(tool, "SLACK_SEND_MESSAGE");
        assert_eq!(args["channel"], json!("#general"));
        // Injected config never leaks into tool arguments.
        assert!(!args.contains_key(MCP_SERVER_KEY));
    }

    #[test]
    fn semantic_failures_surface_as_categorized_errors() {
        let client = RecordingClient::new(json!({"ok": false, "error": "channel_not_found"}));
        let mut snapshot = RegistrySnapshot::new();
        install_server(&mut snapshot, &manifest(), client);

        let ir = WorkflowIr::from_json_str(
            &json!({
                "nodes": [{
                    "id": "send",
                    "type": "mcp-slack-composio-SLACK_SEND_MESSAGE",
                    "params": {"channel": "#nope", "text": "hello"}
                }]
            })
            .to_string(),
        )
        .unwrap();

        let flow = compile_ir(&ir, &snapshot, Map::new()).unwrap();
        let mut shared = pflow_core::SharedStore::new();
        let result = Runtime::new(&snapshot).run(flow, &mut shared);
        assert!(!result.success);
        assert_eq!(
            result.errors[0].category,
            pflow_core::ErrorCategory::ResourceError
        );
        assert_eq!(result.errors[0].node_id.as_deref(), Some("send"));
    }

    #[test]
    fn sloppy_spellings_resolve_to_the_virtual_entry() {
        let client = RecordingClient::new(json!({"ok": true}));
        let mut snapshot = RegistrySnapshot::new();
        install_server(&mut snapshot, &manifest(), client);

        let resolved = snapshot.resolve("SLACK-SEND-MESSAGE").unwrap();
        assert_eq!(
            resolved.canonical_id,
            "mcp-slack-composio-SLACK_SEND_MESSAGE"
        );
    }
}
