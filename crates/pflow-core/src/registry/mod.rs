//! # Node Registry
//!
//! The catalog of known node types. A [`RegistrySnapshot`] is a fresh,
//! read-only view handed to each compilation: entry metadata (including the
//! declared input/output interface the template validator consumes), the set
//! of known MCP servers, and the factories that instantiate nodes.
//!
//! MCP tools are *virtual* node types: many registry keys of the form
//! `mcp-<server>-<tool>` share one universal client node. Server names may
//! contain dashes, so [`RegistrySnapshot::split_virtual_id`] uses a greedy
//! longest-match against the known server set. `resolve` normalizes sloppy
//! user spellings in four steps: exact match, all-dashes-to-underscores,
//! greedy server match with an underscore-converted tool tail, and finally a
//! unique suffix match. Anything still unresolved produces a structured
//! error with fuzzy suggestions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::ir::ValueType;
use crate::node::BoxedNode;
use crate::suggest;

/// Sentinel `file_path` for virtual MCP entries.
pub const VIRTUAL_MCP_PATH: &str = "virtual://mcp";

/// Declared input of a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Declared output of a node type. `structure` describes the nested shape
/// with type names at the leaves; the template validator flattens it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPort {
    pub name: String,
    #[serde(rename = "type", default = "default_output_type")]
    pub value_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structure: Option<Value>,
}

fn default_output_type() -> String {
    "object".to_string()
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeInterface {
    #[serde(default)]
    pub inputs: Vec<PortSpec>,
    #[serde(default)]
    pub outputs: Vec<OutputPort>,
}

impl NodeInterface {
    pub fn declared_input_type(&self, name: &str) -> Option<ValueType> {
        self.inputs
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value_type)
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.name.clone()).collect()
    }
}

/// One registered node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(rename = "type")]
    pub type_id: String,
    pub module: String,
    pub class_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default)]
    pub interface: NodeInterface,
}

impl RegistryEntry {
    pub fn is_virtual_mcp(&self) -> bool {
        self.file_path.as_deref() == Some(VIRTUAL_MCP_PATH)
    }
}

/// Factory producing fresh node instances for one type.
pub trait NodeFactory: Send + Sync {
    fn create(&self) -> BoxedNode;
}

impl<F> NodeFactory for F
where
    F: Fn() -> BoxedNode + Send + Sync,
{
    fn create(&self) -> BoxedNode {
        self()
    }
}

/// Source of registry snapshots. Implementations include the filesystem
/// scanner, a packaged manifest, or the in-memory loader used in tests.
pub trait RegistryLoader {
    /// Produce a fresh, read-only snapshot for one compilation.
    fn load(&self) -> Result<RegistrySnapshot>;
}

/// Loader over a pre-built snapshot: every `load` hands out its own copy.
pub struct StaticRegistryLoader {
    snapshot: RegistrySnapshot,
}

impl StaticRegistryLoader {
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self { snapshot }
    }
}

impl RegistryLoader for StaticRegistryLoader {
    fn load(&self) -> Result<RegistrySnapshot> {
        Ok(self.snapshot.clone())
    }
}

/// A successful resolution: the canonical registry key plus its entry.
#[derive(Debug, Clone)]
pub struct ResolvedType {
    pub canonical_id: String,
    pub entry: RegistryEntry,
}

/// Read-only registry view for the duration of one compilation.
#[derive(Clone, Default)]
pub struct RegistrySnapshot {
    entries: BTreeMap<String, RegistryEntry>,
    mcp_servers: BTreeMap<String, Vec<String>>,
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl std::fmt::Debug for RegistrySnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrySnapshot")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .field("mcp_servers", &self.mcp_servers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl RegistrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: RegistryEntry, factory: Arc<dyn NodeFactory>) {
        self.factories.insert(entry.type_id.clone(), factory);
        self.entries.insert(entry.type_id.clone(), entry);
    }

    /// Register a known MCP server and its tool names. Virtual entries for
    /// the tools are inserted separately (see the `pflow-mcp` crate).
    pub fn insert_mcp_server(&mut self, server: impl Into<String>, tools: Vec<String>) {
        self.mcp_servers.insert(server.into(), tools);
    }

    pub fn entries(&self) -> &BTreeMap<String, RegistryEntry> {
        &self.entries
    }

    pub fn mcp_servers(&self) -> &BTreeMap<String, Vec<String>> {
        &self.mcp_servers
    }

    pub fn get(&self, type_id: &str) -> Option<&RegistryEntry> {
        self.entries.get(type_id)
    }

    /// Split a virtual id `mcp-<server>-<tool>` using a greedy longest match
    /// against the known server names.
    pub fn split_virtual_id<'a>(&self, type_id: &'a str) -> Option<(String, &'a str)> {
        let rest = type_id.strip_prefix("mcp-")?;
        let mut best: Option<(&String, &str)> = None;
        for server in self.mcp_servers.keys() {
            if let Some(tail) = rest.strip_prefix(server.as_str()) {
                if let Some(tool) = tail.strip_prefix('-') {
                    if best.map_or(true, |(s, _)| server.len() > s.len()) {
                        best = Some((server, tool));
                    }
                }
            }
        }
        best.map(|(server, tool)| (server.clone(), tool))
    }

    /// Resolve a (possibly sloppy) type id to its canonical registry entry.
    pub fn resolve(&self, type_id: &str) -> Result<ResolvedType> {
        // (a) exact
        if let Some(entry) = self.entries.get(type_id) {
            return Ok(ResolvedType {
                canonical_id: type_id.to_string(),
                entry: entry.clone(),
            });
        }

        // (b) all dashes to underscores
        let underscored = type_id.replace('-', "_");
        if let Some(entry) = self.entries.get(&underscored) {
            return Ok(ResolvedType {
                canonical_id: underscored,
                entry: entry.clone(),
            });
        }

        // (c) greedy server match, underscore conversion of the tool tail
        if let Some((server, tool)) = self.split_virtual_id(type_id) {
            let candidate = format!("mcp-{}-{}", server, tool.replace('-', "_"));
            if let Some(entry) = self.entries.get(&candidate) {
                return Ok(ResolvedType {
                    canonical_id: candidate,
                    entry: entry.clone(),
                });
            }
        }

        // (d) unique suffix match
        let suffix = format!("-{}", type_id.replace('-', "_"));
        let matches: Vec<&String> = self
            .entries
            .keys()
            .filter(|key| key.ends_with(&suffix) || key.to_lowercase().ends_with(&suffix.to_lowercase()))
            .collect();
        match matches.as_slice() {
            [only] => {
                let canonical = (*only).clone();
                let entry = self.entries[&canonical].clone();
                return Ok(ResolvedType {
                    canonical_id: canonical,
                    entry,
                });
            }
            [] => {}
            many => {
                return Err(EngineError::validation(format!(
                    "node type '{}' is ambiguous: matches {}",
                    type_id,
                    many.iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
                .with_details(Value::Array(
                    many.iter().map(|s| Value::String((*s).clone())).collect(),
                )));
            }
        }

        Err(self.unknown_type_error(type_id))
    }

    /// Instantiate a fresh node for a canonical type id.
    pub fn instantiate(&self, canonical_id: &str) -> Result<BoxedNode> {
        self.factories
            .get(canonical_id)
            .map(|f| f.create())
            .ok_or_else(|| {
                EngineError::internal(format!(
                    "registry entry '{}' has no factory",
                    canonical_id
                ))
            })
    }

    fn unknown_type_error(&self, type_id: &str) -> EngineError {
        // MCP ids get structured guidance: unknown server lists the known
        // servers; unknown tool lists that server's tools.
        if let Some(rest) = type_id.strip_prefix("mcp-") {
            if let Some((server, tool)) = self.split_virtual_id(type_id) {
                let tools = self.mcp_servers.get(&server).cloned().unwrap_or_default();
                let closest =
                    suggest::closest_match(tool, tools.iter().map(String::as_str));
                let mut err = EngineError::validation(format!(
                    "unknown tool '{}' on MCP server '{}'",
                    tool, server
                ))
                .with_available_fields(tools.clone());
                if let Some(hit) = closest {
                    err = err.with_suggestion(format!("Did you mean `mcp-{}-{}`?", server, hit));
                }
                return err;
            }
            let servers: Vec<String> = self.mcp_servers.keys().cloned().collect();
            let first_segment = rest.split('-').next().unwrap_or(rest);
            let mut err = EngineError::validation(format!(
                "unknown MCP server in '{}'; known servers: {}",
                type_id,
                servers.join(", ")
            ))
            .with_available_fields(servers.clone());
            if let Some(hit) =
                suggest::closest_match(first_segment, servers.iter().map(String::as_str))
            {
                err = err.with_suggestion(format!("Did you mean server `{}`?", hit));
            }
            return err;
        }

        let mut err = EngineError::validation(format!("unknown node type '{}'", type_id))
            .with_available_fields(self.entries.keys().cloned().collect());
        if let Some(hit) =
            suggest::closest_match(type_id, self.entries.keys().map(String::as_str))
        {
            err = err.with_suggestion(format!("Did you mean `{}`?", hit));
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;
    use crate::testing::{entry_with_outputs, noop_factory};
    use serde_json::json;

    fn snapshot() -> RegistrySnapshot {
        let mut snap = RegistrySnapshot::new();
        snap.insert(
            entry_with_outputs("shell", json!({"stdout": "string", "exit_code": "number"})),
            noop_factory(),
        );
        snap.insert(
            entry_with_outputs("http", json!({"response": "object"})),
            noop_factory(),
        );
        let mut slack = entry_with_outputs("mcp-slack-composio-SLACK_SEND_MESSAGE", json!({"ok": "boolean"}));
        slack.file_path = Some(VIRTUAL_MCP_PATH.to_string());
        snap.insert(slack, noop_factory());
        snap.insert_mcp_server(
            "slack-composio",
            vec!["SLACK_SEND_MESSAGE".to_string(), "SLACK_LIST_CHANNELS".to_string()],
        );
        snap
    }

    #[test]
    fn exact_resolution() {
        let snap = snapshot();
        assert_eq!(snap.resolve("shell").unwrap().canonical_id, "shell");
    }

    #[test]
    fn greedy_server_split_prefers_longest() {
        let mut snap = snapshot();
        snap.insert_mcp_server("slack", vec!["OTHER".to_string()]);
        let (server, tool) = snap
            .split_virtual_id("mcp-slack-composio-SLACK_SEND_MESSAGE")
            .unwrap();
        assert_eq!(server, "slack-composio");
        assert_eq!(tool, "SLACK_SEND_MESSAGE");
    }

    #[test]
    fn dashed_tool_tail_normalizes() {
        let snap = snapshot();
        let resolved = snap
            .resolve("mcp-slack-composio-SLACK-SEND-MESSAGE")
            .unwrap();
        assert_eq!(
            resolved.canonical_id,
            "mcp-slack-composio-SLACK_SEND_MESSAGE"
        );
    }

    #[test]
    fn unique_suffix_resolves_bare_tool_name() {
        let snap = snapshot();
        let resolved = snap.resolve("SLACK-SEND-MESSAGE").unwrap();
        assert_eq!(
            resolved.canonical_id,
            "mcp-slack-composio-SLACK_SEND_MESSAGE"
        );
    }

    #[test]
    fn unknown_tool_lists_server_tools() {
        let snap = snapshot();
        let err = snap
            .resolve("mcp-slack-composio-SLACK_SEND_MESSGE")
            .unwrap_err();
        assert!(err.message.contains("slack-composio"));
        let fields = err.available_fields.unwrap();
        assert!(fields.contains(&"SLACK_LIST_CHANNELS".to_string()));
        assert!(err.suggestion.unwrap().contains("SLACK_SEND_MESSAGE"));
    }

    #[test]
    fn unknown_server_lists_known_servers() {
        let snap = snapshot();
        let err = snap.resolve("mcp-slak-composio-SLACK_SEND_MESSAGE").unwrap_err();
        assert!(err.message.contains("known servers"));
    }

    #[test]
    fn unknown_plain_type_gets_fuzzy_suggestion() {
        let snap = snapshot();
        let err = snap.resolve("shel").unwrap_err();
        assert_eq!(err.suggestion.unwrap(), "Did you mean `shell`?");
    }

    #[test]
    fn snapshots_instantiate_fresh_nodes() {
        let snap = snapshot();
        let a = snap.instantiate("shell").unwrap();
        let b = snap.instantiate("shell").unwrap();
        assert_eq!(a.node_name(), b.node_name());
    }

    #[test]
    fn static_loader_hands_out_independent_snapshots() {
        let loader = StaticRegistryLoader::new(snapshot());
        let mut first = loader.load().unwrap();
        first.insert_mcp_server("extra", vec![]);
        let second = loader.load().unwrap();
        assert!(!second.mcp_servers().contains_key("extra"));
    }
}
