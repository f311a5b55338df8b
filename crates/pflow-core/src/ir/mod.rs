//! # Workflow IR
//!
//! The intermediate representation consumed by the compiler. An IR document
//! is a mapping with `ir_version`, `inputs`, `nodes`, `edges`, `outputs`, and
//! `template_resolution_mode`; unknown top-level keys are rejected. Documents
//! arrive as JSON or YAML (the planner emits either) and deserialize into
//! [`WorkflowIr`] with spec defaults applied.
//!
//! Validation and auto-normalization live in [`validator`]; this module is
//! the data model only.

pub mod validator;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};

pub const DEFAULT_IR_VERSION: &str = "0.1.0";
pub const DEFAULT_ACTION: &str = "default";
pub const DEFAULT_BATCH_AS: &str = "item";
pub const DEFAULT_MAX_CONCURRENT: usize = 10;
pub const MAX_CONCURRENT_CEILING: usize = 100;

/// A validated workflow document: the unit the compiler consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowIr {
    #[serde(default = "default_ir_version")]
    pub ir_version: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputSpec>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputSpec>,
    #[serde(default)]
    pub template_resolution_mode: TemplateMode,
}

fn default_ir_version() -> String {
    DEFAULT_IR_VERSION.to_string()
}

/// Controls whether a missing or mistyped template kills the node or only
/// records a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateMode {
    #[default]
    Strict,
    Permissive,
}

/// Declared value types for inputs and node interface ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    #[default]
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Array => "array",
            ValueType::Object => "object",
        }
    }

    /// Whether a concrete JSON value satisfies this declared type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ValueType::String => value.is_string(),
            ValueType::Number => value.is_number(),
            ValueType::Boolean => value.is_boolean(),
            ValueType::Array => value.is_array(),
            ValueType::Object => value.is_object(),
        }
    }

    /// A placeholder value of this type, used by validate-only runs.
    pub fn placeholder(&self) -> Value {
        match self {
            ValueType::String => Value::String("__validate_only__".to_string()),
            ValueType::Number => Value::from(0),
            ValueType::Boolean => Value::Bool(false),
            ValueType::Array => Value::Array(Vec::new()),
            ValueType::Object => Value::Object(Map::new()),
        }
    }
}

/// Declared workflow input.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputSpec {
    #[serde(rename = "type", default)]
    pub value_type: ValueType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stdin: bool,
}

/// One node in the linear chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchSpec>,
}

/// Explicit wiring between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeSpec {
    pub from: String,
    pub to: String,
    #[serde(default = "default_action")]
    pub action: String,
}

fn default_action() -> String {
    DEFAULT_ACTION.to_string()
}

/// Declared workflow output, resolved against the final shared store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSpec {
    pub source: String,
    #[serde(default)]
    pub description: String,
}

/// Per-item fan-out configuration for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchSpec {
    /// Template string or inline array.
    pub items: Value,
    #[serde(rename = "as", default = "default_batch_as")]
    pub as_name: String,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub error_handling: ErrorHandling,
}

fn default_batch_as() -> String {
    DEFAULT_BATCH_AS.to_string()
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

/// What a batch does when one item fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    #[default]
    FailFast,
    Continue,
}

impl WorkflowIr {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| EngineError::validation(format!("invalid IR document: {}", e)))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| EngineError::validation(format!("invalid IR document: {}", e)))
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    /// Order-independent identity of this document. Used by the
    /// workflow-executor node for cycle detection.
    pub fn content_hash(&self) -> String {
        // serde_json maps are sorted by key, so this serialization is
        // canonical for identical documents.
        let text = serde_json::to_string(self).unwrap_or_default();
        format!("{:x}", md5::compute(text.as_bytes()))
    }
}
