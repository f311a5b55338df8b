//! # Error Handling for the pflow Core
//!
//! Every failure surfaced by the engine is an [`EngineError`] carrying exactly
//! one [`ErrorCategory`] from a closed taxonomy. The category decides the
//! propagation policy: repairable errors may be handed to a repair
//! collaborator, non-repairable errors terminate the run, and fatal errors
//! terminate with a distinct class so callers can tell user mistakes from
//! engine bugs.
//!
//! Errors are plain data: they serialize to the structured error object shape
//! consumed by every external interface (node id/type, HTTP status, raw
//! response, available fields, suggestion). Construction goes through the
//! category-named constructors plus `with_*` builders:
//!
//! ```rust
//! use pflow_core::error::EngineError;
//!
//! let err = EngineError::template("could not resolve ${fetch.resualt}")
//!     .with_node("report", "stub-echo")
//!     .with_suggestion("Did you mean `${fetch.result}`?")
//!     .with_available_fields(vec!["result".to_string()]);
//! assert!(err.fixable);
//! ```

pub mod detection;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result type used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// The closed error taxonomy. Every [`EngineError`] carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// IR schema violation, unknown node type, unresolved template reference,
    /// or a declared-type mismatch. Repairable by IR mutation.
    ValidationError,
    /// A `${var}` could not be resolved at runtime against the current
    /// overlay. Repairable.
    TemplateError,
    /// Upstream service reports not-found / forbidden / gone / unauthorized.
    /// Not repairable; a caller-level concern.
    ResourceError,
    /// Transport-success with semantic failure (`"ok": false`, GraphQL
    /// `errors`, HTTP 429). Sometimes repairable.
    ApiWarning,
    /// A node exceeded its configured time budget. Repairable.
    TimeoutError,
    /// An uncategorized failure from a node's `exec`. Repairable.
    RuntimeError,
    /// A batch item failed; the container error aggregates per-item errors.
    BatchError,
    /// The workflow-executor node detected invocation recursion. Fatal.
    CycleError,
    /// An invariant check inside the engine itself failed. Fatal; bug signal.
    InternalError,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::ValidationError => "validation_error",
            ErrorCategory::TemplateError => "template_error",
            ErrorCategory::ResourceError => "resource_error",
            ErrorCategory::ApiWarning => "api_warning",
            ErrorCategory::TimeoutError => "timeout_error",
            ErrorCategory::RuntimeError => "runtime_error",
            ErrorCategory::BatchError => "batch_error",
            ErrorCategory::CycleError => "cycle_error",
            ErrorCategory::InternalError => "internal_error",
        }
    }

    /// Whether the repair collaborator may be offered this failure.
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::ValidationError
                | ErrorCategory::TemplateError
                | ErrorCategory::TimeoutError
                | ErrorCategory::RuntimeError
                | ErrorCategory::BatchError
        )
    }

    /// Fatal categories terminate with a separate exit class.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ErrorCategory::CycleError | ErrorCategory::InternalError)
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ErrorCategory::InternalError => ErrorSeverity::Critical,
            ErrorCategory::CycleError => ErrorSeverity::Error,
            ErrorCategory::ApiWarning => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which layer produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Compiler,
    Runtime,
    Node,
}

impl fmt::Display for ErrorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSource::Compiler => f.write_str("compiler"),
            ErrorSource::Runtime => f.write_str("runtime"),
            ErrorSource::Node => f.write_str("node"),
        }
    }
}

/// Severity levels for logging and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// The structured error object surfaced across all interfaces.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{category} ({origin}): {message}")]
pub struct EngineError {
    /// Which layer produced the error. Serialized as `source` per the
    /// external error-object shape; the field avoids that name so the
    /// derive does not treat it as an error cause.
    #[serde(rename = "source")]
    pub origin: ErrorSource,
    pub category: ErrorCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_error: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub fixable: bool,
}

impl EngineError {
    pub fn new(origin: ErrorSource, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            origin,
            category,
            node_id: None,
            node_type: None,
            message: message.into(),
            status_code: None,
            raw_response: None,
            response_headers: None,
            mcp_error: None,
            error_details: None,
            available_fields: None,
            suggestion: None,
            fixable: category.is_repairable(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorSource::Compiler, ErrorCategory::ValidationError, message)
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::new(ErrorSource::Runtime, ErrorCategory::TemplateError, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorSource::Node, ErrorCategory::ResourceError, message)
    }

    pub fn api_warning(message: impl Into<String>) -> Self {
        Self::new(ErrorSource::Node, ErrorCategory::ApiWarning, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorSource::Node, ErrorCategory::TimeoutError, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorSource::Node, ErrorCategory::RuntimeError, message)
    }

    pub fn batch(message: impl Into<String>) -> Self {
        Self::new(ErrorSource::Runtime, ErrorCategory::BatchError, message)
    }

    pub fn cycle(message: impl Into<String>) -> Self {
        Self::new(ErrorSource::Runtime, ErrorCategory::CycleError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorSource::Runtime, ErrorCategory::InternalError, message)
    }

    /// Compilation failure with the phase recorded in `error_details`.
    pub fn compilation(phase: &str, message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorSource::Compiler, ErrorCategory::ValidationError, message);
        err.error_details = Some(serde_json::json!({ "phase": phase }));
        err
    }

    pub fn with_node(mut self, node_id: impl Into<String>, node_type: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self.node_type = Some(node_type.into());
        self
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_raw_response(mut self, raw: Value) -> Self {
        self.raw_response = Some(raw);
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.error_details = Some(details);
        self
    }

    pub fn with_available_fields(mut self, fields: Vec<String>) -> Self {
        self.available_fields = Some(fields);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_fixable(mut self, fixable: bool) -> Self {
        self.fixable = fixable;
        self
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.category.severity()
    }

    pub fn is_repairable(&self) -> bool {
        self.fixable && self.category.is_repairable()
    }

    pub fn is_fatal(&self) -> bool {
        self.category.is_fatal()
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::internal(format!("JSON serialization failure: {}", error))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::new(
            ErrorSource::Runtime,
            ErrorCategory::RuntimeError,
            format!("I/O failure: {}", error),
        )
    }
}
