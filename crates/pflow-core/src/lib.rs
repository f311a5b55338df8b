//! # pflow Core
//!
//! This crate is the core of pflow, a workflow compiler and execution
//! engine: a validated declarative IR is compiled into a linear chain of
//! typed, wrapped nodes, then executed deterministically with
//! template-driven dataflow, transparent checkpoint caching, a repair
//! extension point, and structured tracing.
//!
//! ## Core Concepts
//!
//! - **IR** ([`ir::WorkflowIr`]): the declarative workflow document with
//!   inputs, an ordered node list, edges, and outputs.
//! - **Nodes** ([`node::Node`]): executable units honoring the
//!   `set_params/prep/exec/post` contract. `prep` reads the shared store,
//!   `exec` is pure, `post` writes and returns the next action.
//! - **Wrapper chain** ([`wrappers`]): every compiled node is wrapped
//!   Instrumented → Batch → Namespaced → TemplateAware → inner.
//! - **Shared store** ([`store::SharedStore`]): the single mutable mapping
//!   threaded through a run, with the engine's coordination state carried
//!   as typed fields beside it.
//! - **Templates** ([`template`]): `${var.path[0]}` references resolved at
//!   each node's entry; simple templates preserve types, complex templates
//!   produce strings, and JSON auto-parses at object/array seams.
//! - **Runtime** ([`runtime::Runtime`]): the single-threaded loop with the
//!   checkpoint cache gate and the repair bridge.
//! - **Execution cache** ([`cache::ExecutionCache`]): durable single-node
//!   results with selective field retrieval.
//!
//! ## Example
//!
//! ```rust
//! use pflow_core::compiler::compile_ir;
//! use pflow_core::ir::WorkflowIr;
//! use pflow_core::runtime::Runtime;
//! use pflow_core::store::SharedStore;
//! use pflow_core::testing::stub_registry;
//! use serde_json::json;
//!
//! let ir = WorkflowIr::from_json_str(
//!     &json!({
//!         "inputs": {"n": {"type": "number", "required": true}},
//!         "nodes": [
//!             {"id": "double", "type": "stub-math", "params": {"x": "${n}"}},
//!             {"id": "report", "type": "stub-echo", "params": {"msg": "${double.result}"}}
//!         ],
//!         "outputs": {"final": {"source": "${report.text}"}}
//!     })
//!     .to_string(),
//! )
//! .unwrap();
//!
//! let registry = stub_registry();
//! let flow = compile_ir(&ir, &registry, Default::default()).unwrap();
//! let mut shared = SharedStore::new();
//! shared.insert("n", json!(5));
//! let result = Runtime::new(&registry).run(flow, &mut shared);
//! assert!(result.success);
//! assert_eq!(result.outputs["final"], json!("10"));
//! ```

pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor_node;
pub mod filter;
pub mod ir;
pub mod node;
pub mod registry;
pub mod runtime;
pub mod store;
pub mod suggest;
pub mod template;
pub mod testing;
pub mod trace;
pub mod wrappers;

// Re-export the types nearly every consumer touches.
pub use compiler::{compile_ir, Flow};
pub use error::{EngineError, ErrorCategory, ErrorSeverity, ErrorSource, Result};
pub use ir::WorkflowIr;
pub use node::{Action, BoxedNode, Node, Params};
pub use registry::{RegistryEntry, RegistrySnapshot};
pub use runtime::{ExecutionResult, Runtime};
pub use store::SharedStore;

/// Current version of the pflow core crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports.
pub mod prelude {
    pub use crate::cache::ExecutionCache;
    pub use crate::compiler::{compile_ir, Flow};
    pub use crate::error::{EngineError, ErrorCategory, Result};
    pub use crate::ir::WorkflowIr;
    pub use crate::node::{Action, BoxedNode, Node, Params};
    pub use crate::registry::{RegistryEntry, RegistrySnapshot};
    pub use crate::runtime::{ExecutionResult, Runtime};
    pub use crate::store::SharedStore;
    pub use serde_json::{json, Value};
}
