//! # Wrapper Chain
//!
//! Each compiled node is a fixed pipeline of concrete wrapper types around
//! the inner implementation:
//!
//! ```text
//! Instrumented -> Batch -> Namespaced -> TemplateAware -> inner node
//! ```
//!
//! The order is non-negotiable. Batching must build isolated per-item
//! sub-stores *before* namespacing rewrites writes, because the batch item
//! binding lives at the root of the isolated store. TemplateAware is applied
//! only when a param carries `${...}`; Batch only when the node spec carries
//! a `batch`; Namespaced and Instrumented always.
//!
//! `set_params` is delegated down the chain so the innermost node only ever
//! sees resolved-static params.

pub mod batch;
pub mod instrumented;
pub mod namespaced;
pub mod template_aware;

pub use batch::BatchWrapper;
pub use instrumented::InstrumentedNode;
pub use namespaced::NamespacedWrapper;
pub use template_aware::TemplateAwareWrapper;
