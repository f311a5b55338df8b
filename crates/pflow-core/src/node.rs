//! # Node Contract
//!
//! Every executable unit honors the same four-phase contract:
//! `set_params` receives the node's configuration, `prep` reads from the
//! shared store, `exec` performs the work without store access (pure by
//! signature), and `post` writes results and returns the action string that
//! selects the next transition. Failures are ordinary `Result` values; the
//! runtime branches on them, never on panics.
//!
//! `clone_node` exists because wrappers are stateful across the three
//! phases: the batch wrapper deep-copies the wrapped chain per item before
//! fanning out to worker threads.

use std::fmt::Debug;

use serde_json::{Map, Value};

use crate::error::Result;
use crate::store::SharedStore;

/// Node configuration as delivered by `set_params`.
pub type Params = Map<String, Value>;

/// The transition label returned by `post`. Almost always `"default"`.
pub type Action = String;

/// Base trait for all workflow nodes. Implementations must be `Send + Sync`
/// so batch workers can share the wrapper that owns them across threads;
/// all mutation goes through `&mut self`.
pub trait Node: Send + Sync + Debug {
    /// Human-readable name, for logs and traces.
    fn node_name(&self) -> String {
        std::any::type_name::<Self>()
            .split("::")
            .last()
            .unwrap_or("UnknownNode")
            .to_string()
    }

    /// Receive configuration. The innermost node only ever sees
    /// resolved-static params; template resolution happens in the wrappers.
    fn set_params(&mut self, params: Params) -> Result<()>;

    /// Read phase: gather everything `exec` needs from the shared store.
    fn prep(&mut self, shared: &SharedStore) -> Result<Value>;

    /// Work phase: pure with respect to the shared store.
    fn exec(&mut self, prep_result: Value) -> Result<Value>;

    /// Write phase: store outputs, return the action string.
    fn post(
        &mut self,
        shared: &mut SharedStore,
        prep_result: Value,
        exec_result: Value,
    ) -> Result<Action>;

    /// Deep copy of this node (and, for wrappers, the chain below it).
    fn clone_node(&self) -> BoxedNode;
}

pub type BoxedNode = Box<dyn Node>;

impl Clone for BoxedNode {
    fn clone(&self) -> Self {
        self.clone_node()
    }
}

/// Drive one node through its three execution phases.
pub fn execute_node(node: &mut dyn Node, shared: &mut SharedStore) -> Result<Action> {
    let prep_result = node.prep(shared)?;
    let exec_result = node.exec(prep_result.clone())?;
    node.post(shared, prep_result, exec_result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Default)]
    struct Recorder {
        params: Params,
        phases: Vec<&'static str>,
    }

    impl Node for Recorder {
        fn set_params(&mut self, params: Params) -> Result<()> {
            self.params = params;
            Ok(())
        }

        fn prep(&mut self, shared: &SharedStore) -> Result<Value> {
            self.phases.push("prep");
            Ok(shared.get("seed").cloned().unwrap_or(Value::Null))
        }

        fn exec(&mut self, prep_result: Value) -> Result<Value> {
            self.phases.push("exec");
            Ok(json!({"echo": prep_result}))
        }

        fn post(
            &mut self,
            shared: &mut SharedStore,
            _prep: Value,
            exec_result: Value,
        ) -> Result<Action> {
            self.phases.push("post");
            shared.insert("out", exec_result);
            Ok("default".to_string())
        }

        fn clone_node(&self) -> BoxedNode {
            Box::new(self.clone())
        }
    }

    #[test]
    fn phases_run_in_order() {
        let mut node = Recorder::default();
        let mut shared = SharedStore::new();
        shared.insert("seed", json!(7));
        let action = execute_node(&mut node, &mut shared).unwrap();
        assert_eq!(action, "default");
        assert_eq!(node.phases, vec!["prep", "exec", "post"]);
        assert_eq!(shared.get("out"), Some(&json!({"echo": 7})));
    }

    #[test]
    fn boxed_nodes_clone_through_the_trait() {
        let node: BoxedNode = Box::new(Recorder::default());
        let copy = node.clone();
        assert_eq!(copy.node_name(), node.node_name());
    }
}
