//! Namespaced wrapper: the inner node reads and writes a flat store; this
//! wrapper redirects its root-level writes into `shared[node_id]` and makes
//! namespace keys visible at the root for reads.
//!
//! The inner node runs against a merged *view* store (root overlaid with the
//! node's namespace). After `post`, every key whose value differs from the
//! view baseline is written into the node's namespace on the real store;
//! coordination state moves wholesale and is never namespaced.

use serde_json::Value;

use crate::error::Result;
use crate::node::{Action, BoxedNode, Node, Params};
use crate::store::SharedStore;

#[derive(Debug, Clone)]
pub struct NamespacedWrapper {
    inner: BoxedNode,
    node_id: String,
}

impl NamespacedWrapper {
    pub fn new(inner: BoxedNode, node_id: impl Into<String>) -> Self {
        Self {
            inner,
            node_id: node_id.into(),
        }
    }

    /// Root values overlaid with this node's namespace.
    fn merged_values(&self, shared: &SharedStore) -> serde_json::Map<String, Value> {
        let mut values = shared.root().clone();
        if let Some(ns) = shared.namespace(&self.node_id) {
            for (key, value) in ns {
                values.insert(key.clone(), value.clone());
            }
        }
        values
    }
}

impl Node for NamespacedWrapper {
    fn node_name(&self) -> String {
        self.inner.node_name()
    }

    fn set_params(&mut self, params: Params) -> Result<()> {
        self.inner.set_params(params)
    }

    fn prep(&mut self, shared: &SharedStore) -> Result<Value> {
        let view =
            SharedStore::from_parts(self.merged_values(shared), shared.coordination.clone());
        self.inner.prep(&view)
    }

    fn exec(&mut self, prep_result: Value) -> Result<Value> {
        self.inner.exec(prep_result)
    }

    fn post(
        &mut self,
        shared: &mut SharedStore,
        prep_result: Value,
        exec_result: Value,
    ) -> Result<Action> {
        let baseline = self.merged_values(shared);
        let mut view =
            SharedStore::from_parts(baseline.clone(), std::mem::take(&mut shared.coordination));

        let outcome = self.inner.post(&mut view, prep_result, exec_result);

        // Coordination mutations (llm calls, warnings) pass through even on
        // failure; value writes are redirected into the namespace.
        shared.coordination = std::mem::take(&mut view.coordination);
        for (key, value) in view.root() {
            if baseline.get(key) != Some(value) {
                shared.namespaced_write(&self.node_id, key.clone(), value.clone());
            }
        }
        outcome
    }

    fn clone_node(&self) -> BoxedNode {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::execute_node;
    use crate::testing::WriteKeysNode;
    use serde_json::json;

    #[test]
    fn writes_land_in_the_namespace() {
        let inner = WriteKeysNode::new(json!({"result": 10, "detail": "done"}));
        let mut node = NamespacedWrapper::new(Box::new(inner), "double");
        let mut shared = SharedStore::new();
        shared.insert("n", json!(5));

        execute_node(&mut node, &mut shared).unwrap();

        assert_eq!(
            shared.namespace("double").unwrap().get("result"),
            Some(&json!(10))
        );
        // Root keys not claimed by the node are untouched.
        assert_eq!(shared.get("n"), Some(&json!(5)));
        assert!(shared.get("result").is_none());
    }

    #[test]
    fn reads_see_namespace_over_root() {
        // The node echoes what it reads under "probe".
        let inner = WriteKeysNode::new(json!({})).probing("probe");
        let mut node = NamespacedWrapper::new(Box::new(inner), "me");
        let mut shared = SharedStore::new();
        shared.insert("probe", json!("root-value"));
        shared.namespaced_write("me", "probe", json!("ns-value"));

        execute_node(&mut node, &mut shared).unwrap();
        assert_eq!(
            shared.namespace("me").unwrap().get("probe_seen"),
            Some(&json!("ns-value"))
        );
    }

    #[test]
    fn coordination_mutations_survive_on_failure() {
        let inner = WriteKeysNode::new(json!({})).failing("boom");
        let mut node = NamespacedWrapper::new(Box::new(inner), "me");
        let mut shared = SharedStore::new();

        let err = execute_node(&mut node, &mut shared).unwrap_err();
        assert!(err.message.contains("boom"));
        // The failing node recorded an llm call before erroring.
        assert_eq!(shared.coordination.llm_calls.len(), 1);
    }

    #[test]
    fn two_nodes_do_not_interfere() {
        let mut a = NamespacedWrapper::new(
            Box::new(WriteKeysNode::new(json!({"out": "a"}))),
            "a",
        );
        let mut b = NamespacedWrapper::new(
            Box::new(WriteKeysNode::new(json!({"out": "b"}))),
            "b",
        );
        let mut shared = SharedStore::new();
        execute_node(&mut a, &mut shared).unwrap();
        execute_node(&mut b, &mut shared).unwrap();
        assert_eq!(shared.namespace("a").unwrap().get("out"), Some(&json!("a")));
        assert_eq!(shared.namespace("b").unwrap().get("out"), Some(&json!("b")));
    }
}
