//! Template-aware wrapper: separates static from template-bearing params and
//! resolves the latter against the live overlay at each execution.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::ir::TemplateMode;
use crate::node::{Action, BoxedNode, Node, Params};
use crate::registry::NodeInterface;
use crate::store::SharedStore;
use crate::template::resolver::{resolve_param_value, split_params, Overlay};
use crate::template::value_contains_template;

#[derive(Debug, Clone)]
pub struct TemplateAwareWrapper {
    inner: BoxedNode,
    node_id: String,
    interface: NodeInterface,
    mode: TemplateMode,
    /// Params that stay untouched even when they contain `${...}`; the
    /// workflow-executor's inline child document resolves its own templates.
    opaque_keys: Vec<String>,
    static_params: Params,
    template_params: Params,
    /// Template failures observed during prep in permissive mode, flushed to
    /// the store in post (prep only holds a shared borrow).
    pending_errors: Vec<String>,
}

impl TemplateAwareWrapper {
    pub fn new(
        inner: BoxedNode,
        node_id: impl Into<String>,
        interface: NodeInterface,
        mode: TemplateMode,
    ) -> Self {
        Self {
            inner,
            node_id: node_id.into(),
            interface,
            mode,
            opaque_keys: Vec::new(),
            static_params: Params::new(),
            template_params: Params::new(),
            pending_errors: Vec::new(),
        }
    }

    pub fn with_opaque_keys(mut self, keys: &[&str]) -> Self {
        self.opaque_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    fn resolve_template_params(&mut self, shared: &SharedStore) -> Result<Params> {
        let overlay = Overlay::new(
            Some(&self.static_params),
            shared.namespace(&self.node_id),
            shared.root(),
        );
        let mut resolved = self.static_params.clone();
        for (key, raw) in self.template_params.clone() {
            let declared = self.interface.declared_input_type(&key);
            match resolve_param_value(&raw, &overlay, declared) {
                Ok(value) => {
                    resolved.insert(key, value);
                }
                Err(err) if self.mode == TemplateMode::Permissive => {
                    self.pending_errors.push(err.message.clone());
                    resolved.insert(key, raw);
                }
                Err(err) => return Err(err.with_node_id(self.node_id.clone())),
            }
        }
        Ok(resolved)
    }
}

impl Node for TemplateAwareWrapper {
    fn node_name(&self) -> String {
        self.inner.node_name()
    }

    fn set_params(&mut self, params: Params) -> Result<()> {
        let (mut static_params, mut template_params) = split_params(&params);
        for key in &self.opaque_keys {
            if let Some(value) = template_params.remove(key) {
                static_params.insert(key.clone(), value);
            }
        }
        self.static_params = static_params;
        self.template_params = template_params;
        // The inner node starts from the static set; the combined set is
        // forwarded once templates resolve at prep time.
        self.inner.set_params(self.static_params.clone())
    }

    fn prep(&mut self, shared: &SharedStore) -> Result<Value> {
        let combined = self.resolve_template_params(shared)?;
        self.inner.set_params(combined)?;
        self.inner.prep(shared)
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
        for message in self.pending_errors.drain(..) {
            shared
                .coordination
                .template_errors
                .entry(self.node_id.clone())
                .or_default()
                .push(message);
        }
        self.inner.post(shared, prep_result, exec_result)
    }

    fn clone_node(&self) -> BoxedNode {
        Box::new(self.clone())
    }
}

/// Whether this node needs the template-aware wrapper at all.
pub fn params_need_templates(params: &Map<String, Value>) -> bool {
    params.values().any(value_contains_template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CaptureParamsNode;
    use serde_json::json;

    fn wrapper(params: Value, mode: TemplateMode) -> TemplateAwareWrapper {
        let mut w = TemplateAwareWrapper::new(
            Box::new(CaptureParamsNode::default()),
            "n1",
            NodeInterface::default(),
            mode,
        );
        w.set_params(params.as_object().unwrap().clone()).unwrap();
        w
    }

    #[test]
    fn static_params_pass_through_untouched() {
        let mut w = wrapper(json!({"fixed": 1, "msg": "${greeting}"}), TemplateMode::Strict);
        let mut shared = SharedStore::new();
        shared.insert("greeting", json!("hello"));
        let prep = w.prep(&shared).unwrap();
        // CaptureParamsNode::prep returns its current params.
        assert_eq!(prep["fixed"], json!(1));
        assert_eq!(prep["msg"], json!("hello"));
    }

    #[test]
    fn strict_mode_fails_on_missing_reference() {
        let mut w = wrapper(json!({"msg": "${absent}"}), TemplateMode::Strict);
        let shared = SharedStore::new();
        let err = w.prep(&shared).unwrap_err();
        assert_eq!(err.node_id.as_deref(), Some("n1"));
    }

    #[test]
    fn permissive_mode_records_and_continues() {
        let mut w = wrapper(json!({"msg": "${absent}"}), TemplateMode::Permissive);
        let mut shared = SharedStore::new();
        let prep = w.prep(&shared).unwrap();
        // Unresolved param kept verbatim.
        assert_eq!(prep["msg"], json!("${absent}"));
        let exec = w.exec(prep.clone()).unwrap();
        w.post(&mut shared, prep, exec).unwrap();
        assert_eq!(shared.coordination.template_errors["n1"].len(), 1);
    }

    #[test]
    fn params_need_templates_detects_nesting() {
        assert!(params_need_templates(
            json!({"a": {"b": ["${x}"]}}).as_object().unwrap()
        ));
        assert!(!params_need_templates(
            json!({"a": 1, "b": "plain"}).as_object().unwrap()
        ));
    }
}
