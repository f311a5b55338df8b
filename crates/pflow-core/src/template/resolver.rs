//! Runtime template resolution.
//!
//! Resolution happens against an ordered overlay of lookup layers: the
//! node's resolved initial params, then the node's shared-store namespace,
//! then the shared-store root. The first layer that knows the root name
//! wins; the remaining path segments walk into that value.

use serde_json::{Map, Value};

use crate::error::{EngineError, Result};
use crate::ir::ValueType;

use super::{as_simple_template, tokenize, PathSegment, TemplatePiece, TemplateRef};

/// Ordered lookup layers for one node's resolution context.
#[derive(Debug, Clone, Copy)]
pub struct Overlay<'a> {
    layers: [Option<&'a Map<String, Value>>; 3],
}

impl<'a> Overlay<'a> {
    pub fn new(
        initial_params: Option<&'a Map<String, Value>>,
        namespace: Option<&'a Map<String, Value>>,
        root: &'a Map<String, Value>,
    ) -> Self {
        Self {
            layers: [initial_params, namespace, Some(root)],
        }
    }

    /// A single-layer overlay, used by tests and validate-only runs.
    pub fn of_root(root: &'a Map<String, Value>) -> Self {
        Self {
            layers: [None, None, Some(root)],
        }
    }

    fn lookup(&self, root: &str) -> Option<&'a Value> {
        self.layers
            .iter()
            .flatten()
            .find_map(|layer| layer.get(root))
    }
}

/// Walk a parsed path into a value. Returns `None` on any miss.
pub fn traverse<'v>(value: &'v Value, path: &[PathSegment]) -> Option<&'v Value> {
    let mut current = value;
    for segment in path {
        current = match segment {
            PathSegment::Key(key) => current.get(key.as_str())?,
            PathSegment::Index(i) => current.get(*i)?,
        };
    }
    Some(current)
}

/// Resolve one reference to an owned value.
pub fn resolve_reference(reference: &TemplateRef, overlay: &Overlay<'_>) -> Result<Value> {
    let root = overlay.lookup(&reference.root).ok_or_else(|| {
        EngineError::template(format!(
            "could not resolve ${{{}}}: '{}' is not defined",
            reference.raw, reference.root
        ))
    })?;
    traverse(root, &reference.path).cloned().ok_or_else(|| {
        EngineError::template(format!(
            "could not resolve ${{{}}}: path '{}' does not exist under '{}'",
            reference.raw,
            reference.subpath(),
            reference.root
        ))
    })
}

/// Serialize an embedded value for complex-template interpolation:
/// null becomes the empty string, booleans and numbers their natural JSON
/// form, strings pass through, containers become canonical JSON.
pub fn interpolate_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a complex template to a string.
pub fn render_complex(text: &str, overlay: &Overlay<'_>) -> Result<String> {
    let mut out = String::new();
    for piece in tokenize(text)? {
        match piece {
            TemplatePiece::Literal(lit) => out.push_str(&lit),
            TemplatePiece::Reference(r) => {
                out.push_str(&interpolate_value(&resolve_reference(&r, overlay)?))
            }
        }
    }
    Ok(out)
}

/// Resolve one parameter value.
///
/// Simple templates preserve the referenced type and, when the declared
/// parameter type is `object` or `array` and the resolved value is a string
/// starting with `{` or `[` (after stripping trailing whitespace, notably a
/// shell's trailing newline), attempt a JSON auto-parse. Parse failure keeps
/// the original string. Complex templates always produce a string. Nested
/// containers resolve element-wise.
pub fn resolve_param_value(
    value: &Value,
    overlay: &Overlay<'_>,
    declared: Option<ValueType>,
) -> Result<Value> {
    match value {
        Value::String(text) => {
            if let Some(reference) = as_simple_template(text) {
                let resolved = resolve_reference(&reference, overlay)?;
                Ok(auto_parse(resolved, declared))
            } else if super::contains_template(text) {
                Ok(Value::String(render_complex(text, overlay)?))
            } else if text.contains("$${") {
                Ok(Value::String(render_complex(text, overlay)?))
            } else {
                Ok(value.clone())
            }
        }
        Value::Array(items) => {
            let resolved = items
                .iter()
                .map(|item| resolve_param_value(item, overlay, None))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Array(resolved))
        }
        Value::Object(map) => {
            let mut resolved = Map::new();
            for (key, item) in map {
                resolved.insert(key.clone(), resolve_param_value(item, overlay, None)?);
            }
            Ok(Value::Object(resolved))
        }
        _ => Ok(value.clone()),
    }
}

fn auto_parse(resolved: Value, declared: Option<ValueType>) -> Value {
    let wants_container = matches!(declared, Some(ValueType::Object) | Some(ValueType::Array));
    if !wants_container {
        return resolved;
    }
    let Value::String(text) = &resolved else {
        return resolved;
    };
    let trimmed = text.trim_end();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return resolved;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(parsed) => {
            let matches_declared = match declared {
                Some(ValueType::Object) => parsed.is_object(),
                Some(ValueType::Array) => parsed.is_array(),
                _ => false,
            };
            if matches_declared {
                parsed
            } else {
                resolved
            }
        }
        Err(_) => resolved,
    }
}

/// Split a node's params into the static set and the template-bearing set.
pub fn split_params(
    params: &Map<String, Value>,
) -> (Map<String, Value>, Map<String, Value>) {
    let mut static_params = Map::new();
    let mut template_params = Map::new();
    for (key, value) in params {
        if super::value_contains_template(value) {
            template_params.insert(key.clone(), value.clone());
        } else {
            static_params.insert(key.clone(), value.clone());
        }
    }
    (static_params, template_params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn root(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn simple_template_preserves_type() {
        let store = root(json!({"n": 5, "cfg": {"a": 1}, "blob": [1, 2]}));
        let overlay = Overlay::of_root(&store);
        assert_eq!(
            resolve_param_value(&json!("${n}"), &overlay, None).unwrap(),
            json!(5)
        );
        assert_eq!(
            resolve_param_value(&json!("${cfg}"), &overlay, None).unwrap(),
            json!({"a": 1})
        );
        assert_eq!(
            resolve_param_value(&json!("${blob}"), &overlay, None).unwrap(),
            json!([1, 2])
        );
    }

    #[test]
    fn complex_template_always_strings() {
        let store = root(json!({"n": 5, "flag": true, "nothing": null, "cfg": {"a": 1}}));
        let overlay = Overlay::of_root(&store);
        let resolved =
            resolve_param_value(&json!("n=${n} flag=${flag} none=${nothing}!"), &overlay, None)
                .unwrap();
        assert_eq!(resolved, json!("n=5 flag=true none=!"));

        let embedded = resolve_param_value(&json!("cfg: ${cfg}"), &overlay, None).unwrap();
        assert_eq!(embedded, json!("cfg: {\"a\":1}"));
    }

    #[test]
    fn overlay_order_params_then_namespace_then_root() {
        let params = root(json!({"x": "from-params"}));
        let namespace = root(json!({"x": "from-namespace", "y": "ns-y"}));
        let store = root(json!({"x": "from-root", "y": "root-y", "z": "root-z"}));
        let overlay = Overlay::new(Some(&params), Some(&namespace), &store);
        assert_eq!(overlay.lookup("x").unwrap(), &json!("from-params"));
        assert_eq!(overlay.lookup("y").unwrap(), &json!("ns-y"));
        assert_eq!(overlay.lookup("z").unwrap(), &json!("root-z"));
    }

    #[test]
    fn auto_parse_applies_only_at_container_seams() {
        let store = root(json!({"out": "[1,2,3]\n", "text": "[not json", "obj": "{\"a\":2}"}));
        let overlay = Overlay::of_root(&store);

        let parsed =
            resolve_param_value(&json!("${out}"), &overlay, Some(ValueType::Array)).unwrap();
        assert_eq!(parsed, json!([1, 2, 3]));

        // Declared string: no parse.
        let kept =
            resolve_param_value(&json!("${out}"), &overlay, Some(ValueType::String)).unwrap();
        assert_eq!(kept, json!("[1,2,3]\n"));

        // Unparseable: original kept.
        let kept =
            resolve_param_value(&json!("${text}"), &overlay, Some(ValueType::Array)).unwrap();
        assert_eq!(kept, json!("[not json"));

        // Declared array but value parses to object: original kept.
        let kept =
            resolve_param_value(&json!("${obj}"), &overlay, Some(ValueType::Array)).unwrap();
        assert_eq!(kept, json!("{\"a\":2}"));

        let parsed =
            resolve_param_value(&json!("${obj}"), &overlay, Some(ValueType::Object)).unwrap();
        assert_eq!(parsed, json!({"a": 2}));
    }

    #[test]
    fn missing_reference_is_template_error() {
        let store = root(json!({"present": 1}));
        let overlay = Overlay::of_root(&store);
        let err = resolve_param_value(&json!("${absent}"), &overlay, None).unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::TemplateError);
        assert!(err.message.contains("absent"));
    }

    #[test]
    fn missing_path_names_the_subpath() {
        let store = root(json!({"fetch": {"result": 1}}));
        let overlay = Overlay::of_root(&store);
        let err = resolve_param_value(&json!("${fetch.resualt}"), &overlay, None).unwrap_err();
        assert!(err.message.contains("resualt"));
    }

    #[test]
    fn nested_param_containers_resolve() {
        let store = root(json!({"token": "abc", "n": 2}));
        let overlay = Overlay::of_root(&store);
        let value = json!({"headers": {"auth": "Bearer ${token}"}, "count": "${n}"});
        let resolved = resolve_param_value(&value, &overlay, None).unwrap();
        assert_eq!(
            resolved,
            json!({"headers": {"auth": "Bearer abc"}, "count": 2})
        );
    }

    #[test]
    fn escaped_templates_render_literally() {
        let store = root(json!({}));
        let overlay = Overlay::of_root(&store);
        let resolved = resolve_param_value(&json!("pay $${amount}"), &overlay, None).unwrap();
        assert_eq!(resolved, json!("pay ${amount}"));
    }

    #[test]
    fn split_separates_template_bearing_params() {
        let params = root(json!({"a": "${x}", "b": "plain", "c": {"k": "${y}"}}));
        let (static_params, template_params) = split_params(&params);
        assert!(static_params.contains_key("b"));
        assert_eq!(template_params.len(), 2);
    }

    #[test]
    fn array_index_traversal() {
        let store = root(json!({"fetch": {"items": [{"id": "a"}, {"id": "b"}]}}));
        let overlay = Overlay::of_root(&store);
        assert_eq!(
            resolve_param_value(&json!("${fetch.items[1].id}"), &overlay, None).unwrap(),
            json!("b")
        );
    }
}
