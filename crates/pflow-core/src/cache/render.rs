//! Output rendering for the exploration path.
//!
//! Three user-selectable modes: `structure` shows paths only, `smart` shows
//! values with large surfaces compressed, `full` shows everything. The
//! flattening here runs over concrete values (unlike the template
//! validator, which flattens declared interfaces).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flattening over concrete values stops at this depth.
const MAX_STRUCTURE_DEPTH: usize = 5;

/// Strings longer than this are truncated in smart mode.
const SMART_MAX_STRING: usize = 200;

/// Containers larger than this are summarized in smart mode.
const SMART_MAX_CONTAINER: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    Structure,
    #[default]
    Smart,
    Full,
}

/// Flatten a concrete output value into `(path, type)` pairs. Arrays are
/// sampled at index zero, mirroring the template validator's convention.
pub fn structure_of(outputs: &Value) -> Vec<(String, String)> {
    let mut paths = Vec::new();
    if let Value::Object(map) = outputs {
        for (key, value) in map {
            paths.push((key.clone(), type_of(value).to_string()));
            descend(key, value, 1, &mut paths);
        }
    }
    paths
}

fn descend(prefix: &str, value: &Value, depth: usize, out: &mut Vec<(String, String)>) {
    if depth >= MAX_STRUCTURE_DEPTH {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = format!("{}.{}", prefix, key);
                out.push((path.clone(), type_of(child).to_string()));
                descend(&path, child, depth + 1, out);
            }
        }
        Value::Array(items) => {
            if let Some(first) = items.first() {
                let path = format!("{}[0]", prefix);
                out.push((path.clone(), type_of(first).to_string()));
                descend(&path, first, depth + 1, out);
            }
        }
        _ => {}
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Render outputs in the requested mode.
pub fn render(outputs: &Value, mode: RenderMode) -> Value {
    match mode {
        RenderMode::Full => outputs.clone(),
        RenderMode::Structure => {
            let mut rendered = Map::new();
            for (path, type_name) in structure_of(outputs) {
                rendered.insert(path, Value::String(type_name));
            }
            Value::Object(rendered)
        }
        RenderMode::Smart => smart(outputs, 0),
    }
}

fn smart(value: &Value, depth: usize) -> Value {
    match value {
        Value::String(s) if s.chars().count() > SMART_MAX_STRING => {
            let prefix: String = s.chars().take(SMART_MAX_STRING).collect();
            Value::String(format!("{}... (truncated)", prefix))
        }
        Value::Object(map) => {
            if map.len() > SMART_MAX_CONTAINER && depth > 0 {
                Value::String(format!("{{...{} keys}}", map.len()))
            } else {
                Value::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), smart(v, depth + 1)))
                        .collect(),
                )
            }
        }
        Value::Array(items) => {
            if items.len() > SMART_MAX_CONTAINER {
                Value::String(format!("[...{} items]", items.len()))
            } else {
                Value::Array(items.iter().map(|v| smart(v, depth + 1)).collect())
            }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "text": "short",
            "response": {
                "items": [{"id": "a", "score": 1}],
                "total": 1
            }
        })
    }

    #[test]
    fn structure_lists_paths_with_types() {
        let paths = structure_of(&sample());
        assert!(paths.contains(&("text".to_string(), "string".to_string())));
        assert!(paths.contains(&("response.items[0].id".to_string(), "string".to_string())));
        assert!(paths.contains(&("response.total".to_string(), "number".to_string())));
    }

    #[test]
    fn structure_mode_carries_no_values() {
        let rendered = render(&sample(), RenderMode::Structure);
        assert_eq!(rendered["text"], json!("string"));
        assert!(rendered.get("response.items[0].id").is_some());
    }

    #[test]
    fn smart_mode_truncates_long_strings() {
        let long = "x".repeat(500);
        let rendered = render(&json!({"body": long}), RenderMode::Smart);
        let text = rendered["body"].as_str().unwrap();
        assert!(text.ends_with("... (truncated)"));
        assert!(text.len() < 250);
    }

    #[test]
    fn smart_mode_summarizes_wide_containers() {
        let wide = json!({
            "outer": {"a":1, "b":2, "c":3, "d":4, "e":5, "f":6},
            "list": [1, 2, 3, 4, 5, 6, 7]
        });
        let rendered = render(&wide, RenderMode::Smart);
        assert_eq!(rendered["outer"], json!("{...6 keys}"));
        assert_eq!(rendered["list"], json!("[...7 items]"));
    }

    #[test]
    fn smart_mode_keeps_small_shapes_intact() {
        let rendered = render(&sample(), RenderMode::Smart);
        assert_eq!(rendered["response"]["items"][0]["id"], json!("a"));
    }

    #[test]
    fn full_mode_is_identity() {
        assert_eq!(render(&sample(), RenderMode::Full), sample());
    }
}
