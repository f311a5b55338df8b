//! Static template validation against declared output structures.
//!
//! The IR validator calls into this module to check every `${node.path}`
//! before anything executes. A referenced node's declared outputs are
//! flattened into `(path, type)` pairs (depth-capped, arrays rendered as
//! `field[0]`), and the referenced path must be one of those paths or a
//! strict prefix of one. Mismatches produce the enhanced error shape:
//! available paths with types, similar paths, and a "Common fix" proposal.

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::registry::OutputPort;
use crate::suggest;

use super::{PathSegment, TemplateRef};

/// Flattening stops at this many path segments.
pub const MAX_FLATTEN_DEPTH: usize = 5;

/// How many available paths an enhanced error lists.
const MAX_LISTED_PATHS: usize = 20;

/// How many similar paths an enhanced error lists.
const MAX_SIMILAR_PATHS: usize = 3;

/// Flatten a node's declared output surface into `(path, type)` pairs.
pub fn flatten_interface(outputs: &[OutputPort]) -> Vec<(String, String)> {
    let mut paths = Vec::new();
    for port in outputs {
        paths.push((port.name.clone(), port.value_type.clone()));
        if let Some(structure) = &port.structure {
            flatten_structure(&port.name, structure, 1, &mut paths);
        }
    }
    paths
}

fn flatten_structure(prefix: &str, structure: &Value, depth: usize, out: &mut Vec<(String, String)>) {
    if depth >= MAX_FLATTEN_DEPTH {
        return;
    }
    match structure {
        Value::Object(map) => {
            for (key, child) in map {
                let path = format!("{}.{}", prefix, key);
                match child {
                    Value::String(type_name) => out.push((path, type_name.clone())),
                    Value::Object(_) => {
                        out.push((path.clone(), "object".to_string()));
                        flatten_structure(&path, child, depth + 1, out);
                    }
                    Value::Array(_) => {
                        out.push((path.clone(), "array".to_string()));
                        flatten_structure(&path, child, depth + 1, out);
                    }
                    _ => out.push((path, "unknown".to_string())),
                }
            }
        }
        Value::Array(items) => {
            if let Some(first) = items.first() {
                let path = format!("{}[0]", prefix);
                match first {
                    Value::String(type_name) => out.push((path, type_name.clone())),
                    Value::Object(_) | Value::Array(_) => {
                        out.push((
                            path.clone(),
                            if first.is_object() { "object" } else { "array" }.to_string(),
                        ));
                        flatten_structure(&path, first, depth + 1, out);
                    }
                    _ => out.push((path, "unknown".to_string())),
                }
            }
        }
        _ => {}
    }
}

/// Normalize bracket indices to `[0]` so `items[2].id` compares against the
/// flattened `items[0].id`.
fn normalized_subpath(reference: &TemplateRef) -> String {
    let segments: Vec<PathSegment> = reference
        .path
        .iter()
        .map(|s| match s {
            PathSegment::Index(_) => PathSegment::Index(0),
            other => other.clone(),
        })
        .collect();
    super::render_segments(&segments)
}

fn is_path_or_strict_prefix(subpath: &str, candidate: &str) -> bool {
    if candidate == subpath {
        return true;
    }
    if let Some(rest) = candidate.strip_prefix(subpath) {
        return rest.starts_with('.') || rest.starts_with('[');
    }
    false
}

/// Validate one reference against a node's flattened output surface.
pub fn validate_reference(
    referenced_node: &str,
    node_type: &str,
    reference: &TemplateRef,
    flattened: &[(String, String)],
) -> Result<()> {
    let subpath = normalized_subpath(reference);
    if subpath.is_empty() {
        // `${node}` refers to the whole namespace.
        return Ok(());
    }
    if flattened
        .iter()
        .any(|(path, _)| is_path_or_strict_prefix(&subpath, path))
    {
        return Ok(());
    }
    Err(path_mismatch_error(
        referenced_node,
        node_type,
        reference,
        &subpath,
        flattened,
    ))
}

fn path_mismatch_error(
    referenced_node: &str,
    node_type: &str,
    reference: &TemplateRef,
    subpath: &str,
    flattened: &[(String, String)],
) -> EngineError {
    let available: Vec<String> = flattened
        .iter()
        .take(MAX_LISTED_PATHS)
        .map(|(path, type_name)| format!("{} ({})", path, type_name))
        .collect();
    let similar = suggest::similar_by_substring(
        subpath,
        flattened.iter().map(|(p, _)| p.as_str()),
        MAX_SIMILAR_PATHS,
    );

    let mut message = format!(
        "template ${{{}}} references '{}', which is not an output of node '{}'",
        reference.raw, subpath, referenced_node
    );
    if !similar.is_empty() {
        message.push_str(&format!("; similar paths: {}", similar.join(", ")));
    }

    let closest = suggest::closest_match(subpath, flattened.iter().map(|(p, _)| p.as_str()));
    let suggestion = closest.map(|path| {
        format!("Common fix: use ${{{}.{}}}", referenced_node, path)
    });

    let mut err = EngineError::validation(message)
        .with_node(referenced_node, node_type)
        .with_available_fields(available);
    if let Some(suggestion) = suggestion {
        err = err.with_suggestion(suggestion);
    }
    err
}
