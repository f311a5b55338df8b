//! IR validation and auto-normalization.
//!
//! `validate` never mutates the caller's document: normalization returns a
//! fresh structure with defaults filled and consecutive edges synthesized,
//! then the structural checks run: id rules, edge wiring, weak
//! connectivity, acyclicity, duplicate `(from, action)` refusal, batch
//! bounds, and input-reachability of every template reference against the
//! declared inputs and upstream node interfaces. Static validation has no
//! side effects; `validate_only` additionally exercises the full template
//! pipeline against placeholder values without invoking any node.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, Result};
use crate::registry::RegistrySnapshot;
use crate::store::BATCH_INDEX_KEY;
use crate::suggest;
use crate::template::{self, resolver, validator as template_validator, PathSegment, TemplateRef};

use super::{EdgeSpec, NodeSpec, WorkflowIr, DEFAULT_ACTION, MAX_CONCURRENT_CEILING};

static NODE_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("id pattern is valid"));

/// Auto-normalization: fill defaults and synthesize the implicit linear
/// wiring when `edges` is empty. Always returns a fresh document.
pub fn normalize(ir: &WorkflowIr) -> WorkflowIr {
    let mut normalized = ir.clone();
    if normalized.ir_version.trim().is_empty() {
        normalized.ir_version = super::DEFAULT_IR_VERSION.to_string();
    }
    if normalized.edges.is_empty() {
        normalized.edges = normalized
            .nodes
            .windows(2)
            .map(|pair| EdgeSpec {
                from: pair[0].id.clone(),
                to: pair[1].id.clone(),
                action: DEFAULT_ACTION.to_string(),
            })
            .collect();
    }
    normalized
}

/// Validate a document against the registry. Returns the normalized form.
pub fn validate(ir: &WorkflowIr, snapshot: &RegistrySnapshot) -> Result<WorkflowIr> {
    let ir = normalize(ir);

    if ir.nodes.is_empty() {
        return Err(EngineError::validation("workflow has no nodes"));
    }
    check_node_ids(&ir)?;
    check_node_types(&ir, snapshot)?;
    check_inputs(&ir)?;
    check_edges(&ir)?;
    check_connectivity(&ir)?;
    check_acyclic(&ir)?;
    check_batch_specs(&ir)?;
    check_template_reachability(&ir, snapshot)?;

    Ok(ir)
}

fn check_node_ids(ir: &WorkflowIr) -> Result<()> {
    let mut seen = BTreeSet::new();
    for node in &ir.nodes {
        if node.id.is_empty() || !NODE_ID_RE.is_match(&node.id) {
            return Err(EngineError::validation(format!(
                "node id '{}' must match [a-zA-Z0-9_-]+",
                node.id
            )));
        }
        if node.id.starts_with("__") {
            return Err(EngineError::validation(format!(
                "node id '{}' uses the reserved '__' prefix",
                node.id
            )));
        }
        if !seen.insert(node.id.clone()) {
            return Err(EngineError::validation(format!(
                "duplicate node id '{}'",
                node.id
            )));
        }
    }
    Ok(())
}

fn check_node_types(ir: &WorkflowIr, snapshot: &RegistrySnapshot) -> Result<()> {
    for node in &ir.nodes {
        snapshot
            .resolve(&node.node_type)
            .map_err(|e| e.with_node_id(node.id.clone()))?;
    }
    Ok(())
}

fn check_inputs(ir: &WorkflowIr) -> Result<()> {
    let stdin_inputs: Vec<&str> = ir
        .inputs
        .iter()
        .filter(|(_, spec)| spec.stdin)
        .map(|(name, _)| name.as_str())
        .collect();
    if stdin_inputs.len() > 1 {
        return Err(EngineError::validation(format!(
            "at most one input may read stdin; found: {}",
            stdin_inputs.join(", ")
        )));
    }
    for name in ir.inputs.keys() {
        if name.starts_with("__") {
            return Err(EngineError::validation(format!(
                "input '{}' uses the reserved '__' prefix",
                name
            )));
        }
    }
    Ok(())
}

fn check_edges(ir: &WorkflowIr) -> Result<()> {
    let ids: BTreeSet<&str> = ir.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut pairs = BTreeSet::new();
    for edge in &ir.edges {
        for endpoint in [&edge.from, &edge.to] {
            if !ids.contains(endpoint.as_str()) {
                return Err(EngineError::validation(format!(
                    "edge references unknown node '{}'",
                    endpoint
                )));
            }
        }
        if !pairs.insert((edge.from.clone(), edge.action.clone())) {
            return Err(EngineError::validation(format!(
                "duplicate edge from '{}' with action '{}'; one edge per (from, action) pair",
                edge.from, edge.action
            )));
        }
    }
    Ok(())
}

fn check_connectivity(ir: &WorkflowIr) -> Result<()> {
    // Weak connectivity: every node reachable over undirected edges from the
    // first node.
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &ir.edges {
        adjacency.entry(&edge.from).or_default().push(&edge.to);
        adjacency.entry(&edge.to).or_default().push(&edge.from);
    }
    let mut reached: HashSet<&str> = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(ir.nodes[0].id.as_str());
    while let Some(id) = queue.pop_front() {
        if reached.insert(id) {
            if let Some(neighbors) = adjacency.get(id) {
                queue.extend(neighbors.iter());
            }
        }
    }
    let unreachable: Vec<&str> = ir
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| !reached.contains(id))
        .collect();
    if !unreachable.is_empty() {
        return Err(EngineError::validation(format!(
            "disconnected nodes: {}",
            unreachable.join(", ")
        )));
    }
    Ok(())
}

fn check_acyclic(ir: &WorkflowIr) -> Result<()> {
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &ir.edges {
        successors.entry(&edge.from).or_default().push(&edge.to);
    }

    fn dfs<'a>(
        node: &'a str,
        successors: &HashMap<&'a str, Vec<&'a str>>,
        visited: &mut HashSet<&'a str>,
        path: &mut HashSet<&'a str>,
    ) -> bool {
        if path.contains(node) {
            return true;
        }
        if !visited.insert(node) {
            return false;
        }
        path.insert(node);
        if let Some(next) = successors.get(node) {
            for n in next {
                if dfs(n, successors, visited, path) {
                    return true;
                }
            }
        }
        path.remove(node);
        false
    }

    let mut visited = HashSet::new();
    for node in &ir.nodes {
        let mut path = HashSet::new();
        if dfs(node.id.as_str(), &successors, &mut visited, &mut path) {
            return Err(EngineError::validation("workflow graph contains a cycle"));
        }
    }
    Ok(())
}

fn check_batch_specs(ir: &WorkflowIr) -> Result<()> {
    for node in &ir.nodes {
        if let Some(batch) = &node.batch {
            if !(1..=MAX_CONCURRENT_CEILING).contains(&batch.max_concurrent) {
                return Err(EngineError::validation(format!(
                    "node '{}': batch max_concurrent must be in [1, {}]",
                    node.id, MAX_CONCURRENT_CEILING
                ))
                .with_node_id(node.id.clone()));
            }
            if batch.as_name.is_empty() || !NODE_ID_RE.is_match(&batch.as_name) {
                return Err(EngineError::validation(format!(
                    "node '{}': batch 'as' name '{}' is not an identifier",
                    node.id, batch.as_name
                )));
            }
        }
    }
    Ok(())
}

/// Every `${var}` must reference a declared input, an upstream node, the
/// node's own params, or (inside a batch node) the item binding. Paths into
/// upstream nodes are checked against that node's declared output structure.
fn check_template_reachability(ir: &WorkflowIr, snapshot: &RegistrySnapshot) -> Result<()> {
    let mut upstream: BTreeMap<&str, &NodeSpec> = BTreeMap::new();
    for node in &ir.nodes {
        let refs = node_references(node, snapshot)?;
        for reference in refs {
            check_reference(ir, node, &reference, &upstream, snapshot)?;
        }
        upstream.insert(node.id.as_str(), node);
    }

    for (name, output) in &ir.outputs {
        for reference in template::find_references(&output.source)? {
            if ir.inputs.contains_key(&reference.root) {
                continue;
            }
            match upstream.get(reference.root.as_str()) {
                Some(node) => {
                    validate_against_interface(&reference, node, snapshot)?;
                }
                None => {
                    return Err(unknown_root_error(ir, &reference, &upstream).with_details(
                        serde_json::json!({"output": name}),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn node_references(node: &NodeSpec, snapshot: &RegistrySnapshot) -> Result<Vec<TemplateRef>> {
    let mut params = node.params.clone();
    for key in opaque_param_keys(node, snapshot) {
        params.remove(*key);
    }
    let mut refs = template::collect_references(&Value::Object(params))?;
    if let Some(batch) = &node.batch {
        refs.extend(template::collect_references(&batch.items)?);
    }
    Ok(refs)
}

/// Param keys whose contents belong to another scope entirely. An inline
/// child document carries its own templates; they resolve in the child run,
/// not here.
pub(crate) fn opaque_param_keys(node: &NodeSpec, snapshot: &RegistrySnapshot) -> &'static [&'static str] {
    let is_executor = snapshot
        .resolve(&node.node_type)
        .map(|r| r.canonical_id == crate::executor_node::WORKFLOW_EXECUTOR_TYPE)
        .unwrap_or(false);
    if is_executor {
        &["ir"]
    } else {
        &[]
    }
}

fn check_reference(
    ir: &WorkflowIr,
    node: &NodeSpec,
    reference: &TemplateRef,
    upstream: &BTreeMap<&str, &NodeSpec>,
    snapshot: &RegistrySnapshot,
) -> Result<()> {
    if ir.inputs.contains_key(&reference.root) {
        return Ok(());
    }
    if let Some(batch) = &node.batch {
        if reference.root == batch.as_name || reference.root == BATCH_INDEX_KEY {
            return Ok(());
        }
    }
    if node.params.contains_key(&reference.root) {
        // Self-reference into the node's own static params.
        return Ok(());
    }
    if let Some(source) = upstream.get(reference.root.as_str()) {
        return validate_against_interface(reference, source, snapshot);
    }
    if ir.nodes.iter().any(|n| n.id == reference.root) {
        return Err(EngineError::validation(format!(
            "node '{}' references ${{{}}} before '{}' has executed",
            node.id, reference.raw, reference.root
        ))
        .with_node_id(node.id.clone()));
    }
    Err(unknown_root_error(ir, reference, upstream).with_node_id(node.id.clone()))
}

fn unknown_root_error(
    ir: &WorkflowIr,
    reference: &TemplateRef,
    upstream: &BTreeMap<&str, &NodeSpec>,
) -> EngineError {
    let mut available: Vec<&str> = ir.inputs.keys().map(String::as_str).collect();
    available.extend(upstream.keys());
    let mut err = EngineError::validation(format!(
        "template ${{{}}} references unknown name '{}'",
        reference.raw, reference.root
    ))
    .with_available_fields(available.iter().map(|s| s.to_string()).collect());
    if let Some(hit) = suggest::closest_match(&reference.root, available.iter().copied()) {
        err = err.with_suggestion(format!("Did you mean `${{{}}}`?", hit));
    }
    err
}

fn validate_against_interface(
    reference: &TemplateRef,
    source: &NodeSpec,
    snapshot: &RegistrySnapshot,
) -> Result<()> {
    let resolved = snapshot.resolve(&source.node_type)?;
    let outputs = &resolved.entry.interface.outputs;
    if outputs.is_empty() {
        // Nothing declared; nothing to check statically.
        return Ok(());
    }
    let flattened = if source.batch.is_some() {
        batch_surface(outputs)
    } else {
        template_validator::flatten_interface(outputs)
    };
    template_validator::validate_reference(
        &source.id,
        &resolved.canonical_id,
        reference,
        &flattened,
    )
}

/// A batch node's visible surface is the aggregate the batch wrapper
/// writes, with the wrapped node's declared outputs nested per item.
fn batch_surface(outputs: &[crate::registry::OutputPort]) -> Vec<(String, String)> {
    let mut flattened = vec![
        ("results".to_string(), "array".to_string()),
        ("results[0].item".to_string(), "unknown".to_string()),
        ("count".to_string(), "number".to_string()),
        ("success_count".to_string(), "number".to_string()),
        ("error_count".to_string(), "number".to_string()),
        ("errors".to_string(), "array".to_string()),
    ];
    for (path, type_name) in template_validator::flatten_interface(outputs) {
        flattened.push((format!("results[0].{}", path), type_name));
    }
    flattened
}

/// Outcome of a `validate_only` pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub nodes_checked: usize,
    pub templates_checked: usize,
    pub diagnostics: Vec<String>,
}

/// Static validation plus a dry run of the template pipeline: required
/// inputs are filled with placeholder sentinels, upstream namespaces are
/// synthesized from declared interfaces, and every template renders. No
/// node executes.
pub fn validate_only(ir: &WorkflowIr, snapshot: &RegistrySnapshot) -> Result<ValidationReport> {
    let ir = validate(ir, snapshot)?;

    let mut context = Map::new();
    for (name, spec) in &ir.inputs {
        let value = spec
            .default
            .clone()
            .unwrap_or_else(|| spec.value_type.placeholder());
        context.insert(name.clone(), value);
    }

    let mut templates_checked = 0;
    let mut diagnostics = Vec::new();
    for node in &ir.nodes {
        // Bind the batch item so item-scoped templates resolve.
        let mut scope = context.clone();
        if let Some(batch) = &node.batch {
            scope.insert(batch.as_name.clone(), Value::Null);
            scope.insert(BATCH_INDEX_KEY.to_string(), Value::from(0));
        }
        for (key, raw) in &node.params {
            scope.entry(key.clone()).or_insert_with(|| raw.clone());
        }
        let overlay = resolver::Overlay::of_root(&scope);
        for reference in node_references(node, snapshot)? {
            templates_checked += 1;
            if resolver::resolve_reference(&reference, &overlay).is_err() {
                // Covered structurally; reported for visibility only.
                diagnostics.push(format!(
                    "node '{}': ${{{}}} resolves at runtime, not statically",
                    node.id, reference.raw
                ));
            }
        }

        // Make this node's declared surface available downstream.
        let resolved = snapshot.resolve(&node.node_type)?;
        let flattened = if node.batch.is_some() {
            batch_surface(&resolved.entry.interface.outputs)
        } else {
            template_validator::flatten_interface(&resolved.entry.interface.outputs)
        };
        context.insert(node.id.clone(), placeholder_namespace(&flattened));
    }

    Ok(ValidationReport {
        nodes_checked: ir.nodes.len(),
        templates_checked,
        diagnostics,
    })
}

/// Synthesize a namespace object whose shape matches a flattened surface.
fn placeholder_namespace(flattened: &[(String, String)]) -> Value {
    let mut namespace = Value::Object(Map::new());
    for (path, type_name) in flattened {
        if let Ok(parsed) = template::parse_path(path) {
            let mut segments = vec![PathSegment::Key(parsed.root.clone())];
            segments.extend(parsed.path.clone());
            insert_placeholder(&mut namespace, &segments, type_name);
        }
    }
    namespace
}

fn insert_placeholder(target: &mut Value, segments: &[PathSegment], type_name: &str) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    match head {
        PathSegment::Key(key) => {
            let map = match target {
                Value::Object(map) => map,
                _ => {
                    *target = Value::Object(Map::new());
                    target.as_object_mut().expect("just set object")
                }
            };
            let slot = map.entry(key.clone()).or_insert(Value::Null);
            if rest.is_empty() {
                if slot.is_null() {
                    *slot = placeholder_for(type_name);
                }
            } else {
                insert_placeholder(slot, rest, type_name);
            }
        }
        PathSegment::Index(index) => {
            let list = match target {
                Value::Array(list) => list,
                _ => {
                    *target = Value::Array(Vec::new());
                    target.as_array_mut().expect("just set array")
                }
            };
            while list.len() <= *index {
                list.push(Value::Null);
            }
            if rest.is_empty() {
                if list[*index].is_null() {
                    list[*index] = placeholder_for(type_name);
                }
            } else {
                insert_placeholder(&mut list[*index], rest, type_name);
            }
        }
    }
}

fn placeholder_for(type_name: &str) -> Value {
    match type_name {
        "number" | "integer" => Value::from(0),
        "boolean" => Value::Bool(false),
        "array" => Value::Array(Vec::new()),
        "object" => Value::Object(Map::new()),
        _ => Value::String("__validate_only__".to_string()),
    }
}
