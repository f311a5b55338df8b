//! # Template Subsystem
//!
//! One grammar drives all dataflow: `${NAME(.KEY|[INT])*}` where `NAME` and
//! `KEY` match `[A-Za-z_][\w-]*` and bracketed indices address arrays. A
//! literal `$${...}` escapes the opener.
//!
//! Two template shapes exist and behave differently:
//!
//! - a **simple template** is a parameter whose entire value is one
//!   `${var}` reference; resolution preserves the referenced value's type
//!   (a dict stays a dict, an integer stays an integer);
//! - a **complex template** is any string mixing `${...}` with literal text;
//!   resolution always produces a string.
//!
//! This module is the parser; [`resolver`] performs runtime resolution and
//! [`validator`] performs the static path check against declared output
//! structures.

pub mod resolver;
pub mod validator;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{EngineError, Result};

/// `$${...}` escape (group 1) or `${path}` reference (group 2).
static TEMPLATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(\$\$\{[A-Za-z_][\w-]*(?:\.[A-Za-z_][\w-]*|\[[0-9]+\])*\})|\$\{([A-Za-z_][\w-]*(?:\.[A-Za-z_][\w-]*|\[[0-9]+\])*)\}",
    )
    .expect("template pattern is valid")
});

static PATH_SEGMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_][\w-]*)((?:\.[A-Za-z_][\w-]*|\[[0-9]+\])*)$")
        .expect("path pattern is valid")
});

/// One step of a dotted/bracketed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed `${...}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    /// The inner path text, e.g. `double.result[0]`.
    pub raw: String,
    /// First path component; resolved against the overlay roots.
    pub root: String,
    /// Remaining components walked into the resolved root value.
    pub path: Vec<PathSegment>,
}

impl TemplateRef {
    /// Path relative to the root, re-rendered in the canonical form used by
    /// structure flattening (`result.items[0].id`).
    pub fn subpath(&self) -> String {
        render_segments(&self.path)
    }
}

pub(crate) fn render_segments(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for seg in segments {
        match seg {
            PathSegment::Key(k) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(k);
            }
            PathSegment::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// Parse a bare path expression (no `${}` wrapper) into root + segments.
/// This is the same grammar `read_fields` uses for selective retrieval.
pub fn parse_path(path: &str) -> Result<TemplateRef> {
    let caps = PATH_SEGMENT_RE.captures(path).ok_or_else(|| {
        EngineError::template(format!("invalid path expression '{}'", path))
    })?;
    let root = caps[1].to_string();
    let mut segments = Vec::new();
    let rest = &caps[2];
    let mut cursor = rest;
    while !cursor.is_empty() {
        if let Some(stripped) = cursor.strip_prefix('.') {
            let end = stripped
                .find(|c: char| c == '.' || c == '[')
                .unwrap_or(stripped.len());
            segments.push(PathSegment::Key(stripped[..end].to_string()));
            cursor = &stripped[end..];
        } else if let Some(stripped) = cursor.strip_prefix('[') {
            let end = stripped.find(']').ok_or_else(|| {
                EngineError::template(format!("unterminated index in path '{}'", path))
            })?;
            let index: usize = stripped[..end].parse().map_err(|_| {
                EngineError::template(format!("invalid index in path '{}'", path))
            })?;
            segments.push(PathSegment::Index(index));
            cursor = &stripped[end + 1..];
        } else {
            return Err(EngineError::template(format!(
                "invalid path expression '{}'",
                path
            )));
        }
    }
    Ok(TemplateRef {
        raw: path.to_string(),
        root,
        path: segments,
    })
}

/// A piece of a complex template: literal text or a reference.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePiece {
    Literal(String),
    Reference(TemplateRef),
}

/// Split a string into literal and reference pieces. `$${...}` collapses to
/// a literal `${...}`.
pub fn tokenize(text: &str) -> Result<Vec<TemplatePiece>> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for caps in TEMPLATE_RE.captures_iter(text) {
        let whole = caps.get(0).expect("match has extent");
        if whole.start() > last {
            pieces.push(TemplatePiece::Literal(text[last..whole.start()].to_string()));
        }
        if let Some(escaped) = caps.get(1) {
            // Drop the leading escape dollar.
            pieces.push(TemplatePiece::Literal(escaped.as_str()[1..].to_string()));
        } else if let Some(reference) = caps.get(2) {
            pieces.push(TemplatePiece::Reference(parse_path(reference.as_str())?));
        }
        last = whole.end();
    }
    if last < text.len() {
        pieces.push(TemplatePiece::Literal(text[last..].to_string()));
    }
    Ok(pieces)
}

/// All (unescaped) references appearing in a string.
pub fn find_references(text: &str) -> Result<Vec<TemplateRef>> {
    Ok(tokenize(text)?
        .into_iter()
        .filter_map(|p| match p {
            TemplatePiece::Reference(r) => Some(r),
            TemplatePiece::Literal(_) => None,
        })
        .collect())
}

/// Whether the string contains at least one unescaped `${...}`.
pub fn contains_template(text: &str) -> bool {
    TEMPLATE_RE
        .captures_iter(text)
        .any(|c| c.get(2).is_some())
}

/// If the string is *exactly* one `${var}` reference, return it.
pub fn as_simple_template(text: &str) -> Option<TemplateRef> {
    let pieces = tokenize(text).ok()?;
    match pieces.as_slice() {
        [TemplatePiece::Reference(r)] => Some(r.clone()),
        _ => None,
    }
}

/// Whether any string nested inside the value carries a template.
pub fn value_contains_template(value: &Value) -> bool {
    match value {
        Value::String(s) => contains_template(s),
        Value::Array(items) => items.iter().any(value_contains_template),
        Value::Object(map) => map.values().any(value_contains_template),
        _ => false,
    }
}

/// All references nested anywhere inside the value.
pub fn collect_references(value: &Value) -> Result<Vec<TemplateRef>> {
    let mut refs = Vec::new();
    collect_into(value, &mut refs)?;
    Ok(refs)
}

fn collect_into(value: &Value, refs: &mut Vec<TemplateRef>) -> Result<()> {
    match value {
        Value::String(s) => refs.extend(find_references(s)?),
        Value::Array(items) => {
            for item in items {
                collect_into(item, refs)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_into(item, refs)?;
            }
        }
        _ => {}
    }
    Ok(())
}
