//! Path-addressed reading and editing of JSON documents
//!
//! Paths come in three spellings, all parsed into the same segment list:
//! - segment lists: `["provider", 0, "model_config"]`
//! - JSON Pointer: `/provider/0/model_config`
//! - dot paths: `provider.0.model_config`
//!
//! A `-` segment is only meaningful as the last segment of a write, where it
//! appends to an array.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    fn is_append_marker(&self) -> bool {
        matches!(self, Self::Key(k) if k == "-")
    }

    /// Quoted form used in error messages.
    fn repr(&self) -> String {
        match self {
            Self::Key(k) => format!("'{}'", k),
            Self::Index(i) => i.to_string(),
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => f.write_str(k),
            Self::Index(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("{0}")]
    Invalid(String),

    #[error("Expected {expected} {location}, got {actual}")]
    Mismatch {
        expected: &'static str,
        location: String,
        actual: &'static str,
    },

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Index out of range: {0}")]
    IndexOutOfRange(usize),

    #[error("Null at path segment {0}; set create_missing=true to create containers")]
    NullSegment(String),

    #[error("'-' is only valid for append operations, not for reading")]
    AppendMarkerRead,

    #[error("'-' is only valid for final segment in append operations")]
    AppendMarkerNotFinal,

    #[error("Key already exists: {0}")]
    KeyExists(String),
}

impl PathError {
    fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    fn at_segment(expected: &'static str, segment: &PathSegment, actual: &Value) -> Self {
        Self::Mismatch {
            expected,
            location: format!("at segment {}", segment.repr()),
            actual: type_name(actual),
        }
    }

    fn at(expected: &'static str, location: &str, actual: &Value) -> Self {
        Self::Mismatch {
            expected,
            location: location.to_string(),
            actual: type_name(actual),
        }
    }
}

pub type PathResult<T> = std::result::Result<T, PathError>;

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
    }
}

/// True for keys whose values should not be echoed back (passwords, tokens, keys).
pub fn is_sensitive_key(key: &str) -> bool {
    const TOKENS: [&str; 10] = [
        "password",
        "passwd",
        "secret",
        "token",
        "api_key",
        "apikey",
        "access_key",
        "private_key",
        "jwt",
        "key",
    ];
    let lowered = key.trim().to_lowercase();
    !lowered.is_empty() && TOKENS.iter().any(|t| lowered.contains(t))
}

// ==================== PARSING ====================

/// Parse a path given as JSON: null, a string, or a list of segments.
pub fn parse_path(path: Option<&Value>) -> PathResult<Vec<PathSegment>> {
    match path {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(raw)) => parse_path_str(raw),
        Some(Value::Array(items)) => items.iter().map(parse_list_segment).collect(),
        Some(other) => Err(PathError::invalid(format!(
            "Unsupported path type: {}",
            type_name(other)
        ))),
    }
}

fn parse_list_segment(segment: &Value) -> PathResult<PathSegment> {
    match segment {
        Value::Bool(_) => Err(PathError::invalid("Path segment cannot be bool")),
        Value::Number(n) => {
            if let Some(index) = n.as_u64() {
                return usize::try_from(index)
                    .map(PathSegment::Index)
                    .map_err(|_| PathError::invalid(format!("List index too large: {}", index)));
            }
            if n.as_i64().is_some() {
                return Err(PathError::invalid("List index cannot be negative"));
            }
            Err(PathError::invalid(
                "Unsupported path segment type: non-integer number",
            ))
        }
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Err(PathError::invalid("Path segment cannot be empty string"));
            }
            numeric_or_key(s)
        }
        other => Err(PathError::invalid(format!(
            "Unsupported path segment type: {}",
            type_name(other)
        ))),
    }
}

fn numeric_or_key(part: &str) -> PathResult<PathSegment> {
    if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
        return part
            .parse::<usize>()
            .map(PathSegment::Index)
            .map_err(|_| PathError::invalid(format!("List index too large: {}", part)));
    }
    Ok(PathSegment::Key(part.to_string()))
}

/// Parse a JSON Pointer (`/a/0/b`) or dot path (`a.0.b`). Empty means root.
pub fn parse_path_str(path: &str) -> PathResult<Vec<PathSegment>> {
    let raw = path.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    if let Some(pointer) = raw.strip_prefix('/') {
        return pointer
            .split('/')
            .map(|part| {
                let part = part.replace("~1", "/").replace("~0", "~");
                if part.is_empty() {
                    return Err(PathError::invalid("Invalid JSON pointer: empty segment"));
                }
                numeric_or_key(&part)
            })
            .collect();
    }

    raw.split('.')
        .map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return Err(PathError::invalid("Invalid dot path: empty segment"));
            }
            numeric_or_key(part)
        })
        .collect()
}

pub fn to_pointer(path: &[PathSegment]) -> String {
    let parts: Vec<String> = path
        .iter()
        .map(|seg| match seg {
            PathSegment::Index(i) => i.to_string(),
            PathSegment::Key(k) => k.replace('~', "~0").replace('/', "~1"),
        })
        .collect();
    format!("/{}", parts.join("/"))
}

pub fn to_dot(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

// ==================== READING ====================

pub fn get_node<'a>(root: &'a Value, path: &[PathSegment]) -> PathResult<&'a Value> {
    let mut node = root;
    for seg in path {
        node = match seg {
            PathSegment::Index(idx) => {
                let Value::Array(items) = node else {
                    return Err(PathError::at_segment("array", seg, node));
                };
                items.get(*idx).ok_or(PathError::IndexOutOfRange(*idx))?
            }
            PathSegment::Key(key) if key == "-" => return Err(PathError::AppendMarkerRead),
            PathSegment::Key(key) => {
                let Value::Object(map) = node else {
                    return Err(PathError::at_segment("object", seg, node));
                };
                map.get(key)
                    .ok_or_else(|| PathError::KeyNotFound(key.clone()))?
            }
        };
    }
    Ok(node)
}

fn get_node_mut<'a>(root: &'a mut Value, path: &[PathSegment]) -> PathResult<&'a mut Value> {
    let mut node = root;
    for seg in path {
        node = match seg {
            PathSegment::Index(idx) => match node {
                Value::Array(items) => items
                    .get_mut(*idx)
                    .ok_or(PathError::IndexOutOfRange(*idx))?,
                other => return Err(PathError::at_segment("array", seg, other)),
            },
            PathSegment::Key(key) if key == "-" => return Err(PathError::AppendMarkerRead),
            PathSegment::Key(key) => match node {
                Value::Object(map) => map
                    .get_mut(key)
                    .ok_or_else(|| PathError::KeyNotFound(key.clone()))?,
                other => return Err(PathError::at_segment("object", seg, other)),
            },
        };
    }
    Ok(node)
}

// ==================== WRITING ====================

/// How far past the end of an array a write may reach; the gap is null-padded.
pub const MAX_INDEX_PADDING: usize = 1024;

/// Grow `items` with nulls so that `idx` is addressable.
fn pad_to(items: &mut Vec<Value>, idx: usize) -> PathResult<()> {
    if idx < items.len() {
        return Ok(());
    }
    if idx - items.len() >= MAX_INDEX_PADDING {
        return Err(PathError::IndexOutOfRange(idx));
    }
    items.resize(idx + 1, Value::Null);
    Ok(())
}

fn empty_container(next: &PathSegment) -> Value {
    match next {
        PathSegment::Index(_) => Value::Array(Vec::new()),
        PathSegment::Key(_) => Value::Object(Map::new()),
    }
}

/// The child at `seg` must be able to hold `next`.
fn check_container(child: &Value, seg: &PathSegment, next: &PathSegment) -> PathResult<()> {
    match next {
        PathSegment::Index(_) if !child.is_array() => {
            Err(PathError::at_segment("array", seg, child))
        }
        PathSegment::Key(_) if !next.is_append_marker() && !child.is_object() => {
            Err(PathError::at_segment("object", seg, child))
        }
        _ => Ok(()),
    }
}

/// Walk to the container that holds the last segment of `path`.
fn parent_for_write<'a, 'p>(
    root: &'a mut Value,
    path: &'p [PathSegment],
    create_missing: bool,
) -> PathResult<(&'a mut Value, &'p PathSegment)> {
    let Some((last, init)) = path.split_last() else {
        return Err(PathError::invalid(
            "Path cannot be empty for write operations",
        ));
    };

    let mut node = root;
    for (i, seg) in init.iter().enumerate() {
        let next = &path[i + 1];
        node = match seg {
            PathSegment::Index(idx) => {
                let items = match node {
                    Value::Array(items) => items,
                    other => return Err(PathError::at_segment("array", seg, other)),
                };
                if *idx >= items.len() && !create_missing {
                    return Err(PathError::IndexOutOfRange(*idx));
                }
                pad_to(items, *idx)?;
                let child = &mut items[*idx];
                if child.is_null() {
                    if !create_missing {
                        return Err(PathError::NullSegment(seg.to_string()));
                    }
                    *child = empty_container(next);
                } else {
                    check_container(child, seg, next)?;
                }
                child
            }
            PathSegment::Key(key) if key == "-" => return Err(PathError::AppendMarkerNotFinal),
            PathSegment::Key(key) => {
                let map = match node {
                    Value::Object(map) => map,
                    other => return Err(PathError::at_segment("object", seg, other)),
                };
                if map.get(key).map_or(true, Value::is_null) {
                    if !create_missing {
                        return Err(PathError::KeyNotFound(key.clone()));
                    }
                    map.insert(key.clone(), empty_container(next));
                }
                let Some(child) = map.get_mut(key) else {
                    return Err(PathError::KeyNotFound(key.clone()));
                };
                check_container(child, seg, next)?;
                child
            }
        };
    }

    Ok((node, last))
}

/// Return the child of `parent` at `last`, creating it with `empty` when it is
/// missing or null.
fn child_or_insert<'a>(
    parent: &'a mut Value,
    last: &PathSegment,
    empty: fn() -> Value,
) -> PathResult<&'a mut Value> {
    match last {
        PathSegment::Index(idx) => {
            let items = match parent {
                Value::Array(items) => items,
                other => return Err(PathError::at("array", "parent", other)),
            };
            pad_to(items, *idx)?;
            let child = &mut items[*idx];
            if child.is_null() {
                *child = empty();
            }
            Ok(child)
        }
        PathSegment::Key(key) => {
            let map = match parent {
                Value::Object(map) => map,
                other => return Err(PathError::at("object", "parent", other)),
            };
            let child = map.entry(key.clone()).or_insert(Value::Null);
            if child.is_null() {
                *child = empty();
            }
            Ok(child)
        }
    }
}

pub fn set_value(
    root: &mut Value,
    path: &[PathSegment],
    value: Value,
    create_missing: bool,
) -> PathResult<()> {
    let (parent, last) = parent_for_write(root, path, create_missing)?;

    match last {
        PathSegment::Index(idx) => {
            let items = match parent {
                Value::Array(items) => items,
                other => return Err(PathError::at("array", "parent", other)),
            };
            if *idx >= items.len() && !create_missing {
                return Err(PathError::IndexOutOfRange(*idx));
            }
            pad_to(items, *idx)?;
            items[*idx] = value;
        }
        PathSegment::Key(key) if key == "-" => match parent {
            Value::Array(items) => items.push(value),
            other => return Err(PathError::at("array", "parent for append", other)),
        },
        PathSegment::Key(key) => match parent {
            Value::Object(map) => {
                map.insert(key.clone(), value);
            }
            other => return Err(PathError::at("object", "parent", other)),
        },
    }
    Ok(())
}

pub fn add_key(
    root: &mut Value,
    parent_path: &[PathSegment],
    key: &str,
    value: Value,
    create_missing: bool,
) -> PathResult<()> {
    let parent = if parent_path.is_empty() {
        root
    } else if create_missing {
        let (parent, last) = parent_for_write(root, parent_path, true)?;
        child_or_insert(parent, last, || Value::Object(Map::new()))?
    } else {
        get_node_mut(root, parent_path)?
    };

    match parent {
        Value::Object(map) => {
            if map.contains_key(key) {
                return Err(PathError::KeyExists(key.to_string()));
            }
            map.insert(key.to_string(), value);
            Ok(())
        }
        other => Err(PathError::at("object", "at parent_path", other)),
    }
}

pub fn append_item(
    root: &mut Value,
    list_path: &[PathSegment],
    value: Value,
    create_missing: bool,
) -> PathResult<()> {
    let node = if list_path.is_empty() {
        root
    } else if create_missing {
        let (parent, last) = parent_for_write(root, list_path, true)?;
        child_or_insert(parent, last, || Value::Array(Vec::new()))?
    } else {
        get_node_mut(root, list_path)?
    };

    match node {
        Value::Array(items) => {
            items.push(value);
            Ok(())
        }
        other => Err(PathError::at("array", "at path", other)),
    }
}

// ==================== BATCH OPS ====================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OpCounters {
    pub set: usize,
    pub add_key: usize,
    pub append: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OpsReport {
    pub applied: OpCounters,
    pub changed_paths: Vec<Vec<PathSegment>>,
}

/// The first op that failed; earlier ops have already been applied.
#[derive(Error, Debug, Clone)]
#[error("ops[{index}]: {source}")]
pub struct OpError {
    pub index: usize,
    #[source]
    pub source: PathError,
}

/// Apply `{"op": "set"|"add_key"|"append", "path", "key"?, "value"}` edits in order.
pub fn apply_ops(root: &mut Value, ops: &[Value], create_missing: bool) -> Result<OpsReport, OpError> {
    let mut report = OpsReport::default();
    for (index, op) in ops.iter().enumerate() {
        apply_op(root, op, index, create_missing, &mut report)
            .map_err(|source| OpError { index, source })?;
    }
    Ok(report)
}

fn apply_op(
    root: &mut Value,
    op: &Value,
    index: usize,
    create_missing: bool,
    report: &mut OpsReport,
) -> PathResult<()> {
    let Value::Object(op) = op else {
        return Err(PathError::invalid(format!("ops[{}] must be an object", index)));
    };
    let name = op.get("op").and_then(Value::as_str).unwrap_or("").trim();
    let path = parse_path(op.get("path"))?;
    let value = op.get("value").cloned().unwrap_or(Value::Null);

    match name {
        "set" => {
            if path.is_empty() {
                return Err(PathError::invalid("set op requires non-empty path"));
            }
            set_value(root, &path, value, create_missing)?;
            report.changed_paths.push(path);
            report.applied.set += 1;
        }
        "add_key" => {
            let key = op
                .get("key")
                .and_then(Value::as_str)
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| PathError::invalid("add_key op requires non-empty string 'key'"))?;
            add_key(root, &path, key, value, create_missing)?;
            let mut changed = path;
            changed.push(PathSegment::Key(key.to_string()));
            report.changed_paths.push(changed);
            report.applied.add_key += 1;
        }
        "append" => {
            append_item(root, &path, value, create_missing)?;
            let mut changed = path;
            changed.push(PathSegment::Key("-".to_string()));
            report.changed_paths.push(changed);
            report.applied.append += 1;
        }
        other => {
            return Err(PathError::invalid(format!("Unsupported op: '{}'", other)));
        }
    }
    Ok(())
}

// ==================== SUMMARIES ====================

#[derive(Debug, Clone, Copy)]
pub struct SummaryOptions {
    pub max_children: usize,
    pub include_value: bool,
    pub redact_secrets: bool,
    pub max_string_length: usize,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            max_children: 50,
            include_value: false,
            redact_secrets: true,
            max_string_length: 200,
        }
    }
}

const REDACTED: &str = "<redacted>";
const PREVIEW_KEYS: usize = 10;

fn truncate_chars(value: &str, max_len: usize) -> (String, bool) {
    if max_len == 0 {
        return (String::new(), true);
    }
    match value.char_indices().nth(max_len) {
        Some((cut, _)) => (value[..cut].to_string(), true),
        None => (value.to_string(), false),
    }
}

fn sorted_keys(map: &Map<String, Value>) -> Vec<&String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys
}

fn string_child(child: &mut Map<String, Value>, value: &str, max_len: usize) {
    let (preview, truncated) = truncate_chars(value, max_len);
    child.insert("value".into(), Value::String(preview));
    if truncated {
        child.insert("value_truncated".into(), Value::Bool(true));
        child.insert("value_length".into(), value.chars().count().into());
    }
}

/// Describe `node` without dumping it whole: keys or items with their types,
/// optionally with (truncated, redacted) values.
pub fn summarize_node(node: &Value, opts: &SummaryOptions, leaf_name: Option<&str>) -> Value {
    match node {
        Value::Object(map) => {
            let keys = sorted_keys(map);
            let children: Vec<Value> = keys
                .iter()
                .take(opts.max_children)
                .map(|key| {
                    let v = &map[key.as_str()];
                    let mut child = Map::new();
                    child.insert("key".into(), Value::String((*key).clone()));
                    child.insert("type".into(), type_name(v).into());
                    if opts.include_value {
                        if opts.redact_secrets && is_sensitive_key(key) {
                            child.insert("value".into(), REDACTED.into());
                        } else {
                            match v {
                                Value::String(s) => string_child(&mut child, s, opts.max_string_length),
                                Value::Object(inner) => {
                                    let preview: Vec<&String> =
                                        sorted_keys(inner).into_iter().take(PREVIEW_KEYS).collect();
                                    child.insert(
                                        "preview".into(),
                                        serde_json::json!({
                                            "type": "object",
                                            "key_count": inner.len(),
                                            "keys_preview": preview,
                                            "truncated": inner.len() > PREVIEW_KEYS,
                                        }),
                                    );
                                }
                                Value::Array(items) => {
                                    child.insert(
                                        "preview".into(),
                                        serde_json::json!({ "type": "array", "length": items.len() }),
                                    );
                                }
                                scalar => {
                                    child.insert("value".into(), scalar.clone());
                                }
                            }
                        }
                    }
                    Value::Object(child)
                })
                .collect();
            serde_json::json!({
                "type": "object",
                "key_count": keys.len(),
                "truncated": keys.len() > opts.max_children,
                "children": children,
            })
        }
        Value::Array(items) => {
            let children: Vec<Value> = items
                .iter()
                .take(opts.max_children)
                .enumerate()
                .map(|(i, v)| {
                    let mut child = Map::new();
                    child.insert("index".into(), i.into());
                    child.insert("type".into(), type_name(v).into());
                    if opts.include_value {
                        match v {
                            Value::String(s) => string_child(&mut child, s, opts.max_string_length),
                            Value::Object(inner) => {
                                let mut preview = Map::new();
                                let keys: Vec<Value> = sorted_keys(inner)
                                    .into_iter()
                                    .take(PREVIEW_KEYS)
                                    .map(|k| Value::String(k.clone()))
                                    .collect();
                                preview.insert("keys_preview".into(), Value::Array(keys));
                                for preferred in ["id", "name", "type", "provider", "provider_type"] {
                                    if let Some(value) = inner.get(preferred) {
                                        preview.insert(preferred.into(), value.clone());
                                    }
                                }
                                child.insert("preview".into(), Value::Object(preview));
                            }
                            Value::Array(nested) => {
                                child.insert(
                                    "preview".into(),
                                    serde_json::json!({ "type": "array", "length": nested.len() }),
                                );
                            }
                            scalar => {
                                child.insert("value".into(), scalar.clone());
                            }
                        }
                    }
                    Value::Object(child)
                })
                .collect();
            serde_json::json!({
                "type": "array",
                "length": items.len(),
                "truncated": items.len() > opts.max_children,
                "children": children,
            })
        }
        scalar if opts.include_value => {
            let mut out = Map::new();
            out.insert("type".into(), type_name(scalar).into());
            let redact = opts.redact_secrets && leaf_name.is_some_and(is_sensitive_key);
            match scalar {
                _ if redact => {
                    out.insert("value".into(), REDACTED.into());
                }
                Value::String(s) => {
                    let (preview, _) = truncate_chars(s, opts.max_string_length);
                    out.insert("value".into(), Value::String(preview));
                    let length = s.chars().count();
                    if length > opts.max_string_length {
                        out.insert("value_truncated".into(), Value::Bool(true));
                        out.insert("value_length".into(), length.into());
                    }
                }
                other => {
                    out.insert("value".into(), other.clone());
                }
            }
            Value::Object(out)
        }
        scalar => serde_json::json!({ "type": type_name(scalar) }),
    }
}

// ==================== SEARCH ====================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub path: Vec<PathSegment>,
    pub path_pointer: String,
    pub path_dot: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

fn match_text(haystack: &str, needle: &str, case_sensitive: bool) -> bool {
    if needle.is_empty() {
        return false;
    }
    if case_sensitive {
        haystack.contains(needle)
    } else {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    }
}

/// Text a value query is matched against. Null and booleans use AstrBot's
/// Python spelling (`None`, `True`, `False`), which is what users see in its
/// dashboard and logs.
fn primitive_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("None".to_string()),
        Value::Bool(true) => Some("True".to_string()),
        Value::Bool(false) => Some("False".to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Depth-first search for keys containing `key_query`, optionally restricted
/// to primitive values containing `value_query`.
pub fn search_paths(
    root: &Value,
    key_query: &str,
    value_query: Option<&str>,
    case_sensitive: bool,
    max_results: usize,
) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    let mut path = Vec::new();
    walk_find(
        root,
        &mut path,
        key_query,
        value_query,
        case_sensitive,
        max_results,
        &mut hits,
    );
    hits
}

fn walk_find(
    node: &Value,
    path: &mut Vec<PathSegment>,
    key_query: &str,
    value_query: Option<&str>,
    case_sensitive: bool,
    max_results: usize,
    hits: &mut Vec<SearchHit>,
) {
    match node {
        Value::Object(map) => {
            for (key, value) in map {
                if hits.len() >= max_results {
                    return;
                }
                path.push(PathSegment::Key(key.clone()));
                let key_ok = match_text(key, key_query, case_sensitive);
                let value_ok = match value_query {
                    None => true,
                    Some(query) => primitive_text(value)
                        .is_some_and(|text| match_text(&text, query, case_sensitive)),
                };
                if key_ok && value_ok {
                    hits.push(SearchHit {
                        path: path.clone(),
                        path_pointer: to_pointer(path),
                        path_dot: to_dot(path),
                        kind: type_name(value),
                    });
                }
                walk_find(value, path, key_query, value_query, case_sensitive, max_results, hits);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (i, value) in items.iter().enumerate() {
                if hits.len() >= max_results {
                    return;
                }
                path.push(PathSegment::Index(i));
                walk_find(value, path, key_query, value_query, case_sensitive, max_results, hits);
                path.pop();
            }
        }
        _ => {}
    }
}
