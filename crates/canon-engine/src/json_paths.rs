// crates/canon-engine/src/json_paths.rs
// ============================================================================
// Module: Dotted Path Helpers
// Description: Navigation and flattening helpers over StageRecord.Data.
// Purpose: Give association and projection a shared, tested way to read and
// walk nested JSON by dotted path.
// Dependencies: serde_json
// ============================================================================

use serde_json::Map;
use serde_json::Value;

/// Reads the value at a dotted path (`"a.b.c"`) through nested objects.
pub(crate) fn get_path<'a>(data: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = data.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Converts a scalar JSON value to its string form; returns `None` for
/// `null`, objects, and arrays (callers split arrays before calling this).
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Splits a value that may be a scalar or an array of scalars into its
/// individual non-empty string forms.
pub(crate) fn split_values(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_to_string).collect(),
        other => scalar_to_string(other).into_iter().collect(),
    }
}

/// Flattens a nested JSON object into `(dotted path, leaf value)` pairs.
///
/// Arrays of scalars are flattened to one pair per element at the same
/// path; arrays of objects are skipped (no established meaning for indexed
/// paths in this domain). Top-level keys in `skip_top_level` are omitted
/// entirely, and any path matching a prefix in `exclude_prefixes` is
/// omitted.
pub(crate) fn flatten(
    data: &Map<String, Value>,
    skip_top_level: &[&str],
    exclude_prefixes: &[String],
) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    for (key, value) in data {
        if skip_top_level.contains(&key.as_str()) {
            continue;
        }
        flatten_into(key.clone(), value, exclude_prefixes, &mut out);
    }
    out
}

fn flatten_into(path: String, value: &Value, exclude_prefixes: &[String], out: &mut Vec<(String, Value)>) {
    if exclude_prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(format!("{path}.{key}"), child, exclude_prefixes, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                if item.is_object() {
                    continue;
                }
                out.push((path.clone(), item.clone()));
            }
        }
        Value::Null => {}
        scalar => out.push((path, scalar.clone())),
    }
}

/// Expands a dotted-path -> value(s) map into a nested JSON object.
pub(crate) fn expand_ranges(ranges: &std::collections::BTreeMap<String, Vec<Value>>) -> Value {
    let mut root = Map::new();
    for (path, values) in ranges {
        set_nested(&mut root, path, Value::Array(values.clone()));
    }
    Value::Object(root)
}

/// Expands a dotted-path -> single value map into a nested JSON object.
pub(crate) fn expand_flat(values: &std::collections::BTreeMap<String, Value>) -> Value {
    let mut root = Map::new();
    for (path, value) in values {
        set_nested(&mut root, path, value.clone());
    }
    Value::Object(root)
}

pub(crate) fn set_nested(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments = path.split('.').peekable();
    let mut current = root;
    while let Some(segment) = segments.next() {
        if segments.peek().is_none() {
            current.insert(segment.to_string(), value);
            return;
        }
        let entry = current.entry(segment.to_string()).or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry.as_object_mut().expect("just normalized to an object");
    }
}
