//! Dotted-path algebra shared by variable extraction, data mapping and
//! condition evaluation.

use serde_json::{Map, Value};

/// Resolves a dot-separated path. Array segments are numeric indices.
///
/// Returns `None` as soon as a segment is missing or the current value cannot
/// be indexed; a present JSON `null` resolves to `Some(&Value::Null)`.
pub fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index)),
        _ => None,
    })
}

/// Resolves a path against a flat map whose keys may themselves be the
/// first segment.
pub fn resolve_in<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = map.get(head)?;
    match rest {
        Some(rest) => resolve(value, rest),
        None => Some(value),
    }
}

/// Writes `value` at a dotted path, creating intermediate objects.
/// Non-object intermediates are replaced.
pub fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };

    let mut current = target;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.to_string(), value);
}

/// Enumerates every dotted path of an object, parents before children, keys
/// in document order. Arrays are leaves.
pub fn extract_paths(value: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    if let Value::Object(map) = value {
        collect_paths(map, "", &mut paths);
    }
    paths
}

fn collect_paths(map: &Map<String, Value>, prefix: &str, paths: &mut Vec<String>) {
    for (key, child) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        paths.push(path.clone());
        if let Value::Object(nested) = child {
            collect_paths(nested, &path, paths);
        }
    }
}
