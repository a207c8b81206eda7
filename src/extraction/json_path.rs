//! JSON path resolution.
//!
//! Resolves dot-notation paths like "usage.prompt_tokens" or
//! "choices.0.delta.content" to values in JSON. A `*` segment fans out
//! over every element of an array (or every value of an object).

use serde_json::Value;

/// Resolve a dot-notation path to a single value in JSON.
///
/// Wildcard segments are not supported here; use [`resolve_json_path_all`].
///
/// # Examples
/// ```
/// use oisp_normalize::extraction::resolve_json_path;
/// use serde_json::json;
/// let data = json!({"usage": {"prompt_tokens": 12}});
/// let value = resolve_json_path(&data, "usage.prompt_tokens");
/// assert_eq!(value, Some(&json!(12)));
/// ```
pub fn resolve_json_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(data);
    }

    let mut current = data;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => {
                current = obj.get(part)?;
            }
            Value::Array(arr) => {
                // Support array indexing like "choices.0.finish_reason"
                let index: usize = part.parse().ok()?;
                current = arr.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Resolve a path that may contain `*` segments, returning every match in
/// document order.
pub fn resolve_json_path_all<'a>(data: &'a Value, path: &str) -> Vec<&'a Value> {
    if path.is_empty() {
        return vec![data];
    }
    let parts: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    collect(data, &parts, &mut out);
    out
}

fn collect<'a>(current: &'a Value, parts: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = parts.split_first() else {
        out.push(current);
        return;
    };

    match (current, *head) {
        (Value::Array(arr), "*") => {
            for item in arr {
                collect(item, rest, out);
            }
        }
        (Value::Object(obj), "*") => {
            for item in obj.values() {
                collect(item, rest, out);
            }
        }
        (Value::Object(obj), key) => {
            if let Some(next) = obj.get(key) {
                collect(next, rest, out);
            }
        }
        (Value::Array(arr), index) => {
            if let Some(next) = index.parse::<usize>().ok().and_then(|i| arr.get(i)) {
                collect(next, rest, out);
            }
        }
        _ => {}
    }
}

/// Try each path in order and return the first one that resolves to a
/// non-null value.
pub fn first_match<'a, S: AsRef<str>>(data: &'a Value, paths: &[S]) -> Option<&'a Value> {
    paths
        .iter()
        .filter_map(|p| resolve_json_path(data, p.as_ref()))
        .find(|v| !v.is_null())
}

/// First path resolving to a string.
pub fn first_string<S: AsRef<str>>(data: &Value, paths: &[S]) -> Option<String> {
    paths
        .iter()
        .filter_map(|p| resolve_json_path(data, p.as_ref()))
        .find_map(|v| v.as_str().map(str::to_string))
}

/// First path resolving to a non-negative integer.
///
/// Negative numbers and floats with a fractional part do not count as
/// token counts and are skipped.
pub fn first_u64<S: AsRef<str>>(data: &Value, paths: &[S]) -> Option<u64> {
    paths
        .iter()
        .filter_map(|p| resolve_json_path(data, p.as_ref()))
        .find_map(value_to_u64)
}

/// Concatenate every string reached by any of the (wildcard) paths.
///
/// Returns `None` when no path reaches a string at all, which is distinct
/// from reaching an empty string.
pub fn concat_strings<S: AsRef<str>>(data: &Value, paths: &[S]) -> Option<String> {
    for path in paths {
        let parts: Vec<&str> = resolve_json_path_all(data, path.as_ref())
            .into_iter()
            .filter_map(|v| v.as_str())
            .collect();
        if !parts.is_empty() {
            return Some(parts.concat());
        }
    }
    None
}

/// Convert a JSON value to an unsigned integer if possible.
pub fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Convert a JSON value to a boolean if possible.
pub fn value_to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        _ => None,
    }
}
