//! Lenient extraction of a JSON object from model output.

use serde_json::{Map, Value};

use crate::error::{GraphRagError, GraphRagResult};

/// Parse a JSON object out of `raw`.
///
/// Tries the text as-is, then with markdown code fences removed, then the
/// outermost `{...}` span. Anything that is not an object is a
/// [`GraphRagError::ResponseContract`].
pub fn parse_object(raw: &str) -> GraphRagResult<Map<String, Value>> {
    let trimmed = raw.trim();
    if let Ok(Value::Object(map)) = serde_json::from_str(trimmed) {
        return Ok(map);
    }

    let unfenced = strip_fences(trimmed);
    if let Ok(Value::Object(map)) = serde_json::from_str(unfenced) {
        return Ok(map);
    }

    if let (Some(start), Some(end)) = (unfenced.find('{'), unfenced.rfind('}')) {
        if start < end {
            if let Ok(Value::Object(map)) = serde_json::from_str(&unfenced[start..=end]) {
                return Ok(map);
            }
        }
    }

    Err(GraphRagError::ResponseContract(format!(
        "no JSON object in model output ({} chars)",
        raw.chars().count()
    )))
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (`json`, `JSON`, ...) on the opening fence line.
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// A string field, trimmed; empty when absent or not a string.
pub fn str_of(map: &Map<String, Value>, key: &str) -> String {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

/// A list of non-empty strings, deduplicated in order. Accepts an array or a
/// comma-separated string.
pub fn str_list_of(map: &Map<String, Value>, key: &str) -> Vec<String> {
    let items: Vec<String> = match map.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s.split(',').map(|p| p.trim().to_string()).collect(),
        _ => Vec::new(),
    };
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
