//! Canonical parameter encoding.
//!
//! The dedup key for live subscriptions is the canonical JSON encoding of
//! the validated params: object keys sorted recursively, no whitespace,
//! absent/null params identical to `{}`.  The encoding is computed here so
//! it never depends on serializer map-ordering behavior.

use serde_json::Value;

/// Canonical encoding of `params`, used as the subscription dedup key.
pub fn fingerprint(params: Option<&Value>) -> String {
    match params {
        None | Some(Value::Null) => "{}".to_owned(),
        Some(value) => {
            let mut out = String::new();
            write_canonical(value, &mut out);
            out
        }
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Key quoting must match serde's string escaping exactly.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Scalars already serialize compactly and deterministically.
        other => out.push_str(&other.to_string()),
    }
}
