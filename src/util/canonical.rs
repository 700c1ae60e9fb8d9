//! Canonical (key-order independent) fingerprints for action calls.

use std::borrow::Cow;

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a JSON value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Decode arguments a planner sent as a JSON-encoded string.
///
/// A blank string reads as `{}`. A string that is not valid JSON is returned
/// unchanged so validation can report it.
pub fn decode_arguments(arguments: &Value) -> Cow<'_, Value> {
    match arguments {
        Value::String(raw) if raw.trim().is_empty() => {
            Cow::Owned(Value::Object(Default::default()))
        }
        Value::String(raw) => match serde_json::from_str(raw.trim()) {
            Ok(decoded) => Cow::Owned(decoded),
            Err(_) => Cow::Borrowed(arguments),
        },
        other => Cow::Borrowed(other),
    }
}

/// Stable digest of an action name plus canonical arguments.
///
/// String-encoded arguments are decoded first, so both encodings of the same
/// call share a fingerprint.
pub fn fingerprint(action_name: &str, arguments: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(action_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_json(&decode_arguments(arguments)).as_bytes());
    format!("{:x}", hasher.finalize())
}
