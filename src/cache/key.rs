//! Cache Key Module
//!
//! Deterministic content address for a query: SHA-256 over the
//! whitespace-normalized document, the canonical variables and the caller context.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Hex-encoded key for `document` + `variables` + `context`.
///
/// Whitespace differences in the document and key order in the variables do
/// not change the key. `null` variables hash like an empty object.
pub fn cache_key(document: &str, variables: &Value, context: Option<&str>) -> String {
    let mut hasher = Sha256::new();

    let normalized_document = document.split_whitespace().collect::<Vec<_>>().join(" ");
    hasher.update(normalized_document.as_bytes());
    hasher.update(b"\n");

    let canonical = match variables {
        Value::Null => Value::Object(Map::new()),
        other => canonicalize(other),
    };
    hasher.update(canonical.to_string().as_bytes());
    hasher.update(b"\n");

    if let Some(context) = context {
        hasher.update(context.as_bytes());
    }

    hex::encode(hasher.finalize())
}

/// Rebuilds objects with sorted keys so serialization is order independent.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
