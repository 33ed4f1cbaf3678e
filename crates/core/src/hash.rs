//! Content-addressed request fingerprints.
//!
//! Fingerprints are for equality testing only: two requests that mean the
//! same thing hash the same, regardless of key or list order upstream.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Rebuild `value` with object keys in sorted order, recursively.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// SHA-256 over the canonical JSON encoding of `value`, hex encoded.
pub fn compute_request_key(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(value).to_string().as_bytes());
    hex::encode(hasher.finalize())
}
