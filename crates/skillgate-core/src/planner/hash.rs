//! Plan identity hashing.
//!
//! Defined here so the planner does not depend on a hashing crate. The
//! SHA-256 adapter lives in skillgate-infra.

use serde_json::{Map, Value};

/// Hex digest over a canonical plan description.
pub trait PlanHasher: Send + Sync {
    fn digest(&self, canonical: &str) -> String;
}

/// Recursively sort object keys so logically equal payloads serialize to
/// the same bytes.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), normalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}
