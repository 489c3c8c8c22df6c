//! SW-014: BLAKE3 hashing of declared node configuration.

use crate::core::types::NodeDecl;
use serde::Serialize;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Compute a composite hash from multiple components.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

/// Hash any serializable value. Map keys are canonicalized (sorted), so
/// reordering a YAML mapping does not change the hash.
pub fn hash_canonical<T: Serialize + std::fmt::Debug>(value: &T) -> String {
    let canonical = serde_json::to_value(value)
        .map(|v| sorted(v).to_string())
        .unwrap_or_else(|_| format!("{:?}", value));
    hash_string(&canonical)
}

/// Hash of a node's declared configuration.
pub fn hash_declaration(decl: &NodeDecl) -> String {
    composite_hash(&[&decl.kind.to_string(), &hash_canonical(decl)])
}

fn sorted(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<(String, serde_json::Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sorted).collect())
        }
        other => other,
    }
}

/// Short hex prefix of a hash, for generated names.
pub fn short(hash: &str, len: usize) -> &str {
    let hex = hash.strip_prefix("blake3:").unwrap_or(hash);
    &hex[..len.min(hex.len())]
}
