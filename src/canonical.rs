//! Canonical JSON encoding and checksums.
//!
//! State blobs are checksummed with SHA-256 over a canonical encoding:
//! object keys sorted, no insignificant whitespace, UTF-8. The encoding is
//! computed explicitly rather than relying on serializer defaults so that
//! checksums stay stable across processes and dependency upgrades.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::errors::StateError;

/// Canonically encode any serializable value.
pub fn encode<T: Serialize>(value: &T) -> Result<String, StateError> {
    let value = serde_json::to_value(value)?;
    let mut out = String::new();
    write_value(&value, &mut out);
    Ok(out)
}

/// Hex-encoded SHA-256 digest of the canonical encoding.
pub fn checksum<T: Serialize>(value: &T) -> Result<String, StateError> {
    Ok(checksum_bytes(encode(value)?.as_bytes()))
}

/// Hex-encoded SHA-256 digest of raw bytes.
pub fn checksum_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json handles string escaping; a key serialization
                // cannot fail.
                out.push_str(&serde_json::to_string(key).expect("string key"));
                out.push(':');
                write_value(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        // Scalars already have a single stable serde_json rendering.
        scalar => out.push_str(&scalar.to_string()),
    }
}
