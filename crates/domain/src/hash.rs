//! Canonical JSON and the context hashes built on top of it.
//!
//! `stable_stringify` must be bit-exact across implementations because the
//! control plane compares approval context hashes byte-for-byte: object keys
//! are sorted alphabetically at every depth, arrays keep their order, and
//! primitives encode exactly as standard JSON.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonical JSON encoding with alphabetically sorted object keys.
pub fn stable_stringify(value: &Value) -> String {
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
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // serde_json handles escaping; a bare String never fails.
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
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
        scalar => {
            out.push_str(&serde_json::to_string(scalar).unwrap_or_default());
        }
    }
}

/// Lowercase hex SHA-256 of the given string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// The hash binding a tool approval to its originating context, so an
/// approval cannot be replayed against a different (run, turn, tool, input).
pub fn approval_context_hash(run_id: &str, turn: u32, tool_name: &str, input: &Value) -> String {
    sha256_hex(&format!(
        "{run_id}|{turn}|{tool_name}|{}",
        stable_stringify(input)
    ))
}

/// The hash recorded in a checkpoint's replay boundary.
pub fn replay_boundary_hash(run_id: &str, turn: u32, reason: &str, message_count: usize) -> String {
    sha256_hex(&format!("{run_id}|{turn}|{reason}|{message_count}"))
}

/// Cache key for the optional prompt cache.
pub fn prompt_cache_key(fingerprint: &Value) -> String {
    sha256_hex(&stable_stringify(fingerprint))
}
