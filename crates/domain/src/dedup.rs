use serde_json::Value;
use std::hash::{Hash, Hasher};

/// A stable (process-independent) hash over a tool name and its canonical
/// (key-sorted) JSON argument bytes. Used only as the *fallback* half of the
/// tool-call dedup key, when a transport omits `call_id`.
///
/// `serde_json::to_vec` on a `Value` built from a map already serializes
/// object keys in the map's iteration order, which for `serde_json`'s
/// default `Value::Object` (a `BTreeMap` unless the `preserve_order`
/// feature is enabled) is lexicographic — i.e. already canonical.
pub fn stable_hash(tool_name: &[u8], canonical_arguments: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    tool_name.hash(&mut hasher);
    canonical_arguments.hash(&mut hasher);
    hasher.finish()
}

/// The dedup key used across the tool pipeline and the thread's pending
/// tool bookkeeping: `call_id` when present and non-empty, otherwise a
/// stable hash of `tool_name` + canonical `arguments`.
///
/// Callers relying on multiple identical-argument tool calls within one
/// turn must ensure their transport always supplies a `call_id` — two
/// distinct calls with the same tool name and arguments but no `call_id`
/// are indistinguishable under this key by construction.
pub fn dedup_key(call_id: Option<&str>, tool_name: &str, arguments: &Value) -> String {
    match call_id {
        Some(id) if !id.is_empty() => format!("call_id:{id}"),
        _ => {
            let canonical = serde_json::to_vec(arguments).unwrap_or_default();
            let hash = stable_hash(tool_name.as_bytes(), &canonical);
            format!("fallback:{hash:x}")
        }
    }
}
