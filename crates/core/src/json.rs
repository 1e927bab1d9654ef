// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha1::{Digest as _, Sha1};
use sha2::Sha256;
use std::collections::BTreeMap;

/// A JSON object treated as an open-ended map: `adapterState`, `payload`,
/// `metadata`. Never duck-typed elsewhere — every read of a field inside one
/// of these goes through [`CanonicalJson::get_path`] or [`CanonicalJson::as_map`]
/// rather than ad hoc `Value` indexing at call sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct CanonicalJson(pub Value);

impl CanonicalJson {
    pub fn empty_object() -> Self {
        Self(Value::Object(Map::new()))
    }

    pub fn as_map(&self) -> Option<&Map<String, Value>> {
        self.0.as_object()
    }

    /// Recursively scan for a key matching any of `names` (case-insensitive),
    /// depth-first, up to `max_depth` levels, returning the first non-empty
    /// string value found. Used by the `providerThreadId` recovery rule.
    pub fn find_string_key_ci(&self, names: &[&str], max_depth: usize) -> Option<String> {
        fn walk(value: &Value, names: &[&str], depth_left: usize) -> Option<String> {
            let Value::Object(map) = value else { return None };
            for (key, val) in map {
                if names.iter().any(|n| key.eq_ignore_ascii_case(n)) {
                    if let Some(s) = val.as_str() {
                        if !s.is_empty() {
                            return Some(s.to_string());
                        }
                    }
                }
            }
            if depth_left == 0 {
                return None;
            }
            for val in map.values() {
                if let Some(found) = walk(val, names, depth_left - 1) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.0, names, max_depth)
    }

    /// Reserialize with keys sorted at every object level, producing a
    /// stable byte representation suitable for hashing. `serde_json::Value`
    /// already stores object keys in a `BTreeMap`-backed order by default
    /// (no `preserve_order` feature enabled), so this is a deep rebuild
    /// rather than a sort of an already-ordered map, to also normalize
    /// nested arrays-of-objects consistently.
    pub fn canonicalize(&self) -> String {
        fn sorted(value: &Value) -> Value {
            match value {
                Value::Object(map) => {
                    let ordered: BTreeMap<&String, &Value> = map.iter().collect();
                    let mut out = Map::new();
                    for (k, v) in ordered {
                        out.insert(k.clone(), sorted(v));
                    }
                    Value::Object(out)
                }
                Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
                other => other.clone(),
            }
        }
        serde_json::to_string(&sorted(&self.0)).unwrap_or_default()
    }
}

impl From<Value> for CanonicalJson {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// `sha1(parts.join("|"))`, used for the telemetry dedup fingerprint:
/// `sha1(source|sessionId|providerThreadId|eventName|observedAt|canonical(payload))`.
pub fn sha1_fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(parts.join("|").as_bytes());
    hex::encode(hasher.finalize())
}

/// `sha256(parts.concat())`, used for prompt-record hashes
/// (`providerEventName + text + canonical(payload)`) and frame hashes.
pub fn sha256_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write as _;
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for byte in bytes.as_ref() {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

#[cfg(test)]
#[path = "json_tests.rs"]
mod tests;
