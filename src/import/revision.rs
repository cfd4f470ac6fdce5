// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Content fingerprints used as revision tokens.

use crate::error::Result;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Number of digest bytes kept; 32 hex characters fit in a label value
const FINGERPRINT_BYTES: usize = 16;

/// Fingerprint any serializable value. Object key order does not matter.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let canonical = canonicalize(serde_json::to_value(value)?);
    Ok(digest(&serde_json::to_vec(&canonical)?))
}

/// Revision of a rendered realm payload. JSON payloads are compared by value,
/// anything else by its raw bytes.
pub fn payload_revision(payload: &[u8]) -> Result<String> {
    match serde_json::from_slice::<Value>(payload) {
        Ok(value) => fingerprint(&value),
        Err(_) => Ok(digest(payload)),
    }
}

/// Eight hex characters identifying `value`, for shortening object names
pub fn name_hash(value: &str) -> String {
    let mut hash = digest(value.as_bytes());
    hash.truncate(8);
    hash
}

fn digest(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hex::encode(&hash[..FINGERPRINT_BYTES])
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
