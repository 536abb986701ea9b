// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Safe serialization (§4.5): the rules applied to every value crossing the
//! Tool Bridge boundary — JSON-only, no `__`-prefixed keys, no cycles, and a
//! hard size cap.

use serde_json::Value;
use thiserror::Error;

use super::errors::ErrorCode;

#[derive(Debug, Error, PartialEq)]
pub enum SerializationError {
    #[error("serialized value is {actual} bytes, exceeding the {limit} byte cap")]
    TooLarge { limit: usize, actual: usize },
    #[error("value nesting exceeds the maximum depth of {0}; refusing to serialize (possible cycle)")]
    TooDeep(usize),
}

impl SerializationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            // Both surface to callers as a generic execution error; the
            // distinguishing detail lives in the message.
            Self::TooLarge { .. } | Self::TooDeep(_) => ErrorCode::ExecutionError,
        }
    }
}

/// A conservative ceiling on nested object/array depth. `serde_json::Value`
/// cannot itself form a reference cycle, but a pathologically deep tree from
/// adversarial input is functionally indistinguishable from one and must be
/// bounded the same way.
const MAX_DEPTH: usize = 64;

/// Strips every own-property key beginning with `__` (including
/// `__proto__`) from objects, recursively, then verifies the result
/// serializes within `max_bytes`. `undefined`-shaped holes do not exist in
/// `serde_json::Value`; a `Value::Null` already stands in for them, matching
/// the contract's "omitted" behavior for object values produced by the
/// sandbox bridge.
pub fn sanitize(value: &Value, max_bytes: usize) -> Result<Value, SerializationError> {
    let stripped = strip(value, 0)?;
    let bytes = serde_json::to_vec(&stripped).expect("Value always serializes");
    if bytes.len() > max_bytes {
        return Err(SerializationError::TooLarge { limit: max_bytes, actual: bytes.len() });
    }
    Ok(stripped)
}

fn strip(value: &Value, depth: usize) -> Result<Value, SerializationError> {
    if depth > MAX_DEPTH {
        return Err(SerializationError::TooDeep(MAX_DEPTH));
    }
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                if k.starts_with("__") {
                    continue;
                }
                out.insert(k.clone(), strip(v, depth + 1)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(strip(item, depth + 1)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_dunder_prefixed_keys() {
        let input = json!({"a": 1, "__proto__": {"polluted": true}, "__secret": "x"});
        let out = sanitize(&input, 1024).unwrap();
        assert_eq!(out, json!({"a": 1}));
    }

    #[test]
    fn strips_nested_dunder_keys() {
        let input = json!({"a": {"__proto__": 1, "b": 2}});
        let out = sanitize(&input, 1024).unwrap();
        assert_eq!(out, json!({"a": {"b": 2}}));
    }

    #[test]
    fn rejects_oversized_payloads() {
        let input = json!({"data": "x".repeat(100)});
        let err = sanitize(&input, 10).unwrap_err();
        assert!(matches!(err, SerializationError::TooLarge { .. }));
    }

    #[test]
    fn passes_through_ordinary_values() {
        let input = json!({"a": [1, 2, 3], "b": "hello", "c": null});
        assert_eq!(sanitize(&input, 1024).unwrap(), input);
    }
}
