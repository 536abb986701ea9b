// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! `RefToken` (§3): an opaque pass-by-reference placeholder substituted for
//! a tool-result value that must not become observable inside user code —
//! the broker alone maps a ref back to the real value.

use serde::{Deserialize, Serialize};

use super::ids::RefId;

/// `{"$ref":{"id":"ref_…"}}` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefToken {
    #[serde(rename = "$ref")]
    pub inner: RefTokenInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefTokenInner {
    pub id: RefId,
}

impl RefToken {
    pub fn new(id: RefId) -> Self {
        Self { inner: RefTokenInner { id } }
    }

    pub fn id(&self) -> RefId {
        self.inner.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_in_the_nested_ref_shape() {
        let token = RefToken::new(RefId::new());
        let json = serde_json::to_value(&token).unwrap();
        assert!(json.get("$ref").is_some());
        assert!(json["$ref"].get("id").is_some());
        let id_str = json["$ref"]["id"].as_str().unwrap();
        assert!(id_str.starts_with("ref_"));
    }

    #[test]
    fn round_trips_through_json() {
        let token = RefToken::new(RefId::new());
        let json = serde_json::to_string(&token).unwrap();
        let back: RefToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
    }
}
