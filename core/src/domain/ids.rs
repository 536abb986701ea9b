// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Branded identifier newtypes (§9: "use distinct newtype wrappers around a
//! byte sequence" instead of the source's prefixed strings).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("identifier missing required prefix '{expected}': {got}")]
    WrongPrefix { expected: &'static str, got: String },
    #[error("identifier body is not a valid UUID: {0}")]
    InvalidUuid(String),
}

macro_rules! prefixed_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(into = "String", try_from = "String")]
        pub struct $name(pub Uuid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Generate a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse(s: &str) -> Result<Self, IdParseError> {
                let body = s.strip_prefix($prefix).ok_or_else(|| IdParseError::WrongPrefix {
                    expected: $prefix,
                    got: s.to_string(),
                })?;
                let uuid = Uuid::parse_str(body).map_err(|e| IdParseError::InvalidUuid(e.to_string()))?;
                Ok(Self(uuid))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.to_string()
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdParseError;
            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::parse(&s)
            }
        }
    };
}

prefixed_id!(SessionId, "s_");
prefixed_id!(CallId, "c_");
prefixed_id!(RefId, "ref_");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_parse() {
        let id = SessionId::new();
        let rendered = id.to_string();
        assert!(rendered.starts_with("s_"));
        assert_eq!(SessionId::parse(&rendered).unwrap(), id);
    }

    #[test]
    fn rejects_wrong_prefix() {
        let call_id_text = CallId::new().to_string();
        assert!(matches!(
            SessionId::parse(&call_id_text),
            Err(IdParseError::WrongPrefix { .. })
        ));
    }

    #[test]
    fn rejects_malformed_uuid_body() {
        assert!(matches!(
            SessionId::parse("s_not-a-uuid"),
            Err(IdParseError::InvalidUuid(_))
        ));
    }
}
