// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Wire-visible stream events (§3 `StreamEvent`) and the envelope used to
//! carry them encrypted (§4.7). Every event on the wire shares the
//! `{protocolVersion, sessionId, seq, type, payload}` shape; `seq` stays
//! visible in clear text even when the payload itself is encrypted, because
//! ordering and gap detection (§4.9) must work without decrypting anything.

use serde::{Deserialize, Serialize};

use super::errors::ErrorCode;
use super::ids::{CallId, SessionId};

/// The only protocol version this crate speaks (§6). A receiver on a
/// different major version must reject the event outright.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub duration_ms: u64,
    pub tool_call_count: u32,
    pub stdout_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// The client-supplied handshake payload (§4.7 `ClientHello`), carried
/// alongside session creation when encryption is requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientHello {
    #[serde(rename = "pubB64")]
    pub pub_b64: String,
    pub curve: String,
    pub supported_algorithms: Vec<String>,
}

/// The server's handshake reply (§4.7 `ServerHello`), embedded in
/// `session_init` once a `ClientHello` was supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHello {
    #[serde(rename = "pubB64")]
    pub pub_b64: String,
    pub selected_algorithm: String,
    pub kdf: String,
    pub key_id: String,
}

/// Encryption terms negotiated for `session_init.encryption` (distinct from
/// `ServerHello`, which carries the actual key-exchange material).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionInfo {
    pub algorithm: String,
    pub kdf: String,
}

/// The tagged union of every event the orchestrator emits (§3 `StreamEvent`).
/// `#[serde(tag = "type", content = "payload", rename_all = "snake_case")]`
/// gives the exact `{type, payload}` shape the spec calls for while keeping
/// each variant's fields as an idiomatic Rust struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StreamEventPayload {
    #[serde(rename_all = "camelCase")]
    SessionInit {
        cancel_url: String,
        expires_at: chrono::DateTime<chrono::Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        encryption: Option<EncryptionInfo>,
        #[serde(skip_serializing_if = "Option::is_none")]
        server_hello: Option<ServerHello>,
    },
    Stdout {
        chunk: String,
    },
    Log {
        level: LogLevel,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        call_id: CallId,
        tool_name: String,
        args: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    ToolResultApplied {
        call_id: CallId,
    },
    Heartbeat {},
    Error {
        code: ErrorCode,
        message: String,
    },
    Final {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<super::errors::ErrorPayload>,
        stats: ExecutionStats,
    },
}

/// The full envelope every event travels in on the wire (§3): identity and
/// ordering fields plus the tagged payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub protocol_version: u32,
    pub session_id: SessionId,
    /// Monotonically increasing within a session, starting at 1 (§3). The
    /// orchestrator is the sole assigner (§4.8).
    pub seq: u64,
    #[serde(flatten)]
    pub payload: StreamEventPayload,
}

impl StreamEvent {
    pub fn new(session_id: SessionId, seq: u64, payload: StreamEventPayload) -> Self {
        Self { protocol_version: PROTOCOL_VERSION, session_id, seq, payload }
    }

    /// True for the sole terminal event kind (§4.8: "MUST emit exactly one
    /// `final` event").
    pub fn is_final(&self) -> bool {
        matches!(self.payload, StreamEventPayload::Final { .. })
    }
}

/// `{kid, nonceB64, ciphertextB64}` (§4.7): the encrypted wrapper around a
/// JSON-encoded [`StreamEvent`] when a session negotiated encryption. `seq`
/// stays visible in clear text on the outer wire frame (see
/// `infrastructure::ndjson`), not inside this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub kid: String,
    #[serde(rename = "nonceB64")]
    pub nonce_b64: String,
    #[serde(rename = "ciphertextB64")]
    pub ciphertext_b64: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_event_round_trips_through_json() {
        let event = StreamEvent::new(
            SessionId::new(),
            1,
            StreamEventPayload::Final {
                ok: true,
                result: Some(serde_json::json!(5)),
                error: None,
                stats: ExecutionStats { duration_ms: 10, tool_call_count: 0, stdout_bytes: 0 },
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: StreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.seq, 1);
        assert!(back.is_final());
    }

    #[test]
    fn tool_call_tags_as_snake_case_type() {
        let event = StreamEvent::new(
            SessionId::new(),
            2,
            StreamEventPayload::ToolCall { call_id: CallId::new(), tool_name: "add".into(), args: serde_json::json!({"a": 1}) },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["payload"]["toolName"], "add");
    }
}
