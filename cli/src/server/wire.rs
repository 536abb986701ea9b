// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The broker-specific outer wire frame used when a session negotiated
//! encryption (§4.7): `seq` and the envelope identity travel in clear text
//! alongside the `EncryptedEnvelope` so gap detection (§4.9) never needs to
//! decrypt anything. This is deliberately kept out of `enclavejs-core`
//! because it's a transport detail of *this* broker's NDJSON body, not part
//! of the `StreamEvent` domain type itself.

use enclavejs_core::domain::events::{EncryptedEnvelope, StreamEvent, PROTOCOL_VERSION};
use enclavejs_core::domain::ids::SessionId;
use enclavejs_core::infrastructure::crypto::SessionKey;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct EncryptedFrame {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: u32,
    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
    pub seq: u64,
    #[serde(flatten)]
    pub envelope: EncryptedEnvelope,
}

/// Renders one outbound NDJSON line for `event`, encrypting the payload
/// with `s2c_key` when the session negotiated encryption.
pub fn encode_event_line(event: &StreamEvent, s2c_key: Option<&mut SessionKey>) -> Result<String, anyhow::Error> {
    match s2c_key {
        None => Ok(enclavejs_core::infrastructure::ndjson::encode_line(event)?),
        Some(key) => {
            let plaintext = serde_json::to_vec(event)?;
            let envelope = key.encrypt(&plaintext)?;
            let frame = EncryptedFrame { protocol_version: PROTOCOL_VERSION, session_id: event.session_id, seq: event.seq, envelope };
            Ok(enclavejs_core::infrastructure::ndjson::encode_line(&frame)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclavejs_core::domain::events::StreamEventPayload;
    use enclavejs_core::infrastructure::crypto::{derive_session_keys, EphemeralKeypair};

    #[test]
    fn plaintext_line_is_just_the_event() {
        let event = StreamEvent::new(SessionId::new(), 1, StreamEventPayload::Heartbeat {});
        let line = encode_event_line(&event, None).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "heartbeat");
    }

    #[test]
    fn encrypted_line_keeps_seq_visible_but_hides_the_payload() {
        let client = EphemeralKeypair::generate();
        let server = EphemeralKeypair::generate();
        let shared = server.shared_secret(&client.public_b64()).unwrap();
        let mut keys = derive_session_keys(&shared, "s_test", "key1").unwrap();

        let event = StreamEvent::new(SessionId::new(), 3, StreamEventPayload::Heartbeat {});
        let line = encode_event_line(&event, Some(&mut keys.s2c)).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["seq"], 3);
        assert!(value.get("ciphertextB64").is_some());
        assert!(value.get("type").is_none());
    }
}
