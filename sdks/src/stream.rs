// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Turns a session's raw NDJSON response body into parsed `StreamEvent`s
//! (§4.6): framing, the client side of decrypting the encrypted-envelope
//! frames the broker switches to once a session negotiates encryption
//! (§4.7), and `seq` gap tracking (§4.9).

use std::collections::VecDeque;

use enclavejs_core::domain::events::{EncryptedEnvelope, StreamEvent, StreamEventPayload};
use enclavejs_core::domain::ids::SessionId;
use enclavejs_core::domain::reconnection::{Gap, SequenceTracker};
use enclavejs_core::infrastructure::crypto::{derive_session_keys, EphemeralKeypair, SessionKey};
use enclavejs_core::infrastructure::ndjson::{Frame, NdjsonDecoder};
use reqwest::Response;

use crate::client::ClientError;

const DEFAULT_TRACKED_GAPS: usize = 100;

/// One session's decoded event stream. Wraps the raw HTTP response body
/// `EnclaveClient::create_session` got back from `POST /sessions`.
pub struct SessionStream {
    session_id: Option<SessionId>,
    body: Response,
    decoder: NdjsonDecoder,
    pending: VecDeque<Frame<serde_json::Value>>,
    client_keypair: Option<EphemeralKeypair>,
    decrypt_key: Option<SessionKey>,
    handshake_done: bool,
    seq_tracker: SequenceTracker,
    exhausted: bool,
}

impl SessionStream {
    pub(crate) fn new(body: Response, client_keypair: Option<EphemeralKeypair>) -> Self {
        Self {
            session_id: None,
            body,
            decoder: NdjsonDecoder::new(),
            pending: VecDeque::new(),
            client_keypair,
            decrypt_key: None,
            handshake_done: false,
            seq_tracker: SequenceTracker::new(DEFAULT_TRACKED_GAPS),
            exhausted: false,
        }
    }

    /// The broker-assigned session id, known from the first event
    /// (`session_init`) onward. `None` before the first event has arrived.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// Gaps the sequence tracker has observed but not yet resolved (§4.9).
    pub fn outstanding_gaps(&self) -> &[Gap] {
        self.seq_tracker.outstanding_gaps()
    }

    pub fn last_seq(&self) -> u64 {
        self.seq_tracker.last_seq()
    }

    /// Pulls the next decoded (and, where negotiated, decrypted) event off
    /// the stream. `None` means the body closed with nothing left
    /// buffered — a caller should only treat that as a clean end if the
    /// last event observed was `final`; anything else is an unexpected
    /// disconnect (see [`crate::reconnect`]).
    pub async fn next_event(&mut self) -> Option<Result<StreamEvent, ClientError>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Some(match frame {
                    Frame::Event(value) => self.process_value(value),
                    Frame::Error(line_error) => Err(ClientError::MalformedLine(line_error.line_number, line_error.error)),
                });
            }
            if self.exhausted {
                return None;
            }
            match self.body.chunk().await {
                Ok(Some(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.pending.extend(self.decoder.feed::<serde_json::Value>(text)),
                    Err(err) => return Some(Err(ClientError::Decode(err.to_string()))),
                },
                Ok(None) => self.exhausted = true,
                Err(err) => return Some(Err(ClientError::Transport(err))),
            }
        }
    }

    /// Decodes one already-framed JSON value into a [`StreamEvent`],
    /// performing the handshake key derivation on the first event and
    /// decrypting subsequent ones when a key was negotiated.
    fn process_value(&mut self, value: serde_json::Value) -> Result<StreamEvent, ClientError> {
        let event = if !self.handshake_done {
            let event: StreamEvent = serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))?;
            self.handshake_done = true;
            self.session_id = Some(event.session_id);
            self.adopt_handshake(&event)?;
            event
        } else if let Some(key) = self.decrypt_key.as_ref() {
            let envelope: EncryptedEnvelope = serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))?;
            let plaintext = key.decrypt(&envelope)?;
            serde_json::from_slice(&plaintext).map_err(|e| ClientError::Decode(e.to_string()))?
        } else {
            serde_json::from_value(value).map_err(|e| ClientError::Decode(e.to_string()))?
        };

        if let Some(gap) = self.seq_tracker.observe(event.seq) {
            tracing::warn!(session_id = ?self.session_id, from = gap.from, to = gap.to, "sequence gap in session stream");
        }
        Ok(event)
    }

    /// If `event` is the `session_init` carrying a `ServerHello`, derives
    /// this endpoint's copy of the directional session keys (§4.7) and
    /// keeps the `s2c` key to decrypt every event that follows.
    fn adopt_handshake(&mut self, event: &StreamEvent) -> Result<(), ClientError> {
        let StreamEventPayload::SessionInit { server_hello: Some(hello), .. } = &event.payload else { return Ok(()) };
        let Some(keypair) = self.client_keypair.take() else { return Ok(()) };
        let shared = keypair.shared_secret(&hello.pub_b64)?;
        let keys = derive_session_keys(&shared, &event.session_id.to_string(), &hello.key_id)?;
        self.decrypt_key = Some(keys.s2c);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclavejs_core::domain::events::ExecutionStats;

    fn final_event(session_id: SessionId, seq: u64) -> StreamEvent {
        StreamEvent::new(
            session_id,
            seq,
            StreamEventPayload::Final { ok: true, result: Some(serde_json::json!(5)), error: None, stats: ExecutionStats { duration_ms: 1, tool_call_count: 0, stdout_bytes: 0 } },
        )
    }

    #[test]
    fn sequence_tracker_state_starts_clean() {
        let tracker = SequenceTracker::new(DEFAULT_TRACKED_GAPS);
        assert!(tracker.outstanding_gaps().is_empty());
        assert_eq!(tracker.last_seq(), 0);
    }

    #[test]
    fn final_event_fixture_round_trips_through_json() {
        let event = final_event(SessionId::new(), 4);
        let value = serde_json::to_value(&event).unwrap();
        let back: StreamEvent = serde_json::from_value(value).unwrap();
        assert!(back.is_final());
        assert_eq!(back.seq, 4);
    }
}
