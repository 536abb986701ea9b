// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The enclavejs broker's HTTP client (§6): submits `POST /sessions`,
//! performs the client side of the ECDH handshake (§4.7) when encryption is
//! requested, and hands back a [`SessionStream`] of decoded events.

use enclavejs_core::domain::errors::ErrorPayload;
use enclavejs_core::domain::events::ClientHello;
use enclavejs_core::domain::guard::GuardReport;
use enclavejs_core::domain::ids::SessionId;
use enclavejs_core::domain::session::SessionLimits;
use enclavejs_core::infrastructure::crypto::{CryptoError, EphemeralKeypair, CURVE_NAME, SELECTED_ALGORITHM};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stream::SessionStream;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("failed to decode a stream frame: {0}")]
    Decode(String),
    #[error("malformed NDJSON line {0}: {1}")]
    MalformedLine(u64, String),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("broker rejected the program: {0:?}")]
    GuardRejected(GuardReport),
    #[error("broker error {}: {}", .0.code, .0.message)]
    Protocol(ErrorPayload),
    #[error("unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("session stream closed before a final event arrived")]
    UnexpectedDisconnect,
}

/// Parameters for [`EnclaveClient::create_session`] beyond the code itself.
/// Mirrors the broker's `CreateSessionRequest` body (§6).
#[derive(Debug, Clone, Default)]
pub struct CreateSessionOptions {
    pub limits: Option<SessionLimits>,
    pub preset: Option<String>,
    pub encrypt: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionBody<'a> {
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limits: Option<SessionLimits>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preset: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_hello: Option<ClientHello>,
}

#[derive(Debug, Deserialize)]
struct RejectionBody {
    guard: GuardReport,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorPayload,
}

/// A thin HTTP client for one broker base URL. Cheap to clone (wraps a
/// pooled [`reqwest::Client`]); a long-lived process should build one and
/// share it across sessions.
#[derive(Debug, Clone)]
pub struct EnclaveClient {
    base_url: String,
    http: Client,
}

impl EnclaveClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), http: Client::new() }
    }

    pub fn with_http_client(base_url: impl Into<String>, http: Client) -> Self {
        Self { base_url: base_url.into(), http }
    }

    /// Submits `code` to `POST /sessions` and, on acceptance, returns a
    /// [`SessionStream`] over the resulting NDJSON body. A Guard rejection
    /// or any other 4xx surfaces before any bytes are read, matching the
    /// broker's "validation errors precede `session_init`" policy (§7).
    pub async fn create_session(&self, code: impl Into<String>, options: CreateSessionOptions) -> Result<SessionStream, ClientError> {
        let code = code.into();
        let keypair = options.encrypt.then(EphemeralKeypair::generate);
        let client_hello = keypair.as_ref().map(|kp| ClientHello {
            pub_b64: kp.public_b64(),
            curve: CURVE_NAME.to_string(),
            supported_algorithms: vec![SELECTED_ALGORITHM.to_string()],
        });

        let body = CreateSessionBody { code: &code, limits: options.limits, preset: options.preset.as_deref(), client_hello };
        let response = self.http.post(format!("{}/sessions", self.base_url)).json(&body).send().await?;

        match response.status() {
            StatusCode::OK => Ok(SessionStream::new(response, keypair)),
            StatusCode::UNPROCESSABLE_ENTITY => {
                let rejection: RejectionBody = response.json().await?;
                Err(ClientError::GuardRejected(rejection.guard))
            }
            status => {
                let body_text = response.text().await.unwrap_or_default();
                match serde_json::from_str::<ErrorBody>(&body_text) {
                    Ok(ErrorBody { error }) => Err(ClientError::Protocol(error)),
                    Err(_) => Err(ClientError::UnexpectedStatus { status: status.as_u16(), body: body_text }),
                }
            }
        }
    }

    /// `POST /sessions/{id}/cancel` (§6).
    pub async fn cancel_session(&self, session_id: SessionId) -> Result<(), ClientError> {
        let response = self.http.post(format!("{}/sessions/{}/cancel", self.base_url, session_id)).send().await?;
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status().as_u16();
        let body_text = response.text().await.unwrap_or_default();
        Err(ClientError::UnexpectedStatus { status, body: body_text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_session_options_default_to_unencrypted_broker_defaults() {
        let options = CreateSessionOptions::default();
        assert!(options.limits.is_none());
        assert!(options.preset.is_none());
        assert!(!options.encrypt);
    }

    #[test]
    fn create_session_body_omits_client_hello_when_not_encrypting() {
        let body = CreateSessionBody { code: "return 1;", limits: None, preset: Some("SECURE"), client_hello: None };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("clientHello").is_none());
        assert_eq!(json["preset"], "SECURE");
    }
}
