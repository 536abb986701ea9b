// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Drives [`EnclaveClient`] sessions with the reconnection core's backoff
//! (§4.9), retrying session creation when a stream disconnects before its
//! terminal `final` event. This broker's transport (`POST /sessions`,
//! §4.11) has no mid-session resume — unlike the remote runtime-host
//! WebSocket channel (§6), an interrupted client here cannot ask to
//! "continue session `s_...` from `seq` N" — so a "reconnect" is a fresh
//! session submission of the same code, with [`ConnectionState`] tracked
//! across attempts the way a resumable transport's client would.

use enclavejs_core::domain::events::StreamEvent;
use enclavejs_core::domain::reconnection::{BackoffConfig, ConnectionState};
use enclavejs_runtime::infrastructure::reconnection::reconnect_with_backoff;
use parking_lot::Mutex;

use crate::client::{ClientError, CreateSessionOptions, EnclaveClient};

/// Wraps an [`EnclaveClient`] with the backoff policy and connection-state
/// bookkeeping a reconnecting caller wants (§4.9 defaults: 5 retries,
/// 1s initial, 30s cap, ×2 multiplier, ±30% jitter).
pub struct ReconnectingClient {
    client: EnclaveClient,
    backoff: BackoffConfig,
    state: Mutex<ConnectionState>,
}

impl ReconnectingClient {
    pub fn new(client: EnclaveClient) -> Self {
        Self { client, backoff: BackoffConfig::default(), state: Mutex::new(ConnectionState::Disconnected) }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Submits `code`, draining its event stream and invoking `on_event`
    /// for every event seen across every attempt, until a `final` event
    /// arrives or the backoff policy's retries are exhausted. Returns the
    /// terminal `final` event on success.
    pub async fn run_session<F>(&self, code: impl Into<String>, options: CreateSessionOptions, mut on_event: F) -> Result<StreamEvent, ClientError>
    where
        F: FnMut(&StreamEvent),
    {
        let code = code.into();
        self.set_state(ConnectionState::Connecting);
        let result = reconnect_with_backoff(self.backoff, |attempt| {
            if attempt > 0 {
                self.set_state(ConnectionState::Reconnecting);
            }
            let code = code.clone();
            let options = options.clone();
            async move {
                let mut stream = self.client.create_session(code, options).await?;
                self.set_state(ConnectionState::Connected);
                loop {
                    match stream.next_event().await {
                        Some(Ok(event)) => {
                            let is_final = event.is_final();
                            on_event(&event);
                            if is_final {
                                return Ok(event);
                            }
                        }
                        Some(Err(err)) => return Err(err),
                        None => return Err(ClientError::UnexpectedDisconnect),
                    }
                }
            }
        })
        .await;

        self.set_state(if result.is_ok() { ConnectionState::Closed } else { ConnectionState::Failed });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        let client = ReconnectingClient::new(EnclaveClient::new("http://127.0.0.1:0"));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn custom_backoff_is_retained() {
        let cfg = BackoffConfig { max_retries: 2, ..BackoffConfig::default() };
        let client = ReconnectingClient::new(EnclaveClient::new("http://127.0.0.1:0")).with_backoff(cfg);
        assert_eq!(client.backoff.max_retries, 2);
    }
}
