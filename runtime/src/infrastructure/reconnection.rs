// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Wires `enclavejs-core::domain::reconnection`'s clock-free types to a real
//! runtime (§4.9): gap-aware replay lookup against an [`EventBuffer`], and a
//! generic backoff-driven retry loop for reconnecting clients (shared by the
//! broker's own client-facing SDK and any embedder of this crate).

use std::future::Future;
use std::sync::Arc;

use enclavejs_core::domain::errors::ErrorCode;
use enclavejs_core::domain::events::{StreamEvent, StreamEventPayload};
use enclavejs_core::domain::reconnection::{BackoffConfig, EventBuffer};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Buffers every event an [`Orchestrator`](crate::application::orchestrator::Orchestrator)
/// emits so a reconnecting client can request a replay (§4.9). Kept
/// separate from the orchestrator itself so a broker can size/own it
/// independently (e.g. one buffer shared across a session's lifetime even
/// if the orchestrator is reconstructed).
pub struct ReplayBuffer {
    inner: Mutex<EventBuffer>,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(EventBuffer::new(capacity)) }
    }

    pub fn record(&self, event: StreamEvent) {
        self.inner.lock().push(event);
    }

    /// Attempts to satisfy a reconnecting client's replay request for
    /// `[from, to]`. A `None` from the underlying buffer means the gap
    /// predates everything still retained, which the caller should surface
    /// as `REPLAY_UNAVAILABLE` (§4.9.1, §7).
    pub fn replay(&self, from: u64, to: u64) -> Result<Vec<StreamEvent>, ErrorCode> {
        self.inner.lock().replay(from, to).ok_or(ErrorCode::ReplayUnavailable)
    }
}

/// Spawns a task that records every event broadcast on `events` into
/// `buffer`, for as long as the channel stays open.
pub fn spawn_replay_recorder(buffer: Arc<ReplayBuffer>, mut events: broadcast::Receiver<StreamEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => buffer.record(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Drives `connect` with exponential backoff per [`BackoffConfig`] until it
/// succeeds or `max_retries` is exhausted (§4.9: "the client applies
/// exponential backoff with jitter between attempts"). Generic over the
/// connection attempt so both the broker's own reconnecting subscriber and
/// `enclavejs-sdks`' client share this driver instead of each reimplementing
/// the retry loop.
pub async fn reconnect_with_backoff<T, E, F, Fut>(cfg: BackoffConfig, mut connect: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut rng = rand::thread_rng();
    let mut attempt = 0;
    loop {
        match connect(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= cfg.max_retries {
                    return Err(err);
                }
                let delay = cfg.delay_for(attempt, &mut rng);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclavejs_core::domain::ids::SessionId;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn heartbeat_event(seq: u64) -> StreamEvent {
        StreamEvent::new(SessionId::new(), seq, StreamEventPayload::Heartbeat {})
    }

    #[test]
    fn replay_buffer_reports_unavailable_past_its_retention_window() {
        let buffer = ReplayBuffer::new(2);
        for seq in 1..=5 {
            buffer.record(heartbeat_event(seq));
        }
        assert!(matches!(buffer.replay(1, 3), Err(ErrorCode::ReplayUnavailable)));
        assert!(buffer.replay(4, 5).is_ok());
    }

    #[tokio::test]
    async fn reconnect_with_backoff_retries_until_success() {
        let attempts = AtomicU32::new(0);
        let cfg = BackoffConfig { initial_ms: 1, max_ms: 2, jitter: false, ..BackoffConfig::default() };
        let result: Result<&'static str, &'static str> = reconnect_with_backoff(cfg, |_attempt| {
            let count = attempts.fetch_add(1, Ordering::SeqCst);
            async move { if count < 2 { Err("not yet") } else { Ok("connected") } }
        })
        .await;
        assert_eq!(result, Ok("connected"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn reconnect_with_backoff_gives_up_after_max_retries() {
        let cfg = BackoffConfig { max_retries: 2, initial_ms: 1, max_ms: 2, jitter: false, ..BackoffConfig::default() };
        let result: Result<(), &'static str> = reconnect_with_backoff(cfg, |_| async { Err("still failing") }).await;
        assert_eq!(result, Err("still failing"));
    }
}
