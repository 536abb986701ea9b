// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The `Session` aggregate (§3) and its resource limits (§4.10). A `Session`
//! is the unit of work the broker owns: created once, mutated only by the
//! orchestrator (`enclavejs-runtime`), and destroyed on terminal state or TTL
//! expiry. This module defines the data; `enclavejs-runtime::orchestrator`
//! drives its transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::guard::GuardPreset;
use super::ids::SessionId;

/// Per-session resource caps (§4.10). Every field has the spec's documented
/// default so a bare `SessionLimits::default()` matches an un-configured
/// broker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLimits {
    pub max_tool_calls: u32,
    pub session_ttl_ms: u64,
    pub tool_timeout_ms: u64,
    pub max_stdout_bytes: u64,
    pub max_console_calls: u32,
    pub max_console_output_bytes: u64,
    pub max_iterations: u64,
    pub max_tool_result_bytes: u64,
    pub max_program_bytes: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_tool_calls: 50,
            session_ttl_ms: 60_000,
            tool_timeout_ms: 30_000,
            max_stdout_bytes: 256 * 1024,
            max_console_calls: 100,
            max_console_output_bytes: 64 * 1024,
            max_iterations: 10_000,
            max_tool_result_bytes: 5 * 1024 * 1024,
            max_program_bytes: 64 * 1024,
        }
    }
}

/// The session's lifecycle state (§4.8). Only the orchestrator mutates this;
/// everything else observes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Running,
    WaitingForTool,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Which directional AES-GCM keys a session negotiated, if any (§4.7). The
/// actual key bytes live in `SessionKeyInfo` (owned exclusively by whichever
/// endpoint encrypts with it) and are never embedded in the `Session`
/// aggregate itself — only the metadata needed to describe the negotiated
/// terms travels with the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionContext {
    pub key_id: String,
    pub algorithm: String,
}

/// The `Session` aggregate (§3): invariant fields owned by the broker,
/// mutated only through the orchestrator's state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    /// The last `seq` value assigned to an emitted event; the next event
    /// emits `seq + 1`, and the very first emits `seq = 1` (§3).
    pub seq: u64,
    pub limits: SessionLimits,
    pub preset: GuardPreset,
    pub encryption_context: Option<EncryptionContext>,
}

impl Session {
    pub fn new(limits: SessionLimits, preset: GuardPreset) -> Self {
        Self {
            session_id: SessionId::new(),
            created_at: Utc::now(),
            state: SessionState::Starting,
            seq: 0,
            limits,
            preset,
            encryption_context: None,
        }
    }

    /// Allocates the next `seq` value (§3: "first event emits `seq=1`"). The
    /// orchestrator is the sole caller of this method (§4.8).
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::milliseconds(self.limits.session_ttl_ms as i64);
        now - self.created_at > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_emitted_seq_is_one() {
        let mut session = Session::new(SessionLimits::default(), GuardPreset::Secure);
        assert_eq!(session.next_seq(), 1);
        assert_eq!(session.next_seq(), 2);
    }

    #[test]
    fn terminal_states_are_identified() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(!SessionState::Running.is_terminal());
        assert!(!SessionState::WaitingForTool.is_terminal());
    }

    #[test]
    fn expiry_uses_session_ttl() {
        let mut limits = SessionLimits::default();
        limits.session_ttl_ms = 1000;
        let session = Session::new(limits, GuardPreset::Strict);
        assert!(!session.is_expired(session.created_at));
        assert!(session.is_expired(session.created_at + chrono::Duration::milliseconds(1001)));
    }
}
