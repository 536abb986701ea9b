// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The mediated tool-call bridge's pending-resolution table (§4.4): tracks
//! outstanding `callTool` invocations by [`CallId`] so a result delivered
//! out-of-band (by whatever drives the host side of the bridge) can be
//! routed back to the single `.await` point blocked on it inside the
//! interpreter.
//!
//! Kept as a plain domain type — no tokio dependency beyond the oneshot
//! channel primitive — so it's trivially testable without spinning up a
//! runtime loop.

use std::collections::HashMap;

use enclavejs_core::domain::ids::CallId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// What a pending tool call ultimately resolves to: the tool's JSON result,
/// or a reason it never will (the session was cancelled, the tool timed
/// out, or the resolver was dropped before a result arrived). Serializable
/// so a remote sandbox host (§6) can carry it over the wire, not just a
/// same-process bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ToolOutcome {
    Result(serde_json::Value),
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ToolBridgeError {
    #[error("no pending call registered for {0}")]
    UnknownCallId(CallId),
    #[error("call {0} was already resolved")]
    AlreadyResolved(CallId),
}

/// A table of in-flight tool calls for a single session. Each `callId`
/// accepts exactly one resolution — a second attempt is rejected rather
/// than silently overwriting the first, since that would indicate the host
/// side double-delivered a result.
#[derive(Default)]
pub struct ToolBridge {
    pending: Mutex<HashMap<CallId, oneshot::Sender<ToolOutcome>>>,
}

impl ToolBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending call and returns the receiver the caller
    /// should `.await` for its outcome.
    pub fn register(&self, call_id: CallId) -> oneshot::Receiver<ToolOutcome> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(call_id, tx);
        rx
    }

    /// Delivers a result for `call_id`. Fails if no call is pending under
    /// that id (already resolved, never registered, or the session already
    /// tore down).
    pub fn resolve(&self, call_id: &CallId, outcome: ToolOutcome) -> Result<(), ToolBridgeError> {
        let tx = self.pending.lock().remove(call_id).ok_or(ToolBridgeError::UnknownCallId(*call_id))?;
        tx.send(outcome).map_err(|_| ToolBridgeError::AlreadyResolved(*call_id))
    }

    /// Number of calls still awaiting a result.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drops every pending sender, which causes each corresponding receiver
    /// to resolve with `RecvError` — used when a session tears down (§4.3:
    /// "aborted scripts cannot leave a tool call permanently pending").
    pub fn purge(&self) {
        self.pending.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_id() -> CallId {
        CallId::new()
    }

    #[tokio::test]
    async fn resolve_delivers_the_outcome_to_the_registered_receiver() {
        let bridge = ToolBridge::new();
        let id = call_id();
        let rx = bridge.register(id);
        bridge.resolve(&id, ToolOutcome::Result(serde_json::json!(42))).unwrap();
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, ToolOutcome::Result(v) if v == serde_json::json!(42)));
    }

    #[test]
    fn resolving_an_unregistered_call_id_is_an_error() {
        let bridge = ToolBridge::new();
        let err = bridge.resolve(&call_id(), ToolOutcome::Failed("x".into())).unwrap_err();
        assert!(matches!(err, ToolBridgeError::UnknownCallId(_)));
    }

    #[tokio::test]
    async fn purge_causes_pending_receivers_to_observe_a_dropped_sender() {
        let bridge = ToolBridge::new();
        let id = call_id();
        let rx = bridge.register(id);
        bridge.purge();
        assert!(rx.await.is_err());
    }

    #[test]
    fn resolving_twice_fails_the_second_time() {
        let bridge = ToolBridge::new();
        let id = call_id();
        let _rx = bridge.register(id);
        bridge.resolve(&id, ToolOutcome::Result(serde_json::json!(1))).unwrap();
        let err = bridge.resolve(&id, ToolOutcome::Result(serde_json::json!(2))).unwrap_err();
        assert!(matches!(err, ToolBridgeError::UnknownCallId(_)));
    }
}
