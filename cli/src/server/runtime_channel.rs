// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The remote sandbox host channel (§6 "runtime channel"): a `WebSocket`
//! upgrade at `/runtime` that lets a sandbox execution host run
//! disconnected from the HTTP broker process, trading `execute`/`cancel`
//! commands for `StreamEvent`s the same way a same-process
//! [`enclavejs_runtime::application::sandbox`] run would. Tool calls the
//! remote host can't resolve itself still bounce through this broker's own
//! [`ToolRegistry`](crate::server::tools::ToolRegistry), since tool secrets
//! never leave the broker process (§1).

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use enclavejs_core::domain::ast::Program;
use enclavejs_core::domain::events::StreamEventPayload;
use enclavejs_core::domain::guard::GuardPreset;
use enclavejs_core::domain::ids::{CallId, SessionId};
use enclavejs_core::domain::session::SessionLimits;
use enclavejs_runtime::domain::tool_bridge::ToolOutcome;
use serde::{Deserialize, Serialize};

use crate::server::state::AppState;

/// Commands the broker sends to a connected remote sandbox host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BrokerToRuntime {
    #[serde(rename_all = "camelCase")]
    Execute { session_id: SessionId, program: Program, limits: SessionLimits, preset: GuardPreset },
    #[serde(rename_all = "camelCase")]
    ToolResult { call_id: CallId, outcome: ToolOutcome },
    #[serde(rename_all = "camelCase")]
    Cancel { session_id: SessionId },
    Ping,
}

/// Messages a remote sandbox host sends back to the broker: the usual
/// `StreamEvent` stream for whatever session it's executing, plus pong
/// replies to this broker's keepalive pings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RuntimeToBroker {
    Event { event: enclavejs_core::domain::events::StreamEvent },
    Pong,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/runtime", get(upgrade)).with_state(state)
}

async fn upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_runtime_host(socket, state))
}

/// Drives one remote sandbox host connection for its lifetime: forwards
/// any `tool_call` event it reports to the broker's [`ToolRegistry`], and
/// answers `ping`/`pong` to detect a silently dropped link (mirrors the
/// client-facing heartbeat of §4.9, just one hop further out).
async fn handle_runtime_host(mut socket: WebSocket, state: Arc<AppState>) {
    loop {
        let Some(message) = socket.recv().await else { break };
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(%err, "remote runtime socket error");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                let parsed: Result<RuntimeToBroker, _> = serde_json::from_str(&text);
                match parsed {
                    Ok(RuntimeToBroker::Event { event }) => {
                        if let StreamEventPayload::ToolCall { call_id, tool_name, args } = event.payload.clone() {
                            dispatch_remote_tool_call(&state, &mut socket, call_id, tool_name, args).await;
                        }
                        if let Some(live) = state.live.get(&event.session_id) {
                            live.replay_buffer.record(event);
                        }
                    }
                    Ok(RuntimeToBroker::Pong) => {}
                    Err(err) => tracing::warn!(%err, "malformed frame from remote runtime host"),
                }
            }
            Message::Ping(payload) => {
                let _ = socket.send(Message::Pong(payload)).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn dispatch_remote_tool_call(state: &Arc<AppState>, socket: &mut WebSocket, call_id: CallId, tool_name: String, args: serde_json::Value) {
    let outcome = match state.tools.invoke(&tool_name, args).await {
        Ok(value) => ToolOutcome::Result(value),
        Err(message) => ToolOutcome::Failed(message),
    };
    let reply = BrokerToRuntime::ToolResult { call_id, outcome };
    if let Ok(text) = serde_json::to_string(&reply) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
}
