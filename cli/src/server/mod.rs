// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The broker binary's HTTP/WebSocket surface (§4.11).

pub mod routes;
pub mod runtime_channel;
pub mod state;
pub mod tools;
pub mod wire;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use crate::config::BrokerConfigManifest;
use crate::server::state::AppState;
use crate::server::tools::ToolRegistry;

/// Builds the full `axum::Router` (session routes plus the remote-runtime
/// WebSocket channel) for `config`/`tools`, without binding a listener —
/// used directly by integration tests via `axum::serve`-free `oneshot`
/// calls.
pub fn build_router(config: BrokerConfigManifest, tools: ToolRegistry) -> axum::Router {
    let state = AppState::new(config, tools);
    routes::router(state.clone()).merge(runtime_channel::router(state))
}

/// Runs the broker until the process is signaled to stop: binds
/// `config.spec.listen`, spawns the expired-session reaper, and serves the
/// router built by [`build_router`].
pub async fn serve(config: BrokerConfigManifest, tools: ToolRegistry) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.spec.listen.host, config.spec.listen.port);
    let state = AppState::new(config, tools);
    spawn_reaper(state.clone());

    let app = routes::router(state.clone()).merge(runtime_channel::router(state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "enclavejs broker listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodically evicts sessions past their TTL (§4.10) from both the
/// session table and the live-orchestrator registry.
fn spawn_reaper(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        loop {
            ticker.tick().await;
            let expired = state.sessions.evict_expired(chrono::Utc::now());
            for id in expired {
                if let Some((_, live)) = state.live.remove(&id) {
                    live.orchestrator.cancel();
                }
                tracing::debug!(session_id = %id, "reaped expired session");
            }
        }
    });
}
