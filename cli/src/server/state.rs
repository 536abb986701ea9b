// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Shared broker state (§4.11): the session table, the per-session
//! orchestrator/replay-buffer registry, the tool registry, and the
//! configuration every handler reads limits and presets from.

use std::sync::Arc;

use dashmap::DashMap;
use enclavejs_core::domain::ids::SessionId;
use enclavejs_runtime::application::orchestrator::Orchestrator;
use enclavejs_runtime::application::rate_limiter::SessionCreationLimiter;
use enclavejs_runtime::application::session_table::SessionTable;
use enclavejs_runtime::infrastructure::reconnection::ReplayBuffer;

use crate::config::BrokerConfigManifest;
use crate::server::tools::ToolRegistry;

/// Everything a live session needs beyond the `SessionTable` entry: the
/// orchestrator driving it and the replay buffer recording its event
/// history for reconnecting clients (§4.9).
pub struct LiveSession {
    pub orchestrator: Arc<Orchestrator>,
    pub replay_buffer: Arc<ReplayBuffer>,
}

pub struct AppState {
    pub config: BrokerConfigManifest,
    pub sessions: SessionTable,
    pub live: DashMap<SessionId, LiveSession>,
    pub creation_limiter: Arc<SessionCreationLimiter>,
    pub tools: Arc<ToolRegistry>,
}

impl AppState {
    pub fn new(config: BrokerConfigManifest, tools: ToolRegistry) -> Arc<Self> {
        let rate = config.spec.rate_limiter;
        Arc::new(Self {
            sessions: SessionTable::new(rate.max_concurrent_sessions),
            live: DashMap::new(),
            creation_limiter: enclavejs_runtime::application::rate_limiter::shared(
                std::num::NonZeroU32::new(rate.sessions_per_second).unwrap_or(std::num::NonZeroU32::new(1).unwrap()),
            ),
            tools: Arc::new(tools),
            config,
        })
    }
}
