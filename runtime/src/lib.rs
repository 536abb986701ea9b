// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! `enclavejs-runtime`: the Sandbox execution core, the session
//! orchestrator, and the reconnection/replay plumbing built on top of
//! `enclavejs-core`'s clock-free domain types.
//!
//! - [`domain`] — the tree-walking interpreter, its value model, and the
//!   tool-call bridge's pending-resolution table.
//! - [`application`] — the Sandbox service, the per-session orchestrator,
//!   the concurrent session table, and the session-creation rate limiter.
//! - [`infrastructure`] — `tokio`-backed wiring for reconnection/replay.

pub mod application;
pub mod domain;
pub mod infrastructure;
