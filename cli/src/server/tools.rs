// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The broker's tool registry (§4.4, §1: "the broker ... executes tools
//! with its private secrets"). Tool execution is deliberately the one piece
//! of this platform that cannot be generic: every deployment wires its own
//! handlers (database lookups, HTTP calls to internal services, secrets the
//! sandbox must never see). This module supplies the dispatcher that turns
//! an orchestrator's `tool_call` events into registry lookups and resolves
//! the matching `ToolBridge` slot — the handlers themselves are the
//! operator's concern.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use enclavejs_core::domain::events::StreamEventPayload;
use enclavejs_runtime::application::orchestrator::Orchestrator;
use enclavejs_runtime::domain::tool_bridge::ToolOutcome;

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, String>> + Send>>;
pub type ToolHandler = Arc<dyn Fn(serde_json::Value) -> ToolFuture + Send + Sync>;

/// A name-keyed table of tool handlers, shared read-only once `serve` has
/// started (handlers are registered at startup, never mutated at runtime).
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, ToolHandler>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(move |args| Box::pin(handler(args))));
        self
    }

    /// A demo registry with one pure handler (`echo`), used by `enclavejs
    /// serve` when no handler configuration is supplied — enough to drive
    /// the tool-roundtrip scenario (§8 scenario 4) without any external
    /// dependency.
    pub fn demo() -> Self {
        Self::new().register("echo", |args| async move { Ok(args) })
    }

    fn get(&self, name: &str) -> Option<ToolHandler> {
        self.handlers.get(name).cloned()
    }

    /// Looks up and calls `name`'s handler directly, for callers (the
    /// remote runtime channel) that need the result inline rather than
    /// through the orchestrator's tool-call event stream.
    pub async fn invoke(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, String> {
        match self.get(name) {
            Some(handler) => handler(args).await,
            None => Err(format!("no tool handler registered for \"{name}\"")),
        }
    }
}

/// Subscribes to `orchestrator`'s event stream and, for every `tool_call`
/// event, looks up the named handler and resolves the bridge with its
/// outcome. Runs for the lifetime of the session; exits once the event
/// channel closes (the session reached a terminal state).
pub fn spawn_tool_dispatcher(orchestrator: Arc<Orchestrator>, registry: Arc<ToolRegistry>) {
    let mut events = orchestrator.subscribe();
    let bridge = orchestrator.tool_bridge();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            let StreamEventPayload::ToolCall { call_id, tool_name, args } = event.payload else { continue };
            let bridge = bridge.clone();
            match registry.get(&tool_name) {
                Some(handler) => {
                    tokio::spawn(async move {
                        let outcome = match handler(args).await {
                            Ok(value) => ToolOutcome::Result(value),
                            Err(message) => ToolOutcome::Failed(message),
                        };
                        let _ = bridge.resolve(&call_id, outcome);
                    });
                }
                None => {
                    let _ = bridge.resolve(&call_id, ToolOutcome::Failed(format!("no tool handler registered for \"{tool_name}\"")));
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclavejs_core::domain::guard::GuardPreset;
    use enclavejs_core::domain::session::SessionLimits;
    use enclavejs_core::domain::transformer::{transform, TransformLimits};
    use enclavejs_core::infrastructure::parser::parse_program;

    #[tokio::test]
    async fn demo_echo_handler_resolves_a_tool_call() {
        let (orchestrator, _events) = Orchestrator::new(SessionLimits::default(), GuardPreset::Secure);
        spawn_tool_dispatcher(orchestrator.clone(), Arc::new(ToolRegistry::demo()));

        let parsed = parse_program(r#"const r = await callTool("echo", {a: 1}); return r;"#).unwrap();
        let program = transform(&parsed, TransformLimits { max_iterations: 1000 });
        let outcome = orchestrator.run(program).await;
        let StreamEventPayload::Final { ok, result, .. } = outcome.final_event.payload else { panic!("expected final") };
        assert!(ok);
        assert_eq!(result.unwrap(), serde_json::json!({"a": 1.0}));
    }

    #[tokio::test]
    async fn unregistered_tool_name_fails_the_call_without_killing_the_session() {
        let (orchestrator, _events) = Orchestrator::new(SessionLimits::default(), GuardPreset::Secure);
        spawn_tool_dispatcher(orchestrator.clone(), Arc::new(ToolRegistry::demo()));

        let parsed = parse_program(r#"try { await callTool("missing", {}); return "unreachable"; } catch (e) { return "caught"; }"#).unwrap();
        let program = transform(&parsed, TransformLimits { max_iterations: 1000 });
        let outcome = orchestrator.run(program).await;
        let StreamEventPayload::Final { ok, result, .. } = outcome.final_event.payload else { panic!("expected final") };
        assert!(ok);
        assert_eq!(result.unwrap(), serde_json::json!("caught"));
    }
}
