// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The per-session orchestrator (§4.8): the sole assigner of `seq`, the sole
//! emitter of the one canonical `final` event, and the bridge between the
//! Sandbox's [`ToolInvoker`]/[`ConsoleSink`] callbacks and the outward
//! [`StreamEvent`] broadcast every connected client (and every reconnecting
//! one, via [`crate::infrastructure::reconnection`]) subscribes to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use enclavejs_core::domain::ast::Program;
use enclavejs_core::domain::errors::ErrorCode;
use enclavejs_core::domain::events::{ExecutionStats, LogLevel, StreamEvent, StreamEventPayload};
use enclavejs_core::domain::guard::GuardPreset;
use enclavejs_core::domain::ids::CallId;
use enclavejs_core::domain::session::{Session, SessionLimits, SessionState};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::application::sandbox;
use crate::domain::interpreter::{ConsoleSink, ExecError, ToolInvoker};
use crate::domain::tool_bridge::{ToolBridge, ToolOutcome};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Ties a live [`ToolBridge`] to the orchestrator's event sink: every
/// `callTool` invocation from inside the interpreter becomes a `tool_call`
/// event on the wire, then blocks on the bridge until an external caller
/// resolves it or `toolTimeoutMs` elapses (§4.4, §4.10).
struct BridgeToolInvoker {
    bridge: Arc<ToolBridge>,
    emit: Arc<dyn Fn(StreamEventPayload) + Send + Sync>,
    tool_timeout_ms: u64,
}

#[async_trait::async_trait]
impl ToolInvoker for BridgeToolInvoker {
    async fn call_tool(&self, name: String, args: serde_json::Value) -> Result<serde_json::Value, ExecError> {
        let call_id = CallId::new();
        let rx = self.bridge.register(call_id);
        (self.emit)(StreamEventPayload::ToolCall { call_id, tool_name: name, args });

        let outcome = tokio::time::timeout(Duration::from_millis(self.tool_timeout_ms), rx).await;
        match outcome {
            Ok(Ok(ToolOutcome::Result(value))) => {
                (self.emit)(StreamEventPayload::ToolResultApplied { call_id });
                Ok(value)
            }
            Ok(Ok(ToolOutcome::Failed(reason))) => Err(ExecError::message(reason)),
            Ok(Err(_)) => Err(ExecError::message("tool call resolver was dropped before a result arrived")),
            Err(_) => Err(ExecError::message("Tool call timed out")),
        }
    }
}

/// Forwards `console.*` calls to `stdout`/`log` events while enforcing the
/// session's `maxConsoleCalls`/`maxConsoleOutputBytes`/`maxStdoutBytes` caps
/// (§4.3, §4.10): `console.log`/`console.info` count as stdout output
/// (`stdout` events, bounded by `maxStdoutBytes`), `console.warn`/
/// `console.error` count as structured log output (`log` events, bounded by
/// `maxConsoleOutputBytes`). Both kinds share the same per-call cap.
struct ForwardingConsole {
    emit: Arc<dyn Fn(StreamEventPayload) + Send + Sync>,
    max_calls: u32,
    max_console_output_bytes: u64,
    max_stdout_bytes: u64,
    calls: std::sync::atomic::AtomicU64,
    console_bytes: std::sync::atomic::AtomicU64,
    stdout_bytes: std::sync::atomic::AtomicU64,
}

impl ForwardingConsole {
    fn new(emit: Arc<dyn Fn(StreamEventPayload) + Send + Sync>, limits: &SessionLimits) -> Self {
        Self {
            emit,
            max_calls: limits.max_console_calls,
            max_console_output_bytes: limits.max_console_output_bytes,
            max_stdout_bytes: limits.max_stdout_bytes,
            calls: std::sync::atomic::AtomicU64::new(0),
            console_bytes: std::sync::atomic::AtomicU64::new(0),
            stdout_bytes: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl ConsoleSink for ForwardingConsole {
    fn emit(&self, level: &str, rendered: Vec<String>) -> Result<(), ExecError> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if calls > self.max_calls as u64 {
            return Err(ExecError::message("Maximum console call limit exceeded"));
        }
        let line = rendered.join(" ");
        let len = line.len() as u64;

        if level == "log" {
            let bytes = self.stdout_bytes.fetch_add(len, Ordering::SeqCst) + len;
            if bytes > self.max_stdout_bytes {
                return Err(ExecError::message("Maximum stdout byte limit exceeded"));
            }
            (self.emit)(StreamEventPayload::Stdout { chunk: line });
        } else {
            let bytes = self.console_bytes.fetch_add(len, Ordering::SeqCst) + len;
            if bytes > self.max_console_output_bytes {
                return Err(ExecError::message("Maximum console output byte limit exceeded"));
            }
            let log_level = if level == "error" { LogLevel::Error } else { LogLevel::Warn };
            (self.emit)(StreamEventPayload::Log { level: log_level, message: line, data: None });
        }
        Ok(())
    }

    fn stdout_bytes(&self) -> u64 {
        self.stdout_bytes.load(Ordering::SeqCst)
    }
}

/// Owns one session's lifecycle: the [`Session`] aggregate, its outward
/// event broadcast, its tool bridge, and the shared cancellation flag the
/// sandbox's transformed loop-guards poll.
pub struct Orchestrator {
    session: Mutex<Session>,
    events_tx: broadcast::Sender<StreamEvent>,
    tool_bridge: Arc<ToolBridge>,
    aborted: Arc<AtomicBool>,
}

pub struct RunOutcome {
    pub final_event: StreamEvent,
}

impl Orchestrator {
    pub fn new(limits: SessionLimits, preset: GuardPreset) -> (Arc<Self>, broadcast::Receiver<StreamEvent>) {
        let (events_tx, events_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let orchestrator = Arc::new(Self {
            session: Mutex::new(Session::new(limits, preset)),
            events_tx,
            tool_bridge: Arc::new(ToolBridge::new()),
            aborted: Arc::new(AtomicBool::new(false)),
        });
        (orchestrator, events_rx)
    }

    pub fn session_id(&self) -> enclavejs_core::domain::ids::SessionId {
        self.session.lock().session_id
    }

    /// A point-in-time copy of the [`Session`] aggregate, for callers (the
    /// broker's `SessionTable`) that track session metadata independently of
    /// the orchestrator driving it.
    pub fn snapshot(&self) -> Session {
        self.session.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events_tx.subscribe()
    }

    pub fn tool_bridge(&self) -> Arc<ToolBridge> {
        self.tool_bridge.clone()
    }

    /// Reserves the next `seq` value without emitting an event over the
    /// broadcast channel. Used by the broker's HTTP handler to number the
    /// `session_init` line it writes directly to the response body (§3, §4.7:
    /// `session_init` always travels in clear text, ahead of the encrypted
    /// stream, so it isn't a good fit for the `emit` path the rest of the
    /// events use) while keeping it inside the same monotonic `seq` sequence
    /// every other event is drawn from (§8 scenario 4: `session_init` is
    /// `seq=1`).
    pub fn reserve_seq(&self) -> u64 {
        self.session.lock().next_seq()
    }

    /// Flips the shared abort flag (§4.8 cancellation) without waiting for
    /// the run to observe it — the loop-guard and tool-call timeout paths
    /// pick it up on their own.
    pub fn cancel(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.tool_bridge.purge();
    }

    /// Spawns a task emitting `heartbeat` events on `interval` through this
    /// orchestrator's own `seq` counter (§4.9), so heartbeats never race
    /// with the run loop's own emits the way a seq counter external to
    /// [`Session`] would. Exits once nobody is subscribed any more.
    pub fn spawn_heartbeat(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if orchestrator.events_tx.receiver_count() == 0 {
                    break;
                }
                if orchestrator.session.lock().state.is_terminal() {
                    break;
                }
                orchestrator.emit(StreamEventPayload::Heartbeat {});
            }
        })
    }

    fn emit(&self, payload: StreamEventPayload) {
        let seq = {
            let mut session = self.session.lock();
            session.next_seq()
        };
        let event = StreamEvent::new(self.session_id(), seq, payload);
        // A lagging or absent receiver is not a run failure (§4.9:
        // reconnecting clients replay from the event buffer instead).
        let _ = self.events_tx.send(event);
    }

    /// Drives one session end to end: validated program in, exactly one
    /// `final` event out (§4.8).
    pub async fn run(self: Arc<Self>, program: Program) -> RunOutcome {
        {
            let mut session = self.session.lock();
            session.state = SessionState::Running;
        }

        let orchestrator_for_events = self.clone();
        let emit_fn: Arc<dyn Fn(StreamEventPayload) + Send + Sync> = Arc::new(move |payload| orchestrator_for_events.emit(payload));

        let (limits, preset) = {
            let session = self.session.lock();
            (session.limits, session.preset)
        };

        let tool_invoker = Arc::new(BridgeToolInvoker { bridge: self.tool_bridge.clone(), emit: emit_fn.clone(), tool_timeout_ms: limits.tool_timeout_ms });
        let console = Arc::new(ForwardingConsole::new(emit_fn.clone(), &limits));

        let outcome = sandbox::run(Arc::new(program), limits, preset, self.aborted.clone(), tool_invoker, console).await;

        let final_state = if self.aborted.load(Ordering::SeqCst) {
            SessionState::Cancelled
        } else if outcome.result.is_ok() {
            SessionState::Completed
        } else {
            SessionState::Failed
        };
        {
            let mut session = self.session.lock();
            session.state = final_state.clone();
        }

        let final_payload = match &outcome.result {
            Ok(result) => {
                info!(session_id = %self.session_id(), "session completed");
                StreamEventPayload::Final { ok: true, result: Some(result.clone()), error: None, stats: outcome.stats.clone() }
            }
            Err(err) => {
                warn!(session_id = %self.session_id(), error = %err, "session failed");
                let code = if final_state == SessionState::Cancelled { ErrorCode::Cancelled } else { err.code() };
                StreamEventPayload::Final {
                    ok: false,
                    result: None,
                    error: Some(enclavejs_core::domain::errors::ErrorPayload::new(code, err.to_string())),
                    stats: outcome.stats.clone(),
                }
            }
        };

        self.emit(final_payload.clone());
        let seq = self.session.lock().seq;
        RunOutcome { final_event: StreamEvent::new(self.session_id(), seq, final_payload) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclavejs_core::domain::transformer::{transform, TransformLimits};
    use enclavejs_core::infrastructure::parser::parse_program;

    fn transformed(source: &str) -> Program {
        let parsed = parse_program(source).unwrap();
        transform(&parsed, TransformLimits { max_iterations: 1000 })
    }

    #[tokio::test]
    async fn emits_exactly_one_final_event_on_success() {
        let (orchestrator, mut events) = Orchestrator::new(SessionLimits::default(), GuardPreset::Secure);
        let program = transformed("return 42;");
        let outcome = orchestrator.run(program).await;
        assert!(outcome.final_event.is_final());

        let mut finals_seen = 0;
        while let Ok(event) = events.try_recv() {
            if event.is_final() {
                finals_seen += 1;
            }
        }
        assert_eq!(finals_seen, 1);
    }

    #[tokio::test]
    async fn seq_numbers_increase_monotonically_from_one() {
        let (orchestrator, mut events) = Orchestrator::new(SessionLimits::default(), GuardPreset::Secure);
        let program = transformed("return 1;");
        orchestrator.run(program).await;
        let mut last = 0;
        while let Ok(event) = events.try_recv() {
            assert!(event.seq > last);
            last = event.seq;
        }
    }

    #[tokio::test]
    async fn cancellation_surfaces_as_cancelled_not_failed() {
        let (orchestrator, _events) = Orchestrator::new(SessionLimits::default(), GuardPreset::Secure);
        orchestrator.cancel();
        let program = transformed("while (true) {}");
        let outcome = orchestrator.run(program).await;
        let StreamEventPayload::Final { ok, error, .. } = outcome.final_event.payload else { panic!("expected final") };
        assert!(!ok);
        assert_eq!(error.unwrap().code, ErrorCode::Cancelled);
    }

    fn transformed_permissive(source: &str) -> Program {
        let parsed = parse_program(source).unwrap();
        transform(&parsed, TransformLimits { max_iterations: 1000 })
    }

    #[tokio::test]
    async fn console_log_emits_stdout_events_and_is_counted_in_stats() {
        let (orchestrator, mut events) = Orchestrator::new(SessionLimits::default(), GuardPreset::Permissive);
        let program = transformed_permissive("console.log(\"hi\"); return 1;");
        let outcome = orchestrator.run(program).await;

        let mut saw_stdout = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event.payload, StreamEventPayload::Stdout { ref chunk } if chunk == "hi") {
                saw_stdout = true;
            }
        }
        assert!(saw_stdout);

        let StreamEventPayload::Final { stats, .. } = outcome.final_event.payload else { panic!("expected final") };
        assert_eq!(stats.stdout_bytes, 2);
    }

    #[tokio::test]
    async fn exceeding_max_console_calls_fails_the_session() {
        let mut limits = SessionLimits::default();
        limits.max_console_calls = 1;
        let (orchestrator, _events) = Orchestrator::new(limits, GuardPreset::Permissive);
        let program = transformed_permissive("console.log(\"a\"); console.log(\"b\"); return 1;");
        let outcome = orchestrator.run(program).await;
        let StreamEventPayload::Final { ok, error, .. } = outcome.final_event.payload else { panic!("expected final") };
        assert!(!ok);
        assert!(error.unwrap().message.contains("console call limit"));
    }
}
