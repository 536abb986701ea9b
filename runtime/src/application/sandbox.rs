// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The Sandbox service (§4.3): runs one already-guarded, already-transformed
//! program to completion inside a fresh isolation context, racing a
//! wall-clock timeout against the script itself so a hung or infinite
//! script can never outlive `sessionTtlMs`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use enclavejs_core::domain::ast::Program;
use enclavejs_core::domain::errors::ErrorCode;
use enclavejs_core::domain::events::ExecutionStats;
use enclavejs_core::domain::guard::GuardPreset;
use enclavejs_core::domain::session::SessionLimits;

use crate::domain::interpreter::{self, ConsoleSink, ExecContext, ExecError, ToolInvoker};
use crate::domain::value::{Callable, Value};

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("execution timed out after {0}ms")]
    Timeout(u64),
    #[error("{0}")]
    Execution(String),
}

impl SandboxError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::Execution(_) => ErrorCode::ExecutionError,
        }
    }
}

/// Installs the native global bindings a given [`GuardPreset`] allows
/// (§4.1's `allowed_globals` and §4.3's "installed safe globals" must name
/// the same set). `Math`/`JSON`/`Array`/`Object`/`Date` are namespace
/// objects resolved member-by-member; `String`/`Number` are directly
/// callable conversion functions; `console` (Permissive only) is a
/// namespace too.
pub fn install_globals(preset: GuardPreset, max_iterations: f64) -> interpreter::Environment {
    let env = interpreter::new_global_environment(max_iterations);
    for name in preset.allowed_globals() {
        match name {
            "Math" => env.declare("Math", Value::Namespace("Math")),
            "JSON" => env.declare("JSON", Value::Namespace("JSON")),
            "Array" => env.declare("Array", Value::Namespace("Array")),
            "Object" => env.declare("Object", Value::Namespace("Object")),
            "Date" => env.declare("Date", Value::Namespace("Date")),
            "console" => env.declare("console", Value::Namespace("console")),
            "String" => env.declare("String", native_fn("String")),
            "Number" => env.declare("Number", native_fn("Number")),
            "parseInt" | "parseFloat" | "isNaN" | "isFinite" | "encodeURI" | "decodeURI" | "encodeURIComponent" | "decodeURIComponent" => {
                env.declare(name, native_fn(name))
            }
            // undefined/NaN/Infinity/callTool are handled by literal parsing,
            // numeric literals, and the Transformer's redirection
            // respectively — none of them is a runtime binding to install.
            _ => {}
        }
    }
    env
}

fn native_fn(name: &str) -> Value {
    Value::Function(Arc::new(Callable::Native(name.to_string())))
}

/// Result of one sandbox run (§4.3/§4.8's `final` payload shape, minus the
/// wire envelope).
pub struct SandboxOutcome {
    pub result: Result<serde_json::Value, SandboxError>,
    pub stats: ExecutionStats,
}

/// Runs `program` to completion or timeout. `aborted` is shared with the
/// caller so an external cancellation request (§4.8) flips the same flag
/// the Transformer's injected checks poll.
pub async fn run(
    program: Arc<Program>,
    limits: SessionLimits,
    preset: GuardPreset,
    aborted: Arc<AtomicBool>,
    tool_invoker: Arc<dyn ToolInvoker>,
    console: Arc<dyn ConsoleSink>,
) -> SandboxOutcome {
    let start = std::time::Instant::now();
    let global = install_globals(preset, limits.max_iterations as f64);
    let ctx = ExecContext::with_tool_call_cap(aborted.clone(), limits.max_tool_calls as u64, tool_invoker, console);

    let timeout = Duration::from_millis(limits.session_ttl_ms);
    let run_future = interpreter::run_main(&ctx, &global, &program);
    tokio::pin!(run_future);

    let outcome = tokio::select! {
        result = &mut run_future => result.map_err(|e| SandboxError::Execution(e.display_message())),
        _ = tokio::time::sleep(timeout) => {
            aborted.store(true, Ordering::SeqCst);
            Err(SandboxError::Timeout(limits.session_ttl_ms))
        }
    };

    let stats = ExecutionStats {
        duration_ms: start.elapsed().as_millis() as u64,
        tool_call_count: ctx.tool_call_count.load(Ordering::SeqCst) as u32,
        stdout_bytes: ctx.console.stdout_bytes(),
    };

    SandboxOutcome { result: outcome.and_then(|v| v.to_json().map_err(|e| SandboxError::Execution(e.to_string()))), stats }
}

/// Serializes the final return value under `maxToolResultBytes`-style
/// ceilings via [`enclavejs_core::domain::serialization::sanitize`];
/// exposed separately so the orchestrator can apply it uniformly to both
/// the sandbox's final result and each tool result crossing the bridge.
pub fn sanitize_result(value: &serde_json::Value, max_bytes: usize) -> Result<serde_json::Value, SandboxError> {
    enclavejs_core::domain::serialization::sanitize(value, max_bytes).map_err(|e| SandboxError::Execution(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclavejs_core::domain::transformer::{transform, TransformLimits};
    use enclavejs_core::infrastructure::parser::parse_program;

    struct NoopConsole;
    impl ConsoleSink for NoopConsole {
        fn emit(&self, _level: &str, _rendered: Vec<String>) -> Result<(), ExecError> {
            Ok(())
        }
    }

    struct StubTools;
    #[async_trait::async_trait]
    impl ToolInvoker for StubTools {
        async fn call_tool(&self, _name: String, _args: serde_json::Value) -> Result<serde_json::Value, ExecError> {
            Ok(serde_json::json!(1))
        }
    }

    fn transformed(source: &str, max_iterations: u64) -> Arc<Program> {
        let parsed = parse_program(source).unwrap();
        Arc::new(transform(&parsed, TransformLimits { max_iterations }))
    }

    #[tokio::test]
    async fn completes_within_the_session_ttl() {
        let program = transformed("return 1 + 1;", 1000);
        let outcome = run(
            program,
            SessionLimits::default(),
            GuardPreset::Secure,
            Arc::new(AtomicBool::new(false)),
            Arc::new(StubTools),
            Arc::new(NoopConsole),
        )
        .await;
        assert_eq!(outcome.result.unwrap(), serde_json::json!(2.0));
    }

    #[tokio::test]
    async fn timing_out_sets_the_abort_flag_and_reports_timeout() {
        let program = transformed("while (true) {}", 10_000_000);
        let mut limits = SessionLimits::default();
        limits.session_ttl_ms = 20;
        let aborted = Arc::new(AtomicBool::new(false));
        let outcome = run(program, limits, GuardPreset::Secure, aborted.clone(), Arc::new(StubTools), Arc::new(NoopConsole)).await;
        assert!(matches!(outcome.result, Err(SandboxError::Timeout(20))));
        assert!(aborted.load(Ordering::SeqCst));
    }

    #[test]
    fn strict_preset_installs_no_parse_int_binding() {
        let env = install_globals(GuardPreset::Strict, 10.0);
        assert!(env.get("parseInt").is_none());
        assert!(env.get("Math").is_some());
    }

    #[test]
    fn permissive_preset_installs_console() {
        let env = install_globals(GuardPreset::Permissive, 10.0);
        assert!(env.get("console").is_some());
    }
}
