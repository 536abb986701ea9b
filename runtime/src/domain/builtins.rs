// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Native dotted-name builtins (`Math.*`, `JSON.*`, `console.*`, the free
//! functions, and the mediated `__safe_callTool` entry point). Dispatched by
//! name from [`super::interpreter::call_function`] — this is the one place
//! in the interpreter that isn't pure tree-walking, since it's where the
//! Sandbox's host-provided sinks (tool bridge, console) actually get used.

use std::sync::atomic::Ordering;

use super::interpreter::{ExecContext, ExecError};
use super::value::Value;

pub async fn dispatch(ctx: &ExecContext, name: &str, args: Vec<Value>) -> Result<Value, ExecError> {
    match name {
        enclavejs_core::domain::transformer::SAFE_CALL_TOOL_IDENT => call_tool(ctx, args).await,
        "console.log" | "console.info" => console_write(ctx, "log", args),
        "console.warn" => console_write(ctx, "warn", args),
        "console.error" => console_write(ctx, "error", args),
        "Math.floor" => unary_number(args, f64::floor),
        "Math.ceil" => unary_number(args, f64::ceil),
        "Math.round" => unary_number(args, f64::round),
        "Math.trunc" => unary_number(args, f64::trunc),
        "Math.abs" => unary_number(args, f64::abs),
        "Math.sqrt" => unary_number(args, f64::sqrt),
        "Math.sign" => unary_number(args, f64::signum),
        "Math.max" => Ok(Value::Number(numbers(&args).into_iter().fold(f64::NEG_INFINITY, f64::max))),
        "Math.min" => Ok(Value::Number(numbers(&args).into_iter().fold(f64::INFINITY, f64::min))),
        "Math.pow" => {
            let nums = numbers(&args);
            Ok(Value::Number(nums.first().copied().unwrap_or(f64::NAN).powf(nums.get(1).copied().unwrap_or(f64::NAN))))
        }
        "Math.random" => Ok(Value::Number(rand::random::<f64>())),
        "JSON.stringify" => {
            let value = args.first().cloned().unwrap_or(Value::Undefined);
            let json = value.to_json()?;
            Ok(Value::str(serde_json::to_string(&json).map_err(|e| ExecError::message(e.to_string()))?))
        }
        "JSON.parse" => {
            let Some(Value::Str(s)) = args.first() else {
                return Err(ExecError::message("JSON.parse expects a string argument"));
            };
            let parsed: serde_json::Value = serde_json::from_str(s).map_err(|e| ExecError::message(format!("invalid JSON: {e}")))?;
            Ok(Value::from_json(&parsed))
        }
        "Object.keys" => match args.first() {
            Some(Value::Object(entries)) => Ok(Value::array(entries.lock().iter().map(|(k, _)| Value::str(k.clone())).collect())),
            _ => Err(ExecError::message("Object.keys expects an object argument")),
        },
        "Object.values" => match args.first() {
            Some(Value::Object(entries)) => Ok(Value::array(entries.lock().iter().map(|(_, v)| v.clone()).collect())),
            _ => Err(ExecError::message("Object.values expects an object argument")),
        },
        "Array.isArray" => Ok(Value::Bool(matches!(args.first(), Some(Value::Array(_))))),
        "parseInt" => {
            let s = args.first().map(Value::to_display_string).unwrap_or_default();
            let trimmed = s.trim();
            let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit() || *c == '-' || *c == '+').collect();
            Ok(Value::Number(digits.parse().unwrap_or(f64::NAN)))
        }
        "parseFloat" => Ok(Value::Number(args.first().map(Value::to_display_string).unwrap_or_default().trim().parse().unwrap_or(f64::NAN))),
        "isNaN" => Ok(Value::Bool(numbers(&args).first().copied().unwrap_or(f64::NAN).is_nan())),
        "isFinite" => Ok(Value::Bool(numbers(&args).first().copied().unwrap_or(f64::NAN).is_finite())),
        "String" => Ok(Value::str(args.first().map(Value::to_display_string).unwrap_or_default())),
        "Number" => Ok(Value::Number(numbers(&args).first().copied().unwrap_or(0.0))),
        "encodeURIComponent" | "encodeURI" => Ok(Value::str(url_encode(&args.first().map(Value::to_display_string).unwrap_or_default()))),
        "decodeURIComponent" | "decodeURI" => {
            let s = args.first().map(Value::to_display_string).unwrap_or_default();
            url_decode(&s).map(Value::str).map_err(ExecError::message)
        }
        "Date.now" => Ok(Value::Number(chrono::Utc::now().timestamp_millis() as f64)),
        other => Err(ExecError::message(format!("'{other}' is not an available built-in"))),
    }
}

fn numbers(args: &[Value]) -> Vec<f64> {
    args.iter()
        .map(|v| match v {
            Value::Number(n) => *n,
            Value::Str(s) => s.trim().parse().unwrap_or(f64::NAN),
            Value::Bool(b) => if *b { 1.0 } else { 0.0 },
            _ => f64::NAN,
        })
        .collect()
}

fn unary_number(args: Vec<Value>, f: impl Fn(f64) -> f64) -> Result<Value, ExecError> {
    Ok(Value::Number(f(numbers(&args).first().copied().unwrap_or(f64::NAN))))
}

fn console_write(ctx: &ExecContext, level: &str, args: Vec<Value>) -> Result<Value, ExecError> {
    let rendered = args.iter().map(Value::to_display_string).collect();
    ctx.console.emit(level, rendered)?;
    Ok(Value::Undefined)
}

/// Routes a `callTool(name, args)` invocation through the mediated bridge
/// (§4.4), enforcing `maxToolCalls` here since every call funnels through
/// this single dispatch point regardless of which loop or branch it came
/// from.
async fn call_tool(ctx: &ExecContext, args: Vec<Value>) -> Result<Value, ExecError> {
    let Some(Value::Str(tool_name)) = args.first() else {
        return Err(ExecError::message("callTool expects a string tool name as its first argument"));
    };
    let call_args = args.get(1).cloned().unwrap_or(Value::object(vec![])).to_json()?;

    let count = ctx.tool_call_count.fetch_add(1, Ordering::SeqCst) + 1;
    if count > ctx.max_tool_calls {
        return Err(ExecError::message("Maximum tool call limit exceeded"));
    }

    let result = ctx.tool_invoker.call_tool(tool_name.clone(), call_args).await?;
    Ok(Value::from_json(&result))
}

fn url_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn url_decode(s: &str) -> Result<String, String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = s.get(i + 1..i + 3).ok_or_else(|| "malformed percent-escape".to_string())?;
            let byte = u8::from_str_radix(hex, 16).map_err(|_| "malformed percent-escape".to_string())?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| "decoded bytes are not valid UTF-8".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::interpreter::ConsoleSink;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    struct NoopConsole;
    impl ConsoleSink for NoopConsole {
        fn emit(&self, _level: &str, _rendered: Vec<String>) -> Result<(), ExecError> {
            Ok(())
        }
    }

    struct EchoTools;
    #[async_trait::async_trait]
    impl super::super::interpreter::ToolInvoker for EchoTools {
        async fn call_tool(&self, name: String, args: serde_json::Value) -> Result<serde_json::Value, ExecError> {
            Ok(serde_json::json!({ "tool": name, "args": args }))
        }
    }

    fn ctx() -> ExecContext {
        ExecContext::with_tool_call_cap(Arc::new(AtomicBool::new(false)), 2, Arc::new(EchoTools), Arc::new(NoopConsole))
    }

    #[tokio::test]
    async fn math_floor_truncates_toward_negative_infinity() {
        let v = dispatch(&ctx(), "Math.floor", vec![Value::Number(1.9)]).await.unwrap();
        assert!(matches!(v, Value::Number(n) if n == 1.0));
    }

    #[tokio::test]
    async fn json_round_trips_through_stringify_and_parse() {
        let obj = Value::object(vec![("a".to_string(), Value::Number(1.0))]);
        let s = dispatch(&ctx(), "JSON.stringify", vec![obj]).await.unwrap();
        let Value::Str(s) = s else { panic!("expected string") };
        let parsed = dispatch(&ctx(), "JSON.parse", vec![Value::str(s)]).await.unwrap();
        assert!(matches!(parsed, Value::Object(_)));
    }

    #[tokio::test]
    async fn call_tool_enforces_the_call_cap() {
        let c = ctx();
        let args = vec![Value::str("echo"), Value::object(vec![])];
        dispatch(&c, enclavejs_core::domain::transformer::SAFE_CALL_TOOL_IDENT, args.clone()).await.unwrap();
        dispatch(&c, enclavejs_core::domain::transformer::SAFE_CALL_TOOL_IDENT, args.clone()).await.unwrap();
        let err = dispatch(&c, enclavejs_core::domain::transformer::SAFE_CALL_TOOL_IDENT, args).await.unwrap_err();
        assert_eq!(err.display_message(), "Maximum tool call limit exceeded");
    }

    #[tokio::test]
    async fn url_encoding_round_trips() {
        let encoded = dispatch(&ctx(), "encodeURIComponent", vec![Value::str("a b/c")]).await.unwrap();
        let Value::Str(encoded) = encoded else { panic!("expected string") };
        let decoded = dispatch(&ctx(), "decodeURIComponent", vec![Value::str(encoded)]).await.unwrap();
        assert!(matches!(decoded, Value::Str(s) if s == "a b/c"));
    }
}
