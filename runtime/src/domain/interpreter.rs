// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The tree-walking evaluator at the heart of the Sandbox (§4.3): runs a
//! guarded, transformed [`Program`] against a minimal binding table this
//! module constructs itself — never inheriting anything from the host
//! process's ambient environment (§9: "construct, don't strip").
//!
//! Recursion through `async fn` isn't directly expressible for mutually
//! recursive evaluators, so `eval_expr`/`exec_stmt`/`call_function` return
//! boxed, pinned futures by hand rather than pulling in an external
//! async-recursion helper crate.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use enclavejs_core::domain::ast::{AssignOp, BinaryOp, Expr, Literal, LogicalOp, Program, PropertyKey, Stmt, TemplatePart, UnaryOp};
use parking_lot::Mutex;

use super::value::{Callable, Value, ValueError};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const ABORT_FLAG_IDENT: &str = enclavejs_core::domain::transformer::ABORT_FLAG_IDENT;
pub const SAFE_CALL_TOOL_IDENT: &str = enclavejs_core::domain::transformer::SAFE_CALL_TOOL_IDENT;
pub const MAIN_FN_IDENT: &str = enclavejs_core::domain::transformer::MAIN_FN_IDENT;

/// A lexical scope. Chained via `parent` to form the closure environment a
/// [`Callable::User`] captures; cheaply `Clone`able (an `Arc` bump) so
/// function values can carry their defining scope around.
#[derive(Clone)]
pub struct Environment(Arc<Scope>);

struct Scope {
    vars: Mutex<HashMap<String, Value>>,
    parent: Option<Environment>,
}

impl Environment {
    pub fn root() -> Self {
        Self(Arc::new(Scope { vars: Mutex::new(HashMap::new()), parent: None }))
    }

    pub fn child(&self) -> Self {
        Self(Arc::new(Scope { vars: Mutex::new(HashMap::new()), parent: Some(self.clone()) }))
    }

    pub fn declare(&self, name: &str, value: Value) {
        self.0.vars.lock().insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.0.vars.lock().get(name).cloned() {
            return Some(v);
        }
        self.0.parent.as_ref().and_then(|p| p.get(name))
    }

    /// Walks the scope chain looking for an existing binding to mutate
    /// (plain `x = ...`, not a `let`/`const`/`var` declaration). Returns
    /// `false` if no enclosing scope declared `name` — the Guard's
    /// declared-locals check (§4.1) means this should not happen for
    /// already-validated programs, but the interpreter stays defensive.
    pub fn set(&self, name: &str, value: Value) -> bool {
        if self.0.vars.lock().contains_key(name) {
            self.0.vars.lock().insert(name.to_string(), value);
            return true;
        }
        match &self.0.parent {
            Some(p) => p.set(name, value),
            None => false,
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::root()
    }
}

/// An uncaught (or not-yet-caught) JS-level exception carrying whatever
/// value was thrown — a string message for internal interpreter errors
/// (calling a non-function, an unbound identifier slipping past the Guard)
/// as well as genuine user `throw` statements.
#[derive(Debug, Clone)]
pub struct ExecError(pub Value);

impl ExecError {
    pub fn message(msg: impl Into<String>) -> Self {
        Self(Value::str(msg.into()))
    }

    pub fn display_message(&self) -> String {
        self.0.to_display_string()
    }
}

impl From<ValueError> for ExecError {
    fn from(e: ValueError) -> Self {
        ExecError::message(e.to_string())
    }
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_message())
    }
}

impl std::error::Error for ExecError {}

/// What a statement (or block of statements) resolved to: fell through
/// normally, hit a `return`/`break`/`continue`, or is propagating a throw.
pub enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Invokes the mediated tool bridge (§4.4). Implemented by
/// `application::tool_bridge::ToolBridge`; kept as a trait here so the pure
/// interpreter doesn't depend on the bridge's channel/event-emission
/// machinery.
#[async_trait::async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn call_tool(&self, name: String, args: serde_json::Value) -> Result<serde_json::Value, ExecError>;
}

/// Receives serialized `console.*` calls (§4.3); implemented by the
/// sandbox service to enforce `maxConsoleCalls`/`maxConsoleOutputBytes` and
/// emit `log`/`stdout` events.
pub trait ConsoleSink: Send + Sync {
    fn emit(&self, level: &str, rendered: Vec<String>) -> Result<(), ExecError>;

    /// Cumulative bytes emitted as `stdout` chunks so far, for the `final`
    /// event's `stats.stdoutBytes` (§3, §4.3). Sinks that don't distinguish
    /// stdout from other console output (tests, stubs) can leave this at 0.
    fn stdout_bytes(&self) -> u64 {
        0
    }
}

/// Shared, mutable execution context threaded through every `eval_expr`/
/// `exec_stmt` call: the abort flag, live stats counters, and the two
/// host-provided sinks (tool bridge, console).
pub struct ExecContext {
    pub aborted: Arc<AtomicBool>,
    pub tool_call_count: AtomicU64,
    pub max_tool_calls: u64,
    pub tool_invoker: Arc<dyn ToolInvoker>,
    pub console: Arc<dyn ConsoleSink>,
}

impl ExecContext {
    pub fn new(aborted: Arc<AtomicBool>, tool_invoker: Arc<dyn ToolInvoker>, console: Arc<dyn ConsoleSink>) -> Self {
        Self::with_tool_call_cap(aborted, u64::MAX, tool_invoker, console)
    }

    pub fn with_tool_call_cap(aborted: Arc<AtomicBool>, max_tool_calls: u64, tool_invoker: Arc<dyn ToolInvoker>, console: Arc<dyn ConsoleSink>) -> Self {
        Self { aborted, tool_call_count: AtomicU64::new(0), max_tool_calls, tool_invoker, console }
    }
}

/// Builds the root [`Environment`] `__ag_main` executes in: just the
/// abort/iteration-limit plumbing the Transformer's rewrites reference, plus
/// whatever native namespaces the caller installs (`Math`, `JSON`, ...) —
/// see `application::sandbox::install_globals`, which is the single place
/// that decides *which* namespaces a preset gets (§4.1's allowed-globals
/// list and §4.3's installed-safe-globals list must never drift apart).
pub fn new_global_environment(max_iterations: f64) -> Environment {
    let env = Environment::root();
    env.declare(enclavejs_core::domain::transformer::MAX_ITERATIONS_IDENT, Value::Number(max_iterations));
    env.declare(SAFE_CALL_TOOL_IDENT, Value::Function(Arc::new(Callable::Native(SAFE_CALL_TOOL_IDENT.to_string()))));
    env
}

/// Runs the transformed program's `__ag_main` to completion (§4.2: "the
/// sandbox invokes it and awaits its result").
pub async fn run_main(ctx: &ExecContext, global: &Environment, program: &Program) -> Result<Value, ExecError> {
    let Some(Stmt::FunctionDecl { name, body, .. }) = program.body.first() else {
        return Err(ExecError::message("transformed program has no __ag_main entry point"));
    };
    if name != MAIN_FN_IDENT {
        return Err(ExecError::message("transformed program's entry point has an unexpected name"));
    }
    let call_env = global.child();
    match exec_block(ctx, &call_env, body).await? {
        Flow::Return(v) => Ok(v),
        _ => Ok(Value::Undefined),
    }
}

fn exec_block<'a>(ctx: &'a ExecContext, env: &'a Environment, stmts: &'a [Stmt]) -> BoxFuture<'a, Result<Flow, ExecError>> {
    Box::pin(async move {
        for stmt in stmts {
            match exec_stmt(ctx, env, stmt).await? {
                Flow::Normal => continue,
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    })
}

fn exec_stmt<'a>(ctx: &'a ExecContext, env: &'a Environment, stmt: &'a Stmt) -> BoxFuture<'a, Result<Flow, ExecError>> {
    Box::pin(async move {
        match stmt {
            Stmt::VarDecl { name, init, .. } => {
                let value = match init {
                    Some(e) => eval_expr(ctx, env, e).await?,
                    None => Value::Undefined,
                };
                env.declare(name, value);
                Ok(Flow::Normal)
            }
            Stmt::ExprStmt { expr, .. } => {
                eval_expr(ctx, env, expr).await?;
                Ok(Flow::Normal)
            }
            Stmt::Return { argument, .. } => {
                let value = match argument {
                    Some(e) => eval_expr(ctx, env, e).await?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Throw { argument, .. } => Err(ExecError(eval_expr(ctx, env, argument).await?)),
            Stmt::Block { body, .. } => exec_block(ctx, &env.child(), body).await,
            Stmt::If { test, consequent, alternate, .. } => {
                if eval_expr(ctx, env, test).await?.is_truthy() {
                    exec_stmt(ctx, env, consequent).await
                } else if let Some(alt) = alternate {
                    exec_stmt(ctx, env, alt).await
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::For { init, test, update, body, .. } => {
                let loop_env = env.child();
                if let Some(init) = init {
                    exec_stmt(ctx, &loop_env, init).await?;
                }
                loop {
                    let keep_going = match test {
                        Some(t) => eval_expr(ctx, &loop_env, t).await?.is_truthy(),
                        None => true,
                    };
                    if !keep_going {
                        break;
                    }
                    match exec_stmt(ctx, &loop_env, body).await? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                    if let Some(u) = update {
                        eval_expr(ctx, &loop_env, u).await?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::While { test, body, .. } => {
                while eval_expr(ctx, env, test).await?.is_truthy() {
                    match exec_stmt(ctx, env, body).await? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::DoWhile { body, test, .. } => {
                loop {
                    match exec_stmt(ctx, env, body).await? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                    if !eval_expr(ctx, env, test).await?.is_truthy() {
                        break;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::ForOf { binding, iterable, body, .. } => {
                let iterable = eval_expr(ctx, env, iterable).await?;
                let items: Vec<Value> = match &iterable {
                    Value::Array(items) => items.lock().clone(),
                    Value::Str(s) => s.chars().map(|c| Value::str(c.to_string())).collect(),
                    _ => return Err(ExecError::message("for-of target is not iterable")),
                };
                for item in items {
                    let iter_env = env.child();
                    iter_env.declare(binding, item);
                    match exec_stmt(ctx, &iter_env, body).await? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::ForIn { binding, object, body, .. } => {
                let object = eval_expr(ctx, env, object).await?;
                let keys: Vec<String> = match &object {
                    Value::Object(entries) => entries.lock().iter().map(|(k, _)| k.clone()).collect(),
                    Value::Array(items) => (0..items.lock().len()).map(|i| i.to_string()).collect(),
                    _ => return Err(ExecError::message("for-in target is not an object")),
                };
                for key in keys {
                    let iter_env = env.child();
                    iter_env.declare(binding, Value::str(key));
                    match exec_stmt(ctx, &iter_env, body).await? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Continue | Flow::Normal => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::FunctionDecl { name, params, body, is_async, .. } => {
                let callable = Value::Function(Arc::new(Callable::User {
                    params: params.clone(),
                    body: Arc::new(body.clone()),
                    is_async: *is_async,
                    closure: env.clone(),
                }));
                env.declare(name, callable);
                Ok(Flow::Normal)
            }
            Stmt::TryCatch { block, catch_param, handler, finalizer, .. } => {
                let result = exec_block(ctx, &env.child(), block).await;
                let flow_result = match result {
                    Ok(flow) => Ok(flow),
                    Err(ExecError(thrown)) => {
                        let catch_env = env.child();
                        if let Some(param) = catch_param {
                            catch_env.declare(param, thrown);
                        }
                        exec_block(ctx, &catch_env, handler).await
                    }
                };
                if let Some(fin) = finalizer {
                    exec_block(ctx, &env.child(), fin).await?;
                }
                flow_result
            }
            Stmt::Break { .. } => Ok(Flow::Break),
            Stmt::Continue { .. } => Ok(Flow::Continue),
            Stmt::Empty { .. } => Ok(Flow::Normal),
        }
    })
}

fn eval_expr<'a>(ctx: &'a ExecContext, env: &'a Environment, expr: &'a Expr) -> BoxFuture<'a, Result<Value, ExecError>> {
    Box::pin(async move {
        match expr {
            Expr::Literal { value, .. } => Ok(literal_value(value)),
            Expr::Identifier { name, .. } if name == ABORT_FLAG_IDENT => Ok(Value::Bool(ctx.aborted.load(Ordering::SeqCst))),
            Expr::Identifier { name, .. } => env.get(name).ok_or_else(|| ExecError::message(format!("'{name}' is not defined"))),
            Expr::Array { elements, .. } => {
                let mut items = Vec::with_capacity(elements.len());
                for e in elements {
                    items.push(eval_expr(ctx, env, e).await?);
                }
                Ok(Value::array(items))
            }
            Expr::Object { properties, .. } => {
                let mut entries = Vec::with_capacity(properties.len());
                for (key, value) in properties {
                    let key = match key {
                        PropertyKey::Literal(name) => name.clone(),
                        PropertyKey::Computed(k) => eval_expr(ctx, env, k).await?.to_display_string(),
                    };
                    entries.push((key, eval_expr(ctx, env, value).await?));
                }
                Ok(Value::object(entries))
            }
            Expr::Template { parts, .. } => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Str(s) => out.push_str(s),
                        TemplatePart::Expr(e) => out.push_str(&eval_expr(ctx, env, e).await?.to_display_string()),
                    }
                }
                Ok(Value::str(out))
            }
            Expr::Unary { op, argument, .. } => {
                let value = eval_expr(ctx, env, argument).await?;
                Ok(apply_unary(*op, value))
            }
            Expr::Binary { op, left, right, .. } => {
                let l = eval_expr(ctx, env, left).await?;
                let r = eval_expr(ctx, env, right).await?;
                apply_binary(*op, l, r)
            }
            Expr::Logical { op, left, right, .. } => {
                let l = eval_expr(ctx, env, left).await?;
                match op {
                    LogicalOp::And => if l.is_truthy() { eval_expr(ctx, env, right).await } else { Ok(l) },
                    LogicalOp::Or => if l.is_truthy() { Ok(l) } else { eval_expr(ctx, env, right).await },
                    LogicalOp::NullishCoalesce => {
                        if matches!(l, Value::Undefined | Value::Null) {
                            eval_expr(ctx, env, right).await
                        } else {
                            Ok(l)
                        }
                    }
                }
            }
            Expr::Assignment { op, target, value, .. } => {
                let new_value = eval_expr(ctx, env, value).await?;
                let resolved = match op {
                    AssignOp::Assign => new_value,
                    compound => {
                        let current = eval_expr(ctx, env, target).await?;
                        apply_binary(compound_to_binary(*compound), current, new_value)?
                    }
                };
                assign_to_target(ctx, env, target, resolved.clone()).await?;
                Ok(resolved)
            }
            Expr::Conditional { test, consequent, alternate, .. } => {
                if eval_expr(ctx, env, test).await?.is_truthy() {
                    eval_expr(ctx, env, consequent).await
                } else {
                    eval_expr(ctx, env, alternate).await
                }
            }
            Expr::Call { callee, arguments, .. } => {
                let callee_value = eval_expr(ctx, env, callee).await?;
                let mut args = Vec::with_capacity(arguments.len());
                for a in arguments {
                    args.push(eval_expr(ctx, env, a).await?);
                }
                call_value(ctx, callee_value, args).await
            }
            Expr::New { .. } => Err(ExecError::message("`new` is not supported by this dialect's safe globals")),
            Expr::Member { object, property, .. } => {
                let object_value = eval_expr(ctx, env, object).await?;
                let key = match property {
                    PropertyKey::Literal(name) => name.clone(),
                    PropertyKey::Computed(k) => eval_expr(ctx, env, k).await?.to_display_string(),
                };
                Ok(object_value.get_member(&key))
            }
            Expr::Await { argument, .. } => eval_expr(ctx, env, argument).await,
            Expr::Function { params, body, is_async, .. } => Ok(Value::Function(Arc::new(Callable::User {
                params: params.clone(),
                body: Arc::new(body.clone()),
                is_async: *is_async,
                closure: env.clone(),
            }))),
        }
    })
}

async fn assign_to_target(ctx: &ExecContext, env: &Environment, target: &Expr, value: Value) -> Result<(), ExecError> {
    match target {
        Expr::Identifier { name, .. } => {
            if !env.set(name, value) {
                return Err(ExecError::message(format!("'{name}' is not defined")));
            }
            Ok(())
        }
        Expr::Member { object, property, .. } => {
            let object_value = eval_expr(ctx, env, object).await?;
            let key = match property {
                PropertyKey::Literal(name) => name.clone(),
                PropertyKey::Computed(k) => eval_expr(ctx, env, k).await?.to_display_string(),
            };
            match &object_value {
                Value::Object(entries) => {
                    let mut entries = entries.lock();
                    if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
                        slot.1 = value;
                    } else {
                        entries.push((key, value));
                    }
                    Ok(())
                }
                Value::Array(items) => {
                    let idx: usize = key.parse().map_err(|_| ExecError::message("array index must be numeric"))?;
                    let mut items = items.lock();
                    if idx >= items.len() {
                        items.resize(idx + 1, Value::Undefined);
                    }
                    items[idx] = value;
                    Ok(())
                }
                _ => Err(ExecError::message("cannot assign a member on this value")),
            }
        }
        _ => Err(ExecError::message("invalid assignment target")),
    }
}

fn compound_to_binary(op: AssignOp) -> BinaryOp {
    match op {
        AssignOp::AddAssign => BinaryOp::Add,
        AssignOp::SubAssign => BinaryOp::Sub,
        AssignOp::MulAssign => BinaryOp::Mul,
        AssignOp::DivAssign => BinaryOp::Div,
        AssignOp::Assign => unreachable!("Assign has no binary equivalent"),
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Number(n) => Value::Number(*n),
        Literal::Str(s) => Value::str(s.clone()),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
        Literal::Undefined => Value::Undefined,
    }
}

fn apply_unary(op: UnaryOp, value: Value) -> Value {
    match op {
        UnaryOp::Neg => Value::Number(-to_number(&value)),
        UnaryOp::Plus => Value::Number(to_number(&value)),
        UnaryOp::Not => Value::Bool(!value.is_truthy()),
        UnaryOp::Typeof => Value::str(type_of(&value)),
        UnaryOp::Void => Value::Undefined,
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Undefined => "undefined",
        Value::Null => "object",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::Str(_) => "string",
        Value::Array(_) | Value::Object(_) => "object",
        Value::Function(_) => "function",
        Value::Namespace(_) => "object",
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Str(s) => s.trim().parse().unwrap_or(f64::NAN),
        Value::Null => 0.0,
        _ => f64::NAN,
    }
}

fn apply_binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, ExecError> {
    use BinaryOp::*;
    Ok(match op {
        Add => match (&l, &r) {
            (Value::Str(_), _) | (_, Value::Str(_)) => Value::str(format!("{}{}", l.to_display_string(), r.to_display_string())),
            _ => Value::Number(to_number(&l) + to_number(&r)),
        },
        Sub => Value::Number(to_number(&l) - to_number(&r)),
        Mul => Value::Number(to_number(&l) * to_number(&r)),
        Div => Value::Number(to_number(&l) / to_number(&r)),
        Mod => Value::Number(to_number(&l) % to_number(&r)),
        Pow => Value::Number(to_number(&l).powf(to_number(&r))),
        Lt => Value::Bool(to_number(&l) < to_number(&r)),
        Gt => Value::Bool(to_number(&l) > to_number(&r)),
        Le => Value::Bool(to_number(&l) <= to_number(&r)),
        Ge => Value::Bool(to_number(&l) >= to_number(&r)),
        Eq | StrictEq => Value::Bool(loose_eq(&l, &r)),
        NotEq | StrictNotEq => Value::Bool(!loose_eq(&l, &r)),
        BitAnd => Value::Number(((to_number(&l) as i64) & (to_number(&r) as i64)) as f64),
        BitOr => Value::Number(((to_number(&l) as i64) | (to_number(&r) as i64)) as f64),
        BitXor => Value::Number(((to_number(&l) as i64) ^ (to_number(&r) as i64)) as f64),
    })
}

fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) | (Value::Undefined, Value::Undefined) | (Value::Null, Value::Undefined) | (Value::Undefined, Value::Null) => true,
        _ => false,
    }
}

fn call_value<'a>(ctx: &'a ExecContext, callee: Value, args: Vec<Value>) -> BoxFuture<'a, Result<Value, ExecError>> {
    Box::pin(async move {
        let Value::Function(callable) = callee else {
            return Err(ExecError::message("attempted to call a value that is not a function"));
        };
        call_function(ctx, &callable, args).await
    })
}

fn call_function<'a>(ctx: &'a ExecContext, callable: &'a Callable, args: Vec<Value>) -> BoxFuture<'a, Result<Value, ExecError>> {
    Box::pin(async move {
        match callable {
            Callable::Native(name) => super::builtins::dispatch(ctx, name, args).await,
            Callable::User { params, body, closure, .. } => {
                let call_env = closure.child();
                for (i, param) in params.iter().enumerate() {
                    call_env.declare(param, args.get(i).cloned().unwrap_or(Value::Undefined));
                }
                match exec_block(ctx, &call_env, body).await? {
                    Flow::Return(v) => Ok(v),
                    _ => Ok(Value::Undefined),
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclavejs_core::domain::transformer::{transform, TransformLimits};
    use enclavejs_core::infrastructure::parser::parse_program;
    use std::sync::atomic::AtomicBool;

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
            Ok(serde_json::json!(3))
        }
    }

    fn run(source: &str) -> Result<Value, ExecError> {
        let program = parse_program(source).unwrap();
        let transformed = transform(&program, TransformLimits { max_iterations: 1000 });
        let ctx = ExecContext::new(Arc::new(AtomicBool::new(false)), Arc::new(StubTools), Arc::new(NoopConsole));
        let global = new_global_environment(1000.0);
        futures::executor::block_on(run_main(&ctx, &global, &transformed))
    }

    #[test]
    fn evaluates_simple_arithmetic() {
        let value = run("return 2 + 3;").unwrap();
        assert!(matches!(value, Value::Number(n) if n == 5.0));
    }

    #[test]
    fn iteration_limit_throws_once_exceeded() {
        let err = run("let i = 0; while (true) { i = i + 1; } return i;").unwrap_err();
        assert_eq!(err.display_message(), "Maximum iteration limit exceeded");
    }

    #[test]
    fn tool_call_resolves_through_the_safe_entry_point() {
        let value = run("const r = await callTool(\"add\", {a:1,b:2}); return r;").unwrap();
        assert!(matches!(value, Value::Number(n) if n == 3.0));
    }

    #[test]
    fn abort_flag_aborts_a_running_loop() {
        let program = parse_program("while (true) {}").unwrap();
        let transformed = transform(&program, TransformLimits { max_iterations: 1_000_000 });
        let aborted = Arc::new(AtomicBool::new(true));
        let ctx = ExecContext::new(aborted, Arc::new(StubTools), Arc::new(NoopConsole));
        let global = new_global_environment(1_000_000.0);
        let err = futures::executor::block_on(run_main(&ctx, &global, &transformed)).unwrap_err();
        assert_eq!(err.display_message(), "Cancelled");
    }

    #[test]
    fn try_catch_binds_thrown_value() {
        let value = run("try { throw \"boom\"; } catch (e) { return e; }").unwrap();
        assert!(matches!(value, Value::Str(s) if s == "boom"));
    }
}
