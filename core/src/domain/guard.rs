// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The static Guard (§4.1): walks a parsed [`Program`] and, separately, the
//! raw source text, rejecting constructs that would let untrusted code escape
//! the sandbox (dynamic code evaluation, prototype/constructor access,
//! reflective globals) before a single line of it runs.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ast::{Expr, Literal, Program, PropertyKey, Span, Stmt};
use super::errors::ErrorCode;
use crate::infrastructure::parser::{self, ParseError};

/// One of the three named policy tuples (§3 "Guard Preset"). A preset fixes
/// both the Guard's allowed-identifier set and the Sandbox's installed
/// global bindings — the two must never drift apart, so both read from this
/// type rather than keeping separate lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardPreset {
    Strict,
    /// Alias `STANDARD` in wire payloads; see `GuardPreset::parse`.
    Secure,
    Permissive,
}

const BASE_GLOBALS: &[&str] = &[
    "Math", "JSON", "Array", "Object", "String", "Number", "Date", "undefined", "NaN", "Infinity", "callTool",
];

const SECURE_EXTRA_GLOBALS: &[&str] = &[
    "parseInt",
    "parseFloat",
    "isNaN",
    "isFinite",
    "encodeURI",
    "decodeURI",
    "encodeURIComponent",
    "decodeURIComponent",
];

const PERMISSIVE_EXTRA_GLOBALS: &[&str] = &["console"];

/// Property names that, if ever appearing as a `MemberExpression`'s accessed
/// name, grant access to the prototype chain or the interpreter's internals.
const FORBIDDEN_MEMBERS: &[&str] = &[
    "__proto__",
    "constructor",
    "prototype",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

/// Bare identifiers that are always forbidden in a read position, regardless
/// of preset: they reach outside the sandbox's controlled global table.
const FORBIDDEN_IDENTIFIERS: &[&str] = &["eval", "Function", "globalThis", "this", "self", "window", "require", "process"];

impl GuardPreset {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "STRICT" => Some(Self::Strict),
            "SECURE" | "STANDARD" => Some(Self::Secure),
            "PERMISSIVE" => Some(Self::Permissive),
            _ => None,
        }
    }

    /// The full set of identifiers this preset installs as sandbox globals
    /// and therefore permits the Guard to see in a read position.
    pub fn allowed_globals(&self) -> HashSet<&'static str> {
        let mut set: HashSet<&'static str> = BASE_GLOBALS.iter().copied().collect();
        match self {
            Self::Strict => {}
            Self::Secure => set.extend(SECURE_EXTRA_GLOBALS),
            Self::Permissive => {
                set.extend(SECURE_EXTRA_GLOBALS);
                set.extend(PERMISSIVE_EXTRA_GLOBALS);
            }
        }
        set
    }

    /// Under `STRICT`, loop statements are rejected outright (§3, §4.1).
    pub fn loops_allowed(&self) -> bool {
        !matches!(self, Self::Strict)
    }
}

/// A single Guard rejection (§4.1 `validate` contract: `issues:
/// [{code, message, line?, col?}]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardIssue {
    pub code: ErrorCode,
    pub message: String,
    pub line: Option<u32>,
    pub col: Option<u32>,
}

impl GuardIssue {
    fn new(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            message: message.into(),
            line: Some(span.line),
            col: Some(span.col),
        }
    }
}

/// Outcome of `validate`: either no issues, or the full list of violations
/// found. Guard never stops at the first failure (§4.1: "reported as a list,
/// never a single-shot throw").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardReport {
    pub ok: bool,
    pub issues: Vec<GuardIssue>,
}

impl GuardReport {
    pub fn ok() -> Self {
        Self { ok: true, issues: Vec::new() }
    }

    pub fn from_issues(issues: Vec<GuardIssue>) -> Self {
        Self { ok: issues.is_empty(), issues }
    }
}

/// Layer 0 (§4.1): a cheap textual check over the raw source, run before
/// parsing. This bounds parse time on hostile input and gives a precedent
/// when parsing itself fails (see `AstPrescanRejected` vs `AstParseError` in
/// `validate_source`).
///
/// Advisory when the source goes on to parse successfully: `validate_ast`
/// performs the authoritative structural check and may reject constructs
/// this textual scan cannot see (or may let through ones it flags, e.g. the
/// substring `constructor` appearing inside a string literal).
pub fn prescan(source: &str) -> Vec<&'static str> {
    const PATTERNS: &[(&str, &str)] = &[
        ("eval(", "source contains the substring \"eval(\""),
        ("Function(", "source contains the substring \"Function(\""),
        ("__proto__", "source contains the substring \"__proto__\""),
        ("constructor", "source contains the substring \"constructor\""),
    ];
    PATTERNS
        .iter()
        .filter(|(needle, _)| source.contains(needle))
        .map(|(_, msg)| *msg)
        .collect()
}

/// Walks a parsed [`Program`] under `preset`, collecting every violation
/// found rather than stopping at the first one.
pub fn validate_ast(program: &Program, preset: GuardPreset) -> GuardReport {
    let allowed = preset.allowed_globals();
    let mut issues = Vec::new();
    let mut scope = Scope::new();
    // Top-level function declarations are hoisted: a later function may
    // legally call an earlier (or later) sibling.
    for stmt in &program.body {
        if let Stmt::FunctionDecl { name, .. } = stmt {
            scope.declare(name);
        }
    }
    for stmt in &program.body {
        walk_stmt(stmt, preset, &allowed, &mut scope, &mut issues);
    }
    GuardReport::from_issues(issues)
}

/// A simple lexical-scope stack tracking declared locals, so that Guard does
/// not reject a user-declared `let total = 0;` merely because `total` is not
/// in `allowedGlobals(preset)` (§4.1: "for every reference... in a read
/// position").
struct Scope {
    frames: Vec<HashSet<String>>,
}

impl Scope {
    fn new() -> Self {
        Self { frames: vec![HashSet::new()] }
    }

    fn push(&mut self) {
        self.frames.push(HashSet::new());
    }

    fn pop(&mut self) {
        self.frames.pop();
    }

    fn declare(&mut self, name: &str) {
        if let Some(top) = self.frames.last_mut() {
            top.insert(name.to_string());
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        self.frames.iter().any(|f| f.contains(name))
    }
}

fn walk_stmt(stmt: &Stmt, preset: GuardPreset, allowed: &HashSet<&'static str>, scope: &mut Scope, issues: &mut Vec<GuardIssue>) {
    match stmt {
        Stmt::VarDecl { name, init, .. } => {
            if let Some(expr) = init {
                walk_expr(expr, preset, allowed, scope, issues);
            }
            scope.declare(name);
        }
        Stmt::ExprStmt { expr, .. } => walk_expr(expr, preset, allowed, scope, issues),
        Stmt::Return { argument, .. } => {
            if let Some(expr) = argument {
                walk_expr(expr, preset, allowed, scope, issues);
            }
        }
        Stmt::Throw { argument, .. } => walk_expr(argument, preset, allowed, scope, issues),
        Stmt::Block { body, .. } => {
            scope.push();
            for s in body {
                walk_stmt(s, preset, allowed, scope, issues);
            }
            scope.pop();
        }
        Stmt::If { test, consequent, alternate, .. } => {
            walk_expr(test, preset, allowed, scope, issues);
            walk_stmt(consequent, preset, allowed, scope, issues);
            if let Some(alt) = alternate {
                walk_stmt(alt, preset, allowed, scope, issues);
            }
        }
        Stmt::For { init, test, update, body, span } => {
            reject_loop_if_strict(preset, *span, issues);
            scope.push();
            if let Some(init) = init {
                walk_stmt(init, preset, allowed, scope, issues);
            }
            if let Some(test) = test {
                walk_expr(test, preset, allowed, scope, issues);
            }
            if let Some(update) = update {
                walk_expr(update, preset, allowed, scope, issues);
            }
            walk_stmt(body, preset, allowed, scope, issues);
            scope.pop();
        }
        Stmt::While { test, body, span } => {
            reject_loop_if_strict(preset, *span, issues);
            walk_expr(test, preset, allowed, scope, issues);
            walk_stmt(body, preset, allowed, scope, issues);
        }
        Stmt::DoWhile { body, test, span } => {
            reject_loop_if_strict(preset, *span, issues);
            walk_stmt(body, preset, allowed, scope, issues);
            walk_expr(test, preset, allowed, scope, issues);
        }
        Stmt::ForOf { binding, iterable, body, span, .. } | Stmt::ForIn { binding, object: iterable, body, span, .. } => {
            reject_loop_if_strict(preset, *span, issues);
            walk_expr(iterable, preset, allowed, scope, issues);
            scope.push();
            scope.declare(binding);
            walk_stmt(body, preset, allowed, scope, issues);
            scope.pop();
        }
        Stmt::FunctionDecl { params, body, .. } => {
            scope.push();
            for p in params {
                scope.declare(p);
            }
            for s in body {
                walk_stmt(s, preset, allowed, scope, issues);
            }
            scope.pop();
        }
        Stmt::TryCatch { block, catch_param, handler, finalizer, .. } => {
            scope.push();
            for s in block {
                walk_stmt(s, preset, allowed, scope, issues);
            }
            scope.pop();
            scope.push();
            if let Some(param) = catch_param {
                scope.declare(param);
            }
            for s in handler {
                walk_stmt(s, preset, allowed, scope, issues);
            }
            scope.pop();
            if let Some(fin) = finalizer {
                scope.push();
                for s in fin {
                    walk_stmt(s, preset, allowed, scope, issues);
                }
                scope.pop();
            }
        }
        Stmt::Break { .. } | Stmt::Continue { .. } | Stmt::Empty { .. } => {}
    }
}

fn reject_loop_if_strict(preset: GuardPreset, span: Span, issues: &mut Vec<GuardIssue>) {
    if !preset.loops_allowed() {
        issues.push(GuardIssue::new(ErrorCode::AstLoopNotAllowed, "loop constructs are not allowed under the STRICT preset", span));
    }
}

fn walk_expr(expr: &Expr, preset: GuardPreset, allowed: &HashSet<&'static str>, scope: &mut Scope, issues: &mut Vec<GuardIssue>) {
    match expr {
        Expr::Literal { .. } => {}
        Expr::Identifier { name, span } => {
            if !scope.is_declared(name) && !allowed.contains(name.as_str()) {
                issues.push(GuardIssue::new(
                    ErrorCode::AstForbiddenIdentifier,
                    format!("identifier '{name}' is not permitted under this preset"),
                    *span,
                ));
            }
        }
        Expr::Array { elements, .. } => {
            for e in elements {
                walk_expr(e, preset, allowed, scope, issues);
            }
        }
        Expr::Object { properties, .. } => {
            for (key, value) in properties {
                if let PropertyKey::Computed(k) = key {
                    walk_expr(k, preset, allowed, scope, issues);
                }
                walk_expr(value, preset, allowed, scope, issues);
            }
        }
        Expr::Template { parts, .. } => {
            for part in parts {
                if let super::ast::TemplatePart::Expr(e) = part {
                    walk_expr(e, preset, allowed, scope, issues);
                }
            }
        }
        Expr::Unary { argument, .. } => walk_expr(argument, preset, allowed, scope, issues),
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            walk_expr(left, preset, allowed, scope, issues);
            walk_expr(right, preset, allowed, scope, issues);
        }
        Expr::Assignment { target, value, .. } => {
            walk_expr(target, preset, allowed, scope, issues);
            walk_expr(value, preset, allowed, scope, issues);
        }
        Expr::Conditional { test, consequent, alternate, .. } => {
            walk_expr(test, preset, allowed, scope, issues);
            walk_expr(consequent, preset, allowed, scope, issues);
            walk_expr(alternate, preset, allowed, scope, issues);
        }
        Expr::Call { callee, arguments, span } => {
            check_forbidden_call(expr, *span, issues);
            walk_expr(callee, preset, allowed, scope, issues);
            for a in arguments {
                walk_expr(a, preset, allowed, scope, issues);
            }
        }
        Expr::New { callee, arguments, span } => {
            if let Some(name) = expr.as_identifier_callee() {
                if name == "Function" {
                    issues.push(GuardIssue::new(ErrorCode::AstDynamicCode, "`new Function(...)` compiles a string to code and is forbidden", *span));
                }
            }
            walk_expr(callee, preset, allowed, scope, issues);
            for a in arguments {
                walk_expr(a, preset, allowed, scope, issues);
            }
        }
        Expr::Member { object, property, span } => {
            match property {
                PropertyKey::Literal(name) if FORBIDDEN_MEMBERS.contains(&name.as_str()) => {
                    issues.push(GuardIssue::new(
                        ErrorCode::AstForbiddenMember,
                        format!("member access to '{name}' is forbidden"),
                        *span,
                    ));
                }
                PropertyKey::Computed(key_expr) => {
                    if !matches!(key_expr.as_ref(), Expr::Literal { value: Literal::Str(_) | Literal::Number(_), .. }) {
                        issues.push(GuardIssue::new(
                            ErrorCode::AstForbiddenMember,
                            "computed member access with a non-literal key cannot be proven safe",
                            *span,
                        ));
                    }
                    walk_expr(key_expr, preset, allowed, scope, issues);
                }
                PropertyKey::Literal(_) => {}
            }
            walk_expr(object, preset, allowed, scope, issues);
        }
        Expr::Await { argument, .. } => walk_expr(argument, preset, allowed, scope, issues),
        Expr::Function { params, body, .. } => {
            scope.push();
            for p in params {
                scope.declare(p);
            }
            for s in body {
                walk_stmt(s, preset, allowed, scope, issues);
            }
            scope.pop();
        }
    }
}

fn check_forbidden_call(expr: &Expr, span: Span, issues: &mut Vec<GuardIssue>) {
    let Some(name) = expr.as_identifier_callee() else { return };
    match name {
        "eval" => issues.push(GuardIssue::new(ErrorCode::AstForbiddenIdentifier, "`eval` is forbidden", span)),
        "Function" => issues.push(GuardIssue::new(ErrorCode::AstDynamicCode, "`Function(...)` compiles a string to code and is forbidden", span)),
        "setTimeout" | "setInterval" => {
            if let Expr::Call { arguments, .. } = expr {
                if matches!(arguments.first(), Some(Expr::Literal { value: Literal::Str(_), .. })) {
                    issues.push(GuardIssue::new(
                        ErrorCode::AstDynamicCode,
                        format!("`{name}` with a string argument compiles a string to code and is forbidden"),
                        span,
                    ));
                }
            }
        }
        _ => {}
    }
}

/// The full `validate(source, preset)` contract (§4.1): runs the pre-scan,
/// parses the source, and — if parsing succeeds — walks the resulting AST.
///
/// §4.1.1 resolves the overlap between pre-scan and parse failure: when the
/// source fails to parse at all, a pre-scan hit takes precedence and is
/// reported as `AstPrescanRejected` rather than `AstParseError` — a hostile
/// author who both breaks the parser *and* embeds `eval(` sees the security
/// diagnostic, not a generic syntax error. When parsing succeeds, pre-scan
/// hits are advisory only: the AST walk is authoritative and pre-scan's
/// result is discarded (see module docs on `prescan`).
pub fn validate(source: &str, preset: GuardPreset) -> GuardReport {
    let prescan_hits = prescan(source);
    match parser::parse_program(source) {
        Ok(program) => validate_ast(&program, preset),
        Err(err) => {
            if let Some(message) = prescan_hits.into_iter().next() {
                return GuardReport::from_issues(vec![GuardIssue { code: ErrorCode::AstPrescanRejected, message: message.to_string(), line: None, col: None }]);
            }
            let (line, col) = match err.line_col() {
                Some((l, c)) => (Some(l), Some(c)),
                None => (None, None),
            };
            GuardReport::from_issues(vec![GuardIssue { code: ErrorCode::AstParseError, message: parse_error_message(&err), line, col }])
        }
    }
}

fn parse_error_message(err: &ParseError) -> String {
    err.to_string()
}

/// True if `name` is one of the identifiers this preset forbids outright,
/// independent of scope. Exposed for the Transformer, which must not
/// accidentally introduce a reference to one of these while rewriting loops.
pub fn is_forbidden_identifier(name: &str) -> bool {
    FORBIDDEN_IDENTIFIERS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ast::{BinaryOp, DeclKind};

    fn span() -> Span {
        Span::new(1, 1)
    }

    #[test]
    fn allows_plain_arithmetic_under_secure() {
        let program = Program {
            body: vec![Stmt::Return {
                argument: Some(Expr::Binary {
                    op: BinaryOp::Add,
                    left: Box::new(Expr::Literal { value: Literal::Number(2.0), span: span() }),
                    right: Box::new(Expr::Literal { value: Literal::Number(3.0), span: span() }),
                    span: span(),
                }),
                span: span(),
            }],
        };
        let report = validate_ast(&program, GuardPreset::Secure);
        assert!(report.ok);
    }

    #[test]
    fn rejects_eval_call() {
        let program = Program {
            body: vec![Stmt::ExprStmt {
                expr: Expr::Call {
                    callee: Box::new(Expr::Identifier { name: "eval".into(), span: span() }),
                    arguments: vec![Expr::Literal { value: Literal::Str("1".into()), span: span() }],
                    span: span(),
                },
                span: span(),
            }],
        };
        let report = validate_ast(&program, GuardPreset::Strict);
        assert!(!report.ok);
        assert!(report.issues.iter().any(|i| i.code == ErrorCode::AstForbiddenIdentifier));
    }

    #[test]
    fn rejects_prototype_member_access() {
        let program = Program {
            body: vec![Stmt::ExprStmt {
                expr: Expr::Member {
                    object: Box::new(Expr::Identifier { name: "Object".into(), span: span() }),
                    property: PropertyKey::Literal("__proto__".into()),
                    span: span(),
                },
                span: span(),
            }],
        };
        let report = validate_ast(&program, GuardPreset::Permissive);
        assert!(!report.ok);
        assert!(report.issues.iter().any(|i| i.code == ErrorCode::AstForbiddenMember));
    }

    #[test]
    fn rejects_computed_member_with_non_literal_key() {
        let program = Program {
            body: vec![Stmt::ExprStmt {
                expr: Expr::Member {
                    object: Box::new(Expr::Identifier { name: "Object".into(), span: span() }),
                    property: PropertyKey::Computed(Box::new(Expr::Identifier { name: "key".into(), span: span() })),
                    span: span(),
                },
                span: span(),
            }],
        };
        let mut scope_program = program;
        // declare `key` as a local so the only failure is the computed-access rule itself
        scope_program.body.insert(
            0,
            Stmt::VarDecl { kind: DeclKind::Let, name: "key".into(), init: Some(Expr::Literal { value: Literal::Str("x".into()), span: span() }), span: span() },
        );
        let report = validate_ast(&scope_program, GuardPreset::Permissive);
        assert!(!report.ok);
        assert!(report.issues.iter().any(|i| i.code == ErrorCode::AstForbiddenMember));
    }

    #[test]
    fn rejects_loops_under_strict_but_allows_under_secure() {
        let loop_stmt = Stmt::While {
            test: Expr::Literal { value: Literal::Bool(true), span: span() },
            body: Box::new(Stmt::Block { body: vec![], span: span() }),
            span: span(),
        };
        let program = Program { body: vec![loop_stmt] };
        assert!(!validate_ast(&program, GuardPreset::Strict).ok);
        assert!(validate_ast(&program, GuardPreset::Secure).ok);
    }

    #[test]
    fn allowed_globals_grow_monotonically_across_presets() {
        let strict = GuardPreset::Strict.allowed_globals();
        let secure = GuardPreset::Secure.allowed_globals();
        let permissive = GuardPreset::Permissive.allowed_globals();
        assert!(strict.is_subset(&secure));
        assert!(secure.is_subset(&permissive));
        assert!(!strict.contains("console"));
        assert!(permissive.contains("console"));
    }

    #[test]
    fn validate_accepts_plain_arithmetic() {
        let report = validate("return 2 + 3;", GuardPreset::Secure);
        assert!(report.ok);
    }

    #[test]
    fn validate_rejects_eval_with_forbidden_identifier_code() {
        let report = validate("eval(\"1\");", GuardPreset::Strict);
        assert!(!report.ok);
        assert!(report.issues.iter().any(|i| i.code == ErrorCode::AstForbiddenIdentifier));
    }

    #[test]
    fn validate_reports_prescan_rejection_over_parse_error_on_overlap() {
        // Malformed syntax (`return` with a dangling binary operator) that
        // also embeds a pre-scan hit: AstPrescanRejected must win (§4.1.1).
        let report = validate("return eval( +", GuardPreset::Strict);
        assert!(!report.ok);
        assert_eq!(report.issues[0].code, ErrorCode::AstPrescanRejected);
    }

    #[test]
    fn validate_reports_parse_error_when_no_prescan_hit() {
        let report = validate("return 1 +", GuardPreset::Secure);
        assert!(!report.ok);
        assert_eq!(report.issues[0].code, ErrorCode::AstParseError);
    }
}
