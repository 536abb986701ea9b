// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The Transformer (§4.2): rewrites a guarded [`Program`] into an
//! equivalent one that is safe to run unattended — loop bodies gain an
//! abort check and an iteration counter, `callTool` calls are redirected to
//! the mediated bridge entry point, and the whole program body is wrapped in
//! an async `__ag_main` so the Sandbox has a single entry point to invoke
//! and await.
//!
//! This operates entirely within the existing [`Stmt`]/[`Expr`] grammar: a
//! loop gains ordinary sibling statements and an `if`/`throw` guard at the
//! top of its body, rather than a transformer-only AST shape. That keeps the
//! tree-walking interpreter in `enclavejs-runtime` free of special cases for
//! transformed code.

use super::ast::{AssignOp, BinaryOp, DeclKind, Expr, Literal, Program, Span, Stmt};

/// The identifier the Sandbox installs so transformed loop bodies can poll
/// for cooperative cancellation without a special interpreter hook (§5).
pub const ABORT_FLAG_IDENT: &str = "__aborted";
/// The identifier the Sandbox installs holding the session's configured
/// iteration cap (§4.3 safe globals list).
pub const MAX_ITERATIONS_IDENT: &str = "__maxIterations";
/// The mediated entry point every `callTool(...)` call is redirected to
/// (§4.2), so a user script cannot bypass the bridge by shadowing
/// `callTool` locally.
pub const SAFE_CALL_TOOL_IDENT: &str = "__safe_callTool";
/// The name of the synthetic async function the whole program body is
/// wrapped in (§4.2).
pub const MAIN_FN_IDENT: &str = "__ag_main";

/// Parameters the Transformer bakes into the guard checks it inserts.
/// `max_iterations` becomes the right-hand side the guard compares against
/// (mirrored at runtime by the `__maxIterations` global so both agree).
#[derive(Debug, Clone, Copy)]
pub struct TransformLimits {
    pub max_iterations: u64,
}

struct Transformer {
    limits: TransformLimits,
    counter: u32,
}

/// Rewrites `program` per §4.2 and returns the transformed program. Pure and
/// total: any well-formed `Program` (as already accepted by the Guard)
/// transforms successfully.
pub fn transform(program: &Program, limits: TransformLimits) -> Program {
    let mut t = Transformer { limits, counter: 0 };
    let body = t.transform_block(&program.body);
    Program {
        body: vec![Stmt::FunctionDecl {
            name: MAIN_FN_IDENT.to_string(),
            params: vec![],
            body,
            is_async: true,
            span: Span::default(),
        }],
    }
}

impl Transformer {
    fn next_counter_name(&mut self) -> String {
        let name = format!("__iter_{}", self.counter);
        self.counter += 1;
        name
    }

    fn transform_block(&mut self, stmts: &[Stmt]) -> Vec<Stmt> {
        stmts.iter().flat_map(|s| self.transform_stmt(s)).collect()
    }

    /// Returns a `Vec` because loop statements expand into a counter
    /// declaration followed by the (rewritten) loop itself.
    fn transform_stmt(&mut self, stmt: &Stmt) -> Vec<Stmt> {
        match stmt {
            Stmt::For { init, test, update, body, span } => {
                let counter = self.next_counter_name();
                let decl = counter_decl(&counter, *span);
                let guarded_body = self.guard_loop_body(&counter, body, *span);
                vec![
                    decl,
                    Stmt::For {
                        init: init.as_ref().map(|i| Box::new(self.transform_stmt_single(i))),
                        test: test.as_ref().map(|e| self.transform_expr(e)),
                        update: update.as_ref().map(|e| self.transform_expr(e)),
                        body: Box::new(guarded_body),
                        span: *span,
                    },
                ]
            }
            Stmt::While { test, body, span } => {
                let counter = self.next_counter_name();
                let decl = counter_decl(&counter, *span);
                let guarded_body = self.guard_loop_body(&counter, body, *span);
                vec![
                    decl,
                    Stmt::While { test: self.transform_expr(test), body: Box::new(guarded_body), span: *span },
                ]
            }
            Stmt::DoWhile { body, test, span } => {
                let counter = self.next_counter_name();
                let decl = counter_decl(&counter, *span);
                let guarded_body = self.guard_loop_body(&counter, body, *span);
                vec![
                    decl,
                    Stmt::DoWhile { body: Box::new(guarded_body), test: self.transform_expr(test), span: *span },
                ]
            }
            Stmt::ForOf { decl_kind, binding, iterable, body, span } => {
                let counter = self.next_counter_name();
                let decl = counter_decl(&counter, *span);
                let guarded_body = self.guard_loop_body(&counter, body, *span);
                vec![
                    decl,
                    Stmt::ForOf {
                        decl_kind: decl_kind.clone(),
                        binding: binding.clone(),
                        iterable: self.transform_expr(iterable),
                        body: Box::new(guarded_body),
                        span: *span,
                    },
                ]
            }
            Stmt::ForIn { decl_kind, binding, object, body, span } => {
                let counter = self.next_counter_name();
                let decl = counter_decl(&counter, *span);
                let guarded_body = self.guard_loop_body(&counter, body, *span);
                vec![
                    decl,
                    Stmt::ForIn {
                        decl_kind: decl_kind.clone(),
                        binding: binding.clone(),
                        object: self.transform_expr(object),
                        body: Box::new(guarded_body),
                        span: *span,
                    },
                ]
            }
            other => vec![self.transform_stmt_single(other)],
        }
    }

    /// Transforms a statement known not to expand into multiple statements
    /// (used for `for`-init, which the grammar restricts to a single
    /// declaration or expression statement).
    fn transform_stmt_single(&mut self, stmt: &Stmt) -> Stmt {
        match stmt {
            Stmt::VarDecl { kind, name, init, span } => Stmt::VarDecl {
                kind: kind.clone(),
                name: name.clone(),
                init: init.as_ref().map(|e| self.transform_expr(e)),
                span: *span,
            },
            Stmt::ExprStmt { expr, span } => Stmt::ExprStmt { expr: self.transform_expr(expr), span: *span },
            Stmt::Return { argument, span } => Stmt::Return { argument: argument.as_ref().map(|e| self.transform_expr(e)), span: *span },
            Stmt::Throw { argument, span } => Stmt::Throw { argument: self.transform_expr(argument), span: *span },
            Stmt::Block { body, span } => Stmt::Block { body: self.transform_block(body), span: *span },
            Stmt::If { test, consequent, alternate, span } => Stmt::If {
                test: self.transform_expr(test),
                consequent: Box::new(self.transform_stmt_single(consequent)),
                alternate: alternate.as_ref().map(|s| Box::new(self.transform_stmt_single(s))),
                span: *span,
            },
            Stmt::FunctionDecl { name, params, body, is_async, span } => Stmt::FunctionDecl {
                name: name.clone(),
                params: params.clone(),
                body: self.transform_block(body),
                is_async: *is_async,
                span: *span,
            },
            Stmt::TryCatch { block, catch_param, handler, finalizer, span } => Stmt::TryCatch {
                block: self.transform_block(block),
                catch_param: catch_param.clone(),
                handler: self.transform_block(handler),
                finalizer: finalizer.as_ref().map(|b| self.transform_block(b)),
                span: *span,
            },
            // Loops reached here (e.g. as a lone `for`-init slot) cannot
            // legally contain another loop in that grammar position; fall
            // back to the multi-statement path and take the loop itself,
            // discarding the counter decl would be wrong so this path is
            // unreachable in practice. Kept total via recursion.
            loop_stmt if loop_stmt.is_loop() => {
                let mut expanded = self.transform_stmt(loop_stmt);
                expanded.pop().expect("loop transform always yields at least one statement")
            }
            Stmt::Break { span } => Stmt::Break { span: *span },
            Stmt::Continue { span } => Stmt::Continue { span: *span },
            Stmt::Empty { span } => Stmt::Empty { span: *span },
        }
    }

    /// Builds the guarded loop body: the abort check, the counter
    /// increment-and-limit-check, then the (recursively transformed)
    /// original body (§4.2: "checks an abort flag, increments an iteration
    /// counter, throws if counter > maxIterations, then executes body").
    fn guard_loop_body(&mut self, counter: &str, original_body: &Stmt, span: Span) -> Stmt {
        let inner = match original_body {
            Stmt::Block { body, .. } => self.transform_block(body),
            single => vec![self.transform_stmt_single(single)],
        };
        let mut guarded = vec![abort_check(span), increment_and_check(counter, self.limits.max_iterations, span)];
        guarded.extend(inner);
        Stmt::Block { body: guarded, span }
    }

    fn transform_expr(&mut self, expr: &Expr) -> Expr {
        match expr {
            Expr::Literal { .. } | Expr::Identifier { .. } => expr.clone(),
            Expr::Array { elements, span } => Expr::Array { elements: elements.iter().map(|e| self.transform_expr(e)).collect(), span: *span },
            Expr::Object { properties, span } => Expr::Object {
                properties: properties
                    .iter()
                    .map(|(k, v)| {
                        let key = match k {
                            super::ast::PropertyKey::Computed(ke) => super::ast::PropertyKey::Computed(Box::new(self.transform_expr(ke))),
                            lit => lit.clone(),
                        };
                        (key, self.transform_expr(v))
                    })
                    .collect(),
                span: *span,
            },
            Expr::Template { parts, span } => Expr::Template {
                parts: parts
                    .iter()
                    .map(|p| match p {
                        super::ast::TemplatePart::Str(s) => super::ast::TemplatePart::Str(s.clone()),
                        super::ast::TemplatePart::Expr(e) => super::ast::TemplatePart::Expr(self.transform_expr(e)),
                    })
                    .collect(),
                span: *span,
            },
            Expr::Unary { op, argument, span } => Expr::Unary { op: *op, argument: Box::new(self.transform_expr(argument)), span: *span },
            Expr::Binary { op, left, right, span } => {
                Expr::Binary { op: *op, left: Box::new(self.transform_expr(left)), right: Box::new(self.transform_expr(right)), span: *span }
            }
            Expr::Logical { op, left, right, span } => {
                Expr::Logical { op: *op, left: Box::new(self.transform_expr(left)), right: Box::new(self.transform_expr(right)), span: *span }
            }
            Expr::Assignment { op, target, value, span } => {
                Expr::Assignment { op: *op, target: Box::new(self.transform_expr(target)), value: Box::new(self.transform_expr(value)), span: *span }
            }
            Expr::Conditional { test, consequent, alternate, span } => Expr::Conditional {
                test: Box::new(self.transform_expr(test)),
                consequent: Box::new(self.transform_expr(consequent)),
                alternate: Box::new(self.transform_expr(alternate)),
                span: *span,
            },
            Expr::Call { callee, arguments, span } => {
                let redirected_callee = match callee.as_ref() {
                    Expr::Identifier { name, span: id_span } if name == "callTool" => {
                        Expr::Identifier { name: SAFE_CALL_TOOL_IDENT.to_string(), span: *id_span }
                    }
                    other => self.transform_expr(other),
                };
                Expr::Call { callee: Box::new(redirected_callee), arguments: arguments.iter().map(|a| self.transform_expr(a)).collect(), span: *span }
            }
            Expr::New { callee, arguments, span } => {
                Expr::New { callee: Box::new(self.transform_expr(callee)), arguments: arguments.iter().map(|a| self.transform_expr(a)).collect(), span: *span }
            }
            Expr::Member { object, property, span } => {
                let property = match property {
                    super::ast::PropertyKey::Computed(k) => super::ast::PropertyKey::Computed(Box::new(self.transform_expr(k))),
                    lit => lit.clone(),
                };
                Expr::Member { object: Box::new(self.transform_expr(object)), property, span: *span }
            }
            Expr::Await { argument, span } => Expr::Await { argument: Box::new(self.transform_expr(argument)), span: *span },
            Expr::Function { params, body, is_async, is_arrow, span } => {
                Expr::Function { params: params.clone(), body: self.transform_block(body), is_async: *is_async, is_arrow: *is_arrow, span: *span }
            }
        }
    }
}

fn counter_decl(name: &str, span: Span) -> Stmt {
    Stmt::VarDecl {
        kind: DeclKind::Let,
        name: name.to_string(),
        init: Some(Expr::Literal { value: Literal::Number(0.0), span }),
        span,
    }
}

fn abort_check(span: Span) -> Stmt {
    Stmt::If {
        test: Expr::Identifier { name: ABORT_FLAG_IDENT.to_string(), span },
        consequent: Box::new(Stmt::Throw {
            argument: Expr::Literal { value: Literal::Str("Cancelled".to_string()), span },
            span,
        }),
        alternate: None,
        span,
    }
}

fn increment_and_check(counter: &str, max_iterations: u64, span: Span) -> Stmt {
    let increment = Stmt::ExprStmt {
        expr: Expr::Assignment {
            op: AssignOp::AddAssign,
            target: Box::new(Expr::Identifier { name: counter.to_string(), span }),
            value: Box::new(Expr::Literal { value: Literal::Number(1.0), span }),
            span,
        },
        span,
    };
    let check = Stmt::If {
        test: Expr::Binary {
            op: BinaryOp::Gt,
            left: Box::new(Expr::Identifier { name: counter.to_string(), span }),
            right: Box::new(Expr::Literal { value: Literal::Number(max_iterations as f64), span }),
            span,
        },
        consequent: Box::new(Stmt::Throw {
            argument: Expr::Literal { value: Literal::Str("Maximum iteration limit exceeded".to_string()), span },
            span,
        }),
        alternate: None,
        span,
    };
    Stmt::Block { body: vec![increment, check], span }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ast::Literal;

    fn span() -> Span {
        Span::new(1, 1)
    }

    #[test]
    fn wraps_program_body_in_async_main() {
        let program = Program { body: vec![Stmt::Return { argument: Some(Expr::Literal { value: Literal::Number(5.0), span: span() }), span: span() }] };
        let out = transform(&program, TransformLimits { max_iterations: 1000 });
        assert_eq!(out.body.len(), 1);
        match &out.body[0] {
            Stmt::FunctionDecl { name, is_async, .. } => {
                assert_eq!(name, MAIN_FN_IDENT);
                assert!(is_async);
            }
            other => panic!("expected FunctionDecl, got {other:?}"),
        }
    }

    #[test]
    fn redirects_call_tool_to_safe_entry_point() {
        let program = Program {
            body: vec![Stmt::ExprStmt {
                expr: Expr::Call {
                    callee: Box::new(Expr::Identifier { name: "callTool".into(), span: span() }),
                    arguments: vec![],
                    span: span(),
                },
                span: span(),
            }],
        };
        let out = transform(&program, TransformLimits { max_iterations: 10 });
        let Stmt::FunctionDecl { body, .. } = &out.body[0] else { panic!("expected main fn") };
        let Stmt::ExprStmt { expr: Expr::Call { callee, .. }, .. } = &body[0] else { panic!("expected call") };
        match callee.as_ref() {
            Expr::Identifier { name, .. } => assert_eq!(name, SAFE_CALL_TOOL_IDENT),
            _ => panic!("expected identifier callee"),
        }
    }

    #[test]
    fn wraps_while_loop_with_counter_and_abort_check() {
        let program = Program {
            body: vec![Stmt::While {
                test: Expr::Literal { value: Literal::Bool(true), span: span() },
                body: Box::new(Stmt::Block { body: vec![], span: span() }),
                span: span(),
            }],
        };
        let out = transform(&program, TransformLimits { max_iterations: 3 });
        let Stmt::FunctionDecl { body, .. } = &out.body[0] else { panic!("expected main fn") };
        // counter decl, then the while loop itself
        assert_eq!(body.len(), 2);
        assert!(matches!(body[0], Stmt::VarDecl { .. }));
        let Stmt::While { body: loop_body, .. } = &body[1] else { panic!("expected while") };
        let Stmt::Block { body: guarded, .. } = loop_body.as_ref() else { panic!("expected block") };
        assert_eq!(guarded.len(), 2); // abort check + increment/check block (original body was empty)
    }
}
