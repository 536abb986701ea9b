// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Recursive-descent parser producing a [`Program`] from source text. Pairs
//! with `infrastructure::lexer`. This is the restricted-dialect grammar
//! §3/§4.1 describe: arithmetic and control flow, object/array/template
//! literals, function and arrow declarations, `await`/`async` — no classes,
//! destructuring, generators, or regular expressions.

use crate::domain::ast::{AssignOp, BinaryOp, DeclKind, Expr, Literal, LogicalOp, Program, PropertyKey, Span, Stmt, TemplatePart, UnaryOp};

use super::lexer::{Lexer, TemplateChunk, Token, TokenKind};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    #[error("lex error: {0}")]
    Lex(#[from] super::lexer::LexError),
    #[error("unexpected token {found:?} at line {line}, col {col}; expected {expected}")]
    Unexpected { found: TokenKind, expected: &'static str, line: u32, col: u32 },
    #[error("unexpected end of input; expected {0}")]
    UnexpectedEof(&'static str),
}

impl ParseError {
    /// Best-effort source position for this failure, used by the Guard to
    /// populate `AstParseError`'s `line`/`col` (§4.1.1). `None` for
    /// `UnexpectedEof`, which by definition has no single token to point at.
    pub fn line_col(&self) -> Option<(u32, u32)> {
        match self {
            Self::Lex(super::lexer::LexError::UnexpectedChar(_, line, col))
            | Self::Lex(super::lexer::LexError::UnterminatedString(line, col))
            | Self::Lex(super::lexer::LexError::UnterminatedTemplate(line, col))
            | Self::Lex(super::lexer::LexError::InvalidNumber(_, line, col))
            | Self::Unexpected { line, col, .. } => Some((*line, *col)),
            Self::UnexpectedEof(_) => None,
        }
    }
}

/// Parses a full program from source text (§4.1 `validate` calls this
/// before walking the AST; the Sandbox calls it again on the Transformer's
/// output only in the sense that the Transformer operates on the already
/// parsed tree, never on text).
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let tokens = Lexer::tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn span(&self) -> Span {
        self.peek().span
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: &TokenKind, expected: &'static str) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let span = self.span();
            Err(ParseError::Unexpected { found: self.peek_kind().clone(), expected, line: span.line, col: span.col })
        }
    }

    /// Consumes an optional statement-terminating `;` (ASI-lite: this
    /// dialect does not implement full automatic semicolon insertion, but
    /// tolerates a trailing `}` or EOF without a semicolon).
    fn eat_semi_opt(&mut self) {
        if self.check(&TokenKind::Semi) {
            self.advance();
        }
    }

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut body = Vec::new();
        while !self.check(&TokenKind::Eof) {
            body.push(self.parse_stmt()?);
        }
        Ok(Program { body })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        match self.peek_kind().clone() {
            TokenKind::Let | TokenKind::Const | TokenKind::Var => {
                let stmt = self.parse_var_decl()?;
                self.eat_semi_opt();
                Ok(stmt)
            }
            TokenKind::Return => {
                self.advance();
                let argument = if self.check(&TokenKind::Semi) || self.check(&TokenKind::RBrace) || self.check(&TokenKind::Eof) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.eat_semi_opt();
                Ok(Stmt::Return { argument, span })
            }
            TokenKind::Throw => {
                self.advance();
                let argument = self.parse_expr()?;
                self.eat_semi_opt();
                Ok(Stmt::Throw { argument, span })
            }
            TokenKind::LBrace => self.parse_block(),
            TokenKind::If => self.parse_if(),
            TokenKind::For => self.parse_for(),
            TokenKind::While => self.parse_while(),
            TokenKind::Do => self.parse_do_while(),
            TokenKind::Async | TokenKind::Function => self.parse_function_decl(),
            TokenKind::Try => self.parse_try_catch(),
            TokenKind::Break => {
                self.advance();
                self.eat_semi_opt();
                Ok(Stmt::Break { span })
            }
            TokenKind::Continue => {
                self.advance();
                self.eat_semi_opt();
                Ok(Stmt::Continue { span })
            }
            TokenKind::Semi => {
                self.advance();
                Ok(Stmt::Empty { span })
            }
            _ => {
                let expr = self.parse_expr()?;
                self.eat_semi_opt();
                Ok(Stmt::ExprStmt { expr, span })
            }
        }
    }

    fn parse_var_decl(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        let kind = match self.advance().kind {
            TokenKind::Let => DeclKind::Let,
            TokenKind::Const => DeclKind::Const,
            TokenKind::Var => DeclKind::Var,
            _ => unreachable!("caller already matched a decl keyword"),
        };
        let name = self.parse_ident_name()?;
        let init = if self.check(&TokenKind::Eq) {
            self.advance();
            Some(self.parse_assignment()?)
        } else {
            None
        };
        Ok(Stmt::VarDecl { kind, name, init, span })
    }

    fn parse_ident_name(&mut self) -> Result<String, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            other => {
                let span = self.span();
                Err(ParseError::Unexpected { found: other, expected: "identifier", line: span.line, col: span.col })
            }
        }
    }

    fn parse_block(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.eat(&TokenKind::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            body.push(self.parse_stmt()?);
        }
        self.eat(&TokenKind::RBrace, "'}'")?;
        Ok(Stmt::Block { body, span })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.advance();
        self.eat(&TokenKind::LParen, "'('")?;
        let test = self.parse_expr()?;
        self.eat(&TokenKind::RParen, "')'")?;
        let consequent = Box::new(self.parse_stmt()?);
        let alternate = if self.check(&TokenKind::Else) {
            self.advance();
            Some(Box::new(self.parse_stmt()?))
        } else {
            None
        };
        Ok(Stmt::If { test, consequent, alternate, span })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.advance();
        self.eat(&TokenKind::LParen, "'('")?;

        if matches!(self.peek_kind(), TokenKind::Let | TokenKind::Const | TokenKind::Var) {
            let decl_kind = match self.advance().kind {
                TokenKind::Let => DeclKind::Let,
                TokenKind::Const => DeclKind::Const,
                TokenKind::Var => DeclKind::Var,
                _ => unreachable!(),
            };
            let binding = self.parse_ident_name()?;
            if self.check(&TokenKind::Of) {
                self.advance();
                let iterable = self.parse_expr()?;
                self.eat(&TokenKind::RParen, "')'")?;
                let body = Box::new(self.parse_stmt()?);
                return Ok(Stmt::ForOf { decl_kind, binding, iterable, body, span });
            }
            if self.check(&TokenKind::In) {
                self.advance();
                let object = self.parse_expr()?;
                self.eat(&TokenKind::RParen, "')'")?;
                let body = Box::new(self.parse_stmt()?);
                return Ok(Stmt::ForIn { decl_kind, binding, object, body, span });
            }
            let init_span = span;
            let init = if self.check(&TokenKind::Eq) {
                self.advance();
                Some(self.parse_assignment()?)
            } else {
                None
            };
            let init_stmt = Some(Box::new(Stmt::VarDecl { kind: decl_kind, name: binding, init, span: init_span }));
            self.eat(&TokenKind::Semi, "';'")?;
            let test = if self.check(&TokenKind::Semi) { None } else { Some(self.parse_expr()?) };
            self.eat(&TokenKind::Semi, "';'")?;
            let update = if self.check(&TokenKind::RParen) { None } else { Some(self.parse_expr()?) };
            self.eat(&TokenKind::RParen, "')'")?;
            let body = Box::new(self.parse_stmt()?);
            return Ok(Stmt::For { init: init_stmt, test, update, body, span });
        }

        let init = if self.check(&TokenKind::Semi) {
            None
        } else {
            let expr_span = self.span();
            let expr = self.parse_expr()?;
            Some(Box::new(Stmt::ExprStmt { expr, span: expr_span }))
        };
        self.eat(&TokenKind::Semi, "';'")?;
        let test = if self.check(&TokenKind::Semi) { None } else { Some(self.parse_expr()?) };
        self.eat(&TokenKind::Semi, "';'")?;
        let update = if self.check(&TokenKind::RParen) { None } else { Some(self.parse_expr()?) };
        self.eat(&TokenKind::RParen, "')'")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::For { init, test, update, body, span })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.advance();
        self.eat(&TokenKind::LParen, "'('")?;
        let test = self.parse_expr()?;
        self.eat(&TokenKind::RParen, "')'")?;
        let body = Box::new(self.parse_stmt()?);
        Ok(Stmt::While { test, body, span })
    }

    fn parse_do_while(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.advance();
        let body = Box::new(self.parse_stmt()?);
        self.eat(&TokenKind::While, "'while'")?;
        self.eat(&TokenKind::LParen, "'('")?;
        let test = self.parse_expr()?;
        self.eat(&TokenKind::RParen, "')'")?;
        self.eat_semi_opt();
        Ok(Stmt::DoWhile { body, test, span })
    }

    fn parse_function_decl(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        let is_async = if self.check(&TokenKind::Async) {
            self.advance();
            true
        } else {
            false
        };
        self.eat(&TokenKind::Function, "'function'")?;
        let name = self.parse_ident_name()?;
        let params = self.parse_param_list()?;
        let Stmt::Block { body, .. } = self.parse_block()? else { unreachable!("parse_block always returns Block") };
        Ok(Stmt::FunctionDecl { name, params, body, is_async, span })
    }

    fn parse_param_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.eat(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            params.push(self.parse_ident_name()?);
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.eat(&TokenKind::RParen, "')'")?;
        Ok(params)
    }

    fn parse_try_catch(&mut self) -> Result<Stmt, ParseError> {
        let span = self.span();
        self.advance();
        let Stmt::Block { body: block, .. } = self.parse_block()? else { unreachable!() };
        self.eat(&TokenKind::Catch, "'catch'")?;
        let catch_param = if self.check(&TokenKind::LParen) {
            self.advance();
            let name = self.parse_ident_name()?;
            self.eat(&TokenKind::RParen, "')'")?;
            Some(name)
        } else {
            None
        };
        let Stmt::Block { body: handler, .. } = self.parse_block()? else { unreachable!() };
        let finalizer = if self.check(&TokenKind::Finally) {
            self.advance();
            let Stmt::Block { body, .. } = self.parse_block()? else { unreachable!() };
            Some(body)
        } else {
            None
        };
        Ok(Stmt::TryCatch { block, catch_param, handler, finalizer, span })
    }

    // ---- Expressions, lowest to highest precedence ----

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        // Arrow functions are tried first since they share a `(` prefix with
        // parenthesized expressions and must not be mistaken for one.
        if let Some(arrow) = self.try_parse_arrow()? {
            return Ok(arrow);
        }
        let left = self.parse_conditional()?;
        let op = match self.peek_kind() {
            TokenKind::Eq => AssignOp::Assign,
            TokenKind::PlusEq => AssignOp::AddAssign,
            TokenKind::MinusEq => AssignOp::SubAssign,
            TokenKind::StarEq => AssignOp::MulAssign,
            TokenKind::SlashEq => AssignOp::DivAssign,
            _ => return Ok(left),
        };
        let span = self.span();
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assignment { op, target: Box::new(left), value: Box::new(value), span })
    }

    /// Attempts to parse `ident => expr|block` or `(params) => expr|block`,
    /// backtracking to `None` if the lookahead does not confirm an arrow.
    fn try_parse_arrow(&mut self) -> Result<Option<Expr>, ParseError> {
        let checkpoint = self.pos;
        let span = self.span();

        if let TokenKind::Ident(name) = self.peek_kind().clone() {
            if self.tokens.get(self.pos + 1).map(|t| &t.kind) == Some(&TokenKind::Arrow) {
                self.advance();
                self.advance();
                let body = self.parse_arrow_body()?;
                return Ok(Some(Expr::Function { params: vec![name], body, is_async: false, is_arrow: true, span }));
            }
            return Ok(None);
        }

        if self.check(&TokenKind::LParen) {
            match self.parse_param_list() {
                Ok(params) if self.check(&TokenKind::Arrow) => {
                    self.advance();
                    let body = self.parse_arrow_body()?;
                    return Ok(Some(Expr::Function { params, body, is_async: false, is_arrow: true, span }));
                }
                _ => {
                    self.pos = checkpoint;
                    return Ok(None);
                }
            }
        }

        if self.check(&TokenKind::Async) {
            let after_async = self.pos + 1;
            if matches!(self.tokens.get(after_async).map(|t| &t.kind), Some(TokenKind::LParen) | Some(TokenKind::Ident(_))) {
                self.advance(); // `async`
                let params = if let TokenKind::Ident(name) = self.peek_kind().clone() {
                    self.advance();
                    vec![name]
                } else {
                    match self.parse_param_list() {
                        Ok(params) => params,
                        Err(_) => {
                            self.pos = checkpoint;
                            return Ok(None);
                        }
                    }
                };
                if self.check(&TokenKind::Arrow) {
                    self.advance();
                    let body = self.parse_arrow_body()?;
                    return Ok(Some(Expr::Function { params, body, is_async: true, is_arrow: true, span }));
                }
                self.pos = checkpoint;
                return Ok(None);
            }
        }

        Ok(None)
    }

    /// Arrow bodies are either a block (`=> { ... }`) or a bare expression
    /// implicitly returned (`=> expr`), normalized here into an explicit
    /// `return` so the rest of the pipeline only ever deals with block
    /// bodies.
    fn parse_arrow_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        if self.check(&TokenKind::LBrace) {
            let Stmt::Block { body, .. } = self.parse_block()? else { unreachable!() };
            Ok(body)
        } else {
            let span = self.span();
            let expr = self.parse_assignment()?;
            Ok(vec![Stmt::Return { argument: Some(expr), span }])
        }
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let test = self.parse_nullish()?;
        if self.check(&TokenKind::Question) {
            let span = self.span();
            self.advance();
            let consequent = self.parse_assignment()?;
            self.eat(&TokenKind::Colon, "':'")?;
            let alternate = self.parse_assignment()?;
            return Ok(Expr::Conditional { test: Box::new(test), consequent: Box::new(consequent), alternate: Box::new(alternate), span });
        }
        Ok(test)
    }

    fn parse_nullish(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_or()?;
        while self.check(&TokenKind::QuestionQuestion) {
            let span = self.span();
            self.advance();
            let right = self.parse_or()?;
            left = Expr::Logical { op: LogicalOp::NullishCoalesce, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.check(&TokenKind::PipePipe) {
            let span = self.span();
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Logical { op: LogicalOp::Or, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitor()?;
        while self.check(&TokenKind::AmpAmp) {
            let span = self.span();
            self.advance();
            let right = self.parse_bitor()?;
            left = Expr::Logical { op: LogicalOp::And, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitxor()?;
        while self.check(&TokenKind::Pipe) {
            let span = self.span();
            self.advance();
            let right = self.parse_bitxor()?;
            left = Expr::Binary { op: BinaryOp::BitOr, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_bitand()?;
        while self.check(&TokenKind::Caret) {
            let span = self.span();
            self.advance();
            let right = self.parse_bitand()?;
            left = Expr::Binary { op: BinaryOp::BitXor, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_bitand(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_equality()?;
        while self.check(&TokenKind::Amp) {
            let span = self.span();
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::Binary { op: BinaryOp::BitAnd, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::EqEqEq => BinaryOp::StrictEq,
                TokenKind::NotEq => BinaryOp::NotEq,
                TokenKind::NotEqEq => BinaryOp::StrictNotEq,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_relational()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_exponent()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            let span = self.span();
            self.advance();
            let right = self.parse_exponent()?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right), span };
        }
        Ok(left)
    }

    fn parse_exponent(&mut self) -> Result<Expr, ParseError> {
        let left = self.parse_unary()?;
        if self.check(&TokenKind::StarStar) {
            let span = self.span();
            self.advance();
            // right-associative
            let right = self.parse_exponent()?;
            return Ok(Expr::Binary { op: BinaryOp::Pow, left: Box::new(left), right: Box::new(right), span });
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Typeof => Some(UnaryOp::Typeof),
            TokenKind::Void => Some(UnaryOp::Void),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let argument = self.parse_unary()?;
            return Ok(Expr::Unary { op, argument: Box::new(argument), span });
        }
        if self.check(&TokenKind::Await) {
            self.advance();
            let argument = self.parse_unary()?;
            return Ok(Expr::Await { argument: Box::new(argument), span });
        }
        self.parse_call_or_member()
    }

    fn parse_call_or_member(&mut self) -> Result<Expr, ParseError> {
        let is_new = self.check(&TokenKind::New);
        if is_new {
            let span = self.span();
            self.advance();
            let callee = self.parse_call_or_member_no_call()?;
            let arguments = if self.check(&TokenKind::LParen) { self.parse_arguments()? } else { Vec::new() };
            let new_expr = Expr::New { callee: Box::new(callee), arguments, span };
            return self.parse_trailers(new_expr);
        }
        let primary = self.parse_primary()?;
        self.parse_trailers(primary)
    }

    /// Parses the callee position of `new X(...)` without consuming a call
    /// itself, so `new Foo()` binds `Foo` (not `Foo()`) as the constructor.
    fn parse_call_or_member_no_call(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    let span = self.span();
                    self.advance();
                    let name = self.parse_ident_name()?;
                    expr = Expr::Member { object: Box::new(expr), property: PropertyKey::Literal(name), span };
                }
                TokenKind::LBracket => {
                    let span = self.span();
                    self.advance();
                    let key = self.parse_expr()?;
                    self.eat(&TokenKind::RBracket, "']'")?;
                    expr = Expr::Member { object: Box::new(expr), property: PropertyKey::Computed(Box::new(key)), span };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_trailers(&mut self, mut expr: Expr) -> Result<Expr, ParseError> {
        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    let span = self.span();
                    self.advance();
                    let name = self.parse_ident_name()?;
                    expr = Expr::Member { object: Box::new(expr), property: PropertyKey::Literal(name), span };
                }
                TokenKind::LBracket => {
                    let span = self.span();
                    self.advance();
                    let key = self.parse_expr()?;
                    self.eat(&TokenKind::RBracket, "']'")?;
                    expr = Expr::Member { object: Box::new(expr), property: PropertyKey::Computed(Box::new(key)), span };
                }
                TokenKind::LParen => {
                    let span = self.span();
                    let arguments = self.parse_arguments()?;
                    expr = Expr::Call { callee: Box::new(expr), arguments, span };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.eat(&TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        while !self.check(&TokenKind::RParen) {
            args.push(self.parse_assignment()?);
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.eat(&TokenKind::RParen, "')'")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let span = self.span();
        match self.peek_kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Number(n), span })
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Str(s), span })
            }
            TokenKind::TemplateStr(chunks) => {
                self.advance();
                let mut parts = Vec::with_capacity(chunks.len());
                for chunk in chunks {
                    match chunk {
                        TemplateChunk::Str(s) => parts.push(TemplatePart::Str(s)),
                        TemplateChunk::ExprSource(src) => {
                            let program = parse_program(&src)?;
                            let expr = match program.body.into_iter().next() {
                                Some(Stmt::ExprStmt { expr, .. }) => expr,
                                _ => Expr::Literal { value: Literal::Undefined, span },
                            };
                            parts.push(TemplatePart::Expr(expr));
                        }
                    }
                }
                Ok(Expr::Template { parts, span })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Bool(true), span })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Bool(false), span })
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Null, span })
            }
            TokenKind::Undefined => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Undefined, span })
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Identifier { name, span })
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.eat(&TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => self.parse_array_literal(span),
            TokenKind::LBrace => self.parse_object_literal(span),
            TokenKind::Function => {
                self.advance();
                // Anonymous function expression; named ones are handled by
                // parse_function_decl at the statement level.
                let params = self.parse_param_list()?;
                let Stmt::Block { body, .. } = self.parse_block()? else { unreachable!() };
                Ok(Expr::Function { params, body, is_async: false, is_arrow: false, span })
            }
            TokenKind::Async if self.tokens.get(self.pos + 1).map(|t| &t.kind) == Some(&TokenKind::Function) => {
                self.advance();
                self.advance();
                let params = self.parse_param_list()?;
                let Stmt::Block { body, .. } = self.parse_block()? else { unreachable!() };
                Ok(Expr::Function { params, body, is_async: true, is_arrow: false, span })
            }
            other => Err(ParseError::Unexpected { found: other, expected: "expression", line: span.line, col: span.col }),
        }
    }

    fn parse_array_literal(&mut self, span: Span) -> Result<Expr, ParseError> {
        self.eat(&TokenKind::LBracket, "'['")?;
        let mut elements = Vec::new();
        while !self.check(&TokenKind::RBracket) {
            elements.push(self.parse_assignment()?);
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.eat(&TokenKind::RBracket, "']'")?;
        Ok(Expr::Array { elements, span })
    }

    fn parse_object_literal(&mut self, span: Span) -> Result<Expr, ParseError> {
        self.eat(&TokenKind::LBrace, "'{'")?;
        let mut properties = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            let key = self.parse_property_key()?;
            let value = if self.check(&TokenKind::Colon) {
                self.advance();
                self.parse_assignment()?
            } else if let PropertyKey::Literal(name) = &key {
                // shorthand `{ name }`
                Expr::Identifier { name: name.clone(), span: self.span() }
            } else {
                return Err(ParseError::UnexpectedEof("':' after computed property key"));
            };
            properties.push((key, value));
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.eat(&TokenKind::RBrace, "'}'")?;
        Ok(Expr::Object { properties, span })
    }

    fn parse_property_key(&mut self) -> Result<PropertyKey, ParseError> {
        match self.peek_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(PropertyKey::Literal(name))
            }
            TokenKind::Str(s) => {
                self.advance();
                Ok(PropertyKey::Literal(s))
            }
            TokenKind::Number(n) => {
                self.advance();
                Ok(PropertyKey::Literal(format_number_key(n)))
            }
            TokenKind::LBracket => {
                self.advance();
                let key = self.parse_assignment()?;
                self.eat(&TokenKind::RBracket, "']'")?;
                Ok(PropertyKey::Computed(Box::new(key)))
            }
            other => {
                let span = self.span();
                Err(ParseError::Unexpected { found: other, expected: "property key", line: span.line, col: span.col })
            }
        }
    }
}

fn format_number_key(n: f64) -> String {
    if n.fract() == 0.0 { format!("{}", n as i64) } else { n.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ast::{DeclKind, Stmt};

    #[test]
    fn parses_arithmetic_return() {
        let program = parse_program("return 2 + 3;").unwrap();
        assert_eq!(program.body.len(), 1);
        assert!(matches!(program.body[0], Stmt::Return { .. }));
    }

    #[test]
    fn parses_var_decl_and_while_loop() {
        let program = parse_program("let i = 0; while (i < 10) { i = i + 1; }").unwrap();
        assert_eq!(program.body.len(), 2);
        assert!(matches!(program.body[0], Stmt::VarDecl { kind: DeclKind::Let, .. }));
        assert!(matches!(program.body[1], Stmt::While { .. }));
    }

    #[test]
    fn parses_call_tool_await() {
        let program = parse_program(r#"const r = await callTool("add", {a: 1, b: 2}); return r;"#).unwrap();
        assert_eq!(program.body.len(), 2);
        let Stmt::VarDecl { init: Some(Expr::Await { argument, .. }), .. } = &program.body[0] else {
            panic!("expected `const r = await ...`")
        };
        assert!(matches!(argument.as_ref(), Expr::Call { .. }));
    }

    #[test]
    fn parses_for_of_loop() {
        let program = parse_program("for (const x of items) { callTool(\"x\", {}); }").unwrap();
        assert!(matches!(program.body[0], Stmt::ForOf { .. }));
    }

    #[test]
    fn parses_arrow_function_expression_body() {
        let program = parse_program("const f = (a, b) => a + b;").unwrap();
        let Stmt::VarDecl { init: Some(Expr::Function { params, is_arrow, .. }), .. } = &program.body[0] else {
            panic!("expected arrow function")
        };
        assert!(is_arrow);
        assert_eq!(params, &vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn parses_single_param_arrow_without_parens() {
        let program = parse_program("const double = x => x * 2;").unwrap();
        let Stmt::VarDecl { init: Some(Expr::Function { params, .. }), .. } = &program.body[0] else { panic!("expected arrow") };
        assert_eq!(params, &vec!["x".to_string()]);
    }

    #[test]
    fn distinguishes_parenthesized_expression_from_arrow() {
        let program = parse_program("return (1 + 2) * 3;").unwrap();
        assert!(matches!(&program.body[0], Stmt::Return { argument: Some(Expr::Binary { .. }), .. }));
    }

    #[test]
    fn parses_template_literal_with_interpolated_identifier() {
        let program = parse_program("const msg = `hi ${name}`;").unwrap();
        let Stmt::VarDecl { init: Some(Expr::Template { parts, .. }), .. } = &program.body[0] else { panic!("expected template") };
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn rejects_truncated_input() {
        assert!(parse_program("return 1 +").is_err());
    }

    #[test]
    fn parses_try_catch_finally() {
        let program = parse_program("try { return 1; } catch (e) { throw e; } finally { callTool(\"x\", {}); }").unwrap();
        assert!(matches!(program.body[0], Stmt::TryCatch { .. }));
    }

    #[test]
    fn parses_member_and_computed_member_access() {
        let program = parse_program(r#"return obj.foo["bar"];"#).unwrap();
        let Stmt::Return { argument: Some(Expr::Member { property, .. }), .. } = &program.body[0] else { panic!("expected member") };
        assert!(matches!(property, PropertyKey::Computed(_)));
    }
}
