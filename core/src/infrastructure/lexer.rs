// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Tokenizer for the restricted-dialect grammar `infrastructure::parser`
//! consumes. Kept deliberately small: this is not a general ECMAScript
//! lexer, only what the [`domain::ast`](crate::domain::ast) grammar needs.

use crate::domain::ast::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),
    /// A template literal, already split into its literal/interpolated parts
    /// by the lexer (interpolated source is re-lexed and parsed by the
    /// parser, not here).
    TemplateStr(Vec<TemplateChunk>),

    // Keywords
    Let,
    Const,
    Var,
    Function,
    Return,
    Throw,
    If,
    Else,
    For,
    While,
    Do,
    In,
    Of,
    Try,
    Catch,
    Finally,
    Break,
    Continue,
    True,
    False,
    Null,
    Undefined,
    New,
    Typeof,
    Void,
    Async,
    Await,

    // Punctuation
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    Arrow, // =>
    Question,
    QuestionQuestion,

    // Operators
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    Bang,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    AmpAmp,
    PipePipe,
    Amp,
    Pipe,
    Caret,
    Eq,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,

    Eof,
}

/// Either a raw literal slice of a template literal, or the raw source text
/// of an interpolated `${...}` expression (re-lexed on demand by the
/// parser).
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk {
    Str(String),
    ExprSource(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum LexError {
    #[error("unexpected character '{0}' at line {1}, col {2}")]
    UnexpectedChar(char, u32, u32),
    #[error("unterminated string literal starting at line {0}, col {1}")]
    UnterminatedString(u32, u32),
    #[error("unterminated template literal starting at line {0}, col {1}")]
    UnterminatedTemplate(u32, u32),
    #[error("invalid numeric literal '{0}' at line {1}, col {2}")]
    InvalidNumber(String, u32, u32),
}

pub struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
    _source: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { chars: source.chars().collect(), pos: 0, line: 1, col: 1, _source: source }
    }

    pub fn tokenize(source: &'a str) -> Result<Vec<Token>, LexError> {
        let mut lexer = Self::new(source);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.advance();
                    self.advance();
                    while let Some(c) = self.peek() {
                        if c == '*' && self.peek_at(1) == Some('/') {
                            self.advance();
                            self.advance();
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia();
        let span = self.span();
        let Some(c) = self.peek() else {
            return Ok(Token { kind: TokenKind::Eof, span });
        };

        if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())) {
            return self.lex_number(span);
        }
        if c == '"' || c == '\'' {
            return self.lex_string(c, span);
        }
        if c == '`' {
            return self.lex_template(span);
        }
        if c.is_alphabetic() || c == '_' || c == '$' {
            return Ok(self.lex_ident_or_keyword(span));
        }

        self.advance();
        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semi,
            ':' => TokenKind::Colon,
            '.' => TokenKind::Dot,
            '~' => TokenKind::Bang, // unused in practice; grammar has no bitwise-not
            '?' => {
                if self.peek() == Some('?') {
                    self.advance();
                    TokenKind::QuestionQuestion
                } else {
                    TokenKind::Question
                }
            }
            '+' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::PlusEq
                } else {
                    TokenKind::Plus
                }
            }
            '-' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::MinusEq
                } else {
                    TokenKind::Minus
                }
            }
            '*' => {
                if self.peek() == Some('*') {
                    self.advance();
                    TokenKind::StarStar
                } else if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::StarEq
                } else {
                    TokenKind::Star
                }
            }
            '/' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::SlashEq
                } else {
                    TokenKind::Slash
                }
            }
            '%' => TokenKind::Percent,
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    if self.peek() == Some('=') {
                        self.advance();
                        TokenKind::NotEqEq
                    } else {
                        TokenKind::NotEq
                    }
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    if self.peek() == Some('=') {
                        self.advance();
                        TokenKind::EqEqEq
                    } else {
                        TokenKind::EqEq
                    }
                } else if self.peek() == Some('>') {
                    self.advance();
                    TokenKind::Arrow
                } else {
                    TokenKind::Eq
                }
            }
            '&' => {
                if self.peek() == Some('&') {
                    self.advance();
                    TokenKind::AmpAmp
                } else {
                    TokenKind::Amp
                }
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.advance();
                    TokenKind::PipePipe
                } else {
                    TokenKind::Pipe
                }
            }
            '^' => TokenKind::Caret,
            other => return Err(LexError::UnexpectedChar(other, span.line, span.col)),
        };
        Ok(Token { kind, span })
    }

    fn lex_number(&mut self, span: Span) -> Result<Token, LexError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.advance();
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let value = text.parse::<f64>().map_err(|_| LexError::InvalidNumber(text.clone(), span.line, span.col))?;
        Ok(Token { kind: TokenKind::Number(value), span })
    }

    fn lex_string(&mut self, quote: char, span: Span) -> Result<Token, LexError> {
        self.advance(); // opening quote
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(LexError::UnterminatedString(span.line, span.col)),
                Some(c) if c == quote => break,
                Some('\\') => {
                    let escaped = self.advance().ok_or(LexError::UnterminatedString(span.line, span.col))?;
                    out.push(unescape(escaped));
                }
                Some(c) => out.push(c),
            }
        }
        Ok(Token { kind: TokenKind::Str(out), span })
    }

    fn lex_template(&mut self, span: Span) -> Result<Token, LexError> {
        self.advance(); // opening backtick
        let mut chunks = Vec::new();
        let mut current = String::new();
        loop {
            match self.peek() {
                None => return Err(LexError::UnterminatedTemplate(span.line, span.col)),
                Some('`') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let escaped = self.advance().ok_or(LexError::UnterminatedTemplate(span.line, span.col))?;
                    current.push(unescape(escaped));
                }
                Some('$') if self.peek_at(1) == Some('{') => {
                    chunks.push(TemplateChunk::Str(std::mem::take(&mut current)));
                    self.advance();
                    self.advance();
                    let mut depth = 1;
                    let mut expr_src = String::new();
                    loop {
                        match self.peek() {
                            None => return Err(LexError::UnterminatedTemplate(span.line, span.col)),
                            Some('{') => {
                                depth += 1;
                                expr_src.push(self.advance().unwrap());
                            }
                            Some('}') => {
                                depth -= 1;
                                if depth == 0 {
                                    self.advance();
                                    break;
                                }
                                expr_src.push(self.advance().unwrap());
                            }
                            Some(c) => {
                                expr_src.push(c);
                                self.advance();
                            }
                        }
                    }
                    chunks.push(TemplateChunk::ExprSource(expr_src));
                }
                Some(c) => {
                    current.push(c);
                    self.advance();
                }
            }
        }
        chunks.push(TemplateChunk::Str(current));
        Ok(Token { kind: TokenKind::TemplateStr(chunks), span })
    }

    fn lex_ident_or_keyword(&mut self, span: Span) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$') {
            self.advance();
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let kind = match text.as_str() {
            "let" => TokenKind::Let,
            "const" => TokenKind::Const,
            "var" => TokenKind::Var,
            "function" => TokenKind::Function,
            "return" => TokenKind::Return,
            "throw" => TokenKind::Throw,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "while" => TokenKind::While,
            "do" => TokenKind::Do,
            "in" => TokenKind::In,
            "of" => TokenKind::Of,
            "try" => TokenKind::Try,
            "catch" => TokenKind::Catch,
            "finally" => TokenKind::Finally,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "undefined" => TokenKind::Undefined,
            "new" => TokenKind::New,
            "typeof" => TokenKind::Typeof,
            "void" => TokenKind::Void,
            "async" => TokenKind::Async,
            "await" => TokenKind::Await,
            _ => TokenKind::Ident(text),
        };
        Token { kind, span }
    }
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_arithmetic() {
        assert_eq!(
            kinds("2 + 3"),
            vec![TokenKind::Number(2.0), TokenKind::Plus, TokenKind::Number(3.0), TokenKind::Eof]
        );
    }

    #[test]
    fn tokenizes_string_with_escapes() {
        assert_eq!(kinds(r#""a\nb""#), vec![TokenKind::Str("a\nb".to_string()), TokenKind::Eof]);
    }

    #[test]
    fn tokenizes_keywords_and_identifiers() {
        assert_eq!(
            kinds("let total = callTool"),
            vec![TokenKind::Let, TokenKind::Ident("total".into()), TokenKind::Eq, TokenKind::Ident("callTool".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn tokenizes_template_literal_with_interpolation() {
        let toks = kinds("`hi ${name}!`");
        match &toks[0] {
            TokenKind::TemplateStr(chunks) => {
                assert_eq!(
                    chunks,
                    &vec![
                        TemplateChunk::Str("hi ".to_string()),
                        TemplateChunk::ExprSource("name".to_string()),
                        TemplateChunk::Str("!".to_string()),
                    ]
                );
            }
            other => panic!("expected template string, got {other:?}"),
        }
    }

    #[test]
    fn distinguishes_strict_equality_operators() {
        assert_eq!(kinds("a === b"), vec![TokenKind::Ident("a".into()), TokenKind::EqEqEq, TokenKind::Ident("b".into()), TokenKind::Eof]);
        assert_eq!(kinds("a !== b"), vec![TokenKind::Ident("a".into()), TokenKind::NotEqEq, TokenKind::Ident("b".into()), TokenKind::Eof]);
    }

    #[test]
    fn rejects_unexpected_character() {
        assert!(matches!(Lexer::tokenize("@"), Err(LexError::UnexpectedChar('@', _, _))));
    }
}
