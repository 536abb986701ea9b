// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Machine-readable error codes (§7) shared by every layer: the Guard's
//! rejection list, the sandbox's `final.error`, and protocol-level failures
//! all carry one of these codes, instead of the source's dynamic class
//! hierarchy (§9).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable, wire-visible error code. Every fallible operation in this crate
/// (and in `enclavejs-runtime`) exposes one of these through a `code()`
/// accessor on its `thiserror` enum, so logs, HTTP error bodies, and
/// `StreamEvent::Error`/`Final` payloads are built from a single source of
/// truth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation (Guard)
    AstForbiddenIdentifier,
    AstForbiddenMember,
    AstDynamicCode,
    AstLoopNotAllowed,
    AstPrescanRejected,
    AstParseError,

    // Runtime (Sandbox / Tool Bridge)
    ExecutionError,
    Timeout,
    IterationLimit,
    ToolCallLimit,
    ConsoleLimit,
    Cancelled,

    // Protocol
    UnknownSession,
    UnknownCall,
    ProtocolVersionMismatch,
    SchemaInvalid,
    ReplayUnavailable,

    // Crypto
    HandshakeFailed,
    KeyDerivationFailed,
    DecryptionFailed,
    NonceReuse,
    KeyExpired,
    UnsupportedAlgorithm,
    InvalidPublicKey,
    SignatureVerificationFailed,
}

impl ErrorCode {
    /// The `SCREAMING_SNAKE_CASE` wire representation, e.g. `ITERATION_LIMIT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AstForbiddenIdentifier => "AST_FORBIDDEN_IDENTIFIER",
            Self::AstForbiddenMember => "AST_FORBIDDEN_MEMBER",
            Self::AstDynamicCode => "AST_DYNAMIC_CODE",
            Self::AstLoopNotAllowed => "AST_LOOP_NOT_ALLOWED",
            Self::AstPrescanRejected => "AST_PRESCAN_REJECTED",
            Self::AstParseError => "AST_PARSE_ERROR",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::IterationLimit => "ITERATION_LIMIT",
            Self::ToolCallLimit => "TOOL_CALL_LIMIT",
            Self::ConsoleLimit => "CONSOLE_LIMIT",
            Self::Cancelled => "CANCELLED",
            Self::UnknownSession => "UNKNOWN_SESSION",
            Self::UnknownCall => "UNKNOWN_CALL",
            Self::ProtocolVersionMismatch => "PROTOCOL_VERSION_MISMATCH",
            Self::SchemaInvalid => "SCHEMA_INVALID",
            Self::ReplayUnavailable => "REPLAY_UNAVAILABLE",
            Self::HandshakeFailed => "ENCRYPTION_HANDSHAKE_FAILED",
            Self::KeyDerivationFailed => "ENCRYPTION_KEY_DERIVATION_FAILED",
            Self::DecryptionFailed => "ENCRYPTION_DECRYPTION_FAILED",
            Self::NonceReuse => "ENCRYPTION_NONCE_REUSE",
            Self::KeyExpired => "ENCRYPTION_KEY_EXPIRED",
            Self::UnsupportedAlgorithm => "ENCRYPTION_UNSUPPORTED_ALGORITHM",
            Self::InvalidPublicKey => "ENCRYPTION_INVALID_PUBLIC_KEY",
            Self::SignatureVerificationFailed => "ENCRYPTION_SIGNATURE_VERIFICATION_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The shape every error takes once it crosses a boundary (HTTP 4xx body,
/// `StreamEvent::Error`, `Final.error`): a stable code, a human message, and
/// an optional source line/column for diagnostics produced during parsing or
/// guarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub col: Option<u32>,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            line: None,
            col: None,
        }
    }

    pub fn at(mut self, line: u32, col: u32) -> Self {
        self.line = Some(line);
        self.col = Some(col);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serializes_to_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::IterationLimit).unwrap();
        assert_eq!(json, "\"ITERATION_LIMIT\"");
        assert_eq!(ErrorCode::IterationLimit.as_str(), "ITERATION_LIMIT");
    }
}
