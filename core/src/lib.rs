// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! # enclavejs-core
//!
//! Domain model and protocol primitives for enclavejs, a secure JavaScript
//! execution platform. This crate owns everything that can be described
//! without an async runtime: the restricted-dialect AST and parser, the
//! static Guard, the loop/tool-call Transformer, the session and stream-event
//! data model, the NDJSON wire codec, the reconnection state machine, and the
//! ECDH/HKDF/AES-GCM crypto primitives.
//!
//! ## Layer structure
//!
//! ```text
//! domain/         <- aggregates, value objects, the restricted-dialect AST,
//!                     Guard and Transformer algorithms, error codes
//! infrastructure/ <- mechanical adapters: lexer/parser, NDJSON codec, crypto
//! ```
//!
//! `enclavejs-runtime` builds the async sandbox execution and session
//! orchestration layer on top of the types defined here; `enclavejs-cli` and
//! `enclavejs-sdk` are the broker binary and client library, respectively.

pub mod domain;
pub mod infrastructure;

pub use domain::*;
