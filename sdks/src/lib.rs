// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! `enclavejs-sdk`: a Rust client library for the enclavejs broker (§6).
//!
//! - [`client`] — `EnclaveClient`: submits `POST /sessions` and streams the
//!   resulting `StreamEvent`s, performing the client side of the ECDH
//!   handshake (§4.7) and decrypting the response when the broker
//!   negotiated encryption.
//! - [`stream`] — [`stream::SessionStream`], the NDJSON/decrypt/gap-tracking
//!   pipeline a session's HTTP response body is fed through.
//! - [`reconnect`] — [`reconnect::ReconnectingClient`], which drives
//!   `enclavejs_runtime`'s backoff helper across session attempts for
//!   callers that want automatic retry on a dropped connection (§4.9).

pub mod client;
pub mod reconnect;
pub mod stream;

pub use client::{ClientError, CreateSessionOptions, EnclaveClient};
pub use stream::SessionStream;
