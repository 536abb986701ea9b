// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The broker's HTTP surface (§4.11): `POST /sessions` runs the Guard
//! synchronously and, on success, streams the session's NDJSON body;
//! `POST /sessions/{id}/cancel` flips the orchestrator's abort flag;
//! `GET /healthz` is a liveness probe.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use enclavejs_core::domain::errors::{ErrorCode, ErrorPayload};
use enclavejs_core::domain::events::{ClientHello, EncryptionInfo, ServerHello, StreamEvent, StreamEventPayload};
use enclavejs_core::domain::guard::{validate, GuardPreset, GuardReport};
use enclavejs_core::domain::ids::SessionId;
use enclavejs_core::domain::session::SessionLimits;
use enclavejs_core::domain::transformer::{transform, TransformLimits};
use enclavejs_core::infrastructure::crypto::{derive_session_keys, negotiate_algorithm, EphemeralKeypair, KDF_NAME};
use enclavejs_core::infrastructure::ndjson::encode_line;
use enclavejs_core::infrastructure::parser::parse_program;
use enclavejs_runtime::application::orchestrator::Orchestrator;
use enclavejs_runtime::infrastructure::reconnection::{spawn_replay_recorder, ReplayBuffer};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::server::state::{AppState, LiveSession};
use crate::server::tools::spawn_tool_dispatcher;
use crate::server::wire::encode_event_line;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sessions", post(create_session))
        .route("/sessions/{id}/cancel", post(cancel_session))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    code: String,
    #[serde(default)]
    limits: Option<SessionLimits>,
    /// Overrides `BrokerConfig.spec.defaultPreset` for this session only.
    #[serde(default)]
    preset: Option<String>,
    #[serde(default)]
    client_hello: Option<ClientHello>,
}

#[derive(Debug, Serialize)]
struct RejectionBody {
    guard: GuardReport,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorPayload,
}

fn error_response(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: ErrorPayload::new(code, message) })).into_response()
}

fn resolve_preset(requested: &Option<String>, state: &AppState) -> Result<GuardPreset, Response> {
    match requested {
        Some(raw) => GuardPreset::parse(raw).ok_or_else(|| error_response(StatusCode::BAD_REQUEST, ErrorCode::SchemaInvalid, format!("unknown guard preset '{raw}'"))),
        None => Ok(state.config.default_preset()),
    }
}

/// Performs the server side of the ECDH handshake against an optional
/// `ClientHello`, returning the `s2c` key to encrypt this session's events
/// with (if any) plus the `session_init` payload to emit first (§4.7).
fn negotiate_encryption(hello: Option<&ClientHello>, session_id: SessionId, limits: &SessionLimits) -> Result<(Option<enclavejs_core::infrastructure::crypto::SessionKey>, StreamEventPayload), ErrorPayload> {
    let cancel_url = format!("/sessions/{session_id}/cancel");
    let expires_at = chrono::Utc::now() + chrono::Duration::milliseconds(limits.session_ttl_ms as i64);

    let Some(hello) = hello else {
        return Ok((
            None,
            StreamEventPayload::SessionInit { cancel_url, expires_at, encryption: None, server_hello: None },
        ));
    };

    let algorithm = negotiate_algorithm(&hello.supported_algorithms).map_err(|e| ErrorPayload::new(e.code(), e.to_string()))?;
    let server_keys = EphemeralKeypair::generate();
    let shared = server_keys.shared_secret(&hello.pub_b64).map_err(|e| ErrorPayload::new(e.code(), e.to_string()))?;
    let key_id = format!("key_{}", uuid::Uuid::new_v4());
    let pair = derive_session_keys(&shared, &session_id.to_string(), &key_id).map_err(|e| ErrorPayload::new(e.code(), e.to_string()))?;

    let server_hello = ServerHello { pub_b64: server_keys.public_b64(), selected_algorithm: algorithm.to_string(), kdf: KDF_NAME.to_string(), key_id };
    let payload = StreamEventPayload::SessionInit {
        cancel_url,
        expires_at,
        encryption: Some(EncryptionInfo { algorithm: algorithm.to_string(), kdf: KDF_NAME.to_string() }),
        server_hello: Some(server_hello),
    };
    Ok((Some(pair.s2c), payload))
}

async fn create_session(State(state): State<Arc<AppState>>, Json(request): Json<CreateSessionRequest>) -> Response {
    if state.creation_limiter.check().is_err() {
        return error_response(StatusCode::TOO_MANY_REQUESTS, ErrorCode::SchemaInvalid, "session creation rate limit exceeded");
    }

    let limits = request.limits.unwrap_or(state.config.spec.default_limits);
    if request.code.len() > limits.max_program_bytes {
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::SchemaInvalid,
            format!("program of {} bytes exceeds maxProgramBytes {}", request.code.len(), limits.max_program_bytes),
        );
    }
    if state.config.spec.encryption.required && request.client_hello.is_none() {
        return error_response(StatusCode::BAD_REQUEST, ErrorCode::HandshakeFailed, "this broker requires an encrypted session (clientHello missing)");
    }

    let preset = match resolve_preset(&request.preset, &state) {
        Ok(preset) => preset,
        Err(response) => return response,
    };

    let report = validate(&request.code, preset);
    if !report.ok {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(RejectionBody { guard: report })).into_response();
    }

    // `validate` already parsed the source once to walk the AST; a
    // guard-validated source cannot fail this second parse.
    let parsed = parse_program(&request.code).expect("guard-validated source must parse");
    let program = transform(&parsed, TransformLimits { max_iterations: limits.max_iterations });

    let (orchestrator, mut events) = Orchestrator::new(limits, preset);
    let session_id = orchestrator.session_id();
    if state.sessions.insert(orchestrator.snapshot()).is_err() {
        return error_response(StatusCode::TOO_MANY_REQUESTS, ErrorCode::SchemaInvalid, "broker is at its concurrent session capacity");
    }

    let (mut s2c_key, session_init) = match negotiate_encryption(request.client_hello.as_ref(), session_id, &limits) {
        Ok(pair) => pair,
        Err(err) => {
            state.sessions.remove(&session_id);
            return error_response(StatusCode::BAD_REQUEST, err.code, err.message);
        }
    };

    let replay_buffer = Arc::new(ReplayBuffer::new(state.config.spec.replay_buffer_capacity));
    spawn_replay_recorder(replay_buffer.clone(), orchestrator.subscribe());
    spawn_tool_dispatcher(orchestrator.clone(), state.tools.clone());
    orchestrator.spawn_heartbeat(Duration::from_millis(state.config.spec.heartbeat_interval_ms));
    state.live.insert(session_id, LiveSession { orchestrator: orchestrator.clone(), replay_buffer });

    let (tx, rx) = mpsc::channel::<Result<axum::body::Bytes, std::io::Error>>(64);

    // `session_init` carries the handshake material itself, so it always
    // goes out in clear text — the client needs it before it can derive a
    // key to decrypt anything that follows. It still draws from the
    // orchestrator's own seq counter so it is seq=1, not a seq=0 exempted
    // from the sequence the rest of the stream uses (§8 scenario 4).
    let init_event = StreamEvent::new(session_id, orchestrator.reserve_seq(), session_init);
    let init_line = encode_line(&init_event).expect("serializing session_init never fails");
    let _ = tx.send(Ok(axum::body::Bytes::from(init_line))).await;

    let live_sessions = state.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let is_final = event.is_final();
                    let line = match encode_event_line(&event, s2c_key.as_mut()) {
                        Ok(line) => line,
                        Err(err) => {
                            tracing::error!(%err, "failed to encode outbound event");
                            continue;
                        }
                    };
                    if tx.send(Ok(axum::body::Bytes::from(line))).await.is_err() {
                        break;
                    }
                    if is_final {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
        live_sessions.live.remove(&session_id);
        live_sessions.sessions.remove(&session_id);
    });

    tokio::spawn(orchestrator.run(program));

    let stream = ReceiverStream::new(rx);
    let body = axum::body::Body::from_stream(stream);
    Response::builder().status(StatusCode::OK).header("content-type", "application/x-ndjson").body(body).expect("static headers always build a valid response")
}

async fn cancel_session(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    let session_id = match SessionId::parse(&id) {
        Ok(id) => id,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, ErrorCode::SchemaInvalid, format!("'{id}' is not a valid session id")),
    };
    match state.live.get(&session_id) {
        Some(live) => {
            live.orchestrator.cancel();
            StatusCode::ACCEPTED.into_response()
        }
        None => error_response(StatusCode::NOT_FOUND, ErrorCode::UnknownSession, format!("no live session for {session_id}")),
    }
}
