// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The NDJSON wire codec (§4.6): one `StreamEvent` per `\n`-terminated line.
//! A streaming [`NdjsonDecoder`] accumulates partial frames across reads so
//! it can sit directly on a socket/body stream; malformed lines are
//! reported per-line rather than killing the whole stream.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A single line that failed to parse as valid JSON (§4.6): `{line, error,
/// content≤100chars}`. Kept distinct from a hard decoder error because one
/// bad line must not terminate the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct LineError {
    pub line_number: u64,
    pub error: String,
    pub content: String,
}

const CONTENT_PREVIEW_LIMIT: usize = 100;

fn truncate_preview(s: &str) -> String {
    if s.chars().count() <= CONTENT_PREVIEW_LIMIT {
        s.to_string()
    } else {
        s.chars().take(CONTENT_PREVIEW_LIMIT).collect()
    }
}

/// Serializes `event` to a single NDJSON line (including the trailing
/// `\n`). `T` is almost always [`crate::domain::events::StreamEvent`], but
/// the codec is generic so `EncryptedEnvelope` frames use the same framing.
pub fn encode_line<T: Serialize>(event: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    Ok(line)
}

/// Parses one already-extracted line (no trailing newline). Empty lines
/// (after trimming a trailing `\r`) are not valid frames on their own —
/// callers should skip them before calling this, matching `decode_all`'s and
/// `NdjsonDecoder`'s behavior (§4.6: "Empty lines are ignored").
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(line)
}

/// One-shot decode of a complete buffer (e.g. a test fixture or a fully
/// buffered response body) into the events that parsed, plus the per-line
/// errors for the ones that didn't (§4.6).
pub fn decode_all<T: DeserializeOwned>(buffer: &str) -> (Vec<T>, Vec<LineError>) {
    let mut events = Vec::new();
    let mut errors = Vec::new();
    for (idx, raw_line) in buffer.split('\n').enumerate() {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        if line.is_empty() {
            continue;
        }
        match decode_line::<T>(line) {
            Ok(event) => events.push(event),
            Err(e) => errors.push(LineError { line_number: (idx + 1) as u64, error: e.to_string(), content: truncate_preview(line) }),
        }
    }
    (events, errors)
}

/// A streaming decoder that accumulates bytes into an internal buffer,
/// splits on `\n`, and yields parsed frames as full lines become available
/// (§4.6: "A streaming decoder accumulates a buffer, splits on `\n`, and
/// parses each line"). Suitable for a chunked HTTP body or WebSocket text
/// stream where frame boundaries don't line up with read boundaries.
#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buffer: String,
    line_number: u64,
}

/// The outcome of feeding one chunk to [`NdjsonDecoder::feed`]: zero or more
/// successfully decoded frames, interleaved in line order with any decode
/// failures on malformed lines.
#[derive(Debug)]
pub enum Frame<T> {
    Event(T),
    Error(LineError),
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk of raw bytes (already UTF-8 decoded) into the buffer
    /// and returns every complete line's decode outcome. Any trailing
    /// partial line (no `\n` yet) is retained for the next call.
    pub fn feed<T: DeserializeOwned>(&mut self, chunk: &str) -> Vec<Frame<T>> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline_pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            self.line_number += 1;
            if line.is_empty() {
                continue;
            }
            match decode_line::<T>(line) {
                Ok(event) => out.push(Frame::Event(event)),
                Err(e) => out.push(Frame::Error(LineError { line_number: self.line_number, error: e.to_string(), content: truncate_preview(line) })),
            }
        }
        out
    }

    /// True if a partial (unterminated) line remains buffered.
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }
}

/// Verifies an already-decoded `serde_json::Value` has the minimal shape a
/// `StreamEvent` must carry before attempting the full typed deserialize
/// (§4.6: "A schema validator verifies the event shape before dispatch").
/// Unknown `type` values are not rejected here — the typed deserialize
/// naturally fails on them, and the caller is expected to log-and-drop per
/// §4.6 rather than treat that as a fatal decode error.
pub fn looks_like_stream_event(value: &serde_json::Value) -> bool {
    value.is_object()
        && value.get("protocolVersion").is_some()
        && value.get("sessionId").is_some()
        && value.get("seq").is_some()
        && value.get("type").and_then(|t| t.as_str()).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{ExecutionStats, StreamEvent, StreamEventPayload};
    use crate::domain::ids::SessionId;

    fn sample_event(seq: u64) -> StreamEvent {
        StreamEvent::new(SessionId::new(), seq, StreamEventPayload::Heartbeat {})
    }

    #[test]
    fn encode_then_decode_round_trips_a_single_event() {
        let event = sample_event(1);
        let line = encode_line(&event).unwrap();
        assert!(line.ends_with('\n'));
        let decoded: StreamEvent = decode_line(line.trim_end()).unwrap();
        assert_eq!(decoded.seq, 1);
    }

    #[test]
    fn decode_all_skips_empty_lines_and_reports_malformed_ones() {
        let buffer = format!("{}\n\nnot json at all\n{}\n", encode_line(&sample_event(1)).unwrap().trim_end(), encode_line(&sample_event(2)).unwrap().trim_end());
        let (events, errors): (Vec<StreamEvent>, Vec<LineError>) = decode_all(&buffer);
        assert_eq!(events.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].content, "not json at all");
    }

    #[test]
    fn streaming_decoder_handles_a_line_split_across_two_chunks() {
        let mut decoder = NdjsonDecoder::new();
        let full_line = encode_line(&sample_event(7)).unwrap();
        let (first_half, second_half) = full_line.split_at(full_line.len() / 2);
        let frames: Vec<Frame<StreamEvent>> = decoder.feed(first_half);
        assert!(frames.is_empty());
        assert!(decoder.has_pending());
        let frames: Vec<Frame<StreamEvent>> = decoder.feed(second_half);
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], Frame::Event(ref e) if e.seq == 7));
        assert!(!decoder.has_pending());
    }

    #[test]
    fn streaming_decoder_reports_malformed_lines_without_losing_later_ones() {
        let mut decoder = NdjsonDecoder::new();
        let chunk = format!("{{broken\n{}", encode_line(&sample_event(3)).unwrap());
        let frames: Vec<Frame<StreamEvent>> = decoder.feed(&chunk);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Frame::Error(_)));
        assert!(matches!(frames[1], Frame::Event(ref e) if e.seq == 3));
    }

    #[test]
    fn schema_check_flags_missing_required_fields() {
        assert!(looks_like_stream_event(&serde_json::json!({
            "protocolVersion": 1, "sessionId": "s_x", "seq": 1, "type": "heartbeat"
        })));
        assert!(!looks_like_stream_event(&serde_json::json!({"seq": 1})));
    }
}
