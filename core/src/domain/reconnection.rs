// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The reconnection core (§4.9): the connection state machine, exponential
//! backoff with jitter, the sequence gap tracker, and the bounded outbound
//! event buffer a server replays from. Everything here is synchronous and
//! clock-free (callers pass in `now`/`retry_count`/elapsed durations) so it
//! can be unit tested without a runtime; `enclavejs-runtime::reconnection`
//! wires this to `tokio::time` for the heartbeat timer and actual sleeps.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::events::StreamEvent;

/// `{Disconnected, Connecting, Connected, Reconnecting, Failed, Closed}`
/// (§3, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
    Closed,
}

/// Backoff configuration with the spec's documented defaults (§4.9).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffConfig {
    pub max_retries: u32,
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { max_retries: 5, initial_ms: 1000, max_ms: 30_000, multiplier: 2.0, jitter: true, jitter_factor: 0.3 }
    }
}

impl BackoffConfig {
    /// `delay = min(maxDelay, initial * multiplier^retryCount)`, optionally
    /// perturbed by uniform noise in `±jitterFactor·delay` (§4.9). Takes an
    /// injected `rng` so callers outside tests can still get real jitter
    /// without this module reaching for a global RNG.
    pub fn delay_for(&self, retry_count: u32, rng: &mut impl Rng) -> Duration {
        let base = (self.initial_ms as f64) * self.multiplier.powi(retry_count as i32);
        let capped = base.min(self.max_ms as f64);
        let delay_ms = if self.jitter {
            let jitter_range = capped * self.jitter_factor;
            capped + rng.gen_range(-jitter_range..=jitter_range)
        } else {
            capped
        };
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

/// A missing `seq` range the [`SequenceTracker`] detected (§4.9 "Gap").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    pub from: u64,
    pub to: u64,
}

/// Tracks the last contiguous `seq` a receiver has accepted, reporting gaps
/// when a later `seq` arrives out of order and silently tolerating
/// duplicates or regressions (§4.9: "at-least-once delivery tolerated").
#[derive(Debug)]
pub struct SequenceTracker {
    last_seq: u64,
    gaps: Vec<Gap>,
    max_tracked_gaps: usize,
}

impl SequenceTracker {
    pub fn new(max_tracked_gaps: usize) -> Self {
        Self { last_seq: 0, gaps: Vec::new(), max_tracked_gaps }
    }

    /// Records `seq`'s arrival. Returns the newly detected gap, if any. A
    /// `seq` that does not advance `last_seq` (duplicate or regression) is a
    /// no-op (§4.9).
    pub fn observe(&mut self, seq: u64) -> Option<Gap> {
        if seq <= self.last_seq {
            return None;
        }
        let gap = if seq > self.last_seq + 1 {
            let gap = Gap { from: self.last_seq + 1, to: seq - 1 };
            self.gaps.push(gap);
            if self.gaps.len() > self.max_tracked_gaps {
                self.gaps.remove(0);
            }
            Some(gap)
        } else {
            None
        };
        self.last_seq = seq;
        gap
    }

    /// Marks `[from, to]` as healed (e.g. once replayed events covering the
    /// range have been received), removing it from the outstanding list.
    pub fn resolve(&mut self, gap: Gap) {
        self.gaps.retain(|g| *g != gap);
    }

    pub fn outstanding_gaps(&self) -> &[Gap] {
        &self.gaps
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }
}

/// A bounded FIFO buffer of outbound events a server keeps so it can replay
/// a requested gap (§4.9). Once full, the oldest event is dropped — a replay
/// request older than what remains buffered cannot be satisfied and should
/// surface `REPLAY_UNAVAILABLE` (§4.9.1, §7) rather than a generic failure.
#[derive(Debug)]
pub struct EventBuffer {
    capacity: usize,
    events: std::collections::VecDeque<StreamEvent>,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, events: std::collections::VecDeque::with_capacity(capacity.min(1024)) }
    }

    pub fn push(&mut self, event: StreamEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Returns the buffered events covering `[from, to]`, or `None` if any
    /// part of that range has already fallen out of the buffer.
    pub fn replay(&self, from: u64, to: u64) -> Option<Vec<StreamEvent>> {
        let oldest = self.events.front()?.seq;
        if from < oldest {
            return None;
        }
        let slice: Vec<StreamEvent> = self.events.iter().filter(|e| e.seq >= from && e.seq <= to).cloned().collect();
        if slice.len() as u64 == to.saturating_sub(from) + 1 {
            Some(slice)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::StreamEventPayload;
    use crate::domain::ids::SessionId;

    #[test]
    fn backoff_grows_with_multiplier_and_caps_at_max() {
        let cfg = BackoffConfig { jitter: false, ..BackoffConfig::default() };
        let mut rng = rand::thread_rng();
        assert_eq!(cfg.delay_for(0, &mut rng), Duration::from_millis(1000));
        assert_eq!(cfg.delay_for(1, &mut rng), Duration::from_millis(2000));
        assert_eq!(cfg.delay_for(2, &mut rng), Duration::from_millis(4000));
        assert_eq!(cfg.delay_for(10, &mut rng), Duration::from_millis(30_000));
    }

    #[test]
    fn jitter_stays_within_configured_factor() {
        let cfg = BackoffConfig::default();
        let mut rng = rand::thread_rng();
        let base_ms = 1000.0 * 2f64.powi(2);
        for _ in 0..50 {
            let d = cfg.delay_for(2, &mut rng).as_millis() as f64;
            assert!(d >= base_ms * (1.0 - cfg.jitter_factor) - 1.0);
            assert!(d <= base_ms * (1.0 + cfg.jitter_factor) + 1.0);
        }
    }

    #[test]
    fn sequence_tracker_detects_and_resolves_gaps() {
        let mut tracker = SequenceTracker::new(100);
        assert_eq!(tracker.observe(1), None);
        let gap = tracker.observe(4).unwrap();
        assert_eq!(gap, Gap { from: 2, to: 3 });
        assert_eq!(tracker.outstanding_gaps(), &[gap]);
        tracker.resolve(gap);
        assert!(tracker.outstanding_gaps().is_empty());
    }

    #[test]
    fn sequence_tracker_ignores_duplicates_and_regressions() {
        let mut tracker = SequenceTracker::new(100);
        tracker.observe(1);
        tracker.observe(2);
        assert_eq!(tracker.observe(2), None);
        assert_eq!(tracker.observe(1), None);
        assert_eq!(tracker.last_seq(), 2);
    }

    fn heartbeat_event(seq: u64) -> StreamEvent {
        StreamEvent::new(SessionId::new(), seq, StreamEventPayload::Heartbeat {})
    }

    #[test]
    fn event_buffer_replays_contiguous_range() {
        let mut buf = EventBuffer::new(10);
        for seq in 1..=5 {
            buf.push(heartbeat_event(seq));
        }
        let replayed = buf.replay(2, 4).unwrap();
        assert_eq!(replayed.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn event_buffer_reports_unavailable_when_gap_is_older_than_buffer() {
        let mut buf = EventBuffer::new(3);
        for seq in 1..=10 {
            buf.push(heartbeat_event(seq));
        }
        // buffer now holds only seq 8..=10
        assert!(buf.replay(1, 5).is_none());
        assert!(buf.replay(8, 10).is_some());
    }
}
