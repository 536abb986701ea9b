// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! Broker-wide admission rate limiting (§4.10: "the broker MAY additionally
//! enforce a global rate limit on session creation independent of
//! `maxConcurrentSessions`"). Per-session resource ceilings
//! (`maxToolCalls`, `maxConsoleCalls`, ...) live on [`SessionLimits`]
//! instead and are enforced directly by the sandbox/tool bridge — this
//! module only throttles the *rate* of new session creation.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};

#[derive(Debug, thiserror::Error)]
#[error("session creation rate limit exceeded")]
pub struct RateLimitExceeded;

/// Token-bucket limiter over broker-wide session creation.
pub struct SessionCreationLimiter {
    inner: GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl SessionCreationLimiter {
    /// `sessions_per_second` must be non-zero; the broker config loader
    /// (§4.12) validates this before constructing one.
    pub fn new(sessions_per_second: NonZeroU32) -> Self {
        Self { inner: GovernorLimiter::direct(Quota::per_second(sessions_per_second)) }
    }

    pub fn check(&self) -> Result<(), RateLimitExceeded> {
        self.inner.check().map_err(|_| RateLimitExceeded)
    }
}

pub fn shared(sessions_per_second: NonZeroU32) -> Arc<SessionCreationLimiter> {
    Arc::new(SessionCreationLimiter::new(sessions_per_second))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_requests_within_quota_and_rejects_the_burst_overflow() {
        let limiter = SessionCreationLimiter::new(NonZeroU32::new(2).unwrap());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }
}
