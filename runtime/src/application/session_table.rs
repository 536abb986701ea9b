// Copyright (c) 2026 enclavejs contributors
// SPDX-License-Identifier: AGPL-3.0
//! The broker's concurrent session table: tracks every live [`Session`] plus
//! a `maxConcurrentSessions` admission gate (§4.10) so a burst of session
//! creation requests can't unbound the broker's resource usage.

use std::sync::Arc;

use dashmap::DashMap;
use enclavejs_core::domain::ids::SessionId;
use enclavejs_core::domain::session::Session;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, thiserror::Error)]
pub enum SessionTableError {
    #[error("the broker is at its concurrent session capacity")]
    AtCapacity,
    #[error("no session found for {0}")]
    NotFound(SessionId),
}

/// Concurrent map of live sessions, gated by a semaphore sized to
/// `maxConcurrentSessions`. Each entry's admission permit lives alongside
/// it and is dropped (freeing the slot) when the session is removed.
pub struct SessionTable {
    sessions: DashMap<SessionId, (Session, OwnedSemaphorePermit)>,
    capacity: Arc<Semaphore>,
}

impl SessionTable {
    pub fn new(max_concurrent_sessions: usize) -> Self {
        Self { sessions: DashMap::new(), capacity: Arc::new(Semaphore::new(max_concurrent_sessions)) }
    }

    /// Reserves a slot and inserts `session`, returning its id. Fails
    /// immediately (no queuing) if the broker is already at capacity —
    /// callers surface this as a `429`-equivalent rejection (§4.11).
    pub fn insert(&self, session: Session) -> Result<SessionId, SessionTableError> {
        let permit = self.capacity.clone().try_acquire_owned().map_err(|_| SessionTableError::AtCapacity)?;
        let id = session.session_id;
        self.sessions.insert(id, (session, permit));
        Ok(id)
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|entry| entry.value().0.clone())
    }

    pub fn update(&self, id: &SessionId, f: impl FnOnce(&mut Session)) -> Result<(), SessionTableError> {
        let mut entry = self.sessions.get_mut(id).ok_or(SessionTableError::NotFound(*id))?;
        f(&mut entry.value_mut().0);
        Ok(())
    }

    /// Removes a session; its permit drops with the entry, freeing the slot.
    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        self.sessions.remove(id).map(|(_, (session, _permit))| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Evicts every session whose TTL has elapsed as of `now` (§4.10). Run
    /// periodically by a reaper task.
    pub fn evict_expired(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<SessionId> {
        let expired: Vec<SessionId> = self.sessions.iter().filter(|entry| entry.value().0.is_expired(now)).map(|entry| *entry.key()).collect();
        for id in &expired {
            self.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclavejs_core::domain::guard::GuardPreset;
    use enclavejs_core::domain::session::SessionLimits;

    fn new_session() -> Session {
        Session::new(SessionLimits::default(), GuardPreset::Secure)
    }

    #[test]
    fn insert_and_get_round_trip() {
        let table = SessionTable::new(4);
        let session = new_session();
        let id = session.session_id;
        table.insert(session).unwrap();
        assert_eq!(table.get(&id).unwrap().session_id, id);
    }

    #[test]
    fn rejects_insert_past_capacity() {
        let table = SessionTable::new(1);
        table.insert(new_session()).unwrap();
        assert!(matches!(table.insert(new_session()), Err(SessionTableError::AtCapacity)));
    }

    #[test]
    fn removing_a_session_frees_its_capacity_slot() {
        let table = SessionTable::new(1);
        let session = new_session();
        let id = session.session_id;
        table.insert(session).unwrap();
        table.remove(&id);
        assert!(table.insert(new_session()).is_ok());
    }

    #[test]
    fn evicts_only_expired_sessions() {
        let table = SessionTable::new(4);
        let mut limits = SessionLimits::default();
        limits.session_ttl_ms = 1;
        let short_lived = Session::new(limits, GuardPreset::Secure);
        let short_id = short_lived.session_id;
        let created_at = short_lived.created_at;
        table.insert(short_lived).unwrap();
        table.insert(new_session()).unwrap();

        let evicted = table.evict_expired(created_at + chrono::Duration::milliseconds(5));
        assert_eq!(evicted, vec![short_id]);
        assert_eq!(table.len(), 1);
    }
}
