//! In-memory session store.
//!
//! Maps session ids to per-session message history. Every operation on
//! a given session serialises through that session's own async mutex;
//! cross-session operations are lock-free (`DashMap`). The per-session
//! lock lives inside the session entry, so lock lifetime piggy-backs on
//! session lifetime and the map cannot grow unbounded locks.
//!
//! The expiry sweeper bounds each lock acquisition and skips busy
//! sessions to the next run, so it can never deadlock against live
//! query traffic.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{CodedocError, CodedocResult};
use crate::types::Message;

/// How long the sweeper waits for a busy session's lock.
const SWEEP_LOCK_TIMEOUT: Duration = Duration::from_secs(1);

struct SessionState {
    messages: Vec<Message>,
    last_active: DateTime<Utc>,
}

struct SessionEntry {
    codebase_id: Uuid,
    created_at: DateTime<Utc>,
    state: Mutex<SessionState>,
}

/// Per-session message history with TTL and codebase isolation.
pub struct SessionStore {
    sessions: DashMap<Uuid, Arc<SessionEntry>>,
    ttl: chrono::Duration,
}

impl SessionStore {
    /// Create a store with the given TTL in seconds.
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: chrono::Duration::seconds(ttl_seconds as i64),
        }
    }

    /// Create a new session bound to a codebase.
    pub fn create(&self, codebase_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        self.sessions.insert(
            id,
            Arc::new(SessionEntry {
                codebase_id,
                created_at: now,
                state: Mutex::new(SessionState {
                    messages: Vec::new(),
                    last_active: now,
                }),
            }),
        );
        tracing::debug!(session_id = %id, %codebase_id, "session created");
        id
    }

    /// The codebase a session is bound to. Sessions never cross
    /// codebase boundaries.
    pub fn codebase_of(&self, session_id: Uuid) -> Option<Uuid> {
        self.sessions.get(&session_id).map(|e| e.codebase_id)
    }

    /// Append a message, validating the session exists and has not
    /// expired. Updates `last_active`.
    pub async fn append(&self, session_id: Uuid, message: Message) -> CodedocResult<()> {
        let entry = self.entry(session_id)?;
        let mut state = entry.state.lock().await;
        if self.expired(state.last_active) {
            drop(state);
            self.sessions.remove(&session_id);
            return Err(CodedocError::UnknownSession { id: session_id.to_string() });
        }
        state.messages.push(message);
        state.last_active = Utc::now();
        Ok(())
    }

    /// The last `n` messages in insertion order.
    pub async fn recent(&self, session_id: Uuid, n: usize) -> CodedocResult<Vec<Message>> {
        let entry = self.entry(session_id)?;
        let state = entry.state.lock().await;
        if self.expired(state.last_active) {
            return Err(CodedocError::UnknownSession { id: session_id.to_string() });
        }
        let skip = state.messages.len().saturating_sub(n);
        Ok(state.messages[skip..].to_vec())
    }

    /// Remove every session bound to the codebase. Returns the number
    /// of sessions removed.
    pub fn delete_by_codebase(&self, codebase_id: Uuid) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.codebase_id != codebase_id);
        before - self.sessions.len()
    }

    /// Remove sessions idle past the TTL. Busy sessions are skipped to
    /// the next run. Returns the number removed.
    pub async fn cleanup_expired(&self) -> usize {
        let candidates: Vec<(Uuid, Arc<SessionEntry>)> = self
            .sessions
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        let mut removed = 0;
        for (id, entry) in candidates {
            let Ok(state) = tokio::time::timeout(SWEEP_LOCK_TIMEOUT, entry.state.lock()).await
            else {
                tracing::debug!(session_id = %id, "session busy, skipping this sweep");
                continue;
            };
            if self.expired(state.last_active) {
                drop(state);
                self.sessions.remove(&id);
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(removed, "expired sessions cleaned up");
        }
        removed
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether there are no live sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Creation timestamp of a session.
    pub fn created_at(&self, session_id: Uuid) -> Option<DateTime<Utc>> {
        self.sessions.get(&session_id).map(|e| e.created_at)
    }

    fn entry(&self, session_id: Uuid) -> CodedocResult<Arc<SessionEntry>> {
        self.sessions
            .get(&session_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| CodedocError::UnknownSession { id: session_id.to_string() })
    }

    fn expired(&self, last_active: DateTime<Utc>) -> bool {
        Utc::now() - last_active > self.ttl
    }
}
