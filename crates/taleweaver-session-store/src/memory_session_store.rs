//! In-memory implementation of the `SessionStore` trait.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use taleweaver_core::error::DomainError;
use taleweaver_core::store::{SessionStore, StoredSession};

/// Process-local session store. Each write checks and bumps the session's
/// version under a single write lock.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<Uuid, StoredSession>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions currently held.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the lock is poisoned.
    pub fn len(&self) -> Result<usize, DomainError> {
        Ok(self.sessions.read().map_err(poisoned)?.len())
    }

    /// Whether the store holds no sessions.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, DomainError> {
        Ok(self.len()? == 0)
    }
}

#[allow(clippy::needless_pass_by_value)]
fn poisoned<T>(_: std::sync::PoisonError<T>) -> DomainError {
    DomainError::Infrastructure("session store lock poisoned".to_owned())
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: Uuid) -> Result<Option<StoredSession>, DomainError> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.get(&session_id).cloned())
    }

    async fn insert(
        &self,
        session_id: Uuid,
        state: serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> Result<StoredSession, DomainError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        if let Some(existing) = sessions.get(&session_id) {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: session_id,
                expected: -1,
                actual: existing.version,
            });
        }
        let stored = StoredSession {
            session_id,
            version: 0,
            state,
            updated_at,
        };
        sessions.insert(session_id, stored.clone());
        debug!(%session_id, "session inserted");
        Ok(stored)
    }

    async fn compare_and_swap(
        &self,
        session_id: Uuid,
        expected_version: i64,
        state: serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> Result<StoredSession, DomainError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let current = sessions
            .get_mut(&session_id)
            .ok_or(DomainError::SessionNotFound(session_id))?;
        if current.version != expected_version {
            debug!(
                %session_id,
                expected_version,
                actual_version = current.version,
                "compare-and-swap lost"
            );
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: session_id,
                expected: expected_version,
                actual: current.version,
            });
        }
        current.version += 1;
        current.state = state;
        current.updated_at = updated_at;
        Ok(current.clone())
    }

    async fn remove(&self, session_id: Uuid) -> Result<bool, DomainError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        Ok(sessions.remove(&session_id).is_some())
    }

    async fn list(&self) -> Result<Vec<StoredSession>, DomainError> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.values().cloned().collect())
    }
}
