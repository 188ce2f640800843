//! Session store abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DomainError;

/// Stored representation of an orchestration session.
#[derive(Debug, Clone)]
pub struct StoredSession {
    /// Session identifier.
    pub session_id: Uuid,
    /// Optimistic concurrency version, bumped on every swap.
    pub version: i64,
    /// Serialized session state.
    pub state: serde_json::Value,
    /// Timestamp of the last write.
    pub updated_at: DateTime<Utc>,
}

/// Store holding the current state of each session, keyed by identifier.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the current state of a session, if it exists.
    async fn get(&self, session_id: Uuid) -> Result<Option<StoredSession>, DomainError>;

    /// Insert a new session at version `0`.
    ///
    /// Fails with `DomainError::ConcurrencyConflict` if the session exists.
    async fn insert(
        &self,
        session_id: Uuid,
        state: serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> Result<StoredSession, DomainError>;

    /// Replace the state of a session if its version is still
    /// `expected_version`. Returns the stored session at its new version.
    async fn compare_and_swap(
        &self,
        session_id: Uuid,
        expected_version: i64,
        state: serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> Result<StoredSession, DomainError>;

    /// Remove a session. Returns `false` if it did not exist.
    async fn remove(&self, session_id: Uuid) -> Result<bool, DomainError>;

    /// List every stored session.
    async fn list(&self) -> Result<Vec<StoredSession>, DomainError>;
}
