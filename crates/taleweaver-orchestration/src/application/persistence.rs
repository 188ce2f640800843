//! Loading and committing sessions through the `SessionStore`.

use chrono::{DateTime, Utc};
use taleweaver_core::error::DomainError;
use taleweaver_core::store::SessionStore;
use uuid::Uuid;

use crate::domain::session::OrchestrationSession;

pub(crate) async fn load_session(
    store: &dyn SessionStore,
    session_id: Uuid,
) -> Result<OrchestrationSession, DomainError> {
    let stored = store
        .get(session_id)
        .await?
        .ok_or(DomainError::SessionNotFound(session_id))?;
    OrchestrationSession::from_stored(&stored)
}

pub(crate) async fn insert_session(
    store: &dyn SessionStore,
    session: &mut OrchestrationSession,
) -> Result<(), DomainError> {
    let stored = store
        .insert(session.session_id(), session.to_state()?, session.updated_at)
        .await?;
    session.version = stored.version;
    Ok(())
}

/// Commits `session` against the version it was loaded at and moves it to
/// the new version.
pub(crate) async fn save_session(
    store: &dyn SessionStore,
    session: &mut OrchestrationSession,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    let stored = store
        .compare_and_swap(session.session_id(), session.version, session.to_state()?, now)
        .await?;
    session.version = stored.version;
    Ok(())
}
