//! Hand-off of finished turns to persistence.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DomainError;
use crate::model::NarrativeOutput;

/// Receives every completed `NarrativeOutput`. Failures are logged by the
/// caller and never roll back orchestration state.
#[async_trait]
pub trait NarrativeSink: Send + Sync {
    /// Persist a finished turn.
    async fn persist(&self, session_id: Uuid, output: &NarrativeOutput) -> Result<(), DomainError>;
}
