//! Narrative sink that writes completed turns to the log.

use async_trait::async_trait;
use taleweaver_core::error::DomainError;
use taleweaver_core::model::NarrativeOutput;
use taleweaver_core::sink::NarrativeSink;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNarrativeSink;

#[async_trait]
impl NarrativeSink for LoggingNarrativeSink {
    async fn persist(&self, session_id: Uuid, output: &NarrativeOutput) -> Result<(), DomainError> {
        info!(
            %session_id,
            output_id = %output.id,
            turn_number = output.turn_number,
            characters = ?output.characters,
            content = %output.content,
            "narrative output"
        );
        Ok(())
    }
}
