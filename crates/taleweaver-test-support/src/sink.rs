//! Test sinks: mock `NarrativeSink` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use taleweaver_core::error::DomainError;
use taleweaver_core::model::NarrativeOutput;
use taleweaver_core::sink::NarrativeSink;
use uuid::Uuid;

/// A sink that records every persisted output.
#[derive(Debug, Default)]
pub struct RecordingNarrativeSink {
    persisted: Mutex<Vec<(Uuid, NarrativeOutput)>>,
}

impl RecordingNarrativeSink {
    /// Creates an empty recording sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all persisted outputs.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn persisted(&self) -> Vec<(Uuid, NarrativeOutput)> {
        self.persisted.lock().unwrap().clone()
    }
}

#[async_trait]
impl NarrativeSink for RecordingNarrativeSink {
    async fn persist(&self, session_id: Uuid, output: &NarrativeOutput) -> Result<(), DomainError> {
        self.persisted
            .lock()
            .unwrap()
            .push((session_id, output.clone()));
        Ok(())
    }
}

/// A sink that always returns an infrastructure error. Useful for testing
/// that persistence failures do not roll back orchestration state.
#[derive(Debug)]
pub struct FailingNarrativeSink;

#[async_trait]
impl NarrativeSink for FailingNarrativeSink {
    async fn persist(
        &self,
        _session_id: Uuid,
        _output: &NarrativeOutput,
    ) -> Result<(), DomainError> {
        Err(DomainError::Infrastructure("connection refused".into()))
    }
}
