//! Engine settings and the collaborators the orchestrator is built from.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use taleweaver_core::clock::Clock;
use taleweaver_core::event::EventPublisher;
use taleweaver_core::generation::GenerationService;
use taleweaver_core::rng::DeterministicRng;
use taleweaver_core::sink::NarrativeSink;
use taleweaver_core::store::SessionStore;

use super::coordinator::CoordinatorConfig;
use crate::domain::detector::DetectorConfig;
use crate::domain::prompt::PromptRenderer;

/// Session lifetime policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionPolicy {
    /// Seconds a session may sit untouched before the sweeper drops it.
    pub ttl_secs: u64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self { ttl_secs: 3_600 }
    }
}

/// Tunables for the whole engine. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub coordinator: CoordinatorConfig,
    pub detector: DetectorConfig,
    pub sessions: SessionPolicy,
}

/// External services the orchestrator drives.
pub struct Collaborators {
    pub store: Arc<dyn SessionStore>,
    pub publisher: Arc<dyn EventPublisher>,
    pub generation: Arc<dyn GenerationService>,
    pub prompts: Arc<dyn PromptRenderer>,
    pub sink: Arc<dyn NarrativeSink>,
    pub clock: Arc<dyn Clock>,
    pub rng: Box<dyn DeterministicRng>,
}
