//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use taleweaver_core::clock::Clock;
use taleweaver_core::generation::GenerationService;
use taleweaver_core::rng::DeterministicRng;
use taleweaver_event_bus::EventBus;
use taleweaver_orchestration::application::orchestrator::TurnOrchestrator;
use taleweaver_orchestration::application::settings::Collaborators;
use taleweaver_orchestration::domain::prompt::PlainPromptRenderer;
use taleweaver_session_store::InMemorySessionStore;

use crate::config::EngineConfig;
use crate::sink::LoggingNarrativeSink;

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub orchestrator: Arc<TurnOrchestrator>,
    /// Event fan-out, also the orchestrator's publisher.
    pub bus: Arc<EventBus>,
    /// Idle time before an event stream emits a heartbeat.
    pub heartbeat: Duration,
}

impl AppState {
    #[must_use]
    pub fn new(orchestrator: Arc<TurnOrchestrator>, bus: Arc<EventBus>, heartbeat: Duration) -> Self {
        Self {
            orchestrator,
            bus,
            heartbeat,
        }
    }

    /// Wires the in-memory store, the bus and the orchestrator around the
    /// given generation backend.
    #[must_use]
    pub fn assemble(
        config: &EngineConfig,
        generation: Arc<dyn GenerationService>,
        clock: Arc<dyn Clock>,
        rng: Box<dyn DeterministicRng>,
    ) -> Self {
        let bus = Arc::new(EventBus::new(config.bus.capacity, Arc::clone(&clock)));
        let orchestrator = Arc::new(TurnOrchestrator::new(
            Collaborators {
                store: Arc::new(InMemorySessionStore::new()),
                publisher: bus.clone(),
                generation,
                prompts: Arc::new(PlainPromptRenderer),
                sink: Arc::new(LoggingNarrativeSink),
                clock,
                rng,
            },
            config.engine_settings(),
        ));
        Self::new(orchestrator, bus, config.heartbeat_interval())
    }
}
