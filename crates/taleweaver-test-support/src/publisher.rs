//! Recording `EventPublisher` for tests.

use std::sync::Mutex;

use taleweaver_core::event::{EventPublisher, OrchestrationEvent};

/// An event publisher that keeps every published event in order.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<OrchestrationEvent>>,
}

impl RecordingPublisher {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all published events.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn events(&self) -> Vec<OrchestrationEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Returns the published events of one type, e.g. `"agent_update"`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn events_of_type(&self, event_type: &str) -> Vec<OrchestrationEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.event_type() == event_type)
            .cloned()
            .collect()
    }
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, mut event: OrchestrationEvent) {
        let mut events = self.events.lock().unwrap();
        event.sequence = events.len() as u64 + 1;
        events.push(event);
    }
}
