//! A single subscriber's view of a session's events.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use futures::stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;
use uuid::Uuid;

use taleweaver_core::clock::Clock;
use taleweaver_core::event::{EventPayload, OrchestrationEvent};

/// Receiving end of one subscriber. Dropping it unsubscribes.
pub struct EventSubscription {
    session_id: Uuid,
    receiver: broadcast::Receiver<OrchestrationEvent>,
    last_sequence: u64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("session_id", &self.session_id)
            .field("last_sequence", &self.last_sequence)
            .finish_non_exhaustive()
    }
}

impl EventSubscription {
    pub(crate) fn new(
        session_id: Uuid,
        receiver: broadcast::Receiver<OrchestrationEvent>,
        last_sequence: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            session_id,
            receiver,
            last_sequence,
            clock,
        }
    }

    /// The session this subscription follows.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Waits for the next event. Returns a gap marker if events were
    /// dropped, and `None` once the session's channel is closed.
    pub async fn recv(&mut self) -> Option<OrchestrationEvent> {
        match self.receiver.recv().await {
            Ok(event) => Some(self.delivered(event)),
            Err(RecvError::Lagged(missed)) => Some(self.gap(missed)),
            Err(RecvError::Closed) => None,
        }
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<OrchestrationEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(self.delivered(event)),
            Err(TryRecvError::Lagged(missed)) => Some(self.gap(missed)),
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }

    /// A heartbeat carrying no gap, sequenced after the last delivered event.
    #[must_use]
    pub fn heartbeat(&self) -> OrchestrationEvent {
        self.marker(0)
    }

    /// Converts the subscription into a stream that yields a heartbeat
    /// whenever `heartbeat_interval` passes without an event.
    pub fn into_stream(
        self,
        heartbeat_interval: Duration,
    ) -> impl Stream<Item = OrchestrationEvent> + Send {
        stream::unfold(self, move |mut subscription| async move {
            match tokio::time::timeout(heartbeat_interval, subscription.recv()).await {
                Ok(Some(event)) => Some((event, subscription)),
                Ok(None) => None,
                Err(_) => {
                    let beat = subscription.heartbeat();
                    Some((beat, subscription))
                }
            }
        })
    }

    fn delivered(&mut self, event: OrchestrationEvent) -> OrchestrationEvent {
        self.last_sequence = event.sequence;
        event
    }

    fn gap(&self, missed: u64) -> OrchestrationEvent {
        warn!(session_id = %self.session_id, missed, "subscriber lagged, events dropped");
        self.marker(missed)
    }

    fn marker(&self, missed: u64) -> OrchestrationEvent {
        let mut event = OrchestrationEvent::new(
            self.session_id,
            EventPayload::Heartbeat { missed },
            self.clock.as_ref(),
        );
        event.sequence = self.last_sequence;
        event
    }
}
