//! Per-session broadcast channels.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;

use taleweaver_core::clock::Clock;
use taleweaver_core::event::{EventPublisher, OrchestrationEvent};

use crate::subscription::EventSubscription;

/// Default per-subscriber queue length.
pub const DEFAULT_CAPACITY: usize = 256;

struct SessionChannel {
    sender: broadcast::Sender<OrchestrationEvent>,
    next_sequence: u64,
}

#[derive(Default)]
struct Channels {
    open: HashMap<Uuid, SessionChannel>,
    /// Sessions whose stream has ended; never reopened.
    closed: HashSet<Uuid>,
}

/// In-process event bus keyed by session.
///
/// Sequence numbers are stamped while the channel lock is held, so every
/// subscriber observes a session's events in publication order.
///
/// Once a session is closed, later publishes are dropped and later
/// subscriptions end immediately.
pub struct EventBus {
    channels: Mutex<Channels>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Creates a bus whose subscribers each buffer up to `capacity` events.
    /// Tokio rounds the capacity up to the next power of two.
    #[must_use]
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            channels: Mutex::new(Channels::default()),
            capacity: capacity.max(1),
            clock,
        }
    }

    fn channels(&self) -> MutexGuard<'_, Channels> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The session's live channel, created on first use. `None` once the
    /// session is closed.
    fn open<'a>(
        &self,
        channels: &'a mut Channels,
        session_id: Uuid,
    ) -> Option<&'a mut SessionChannel> {
        if channels.closed.contains(&session_id) {
            return None;
        }
        Some(channels.open.entry(session_id).or_insert_with(|| {
            let (sender, _) = broadcast::channel(self.capacity);
            SessionChannel {
                sender,
                next_sequence: 1,
            }
        }))
    }

    /// Subscribes to a session's events from now on. The subscription of a
    /// closed session ends without yielding anything.
    #[must_use]
    pub fn subscribe(&self, session_id: Uuid) -> EventSubscription {
        let mut channels = self.channels();
        let Some(channel) = self.open(&mut channels, session_id) else {
            debug!(%session_id, "subscribed to a closed session");
            let (_, receiver) = broadcast::channel(1);
            return EventSubscription::new(session_id, receiver, 0, Arc::clone(&self.clock));
        };
        let last_sequence = channel.next_sequence.saturating_sub(1);
        debug!(%session_id, subscribers = channel.sender.receiver_count() + 1, "subscriber added");
        EventSubscription::new(
            session_id,
            channel.sender.subscribe(),
            last_sequence,
            Arc::clone(&self.clock),
        )
    }

    /// Drops a subscription. The session's channel is kept so sequence
    /// numbers stay monotonic for later subscribers.
    pub fn unsubscribe(&self, subscription: EventSubscription) {
        let session_id = subscription.session_id();
        drop(subscription);
        debug!(
            %session_id,
            subscribers = self.subscriber_count(session_id),
            "subscriber removed"
        );
    }

    /// Closes a session's channel for good. Subscribers drain what they
    /// already buffered and then see the end of the stream.
    pub fn close_session(&self, session_id: Uuid) {
        let mut channels = self.channels();
        channels.closed.insert(session_id);
        if channels.open.remove(&session_id).is_some() {
            debug!(%session_id, "event channel closed");
        }
    }

    /// Number of live subscribers for a session.
    #[must_use]
    pub fn subscriber_count(&self, session_id: Uuid) -> usize {
        self.channels()
            .open
            .get(&session_id)
            .map_or(0, |channel| channel.sender.receiver_count())
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, mut event: OrchestrationEvent) {
        let session_id = event.session_id;
        let mut channels = self.channels();
        let Some(channel) = self.open(&mut channels, session_id) else {
            trace!(%session_id, event_type = event.event_type(), "session closed, event dropped");
            return;
        };
        event.sequence = channel.next_sequence;
        channel.next_sequence += 1;
        let event_type = event.event_type();
        let sequence = event.sequence;
        // Err only means nobody is listening right now.
        let delivered = channel.sender.send(event).unwrap_or(0);
        trace!(%session_id, sequence, event_type, delivered, "event published");
    }

    fn close(&self, session_id: Uuid) {
        self.close_session(session_id);
    }
}
