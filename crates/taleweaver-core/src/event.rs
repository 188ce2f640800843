//! Orchestration events published to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::decision::DecisionPoint;
use crate::model::{AgentState, AgentStatus, NarrativeOutput, Phase, PhaseFailure, SessionStatus};

/// Event payload variants. The variant determines the event `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    /// The phase pointer moved.
    PhaseChange {
        /// The phase that completed.
        from: Phase,
        /// The phase that runs next.
        to: Phase,
        /// Turn number after the move.
        turn_number: u64,
        /// Session status after the move.
        status: SessionStatus,
    },
    /// One agent changed state within a phase.
    AgentUpdate {
        /// The phase the agent is participating in.
        phase: Phase,
        /// The state the agent left.
        previous: AgentState,
        /// The agent's new status.
        agent: AgentStatus,
    },
    /// The pipeline is waiting for a human decision.
    DecisionRequired {
        /// The pending decision.
        decision: DecisionPoint,
    },
    /// A pending decision was resolved.
    DecisionResolved {
        /// The resolved decision.
        decision_id: Uuid,
        /// The chosen option.
        option_id: String,
        /// `true` when the decision expired and was resolved automatically.
        auto_resolved: bool,
    },
    /// A turn completed.
    NarrativeOutput {
        /// The produced narrative.
        output: NarrativeOutput,
    },
    /// A phase failed and the session moved to `error`.
    Error {
        /// What broke the quorum.
        failure: PhaseFailure,
    },
    /// Liveness marker. `missed > 0` marks a gap: that many events were
    /// dropped for this subscriber.
    Heartbeat {
        /// Number of events dropped since the last delivered one.
        missed: u64,
    },
}

impl EventPayload {
    /// Wire name of the event type.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PhaseChange { .. } => "phase_change",
            Self::AgentUpdate { .. } => "agent_update",
            Self::DecisionRequired { .. } => "decision_required",
            Self::DecisionResolved { .. } => "decision_resolved",
            Self::NarrativeOutput { .. } => "narrative_output",
            Self::Error { .. } => "error",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// An immutable fact published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    /// Unique event identifier.
    pub id: Uuid,
    /// Per-session publication order, stamped by the bus.
    pub sequence: u64,
    /// Timestamp of event creation.
    pub timestamp: DateTime<Utc>,
    /// The session the event belongs to.
    pub session_id: Uuid,
    /// Type-specific payload.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl OrchestrationEvent {
    /// Creates an unpublished event (sequence `0`).
    #[must_use]
    pub fn new(session_id: Uuid, payload: EventPayload, clock: &dyn Clock) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence: 0,
            timestamp: clock.now(),
            session_id,
            payload,
        }
    }

    /// Wire name of the event type.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// `true` for heartbeats that mark dropped events.
    #[must_use]
    pub fn is_gap(&self) -> bool {
        matches!(self.payload, EventPayload::Heartbeat { missed } if missed > 0)
    }
}

/// Sink for orchestration events. Publishing never blocks.
pub trait EventPublisher: Send + Sync {
    /// Publishes an event to every current subscriber of its session.
    fn publish(&self, event: OrchestrationEvent);

    /// Ends a session's event stream. Publishers without per-session
    /// channels ignore it.
    fn close(&self, _session_id: Uuid) {}
}
