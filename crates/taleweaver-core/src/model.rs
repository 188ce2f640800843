//! Value types describing sessions, phases, and agents.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the five ordered pipeline phases of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Gather world and character context for the turn.
    ContextGathering,
    /// Director and personas plan the turn.
    Planning,
    /// Personas act out the plan.
    Execution,
    /// The synthesizer merges the agents' contributions.
    Synthesis,
    /// The synthesizer produces the final narrative text.
    Output,
}

impl Phase {
    /// Every phase, in pipeline order.
    pub const ALL: [Self; 5] = [
        Self::ContextGathering,
        Self::Planning,
        Self::Execution,
        Self::Synthesis,
        Self::Output,
    ];

    /// Returns the phase that follows this one and whether the turn wrapped.
    #[must_use]
    pub fn next(self) -> (Self, bool) {
        match self {
            Self::ContextGathering => (Self::Planning, false),
            Self::Planning => (Self::Execution, false),
            Self::Execution => (Self::Synthesis, false),
            Self::Synthesis => (Self::Output, false),
            Self::Output => (Self::ContextGathering, true),
        }
    }

    /// Decisions are only ever raised at the end of these phases.
    #[must_use]
    pub fn may_raise_decision(self) -> bool {
        matches!(self, Self::Planning | Self::Execution)
    }

    /// Wire name of the phase.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContextGathering => "context_gathering",
            Self::Planning => "planning",
            Self::Execution => "execution",
            Self::Synthesis => "synthesis",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an orchestration session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Between turns (or not started).
    Idle,
    /// Mid-turn.
    Running,
    /// Suspended by the user.
    Paused,
    /// Suspended by the pipeline until a decision is resolved.
    WaitingDecision,
    /// A phase failed; requires a reset.
    Error,
    /// Stopped for good.
    Stopped,
}

impl SessionStatus {
    /// `true` for `error` and `stopped`, where `advance_turn` cannot succeed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Error | Self::Stopped)
    }

    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::WaitingDecision => "waiting_decision",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Plays one character.
    Persona,
    /// Steers the plot.
    Director,
    /// Merges contributions into prose.
    Synthesizer,
}

impl AgentRole {
    /// Director and synthesizer failures always fail the phase.
    #[must_use]
    pub fn is_quorum_critical(self) -> bool {
        matches!(self, Self::Director | Self::Synthesizer)
    }

    /// Wire name of the role.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Persona => "persona",
            Self::Director => "director",
            Self::Synthesizer => "synthesizer",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of one agent within the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Not yet invoked.
    Idle,
    /// Prompt is being prepared / request in flight.
    Thinking,
    /// Reply received, being interpreted.
    Acting,
    /// Done for this phase.
    Waiting,
    /// Exhausted its retries for this phase.
    Failed,
}

/// Why an agent call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The call exceeded its per-call timeout.
    Timeout,
    /// The generation backend could not be reached or errored.
    Transport,
    /// The backend refused the request; never retried.
    Rejected,
    /// The session was stopped while the call was in flight.
    Cancelled,
    /// The backend panicked instead of answering; never retried.
    Internal,
}

impl FailureKind {
    /// Wire name of the failure kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transient descriptor of one agent's participation in a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    /// Agent identifier.
    pub agent_id: String,
    /// The agent's role.
    pub role: AgentRole,
    /// Current state within the phase.
    pub state: AgentState,
    /// When the state last changed.
    pub last_update: DateTime<Utc>,
    /// Number of generation attempts made so far.
    #[serde(default)]
    pub attempts: u32,
    /// Failure recorded once the agent reaches `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl AgentStatus {
    /// Creates an `idle` status for an agent at the start of a phase.
    #[must_use]
    pub fn idle(agent_id: impl Into<String>, role: AgentRole, now: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.into(),
            role,
            state: AgentState::Idle,
            last_update: now,
            attempts: 0,
            failure: None,
        }
    }
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Turns that reached the end of the `output` phase.
    pub turns_completed: u64,
    /// Phases that failed their quorum.
    pub errors: u64,
    /// Decisions resolved, explicitly or automatically.
    pub decisions_resolved: u64,
    /// Decisions resolved by expiry.
    pub decisions_auto_resolved: u64,
    /// Individual agents that exhausted their retries.
    pub agent_failures: u64,
}

/// Details of the agent failure that broke a phase's quorum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseFailure {
    /// The phase that failed.
    pub phase: Phase,
    /// The failing agent.
    pub agent_id: String,
    /// The failing agent's role.
    pub role: AgentRole,
    /// The last failure kind the agent reported.
    pub kind: FailureKind,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// Human-readable detail.
    pub message: String,
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} agent {} failed in {} after {} attempt(s) ({}): {}",
            self.role, self.agent_id, self.phase, self.attempts, self.kind, self.message
        )
    }
}

/// The result of a completed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrativeOutput {
    /// Output identifier.
    pub id: Uuid,
    /// The turn that produced it.
    pub turn_number: u64,
    /// Final narrative text.
    pub content: String,
    /// Identifiers of the characters that took part.
    pub characters: Vec<String>,
    /// Identifiers of world events referenced during the turn.
    pub events: Vec<String>,
    /// When the turn completed.
    pub timestamp: DateTime<Utc>,
}
