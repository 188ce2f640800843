//! The orchestration session state machine.
//!
//! Every mutation of a session happens through the methods below on a copy
//! loaded from the store; the caller commits the result with a
//! compare-and-swap on the version it loaded.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use taleweaver_core::decision::{DecisionPoint, DecisionResolution};
use taleweaver_core::error::DomainError;
use taleweaver_core::generation::GenerationParams;
use taleweaver_core::model::{
    AgentRole, AgentState, AgentStatus, NarrativeOutput, Phase, PhaseFailure, SessionMetrics,
    SessionStatus,
};
use taleweaver_core::store::StoredSession;
use uuid::Uuid;

use super::phase_result::PhaseResult;
use super::roster::Cast;

/// Caller-supplied session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub cast: Cast,
    /// Number of turns the session may complete. `None` is unbounded.
    #[serde(default)]
    pub turn_budget: Option<u64>,
    #[serde(default)]
    pub setting: Option<String>,
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(default)]
    pub params: GenerationParams,
}

impl SessionConfig {
    #[must_use]
    pub fn new(cast: Cast) -> Self {
        Self {
            cast,
            turn_budget: None,
            setting: None,
            scenario: None,
            params: GenerationParams::default(),
        }
    }

    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an invalid cast or a zero turn
    /// budget.
    pub fn validate(&self) -> Result<(), DomainError> {
        self.cast.validate()?;
        if self.turn_budget == Some(0) {
            return Err(DomainError::Validation(
                "turn budget must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// An option picked for a decision raised in the current turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenOption {
    pub decision_id: Uuid,
    pub option_id: String,
    pub label: String,
    pub auto_resolved: bool,
}

/// Work done so far in the current turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnProgress {
    /// Outputs of the phases completed this turn, in order.
    pub completed: Vec<PhaseResult>,
    /// Output of the current phase, kept while its decision is pending and
    /// until the phase is finished.
    pub retained: Option<PhaseResult>,
    pub choices: Vec<ChosenOption>,
}

impl TurnProgress {
    /// Prompt history: phase contents followed by the human's choices.
    #[must_use]
    pub fn history_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .completed
            .iter()
            .map(PhaseResult::joined_content)
            .filter(|content| !content.is_empty())
            .collect();
        lines.extend(
            self.choices
                .iter()
                .map(|choice| format!("Chosen: {}", choice.label)),
        );
        lines
    }
}

/// Result of finishing the current phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseAdvance {
    pub from: Phase,
    pub to: Phase,
    /// Turn number after the advance.
    pub turn_number: u64,
    /// Present when the advance completed a turn.
    pub narrative: Option<NarrativeOutput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationSession {
    pub(crate) session_id: Uuid,
    pub(crate) status: SessionStatus,
    pub(crate) current_phase: Phase,
    pub(crate) turn_number: u64,
    pub(crate) active_agents: Vec<AgentStatus>,
    pub(crate) pending_decision: Option<DecisionPoint>,
    pub(crate) metrics: SessionMetrics,
    pub(crate) config: SessionConfig,
    #[serde(default)]
    pub(crate) turn: TurnProgress,
    #[serde(default)]
    pub(crate) in_flight: Option<Uuid>,
    #[serde(default)]
    pub(crate) resume_status: Option<SessionStatus>,
    #[serde(default)]
    pub(crate) last_error: Option<PhaseFailure>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    /// Store version this copy was loaded at.
    #[serde(skip)]
    pub(crate) version: i64,
}

impl OrchestrationSession {
    /// Creates an idle session positioned at the start of turn 1.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the configuration is invalid.
    pub fn new(
        session_id: Uuid,
        config: SessionConfig,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        config.validate()?;
        Ok(Self {
            session_id,
            status: SessionStatus::Idle,
            current_phase: Phase::ContextGathering,
            turn_number: 1,
            active_agents: Vec::new(),
            pending_decision: None,
            metrics: SessionMetrics::default(),
            config,
            turn: TurnProgress::default(),
            in_flight: None,
            resume_status: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn current_phase(&self) -> Phase {
        self.current_phase
    }

    #[must_use]
    pub fn turn_number(&self) -> u64 {
        self.turn_number
    }

    #[must_use]
    pub fn pending_decision(&self) -> Option<&DecisionPoint> {
        self.pending_decision.as_ref()
    }

    #[must_use]
    pub fn metrics(&self) -> SessionMetrics {
        self.metrics
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<Uuid> {
        self.in_flight
    }

    #[must_use]
    pub fn retained_result(&self) -> Option<&PhaseResult> {
        self.turn.retained.as_ref()
    }

    #[must_use]
    pub fn history_lines(&self) -> Vec<String> {
        self.turn.history_lines()
    }

    /// # Errors
    ///
    /// Returns `DomainError::SessionTerminated` for `error` and `stopped`
    /// sessions.
    pub fn ensure_live(&self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::SessionTerminated {
                session_id: self.session_id,
                status: self.status,
            });
        }
        Ok(())
    }

    fn invalid_state(&self, reason: &str) -> DomainError {
        DomainError::InvalidState {
            session_id: self.session_id,
            status: self.status,
            reason: reason.to_owned(),
        }
    }

    /// Marks the current phase as in flight under `claim_id`.
    ///
    /// # Errors
    ///
    /// - `SessionTerminated` for `error`/`stopped` sessions.
    /// - `InvalidState` while paused, waiting on a decision, or once the
    ///   turn budget is spent.
    /// - `ConcurrencyConflict` if another call already holds the claim.
    pub fn claim(&mut self, claim_id: Uuid, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_live()?;
        match self.status {
            SessionStatus::WaitingDecision => {
                return Err(self.invalid_state("a decision is pending"));
            }
            SessionStatus::Paused => return Err(self.invalid_state("session is paused")),
            _ => {}
        }
        if self.in_flight.is_some() {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: self.session_id,
                expected: self.version,
                actual: self.version,
            });
        }
        if let Some(budget) = self.config.turn_budget
            && self.metrics.turns_completed >= budget
        {
            return Err(self.invalid_state("turn budget exhausted"));
        }
        self.in_flight = Some(claim_id);
        self.status = SessionStatus::Running;
        self.updated_at = now;
        Ok(())
    }

    /// Replaces the active agents with the statuses from the latest phase
    /// run and counts their failures.
    pub fn record_agents(&mut self, agents: Vec<AgentStatus>) {
        let failed = agents
            .iter()
            .filter(|agent| agent.state == AgentState::Failed)
            .count();
        self.metrics.agent_failures += failed as u64;
        self.active_agents = agents;
    }

    /// Moves the session to `error` after a quorum-breaking failure.
    pub fn record_phase_failure(&mut self, failure: PhaseFailure, now: DateTime<Utc>) {
        self.status = SessionStatus::Error;
        self.metrics.errors += 1;
        self.last_error = Some(failure);
        self.in_flight = None;
        self.updated_at = now;
    }

    /// Moves a session still held by `claim_id` to `error` when its phase
    /// ended without an outcome. Returns `false` if the claim is gone.
    pub fn abandon_claim(&mut self, claim_id: Uuid, now: DateTime<Utc>) -> bool {
        if self.in_flight != Some(claim_id) {
            return false;
        }
        self.status = SessionStatus::Error;
        self.metrics.errors += 1;
        self.in_flight = None;
        self.updated_at = now;
        true
    }

    /// Parks the session on `decision`, keeping `result` so the phase can
    /// finish without re-running its agents.
    pub fn suspend(&mut self, decision: DecisionPoint, result: PhaseResult, now: DateTime<Utc>) {
        self.status = SessionStatus::WaitingDecision;
        self.pending_decision = Some(decision);
        self.turn.retained = Some(result);
        self.in_flight = None;
        self.updated_at = now;
    }

    /// Finishes the current phase and moves the pointer. After `output` the
    /// turn wraps and its narrative is assembled.
    pub fn complete_phase(&mut self, result: PhaseResult, now: DateTime<Utc>) -> PhaseAdvance {
        let from = self.current_phase;
        let (to, wrapped) = from.next();
        self.turn.retained = None;
        self.turn.completed.push(result);

        let narrative = if wrapped {
            let narrative = self.assemble_narrative(now);
            self.turn_number += 1;
            self.metrics.turns_completed += 1;
            self.turn = TurnProgress::default();
            self.status = SessionStatus::Idle;
            Some(narrative)
        } else {
            self.status = SessionStatus::Running;
            None
        };

        self.current_phase = to;
        self.in_flight = None;
        self.updated_at = now;
        PhaseAdvance {
            from,
            to,
            turn_number: self.turn_number,
            narrative,
        }
    }

    fn assemble_narrative(&self, now: DateTime<Utc>) -> NarrativeOutput {
        let content = [Phase::Output, Phase::Synthesis]
            .iter()
            .find_map(|phase| {
                self.turn
                    .completed
                    .iter()
                    .rev()
                    .find(|result| result.phase == *phase)
                    .map(PhaseResult::joined_content)
                    .filter(|content| !content.is_empty())
            })
            .unwrap_or_default();

        let mut characters: Vec<String> = Vec::new();
        let mut events: Vec<String> = Vec::new();
        for contribution in self.turn.completed.iter().flat_map(|r| &r.contributions) {
            if contribution.role == AgentRole::Persona
                && !characters.contains(&contribution.agent_id)
            {
                characters.push(contribution.agent_id.clone());
            }
            for event in &contribution.reply.events {
                if !events.contains(event) {
                    events.push(event.clone());
                }
            }
        }

        NarrativeOutput {
            id: Uuid::new_v4(),
            turn_number: self.turn_number,
            content,
            characters,
            events,
            timestamp: now,
        }
    }

    /// Applies the human's (or the timer's) choice to the pending decision.
    ///
    /// # Errors
    ///
    /// - `SessionTerminated` for `error`/`stopped` sessions.
    /// - `InvalidState` when no decision is pending.
    /// - `DecisionNotFound` when `decision_id` is not the pending one.
    /// - `InvalidOption` when `option_id` is not offered.
    pub fn resolve_pending(
        &mut self,
        decision_id: Uuid,
        option_id: &str,
        auto_resolved: bool,
        now: DateTime<Utc>,
    ) -> Result<DecisionResolution, DomainError> {
        self.ensure_live()?;
        let pending = match (&self.pending_decision, self.status) {
            (Some(pending), SessionStatus::WaitingDecision) => pending,
            _ => return Err(self.invalid_state("no decision is pending")),
        };
        if pending.id() != decision_id {
            return Err(DomainError::DecisionNotFound {
                session_id: self.session_id,
                decision_id,
            });
        }
        let option = pending
            .option(option_id)
            .ok_or_else(|| DomainError::InvalidOption {
                decision_id,
                option_id: option_id.to_owned(),
            })?;

        self.turn.choices.push(ChosenOption {
            decision_id,
            option_id: option.id.clone(),
            label: option.label.clone(),
            auto_resolved,
        });
        self.pending_decision = None;
        self.status = SessionStatus::Running;
        self.metrics.decisions_resolved += 1;
        if auto_resolved {
            self.metrics.decisions_auto_resolved += 1;
        }
        self.updated_at = now;
        Ok(DecisionResolution {
            decision_id,
            option_id: option_id.to_owned(),
            auto_resolved,
            resolved_at: now,
        })
    }

    /// # Errors
    ///
    /// `SessionTerminated` for terminal sessions, `InvalidState` unless the
    /// session is `idle` or `running` with no phase in flight.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_live()?;
        match self.status {
            SessionStatus::Idle | SessionStatus::Running if self.in_flight.is_none() => {
                self.resume_status = Some(self.status);
                self.status = SessionStatus::Paused;
                self.updated_at = now;
                Ok(())
            }
            SessionStatus::Running => Err(self.invalid_state("a phase is in flight")),
            SessionStatus::Paused => Err(self.invalid_state("session is already paused")),
            _ => Err(self.invalid_state("only idle or running sessions can be paused")),
        }
    }

    /// Restores the status saved by [`pause`](Self::pause). Returns `false`
    /// when the session was not paused.
    ///
    /// # Errors
    ///
    /// `SessionTerminated` for terminal sessions.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<bool, DomainError> {
        self.ensure_live()?;
        if self.status != SessionStatus::Paused {
            return Ok(false);
        }
        self.status = self.resume_status.take().unwrap_or(SessionStatus::Idle);
        self.updated_at = now;
        Ok(true)
    }

    /// Clears an `error` session back to `idle`, restarting the current turn.
    ///
    /// # Errors
    ///
    /// `SessionTerminated` for stopped sessions, `InvalidState` for anything
    /// but `error`.
    pub fn reset(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        match self.status {
            SessionStatus::Error => {}
            SessionStatus::Stopped => return self.ensure_live(),
            _ => return Err(self.invalid_state("only a session in error can be reset")),
        }
        self.status = SessionStatus::Idle;
        self.current_phase = Phase::ContextGathering;
        self.turn = TurnProgress::default();
        self.active_agents.clear();
        self.pending_decision = None;
        self.in_flight = None;
        self.resume_status = None;
        self.last_error = None;
        self.updated_at = now;
        Ok(())
    }

    /// Stops the session for good. Returns `false` if it was already stopped.
    pub fn stop(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == SessionStatus::Stopped {
            return false;
        }
        self.status = SessionStatus::Stopped;
        self.pending_decision = None;
        self.turn.retained = None;
        self.in_flight = None;
        self.resume_status = None;
        self.updated_at = now;
        true
    }

    /// Whether the sweeper may drop this session.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        if self.status == SessionStatus::Stopped {
            return true;
        }
        self.in_flight.is_none() && now - self.updated_at > ttl
    }

    /// `pending_decision` is set exactly when the session waits on it.
    #[must_use]
    pub fn invariant_holds(&self) -> bool {
        self.pending_decision.is_some() == (self.status == SessionStatus::WaitingDecision)
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            status: self.status,
            current_phase: self.current_phase,
            turn_number: self.turn_number,
            pending_decision: self.pending_decision.clone(),
            active_agents: self.active_agents.clone(),
            metrics: self.metrics,
            version: self.version,
            last_error: self.last_error.clone(),
            turn_budget: self.config.turn_budget,
        }
    }

    /// Serializes the session for the store.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if serialization fails.
    pub fn to_state(&self) -> Result<serde_json::Value, DomainError> {
        serde_json::to_value(self)
            .map_err(|e| DomainError::Infrastructure(format!("session serialization: {e}")))
    }

    /// Reconstitutes a session from its stored form.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Infrastructure` if the stored state is not a
    /// valid session.
    pub fn from_stored(stored: &StoredSession) -> Result<Self, DomainError> {
        let mut session: Self = serde_json::from_value(stored.state.clone())
            .map_err(|e| DomainError::Infrastructure(format!("corrupt session state: {e}")))?;
        session.version = stored.version;
        Ok(session)
    }
}

/// Read model of a session, returned by every orchestrator operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub current_phase: Phase,
    pub turn_number: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_decision: Option<DecisionPoint>,
    pub active_agents: Vec<AgentStatus>,
    pub metrics: SessionMetrics,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<PhaseFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_budget: Option<u64>,
}
