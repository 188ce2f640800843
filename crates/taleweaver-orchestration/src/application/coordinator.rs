//! Agent coordinator: runs every agent of a phase concurrently and applies
//! the quorum rule to the outcome.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use taleweaver_core::clock::Clock;
use taleweaver_core::event::{EventPayload, EventPublisher, OrchestrationEvent};
use taleweaver_core::generation::{
    GenerationError, GenerationParams, GenerationRequest, GenerationService,
};
use taleweaver_core::model::{AgentRole, AgentState, AgentStatus, Phase, PhaseFailure};
use taleweaver_core::rng::DeterministicRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::phase_result::{Contribution, PhaseResult};
use crate::domain::prompt::{PromptContext, PromptRenderer};
use crate::domain::reply::AgentReply;
use crate::domain::roster::{AgentProfile, Cast, PhaseRoster};

/// Timeout, retry and quorum settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Per-call generation timeout.
    pub call_timeout_ms: u64,
    /// Retries after the first attempt for timeouts and transport errors.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Relative jitter applied to each backoff delay, `0.0..=1.0`.
    pub jitter_factor: f64,
    /// Personas that must succeed for a phase to count, capped at the
    /// number participating.
    pub persona_quorum: usize,
    pub roster: PhaseRoster,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            jitter_factor: 0.2,
            persona_quorum: 1,
            roster: PhaseRoster::default(),
        }
    }
}

/// What to run.
#[derive(Debug, Clone, Copy)]
pub struct PhaseRequest<'a> {
    pub session_id: Uuid,
    pub turn_number: u64,
    pub phase: Phase,
    pub cast: &'a Cast,
    pub params: &'a GenerationParams,
    pub setting: Option<&'a str>,
    pub scenario: Option<&'a str>,
    pub history: &'a [String],
}

/// Outcome of one phase run. `agents` holds the final status of every
/// participant whether or not the quorum held.
#[derive(Debug, Clone)]
pub struct PhaseRun {
    pub agents: Vec<AgentStatus>,
    pub outcome: Result<PhaseResult, PhaseFailure>,
}

struct AgentOutcome {
    status: AgentStatus,
    result: Result<AgentReply, GenerationError>,
}

pub struct AgentCoordinator {
    generation: Arc<dyn GenerationService>,
    prompts: Arc<dyn PromptRenderer>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    rng: Mutex<Box<dyn DeterministicRng>>,
    config: CoordinatorConfig,
}

impl std::fmt::Debug for AgentCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AgentCoordinator {
    #[must_use]
    pub fn new(
        generation: Arc<dyn GenerationService>,
        prompts: Arc<dyn PromptRenderer>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        rng: Box<dyn DeterministicRng>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            generation,
            prompts,
            publisher,
            clock,
            rng: Mutex::new(rng),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Invokes every agent taking part in `request.phase` concurrently and
    /// joins them.
    ///
    /// Director and synthesizer failures, cancellation, and persona
    /// failures below the quorum all fail the phase.
    #[instrument(skip_all, fields(session_id = %request.session_id, phase = %request.phase))]
    pub async fn run_phase(
        &self,
        request: &PhaseRequest<'_>,
        cancel: &CancellationToken,
    ) -> PhaseRun {
        let participants = self
            .config
            .roster
            .participants(request.phase, request.cast);
        debug!(participants = participants.len(), "phase started");

        let outcomes = join_all(
            participants
                .iter()
                .map(|profile| self.invoke(request, profile, cancel)),
        )
        .await;

        let run = self.evaluate(request.phase, outcomes);
        match &run.outcome {
            Ok(result) => info!(
                contributions = result.contributions.len(),
                "phase completed"
            ),
            Err(failure) => warn!(
                agent_id = %failure.agent_id,
                kind = %failure.kind,
                attempts = failure.attempts,
                "phase failed"
            ),
        }
        run
    }

    async fn invoke(
        &self,
        request: &PhaseRequest<'_>,
        profile: &AgentProfile,
        cancel: &CancellationToken,
    ) -> AgentOutcome {
        let mut status = AgentStatus::idle(&profile.agent_id, profile.role, self.clock.now());

        self.transition(request, &mut status, AgentState::Thinking);
        let prompt = self.prompts.render(&PromptContext {
            session_id: request.session_id,
            turn_number: request.turn_number,
            phase: request.phase,
            agent: profile,
            setting: request.setting,
            scenario: request.scenario,
            history: request.history,
        });
        let generation_request = GenerationRequest {
            session_id: request.session_id,
            agent_id: profile.agent_id.clone(),
            role: profile.role,
            phase: request.phase,
            prompt,
            params: request.params.clone(),
        };

        self.transition(request, &mut status, AgentState::Acting);
        match self
            .call_with_retry(&generation_request, &mut status.attempts, cancel)
            .await
        {
            Ok(text) => {
                self.transition(request, &mut status, AgentState::Waiting);
                AgentOutcome {
                    status,
                    result: Ok(AgentReply::parse(&text)),
                }
            }
            Err(err) => {
                status.failure = Some(err.kind());
                self.transition(request, &mut status, AgentState::Failed);
                AgentOutcome {
                    status,
                    result: Err(err),
                }
            }
        }
    }

    async fn call_with_retry(
        &self,
        request: &GenerationRequest,
        attempts: &mut u32,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        let timeout = Duration::from_millis(self.config.call_timeout_ms);
        loop {
            *attempts += 1;
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(GenerationError::Cancelled),
                result = tokio::time::timeout(
                    timeout,
                    AssertUnwindSafe(self.generation.generate(request)).catch_unwind(),
                ) => match result {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(panic)) => Err(GenerationError::Panicked(panic_message(panic.as_ref()))),
                    Err(_elapsed) => Err(GenerationError::Timeout(timeout)),
                }
            };

            let err = match outcome {
                Ok(text) => return Ok(text),
                Err(err) => err,
            };
            if !err.is_retryable() || *attempts > self.config.max_retries {
                return Err(err);
            }

            let delay = self.backoff_delay(*attempts);
            warn!(
                agent_id = %request.agent_id,
                attempt = *attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "agent call failed, retrying"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(GenerationError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Delay before retry number `attempt` (1-based): the base doubled per
    /// earlier retry, capped, then scaled by `1 ± jitter_factor`.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let capped = self
            .config
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.config.backoff_max_ms);
        let random = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_f64();
        let jitter = 1.0 + (random * 2.0 - 1.0) * self.config.jitter_factor;
        Duration::from_millis(((capped as f64) * jitter).round().max(0.0) as u64)
    }

    fn transition(&self, request: &PhaseRequest<'_>, status: &mut AgentStatus, to: AgentState) {
        let previous = status.state;
        status.state = to;
        status.last_update = self.clock.now();
        self.publisher.publish(OrchestrationEvent::new(
            request.session_id,
            EventPayload::AgentUpdate {
                phase: request.phase,
                previous,
                agent: status.clone(),
            },
            self.clock.as_ref(),
        ));
    }

    fn evaluate(&self, phase: Phase, outcomes: Vec<AgentOutcome>) -> PhaseRun {
        let failure_of = |outcome: &AgentOutcome| {
            outcome.result.as_ref().err().map(|err| PhaseFailure {
                phase,
                agent_id: outcome.status.agent_id.clone(),
                role: outcome.status.role,
                kind: err.kind(),
                attempts: outcome.status.attempts,
                message: err.to_string(),
            })
        };

        let fatal = outcomes
            .iter()
            .filter(|outcome| {
                outcome.status.role.is_quorum_critical()
                    || matches!(outcome.result, Err(GenerationError::Cancelled))
            })
            .find_map(failure_of);

        let fatal = fatal.or_else(|| {
            let personas: Vec<&AgentOutcome> = outcomes
                .iter()
                .filter(|outcome| outcome.status.role == AgentRole::Persona)
                .collect();
            let succeeded = personas.iter().filter(|o| o.result.is_ok()).count();
            let required = self.config.persona_quorum.min(personas.len());
            if succeeded >= required {
                return None;
            }
            personas.into_iter().find_map(failure_of).map(|mut failure| {
                failure.message = format!(
                    "{succeeded} of {required} required personas succeeded; last error: {}",
                    failure.message
                );
                failure
            })
        });

        let agents = outcomes.iter().map(|o| o.status.clone()).collect();
        let outcome = match fatal {
            Some(failure) => Err(failure),
            None => Ok(PhaseResult {
                phase,
                contributions: outcomes
                    .into_iter()
                    .filter_map(|outcome| {
                        outcome.result.ok().map(|reply| Contribution {
                            agent_id: outcome.status.agent_id,
                            role: outcome.status.role,
                            reply,
                        })
                    })
                    .collect(),
            }),
        };
        PhaseRun { agents, outcome }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "backend panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::prompt::PlainPromptRenderer;
    use chrono::{TimeZone, Utc};
    use taleweaver_core::event::EventPayload;
    use taleweaver_core::model::FailureKind;
    use taleweaver_test_support::{
        FixedClock, MockRng, RecordingPublisher, ScriptedGenerationService, ScriptedReply,
    };

    struct Fixture {
        coordinator: AgentCoordinator,
        generation: Arc<ScriptedGenerationService>,
        publisher: Arc<RecordingPublisher>,
        cast: Cast,
        params: GenerationParams,
    }

    fn fixture(generation: ScriptedGenerationService, config: CoordinatorConfig) -> Fixture {
        let generation = Arc::new(generation);
        let publisher = Arc::new(RecordingPublisher::new());
        let clock = Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        ));
        let coordinator = AgentCoordinator::new(
            generation.clone(),
            Arc::new(PlainPromptRenderer),
            publisher.clone(),
            clock,
            Box::new(MockRng),
            config,
        );
        Fixture {
            coordinator,
            generation,
            publisher,
            cast: Cast::new(vec!["mira".to_owned(), "tobin".to_owned()]),
            params: GenerationParams::default(),
        }
    }

    fn request<'a>(fixture: &'a Fixture, phase: Phase) -> PhaseRequest<'a> {
        PhaseRequest {
            session_id: Uuid::nil(),
            turn_number: 1,
            phase,
            cast: &fixture.cast,
            params: &fixture.params,
            setting: None,
            scenario: None,
            history: &[],
        }
    }

    fn transport() -> ScriptedReply {
        ScriptedReply::Fail(GenerationError::Transport("connection reset".to_owned()))
    }

    #[tokio::test]
    async fn test_planning_runs_director_and_personas_with_three_updates_each() {
        // Arrange
        let fixture = fixture(ScriptedGenerationService::new(), CoordinatorConfig::default());

        // Act
        let run = fixture
            .coordinator
            .run_phase(&request(&fixture, Phase::Planning), &CancellationToken::new())
            .await;

        // Assert
        let result = run.outcome.unwrap();
        assert_eq!(result.contributions.len(), 3);
        assert!(run.agents.iter().all(|a| a.state == AgentState::Waiting));
        let updates = fixture.publisher.events_of_type("agent_update");
        assert_eq!(updates.len(), 9);
        let mira_states: Vec<AgentState> = updates
            .iter()
            .filter_map(|event| match &event.payload {
                EventPayload::AgentUpdate { previous, agent, .. } if agent.agent_id == "mira" => {
                    Some(*previous)
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            mira_states,
            vec![AgentState::Idle, AgentState::Thinking, AgentState::Acting]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_persona_failure_within_quorum_is_absorbed() {
        // Arrange
        let generation = ScriptedGenerationService::new().always("tobin", transport());
        let fixture = fixture(generation, CoordinatorConfig::default());

        // Act
        let run = fixture
            .coordinator
            .run_phase(&request(&fixture, Phase::Planning), &CancellationToken::new())
            .await;

        // Assert
        let result = run.outcome.unwrap();
        assert_eq!(result.contributions.len(), 2);
        let tobin = run.agents.iter().find(|a| a.agent_id == "tobin").unwrap();
        assert_eq!(tobin.state, AgentState::Failed);
        assert_eq!(tobin.failure, Some(FailureKind::Transport));
        assert_eq!(tobin.attempts, 3);
        assert_eq!(fixture.generation.call_count("tobin"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_director_timeout_fails_phase_after_retries() {
        // Arrange
        let generation = ScriptedGenerationService::new().always("director", ScriptedReply::Hang);
        let fixture = fixture(generation, CoordinatorConfig::default());

        // Act
        let run = fixture
            .coordinator
            .run_phase(
                &request(&fixture, Phase::ContextGathering),
                &CancellationToken::new(),
            )
            .await;

        // Assert
        let failure = run.outcome.unwrap_err();
        assert_eq!(failure.agent_id, "director");
        assert_eq!(failure.role, AgentRole::Director);
        assert_eq!(failure.kind, FailureKind::Timeout);
        assert_eq!(failure.attempts, 3);
    }

    #[tokio::test]
    async fn test_rejected_call_is_not_retried() {
        let generation = ScriptedGenerationService::new().always(
            "synthesizer",
            ScriptedReply::Fail(GenerationError::Rejected("content policy".to_owned())),
        );
        let fixture = fixture(generation, CoordinatorConfig::default());

        let run = fixture
            .coordinator
            .run_phase(&request(&fixture, Phase::Synthesis), &CancellationToken::new())
            .await;

        let failure = run.outcome.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Rejected);
        assert_eq!(failure.attempts, 1);
        assert_eq!(fixture.generation.call_count("synthesizer"), 1);
    }

    #[tokio::test]
    async fn test_panicking_backend_fails_the_agent_without_retry() {
        // Arrange
        let generation = ScriptedGenerationService::new()
            .always("director", ScriptedReply::Panic("prompt index out of range"));
        let fixture = fixture(generation, CoordinatorConfig::default());

        // Act
        let run = fixture
            .coordinator
            .run_phase(&request(&fixture, Phase::Planning), &CancellationToken::new())
            .await;

        // Assert
        let failure = run.outcome.unwrap_err();
        assert_eq!(failure.agent_id, "director");
        assert_eq!(failure.kind, FailureKind::Internal);
        assert_eq!(failure.attempts, 1);
        assert!(failure.message.contains("prompt index out of range"));
        assert_eq!(fixture.generation.call_count("director"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_personas_failing_breaks_quorum() {
        let generation = ScriptedGenerationService::new()
            .always("mira", transport())
            .always("tobin", transport());
        let fixture = fixture(generation, CoordinatorConfig::default());

        let run = fixture
            .coordinator
            .run_phase(&request(&fixture, Phase::Execution), &CancellationToken::new())
            .await;

        let failure = run.outcome.unwrap_err();
        assert_eq!(failure.role, AgentRole::Persona);
        assert!(failure.message.contains("0 of 1 required personas"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success_counts_attempts() {
        let generation = ScriptedGenerationService::new()
            .then("director", transport())
            .then("director", ScriptedReply::Text("The fog lifts.".to_owned()));
        let fixture = fixture(generation, CoordinatorConfig::default());

        let run = fixture
            .coordinator
            .run_phase(
                &request(&fixture, Phase::ContextGathering),
                &CancellationToken::new(),
            )
            .await;

        let result = run.outcome.unwrap();
        assert_eq!(result.contributions[0].reply.content, "The fog lifts.");
        assert_eq!(run.agents[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_cancellation_fails_the_phase() {
        // Arrange
        let generation = ScriptedGenerationService::new().always("mira", ScriptedReply::Hang);
        let fixture = fixture(generation, CoordinatorConfig::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });

        // Act
        let run = fixture
            .coordinator
            .run_phase(&request(&fixture, Phase::Execution), &cancel)
            .await;

        // Assert
        let failure = run.outcome.unwrap_err();
        assert_eq!(failure.kind, FailureKind::Cancelled);
        assert_eq!(failure.agent_id, "mira");
    }

    #[test]
    fn test_backoff_doubles_and_caps_without_jitter() {
        let config = CoordinatorConfig {
            backoff_base_ms: 500,
            backoff_max_ms: 1_500,
            jitter_factor: 0.0,
            ..CoordinatorConfig::default()
        };
        let fixture = fixture(ScriptedGenerationService::new(), config);

        assert_eq!(fixture.coordinator.backoff_delay(1), Duration::from_millis(500));
        assert_eq!(fixture.coordinator.backoff_delay(2), Duration::from_millis(1_000));
        assert_eq!(fixture.coordinator.backoff_delay(3), Duration::from_millis(1_500));
    }
}
