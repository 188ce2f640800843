//! Turn orchestrator: the only component that moves a session's phase
//! pointer.
//!
//! Every operation loads the session from the store, applies one state
//! transition and commits it with a compare-and-swap. `advance_turn`
//! additionally claims the session for the duration of the phase so that
//! concurrent callers never both run it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use futures::FutureExt;
use taleweaver_core::clock::Clock;
use taleweaver_core::decision::DecisionResolution;
use taleweaver_core::error::DomainError;
use taleweaver_core::event::{EventPayload, EventPublisher, OrchestrationEvent};
use taleweaver_core::model::{PhaseFailure, SessionStatus};
use taleweaver_core::sink::NarrativeSink;
use taleweaver_core::store::SessionStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::coordinator::{AgentCoordinator, PhaseRequest, panic_message};
use super::pause::PauseController;
use super::persistence::{insert_session, load_session, save_session};
use super::settings::{Collaborators, EngineSettings, SessionPolicy};
use crate::domain::detector::{DecisionPointDetector, TurnContext};
use crate::domain::session::{OrchestrationSession, SessionConfig, SessionSnapshot};

/// Commit attempts `stop` makes against concurrent writers.
const STOP_ATTEMPTS: usize = 5;

pub struct TurnOrchestrator {
    store: Arc<dyn SessionStore>,
    publisher: Arc<dyn EventPublisher>,
    sink: Arc<dyn NarrativeSink>,
    clock: Arc<dyn Clock>,
    coordinator: AgentCoordinator,
    detector: DecisionPointDetector,
    pause: Arc<PauseController>,
    in_flight: Mutex<HashMap<Uuid, CancellationToken>>,
    policy: SessionPolicy,
}

impl std::fmt::Debug for TurnOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnOrchestrator")
            .field("coordinator", &self.coordinator)
            .field("detector", &self.detector)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl TurnOrchestrator {
    #[must_use]
    pub fn new(collaborators: Collaborators, settings: EngineSettings) -> Self {
        let Collaborators {
            store,
            publisher,
            generation,
            prompts,
            sink,
            clock,
            rng,
        } = collaborators;
        let coordinator = AgentCoordinator::new(
            generation,
            prompts,
            Arc::clone(&publisher),
            Arc::clone(&clock),
            rng,
            settings.coordinator,
        );
        let pause = Arc::new(PauseController::new(
            Arc::clone(&store),
            Arc::clone(&publisher),
            Arc::clone(&clock),
        ));
        Self {
            store,
            publisher,
            sink,
            clock,
            coordinator,
            detector: DecisionPointDetector::new(settings.detector),
            pause,
            in_flight: Mutex::new(HashMap::new()),
            policy: settings.sessions,
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<Uuid, CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, session_id: Uuid, payload: EventPayload) {
        self.publisher.publish(OrchestrationEvent::new(
            session_id,
            payload,
            self.clock.as_ref(),
        ));
    }

    /// Creates an idle session. No event is emitted.
    ///
    /// # Errors
    ///
    /// `Validation` for an invalid configuration, or a store error.
    #[instrument(skip_all, fields(personas = config.cast.personas.len()))]
    pub async fn start_session(&self, config: SessionConfig) -> Result<SessionSnapshot, DomainError> {
        let mut session = OrchestrationSession::new(Uuid::new_v4(), config, self.clock.now())?;
        insert_session(self.store.as_ref(), &mut session).await?;
        info!(session_id = %session.session_id(), "session started");
        Ok(session.snapshot())
    }

    /// # Errors
    ///
    /// `SessionNotFound`, or a store error.
    pub async fn snapshot(&self, session_id: Uuid) -> Result<SessionSnapshot, DomainError> {
        Ok(load_session(self.store.as_ref(), session_id).await?.snapshot())
    }

    /// Runs the current phase and moves the phase pointer, or parks the
    /// session on a decision raised by the phase.
    ///
    /// # Errors
    ///
    /// - `SessionTerminated` on `error`/`stopped` sessions, or when the
    ///   session is stopped while the phase runs.
    /// - `InvalidState` while paused, waiting on a decision, or with the
    ///   turn budget spent.
    /// - `ConcurrencyConflict` when another call holds the session.
    /// - `PhaseFailed` when the phase quorum breaks; the session is then in
    ///   `error`.
    #[instrument(skip(self))]
    pub async fn advance_turn(self: &Arc<Self>, session_id: Uuid) -> Result<SessionSnapshot, DomainError> {
        let mut session = load_session(self.store.as_ref(), session_id).await?;
        let now = self.clock.now();
        let claim_id = Uuid::new_v4();
        session.claim(claim_id, now)?;
        save_session(self.store.as_ref(), &mut session, now).await?;

        let cancel = CancellationToken::new();
        self.in_flight().insert(session_id, cancel.clone());
        debug!(phase = %session.current_phase(), turn = session.turn_number(), "session claimed");

        // Runs detached so a dropped caller cannot strand the claim.
        let orchestrator = Arc::clone(self);
        let task = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(orchestrator.run_claimed(session, &cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(DomainError::Infrastructure(format!(
                        "phase task panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                });
            if let Err(err) = &outcome
                && matches!(err, DomainError::Infrastructure(_))
            {
                orchestrator.abandon_claim(session_id, claim_id, err).await;
            }
            orchestrator.in_flight().remove(&session_id);
            outcome
        });
        task.await
            .map_err(|err| DomainError::Infrastructure(format!("phase task failed: {err}")))?
    }

    /// Moves a session whose phase ended without an outcome to `error`, so
    /// that `reset` can recover it. No-op once the claim was released.
    async fn abandon_claim(&self, session_id: Uuid, claim_id: Uuid, cause: &DomainError) {
        let released = async {
            let mut session = load_session(self.store.as_ref(), session_id).await?;
            let now = self.clock.now();
            if !session.abandon_claim(claim_id, now) {
                return Ok(false);
            }
            save_session(self.store.as_ref(), &mut session, now).await?;
            Ok::<_, DomainError>(true)
        }
        .await;
        match released {
            Ok(true) => error!(
                %session_id,
                error = %cause,
                "phase ended without an outcome, session moved to error"
            ),
            Ok(false) => {}
            Err(err) => error!(
                %session_id,
                error = %err,
                cause = %cause,
                "abandoned claim could not be released"
            ),
        }
    }

    async fn run_claimed(
        &self,
        mut session: OrchestrationSession,
        cancel: &CancellationToken,
    ) -> Result<SessionSnapshot, DomainError> {
        let session_id = session.session_id();
        let phase = session.current_phase();

        let (result, fresh) = if let Some(retained) = session.retained_result().cloned() {
            debug!(%phase, "finishing phase from retained output");
            (retained, false)
        } else {
            let history = session.history_lines();
            let config = session.config();
            let request = PhaseRequest {
                session_id,
                turn_number: session.turn_number(),
                phase,
                cast: &config.cast,
                params: &config.params,
                setting: config.setting.as_deref(),
                scenario: config.scenario.as_deref(),
                history: &history,
            };
            let run = self.coordinator.run_phase(&request, cancel).await;
            session.record_agents(run.agents);
            match run.outcome {
                Ok(result) => (result, true),
                Err(failure) => return self.fail_phase(session, failure).await,
            }
        };

        let decision = if fresh {
            self.detector.detect(&TurnContext {
                phase,
                result: &result,
                now: self.clock.now(),
            })
        } else {
            None
        };
        if let Some(decision) = decision {
            if let Err(err) = self.pause.suspend(&mut session, decision, result).await {
                return Err(self.explain_conflict(session_id, err).await);
            }
            // An already-expired decision may have been resolved meanwhile.
            return self.snapshot(session_id).await;
        }

        let now = self.clock.now();
        let advance = session.complete_phase(result, now);
        self.commit(&mut session, now).await?;
        info!(
            from = %advance.from,
            to = %advance.to,
            turn = advance.turn_number,
            "phase completed"
        );
        self.publish(
            session_id,
            EventPayload::PhaseChange {
                from: advance.from,
                to: advance.to,
                turn_number: advance.turn_number,
                status: session.status(),
            },
        );

        if let Some(output) = advance.narrative {
            self.publish(
                session_id,
                EventPayload::NarrativeOutput {
                    output: output.clone(),
                },
            );
            if let Err(err) = self.sink.persist(session_id, &output).await {
                warn!(%session_id, turn = output.turn_number, error = %err, "narrative hand-off failed");
            }
        }
        Ok(session.snapshot())
    }

    async fn fail_phase(
        &self,
        mut session: OrchestrationSession,
        failure: PhaseFailure,
    ) -> Result<SessionSnapshot, DomainError> {
        let session_id = session.session_id();
        let now = self.clock.now();
        session.record_phase_failure(failure.clone(), now);
        self.commit(&mut session, now).await?;
        error!(
            %session_id,
            phase = %failure.phase,
            agent_id = %failure.agent_id,
            role = %failure.role,
            kind = %failure.kind,
            attempts = failure.attempts,
            "phase quorum broken"
        );
        self.publish(
            session_id,
            EventPayload::Error {
                failure: failure.clone(),
            },
        );
        Err(DomainError::PhaseFailed {
            session_id,
            failure,
        })
    }

    /// Commits the outcome of a claimed phase.
    async fn commit(
        &self,
        session: &mut OrchestrationSession,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        match save_session(self.store.as_ref(), session, now).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.explain_conflict(session.session_id(), err).await),
        }
    }

    /// A claimed session only changes under us when it was stopped or swept.
    async fn explain_conflict(&self, session_id: Uuid, err: DomainError) -> DomainError {
        if !matches!(
            err,
            DomainError::ConcurrencyConflict { .. } | DomainError::SessionNotFound(_)
        ) {
            return err;
        }
        match self.store.get(session_id).await {
            Ok(None) => DomainError::SessionTerminated {
                session_id,
                status: SessionStatus::Stopped,
            },
            Ok(Some(stored)) => match OrchestrationSession::from_stored(&stored) {
                Ok(current) if current.status() == SessionStatus::Stopped => {
                    DomainError::SessionTerminated {
                        session_id,
                        status: SessionStatus::Stopped,
                    }
                }
                _ => err,
            },
            Err(_) => err,
        }
    }

    /// # Errors
    ///
    /// `InvalidState` unless the session is idle or between phases,
    /// `SessionTerminated` for terminal sessions.
    #[instrument(skip(self))]
    pub async fn pause(&self, session_id: Uuid) -> Result<SessionSnapshot, DomainError> {
        let mut session = load_session(self.store.as_ref(), session_id).await?;
        let now = self.clock.now();
        session.pause(now)?;
        save_session(self.store.as_ref(), &mut session, now).await?;
        info!("session paused");
        Ok(session.snapshot())
    }

    /// Restores a paused session. Any other live status is left as is.
    ///
    /// # Errors
    ///
    /// `SessionTerminated` for terminal sessions.
    #[instrument(skip(self))]
    pub async fn resume(&self, session_id: Uuid) -> Result<SessionSnapshot, DomainError> {
        let mut session = load_session(self.store.as_ref(), session_id).await?;
        let now = self.clock.now();
        if session.resume(now)? {
            save_session(self.store.as_ref(), &mut session, now).await?;
            info!(status = %session.status(), "session resumed");
        }
        Ok(session.snapshot())
    }

    /// Clears an `error` session so the current turn can be retried from
    /// `context_gathering`.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the session is in `error`.
    #[instrument(skip(self))]
    pub async fn reset(&self, session_id: Uuid) -> Result<SessionSnapshot, DomainError> {
        let mut session = load_session(self.store.as_ref(), session_id).await?;
        let now = self.clock.now();
        session.reset(now)?;
        save_session(self.store.as_ref(), &mut session, now).await?;
        info!("session reset");
        Ok(session.snapshot())
    }

    /// Stops the session, cancelling any agent calls in flight and
    /// discarding a pending decision. Stopping twice is a no-op.
    ///
    /// # Errors
    ///
    /// `SessionNotFound`, or a store error.
    #[instrument(skip(self))]
    pub async fn stop(&self, session_id: Uuid) -> Result<SessionSnapshot, DomainError> {
        if let Some(cancel) = self.in_flight().get(&session_id) {
            cancel.cancel();
        }

        let mut attempt = 0;
        let snapshot = loop {
            attempt += 1;
            let mut session = load_session(self.store.as_ref(), session_id).await?;
            let now = self.clock.now();
            if !session.stop(now) {
                break session.snapshot();
            }
            match save_session(self.store.as_ref(), &mut session, now).await {
                Ok(()) => {
                    info!("session stopped");
                    break session.snapshot();
                }
                Err(err) if err.is_retryable() && attempt < STOP_ATTEMPTS => {
                    debug!(attempt, "stop conflicted, reloading");
                }
                Err(err) => return Err(err),
            }
        };

        self.pause.forget(session_id);
        self.publisher.close(session_id);
        Ok(snapshot)
    }

    /// Resolves the pending decision with `option_id`. The next
    /// `advance_turn` finishes the phase that raised it.
    ///
    /// # Errors
    ///
    /// `InvalidState` with no pending decision, `DecisionNotFound`,
    /// `InvalidOption`, `SessionTerminated`, or `ConcurrencyConflict`.
    #[instrument(skip(self))]
    pub async fn resolve_decision(
        &self,
        session_id: Uuid,
        decision_id: Uuid,
        option_id: &str,
    ) -> Result<SessionSnapshot, DomainError> {
        let (snapshot, _) = self
            .pause
            .resolve(session_id, decision_id, option_id, false)
            .await?;
        Ok(snapshot)
    }

    /// Waits for the pending decision to be resolved.
    ///
    /// # Errors
    ///
    /// See [`PauseController::await_resolution`].
    pub async fn await_resolution(&self, session_id: Uuid) -> Result<DecisionResolution, DomainError> {
        self.pause.await_resolution(session_id).await
    }

    /// Drops stopped sessions and sessions untouched for longer than the
    /// configured TTL. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn expire_sessions(&self, now: DateTime<Utc>) -> Result<usize, DomainError> {
        let ttl = i64::try_from(self.policy.ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        let mut removed = 0;
        for stored in self.store.list().await? {
            let session = match OrchestrationSession::from_stored(&stored) {
                Ok(session) => session,
                Err(err) => {
                    warn!(session_id = %stored.session_id, error = %err, "skipping unreadable session");
                    continue;
                }
            };
            if session.is_expired(now, ttl) && self.store.remove(stored.session_id).await? {
                self.pause.forget(stored.session_id);
                self.publisher.close(stored.session_id);
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "expired sessions swept");
        }
        Ok(removed)
    }
}
