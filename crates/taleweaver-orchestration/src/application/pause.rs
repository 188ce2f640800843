//! Pause controller: parks sessions on a decision and wakes them up again.
//!
//! The suspension itself is persisted state (`waiting_decision`). What lives
//! here is only the in-process plumbing around it: a `watch` channel per
//! session for `await_resolution` and the expiry timer that auto-resolves
//! unanswered decisions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use taleweaver_core::clock::Clock;
use taleweaver_core::decision::{DecisionPoint, DecisionResolution};
use taleweaver_core::error::DomainError;
use taleweaver_core::event::{EventPayload, EventPublisher, OrchestrationEvent};
use taleweaver_core::model::SessionStatus;
use taleweaver_core::store::SessionStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::persistence::{load_session, save_session};
use crate::domain::phase_result::PhaseResult;
use crate::domain::session::{OrchestrationSession, SessionSnapshot};

/// Commit attempts for timer-driven resolution before giving up.
const AUTO_RESOLVE_ATTEMPTS: usize = 3;

struct Waiter {
    decision_id: Uuid,
    sender: watch::Sender<Option<DecisionResolution>>,
    timer: Option<JoinHandle<()>>,
}

pub struct PauseController {
    store: Arc<dyn SessionStore>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    waiters: Mutex<HashMap<Uuid, Waiter>>,
}

impl std::fmt::Debug for PauseController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PauseController")
            .field("armed", &self.waiters().len())
            .finish_non_exhaustive()
    }
}

impl PauseController {
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            waiters: Mutex::new(HashMap::new()),
        }
    }

    fn waiters(&self) -> MutexGuard<'_, HashMap<Uuid, Waiter>> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves `session` to `waiting_decision`, commits it, announces the
    /// decision and arms its expiry.
    ///
    /// The resolution channel is registered before the commit, so a
    /// resolution landing right after it still reaches waiters.
    ///
    /// # Errors
    ///
    /// Returns the store error if the commit fails; nothing is published or
    /// armed in that case.
    #[instrument(skip_all, fields(session_id = %session.session_id(), decision_id = %decision.id()))]
    pub async fn suspend(
        self: &Arc<Self>,
        session: &mut OrchestrationSession,
        decision: DecisionPoint,
        retained: PhaseResult,
    ) -> Result<(), DomainError> {
        let session_id = session.session_id();
        let now = self.clock.now();
        session.suspend(decision.clone(), retained, now);
        self.register(session_id, decision.id());
        if let Err(err) = save_session(self.store.as_ref(), session, now).await {
            self.release(session_id, decision.id());
            return Err(err);
        }

        info!(
            kind = ?decision.kind(),
            urgency = ?decision.urgency(),
            options = decision.options().len(),
            "session suspended on decision"
        );
        self.publisher.publish(OrchestrationEvent::new(
            session_id,
            EventPayload::DecisionRequired {
                decision: decision.clone(),
            },
            self.clock.as_ref(),
        ));
        self.start_expiry(session_id, &decision).await;
        Ok(())
    }

    /// Registers the resolution channel for `decision` and starts its
    /// expiry timer, provided the decision is still pending in the store.
    /// A decision that has already expired is auto-resolved before this
    /// returns.
    pub async fn arm(self: &Arc<Self>, session_id: Uuid, decision: &DecisionPoint) {
        let decision_id = decision.id();
        self.register(session_id, decision_id);

        let pending = load_session(self.store.as_ref(), session_id)
            .await
            .ok()
            .and_then(|session| session.pending_decision().map(DecisionPoint::id));
        if pending != Some(decision_id) {
            debug!(%session_id, %decision_id, "decision no longer pending, not arming");
            self.release(session_id, decision_id);
            return;
        }
        self.start_expiry(session_id, decision).await;
    }

    fn register(&self, session_id: Uuid, decision_id: Uuid) {
        let (sender, _) = watch::channel(None);
        let previous = self.waiters().insert(
            session_id,
            Waiter {
                decision_id,
                sender,
                timer: None,
            },
        );
        if let Some(timer) = previous.and_then(|waiter| waiter.timer) {
            timer.abort();
        }
    }

    /// Drops the channel for `decision_id`, leaving newer ones alone.
    fn release(&self, session_id: Uuid, decision_id: Uuid) {
        let mut waiters = self.waiters();
        if waiters
            .get(&session_id)
            .is_some_and(|waiter| waiter.decision_id == decision_id)
            && let Some(timer) = waiters.remove(&session_id).and_then(|waiter| waiter.timer)
        {
            timer.abort();
        }
    }

    async fn start_expiry(self: &Arc<Self>, session_id: Uuid, decision: &DecisionPoint) {
        let decision_id = decision.id();
        let Some(expires_at) = decision.expires_at() else {
            return;
        };
        let Some(delay) = self.clock.until(expires_at) else {
            debug!(%session_id, %decision_id, "decision already expired");
            if let Err(err) = self.auto_resolve(session_id, decision_id).await {
                warn!(%session_id, %decision_id, error = %err, "auto-resolution failed");
            }
            return;
        };

        let controller = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = controller.auto_resolve(session_id, decision_id).await {
                warn!(%session_id, %decision_id, error = %err, "auto-resolution failed");
            }
        });
        match self
            .waiters()
            .get_mut(&session_id)
            .filter(|waiter| waiter.decision_id == decision_id)
        {
            Some(waiter) => waiter.timer = Some(timer),
            // Resolved between the commit and here.
            None => timer.abort(),
        }
    }

    /// Waits until the session's current decision is resolved, explicitly
    /// or by expiry.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` if the session does not exist.
    /// - `InvalidState` if the session has no decision to wait for.
    /// - `SessionTerminated` if the session is stopped while waiting.
    pub async fn await_resolution(
        self: &Arc<Self>,
        session_id: Uuid,
    ) -> Result<DecisionResolution, DomainError> {
        let mut receiver = self.receiver(session_id);
        if receiver.is_none() {
            let session = self.pending_session(session_id).await?;
            if let Some(decision) = session.pending_decision() {
                // Suspended by an earlier process: re-arm from persisted state.
                self.arm(session_id, decision).await;
                receiver = self.receiver(session_id);
            }
        }
        let Some(mut receiver) = receiver else {
            // Resolved while re-arming.
            self.pending_session(session_id).await?;
            return Err(DomainError::Infrastructure(
                "decision could not be armed".to_owned(),
            ));
        };

        let resolution = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| DomainError::SessionTerminated {
                session_id,
                status: SessionStatus::Stopped,
            })?
            .clone();
        resolution.ok_or_else(|| DomainError::Infrastructure("empty resolution".to_owned()))
    }

    /// Loads a live session that has a decision pending.
    async fn pending_session(&self, session_id: Uuid) -> Result<OrchestrationSession, DomainError> {
        let session = load_session(self.store.as_ref(), session_id).await?;
        session.ensure_live()?;
        if session.pending_decision().is_none() {
            return Err(DomainError::InvalidState {
                session_id,
                status: session.status(),
                reason: "no decision is pending".to_owned(),
            });
        }
        Ok(session)
    }

    fn receiver(&self, session_id: Uuid) -> Option<watch::Receiver<Option<DecisionResolution>>> {
        self.waiters()
            .get(&session_id)
            .map(|waiter| waiter.sender.subscribe())
    }

    /// Applies a choice to the pending decision, commits it, emits
    /// `decision_resolved` and wakes anyone awaiting the resolution.
    ///
    /// Explicit resolutions surface store conflicts to the caller;
    /// automatic ones reload and retry a few times.
    ///
    /// # Errors
    ///
    /// Propagates the session's validation errors (`InvalidState`,
    /// `DecisionNotFound`, `InvalidOption`, `SessionTerminated`) and store
    /// errors.
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        session_id: Uuid,
        decision_id: Uuid,
        option_id: &str,
        auto_resolved: bool,
    ) -> Result<(SessionSnapshot, DecisionResolution), DomainError> {
        let attempts = if auto_resolved {
            AUTO_RESOLVE_ATTEMPTS
        } else {
            1
        };
        let mut attempt = 0;
        let (session, resolution) = loop {
            attempt += 1;
            let mut session = load_session(self.store.as_ref(), session_id).await?;
            let now = self.clock.now();
            let resolution = session.resolve_pending(decision_id, option_id, auto_resolved, now)?;
            match save_session(self.store.as_ref(), &mut session, now).await {
                Ok(()) => break (session, resolution),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    debug!(attempt, "resolution conflicted, reloading");
                }
                Err(err) => return Err(err),
            }
        };

        info!("decision resolved");
        self.publisher.publish(OrchestrationEvent::new(
            session_id,
            EventPayload::DecisionResolved {
                decision_id,
                option_id: resolution.option_id.clone(),
                auto_resolved,
            },
            self.clock.as_ref(),
        ));
        self.notify(session_id, &resolution);
        Ok((session.snapshot(), resolution))
    }

    /// Hands the resolution to current waiters and retires the channel.
    /// Subscribed receivers keep the value after the sender is gone.
    fn notify(&self, session_id: Uuid, resolution: &DecisionResolution) {
        let mut waiters = self.waiters();
        if !waiters
            .get(&session_id)
            .is_some_and(|waiter| waiter.decision_id == resolution.decision_id)
        {
            return;
        }
        let Some(waiter) = waiters.remove(&session_id) else {
            return;
        };
        waiter.sender.send_replace(Some(resolution.clone()));
        // The timer task is the caller when auto-resolving; it ends on its own.
        if let Some(timer) = waiter.timer
            && !resolution.auto_resolved
        {
            timer.abort();
        }
    }

    /// Resolves the pending decision with its default option if it is still
    /// the one identified by `decision_id`.
    ///
    /// # Errors
    ///
    /// Store errors, or a conflict that outlasted the retries.
    pub async fn auto_resolve(&self, session_id: Uuid, decision_id: Uuid) -> Result<(), DomainError> {
        let session = load_session(self.store.as_ref(), session_id).await?;
        let Some(decision) = session
            .pending_decision()
            .filter(|decision| decision.id() == decision_id)
        else {
            debug!(%session_id, %decision_id, "decision no longer pending");
            return Ok(());
        };
        let Some(option_id) = decision.default_option().map(|option| option.id.clone()) else {
            return Err(DomainError::Infrastructure(format!(
                "decision {decision_id} has no option to fall back on"
            )));
        };

        match self.resolve(session_id, decision_id, &option_id, true).await {
            Ok(_) => Ok(()),
            // Lost the race against an explicit resolution or a stop.
            Err(
                DomainError::InvalidState { .. }
                | DomainError::DecisionNotFound { .. }
                | DomainError::SessionTerminated { .. },
            ) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Drops the session's channel and timer. Pending waiters see the
    /// session as terminated.
    pub fn forget(&self, session_id: Uuid) {
        if let Some(waiter) = self.waiters().remove(&session_id)
            && let Some(timer) = waiter.timer
        {
            timer.abort();
        }
    }
}
