//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

use crate::model::{PhaseFailure, SessionStatus};

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No session exists for the identifier.
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// The referenced decision is not the session's pending decision.
    #[error("decision {decision_id} is not pending on session {session_id}")]
    DecisionNotFound {
        /// The session that was addressed.
        session_id: Uuid,
        /// The decision identifier supplied by the caller.
        decision_id: Uuid,
    },

    /// The operation is not valid for the session's current status.
    #[error("invalid state for session {session_id} ({status}): {reason}")]
    InvalidState {
        /// The session that rejected the operation.
        session_id: Uuid,
        /// The status the session was in.
        status: SessionStatus,
        /// Why the operation was rejected.
        reason: String,
    },

    /// The chosen option is not among the pending decision's options.
    #[error("option {option_id:?} is not offered by decision {decision_id}")]
    InvalidOption {
        /// The pending decision.
        decision_id: Uuid,
        /// The option the caller supplied.
        option_id: String,
    },

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on session {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The session that had the conflict.
        aggregate_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// The session is stopped, or in an error state that has not been reset.
    #[error("session {session_id} is terminated ({status})")]
    SessionTerminated {
        /// The terminated session.
        session_id: Uuid,
        /// Either `stopped` or `error`.
        status: SessionStatus,
    },

    /// A phase failed because its quorum rule was violated.
    #[error("phase failed on session {session_id}: {failure}")]
    PhaseFailed {
        /// The session that moved to `error`.
        session_id: Uuid,
        /// The agent failure that broke the quorum.
        failure: PhaseFailure,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` if the caller may retry the whole operation unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_concurrency_conflict_is_retryable() {
        let id = Uuid::new_v4();
        assert!(
            DomainError::ConcurrencyConflict {
                aggregate_id: id,
                expected: 1,
                actual: 2,
            }
            .is_retryable()
        );
        assert!(!DomainError::SessionNotFound(id).is_retryable());
        assert!(
            !DomainError::InvalidState {
                session_id: id,
                status: SessionStatus::WaitingDecision,
                reason: "decision pending".to_owned(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_invalid_state_message_names_status() {
        let id = Uuid::new_v4();
        let err = DomainError::InvalidState {
            session_id: id,
            status: SessionStatus::Paused,
            reason: "session is paused".to_owned(),
        };
        assert!(err.to_string().contains("paused"));
    }
}
