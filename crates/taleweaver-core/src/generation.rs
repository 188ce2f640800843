//! Generation service contract.
//!
//! The content-generation backend is a black box: it accepts a rendered
//! prompt and returns text or fails. Timeouts are enforced by the caller;
//! cancellation is by abandoning the returned future.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{AgentRole, FailureKind, Phase};

/// Sampling parameters passed through to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// One agent call.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    /// The session on whose behalf the call is made.
    pub session_id: Uuid,
    /// The calling agent.
    pub agent_id: String,
    /// The calling agent's role.
    pub role: AgentRole,
    /// The phase being run.
    pub phase: Phase,
    /// Rendered prompt, opaque to the engine.
    pub prompt: String,
    /// Sampling parameters.
    pub params: GenerationParams,
}

/// Failure of a single generation call.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    /// The call exceeded its timeout.
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),

    /// The backend could not be reached or returned a server error.
    #[error("generation transport error: {0}")]
    Transport(String),

    /// The backend refused the request.
    #[error("generation rejected: {0}")]
    Rejected(String),

    /// The call was abandoned because the session stopped.
    #[error("generation cancelled")]
    Cancelled,

    /// The backend panicked while serving the call.
    #[error("generation panicked: {0}")]
    Panicked(String),
}

impl GenerationError {
    /// Timeouts and transport failures are retried; the rest are final.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }

    /// The failure kind recorded in the agent's status.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::Transport(_) => FailureKind::Transport,
            Self::Rejected(_) => FailureKind::Rejected,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Panicked(_) => FailureKind::Internal,
        }
    }
}

/// Content-generation backend.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Generate text for the request.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}
