//! Taleweaver API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use taleweaver_core::error::DomainError;
use taleweaver_core::model::{PhaseFailure, SessionStatus};
use thiserror::Error;

/// Startup and runtime errors for the API server.
#[derive(Debug, Error)]
pub enum AppError {
    /// The configuration file or an environment override is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Tracing or exporter setup failed.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
    /// Session status, for terminated sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    /// The agent failure that broke a phase.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<PhaseFailure>,
}

/// HTTP-layer wrapper around `DomainError` that implements `IntoResponse`.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status_code, error_code) = match &self.0 {
            DomainError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
            DomainError::DecisionNotFound { .. } => (StatusCode::NOT_FOUND, "decision_not_found"),
            DomainError::InvalidState { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_state"),
            DomainError::InvalidOption { .. } => (StatusCode::BAD_REQUEST, "invalid_option"),
            DomainError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            DomainError::ConcurrencyConflict { .. } => {
                (StatusCode::CONFLICT, "concurrency_conflict")
            }
            DomainError::SessionTerminated { .. } => (StatusCode::GONE, "session_terminated"),
            DomainError::PhaseFailed { .. } => (StatusCode::BAD_GATEWAY, "phase_failed"),
            DomainError::Infrastructure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "infrastructure_error")
            }
        };

        let message = self.0.to_string();
        let (status, failure) = match self.0 {
            DomainError::SessionTerminated { status, .. } => (Some(status), None),
            DomainError::PhaseFailed { failure, .. } => (None, Some(failure)),
            _ => (None, None),
        };

        let body = ErrorBody {
            error: error_code,
            message,
            status,
            failure,
        };

        (status_code, Json(body)).into_response()
    }
}
