//! Routes for orchestration sessions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Json, Router, routing::get, routing::post};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use taleweaver_core::error::DomainError;
use taleweaver_core::generation::GenerationParams;
use taleweaver_core::model::SessionStatus;
use taleweaver_orchestration::domain::roster::Cast;
use taleweaver_orchestration::domain::session::{SessionConfig, SessionSnapshot};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /.
#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    /// One agent identifier per character.
    pub personas: Vec<String>,
    pub director: Option<String>,
    pub synthesizer: Option<String>,
    pub turn_budget: Option<u64>,
    pub setting: Option<String>,
    pub scenario: Option<String>,
    #[serde(default)]
    pub params: GenerationParams,
}

impl StartSessionRequest {
    fn into_config(self) -> SessionConfig {
        let mut cast = Cast::new(self.personas);
        if let Some(director) = self.director {
            cast.director = director;
        }
        if let Some(synthesizer) = self.synthesizer {
            cast.synthesizer = synthesizer;
        }
        SessionConfig {
            cast,
            turn_budget: self.turn_budget,
            setting: self.setting,
            scenario: self.scenario,
            params: self.params,
        }
    }
}

/// Request body for POST /{id}/decisions/{decision_id}.
#[derive(Debug, Deserialize)]
pub struct ResolveDecisionRequest {
    pub option_id: String,
}

/// POST /
#[instrument(skip(state, request))]
async fn start_session(
    State(state): State<AppState>,
    Json(request): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    let snapshot = state
        .orchestrator
        .start_session(request.into_config())
        .await?;
    info!(session_id = %snapshot.session_id, "session started");
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /{id}
#[instrument(skip(state))]
async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.orchestrator.snapshot(session_id).await?))
}

/// POST /{id}/turn
#[instrument(skip(state))]
async fn advance_turn(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.orchestrator.advance_turn(session_id).await?))
}

/// POST /{id}/pause
#[instrument(skip(state))]
async fn pause_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.orchestrator.pause(session_id).await?))
}

/// POST /{id}/resume
#[instrument(skip(state))]
async fn resume_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.orchestrator.resume(session_id).await?))
}

/// POST /{id}/reset
#[instrument(skip(state))]
async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.orchestrator.reset(session_id).await?))
}

/// POST /{id}/stop
#[instrument(skip(state))]
async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    Ok(Json(state.orchestrator.stop(session_id).await?))
}

/// POST /{id}/decisions/{decision_id}
#[instrument(skip(state, request), fields(option_id = %request.option_id))]
async fn resolve_decision(
    State(state): State<AppState>,
    Path((session_id, decision_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<ResolveDecisionRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let snapshot = state
        .orchestrator
        .resolve_decision(session_id, decision_id, &request.option_id)
        .await?;
    Ok(Json(snapshot))
}

/// GET /{id}/events
///
/// Streams the session's events from the moment of subscription. Each SSE
/// message carries the event type as its name and the sequence as its id.
#[instrument(skip(state))]
async fn stream_events(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let snapshot = state.orchestrator.snapshot(session_id).await?;
    if snapshot.status == SessionStatus::Stopped {
        return Err(DomainError::SessionTerminated {
            session_id,
            status: snapshot.status,
        }
        .into());
    }

    let stream = state
        .bus
        .subscribe(session_id)
        .into_stream(state.heartbeat)
        .map(|event| {
            Event::default()
                .event(event.event_type())
                .id(event.sequence.to_string())
                .json_data(&event)
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Returns the router for session resources.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(start_session))
        .route("/{id}", get(get_session))
        .route("/{id}/turn", post(advance_turn))
        .route("/{id}/pause", post(pause_session))
        .route("/{id}/resume", post(resume_session))
        .route("/{id}/reset", post(reset_session))
        .route("/{id}/stop", post(stop_session))
        .route("/{id}/decisions/{decision_id}", post(resolve_decision))
        .route("/{id}/events", get(stream_events))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_keeps_default_director_and_synthesizer() {
        // Arrange
        let request: StartSessionRequest = serde_json::from_value(serde_json::json!({
            "personas": ["mira", "tobin"],
            "turn_budget": 3,
        }))
        .unwrap();

        // Act
        let config = request.into_config();

        // Assert
        assert_eq!(config.cast.director, "director");
        assert_eq!(config.cast.synthesizer, "synthesizer");
        assert_eq!(config.cast.personas, vec!["mira", "tobin"]);
        assert_eq!(config.turn_budget, Some(3));
    }

    #[test]
    fn test_start_request_overrides_cast_roles() {
        let request: StartSessionRequest = serde_json::from_value(serde_json::json!({
            "personas": ["mira"],
            "director": "narrator",
            "synthesizer": "scribe",
            "setting": "A drowned city",
            "params": { "temperature": 0.4 },
        }))
        .unwrap();

        let config = request.into_config();

        assert_eq!(config.cast.director, "narrator");
        assert_eq!(config.cast.synthesizer, "scribe");
        assert_eq!(config.setting.as_deref(), Some("A drowned city"));
        assert_eq!(config.params.temperature, Some(0.4));
    }
}
