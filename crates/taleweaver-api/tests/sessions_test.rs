//! Integration tests for the session endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use taleweaver_core::generation::GenerationError;
use taleweaver_test_support::{ScriptedGenerationService, ScriptedReply};
use tower::ServiceExt;
use uuid::Uuid;

fn conflicted_mira() -> ScriptedGenerationService {
    ScriptedGenerationService::new().always(
        "mira",
        ScriptedReply::Text(
            serde_json::json!({
                "content": "Mira's hand hovers over the blade.",
                "unresolved_conflict": true
            })
            .to_string(),
        ),
    )
}

#[tokio::test]
async fn test_start_session_returns_201_with_idle_snapshot() {
    // Arrange
    let app = common::build_test_app(ScriptedGenerationService::new());

    // Act
    let (status, json) = common::post_json(
        app.clone(),
        "/api/v1/sessions",
        &serde_json::json!({ "personas": ["mira", "tobin"], "turn_budget": 2 }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "idle");
    assert_eq!(json["current_phase"], "context_gathering");
    assert_eq!(json["turn_number"], 1);
    assert_eq!(json["turn_budget"], 2);
    assert!(json.get("pending_decision").is_none());

    let session_id = json["session_id"].as_str().unwrap();
    let (status, fetched) =
        common::get_json(app, &format!("/api/v1/sessions/{session_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, json);
}

#[tokio::test]
async fn test_start_session_without_personas_returns_400() {
    let app = common::build_test_app(ScriptedGenerationService::new());

    let (status, json) = common::post_json(
        app,
        "/api/v1/sessions",
        &serde_json::json!({ "personas": [] }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "validation_error");
}

#[tokio::test]
async fn test_get_unknown_session_returns_404() {
    let app = common::build_test_app(ScriptedGenerationService::new());

    let (status, json) =
        common::get_json(app, &format!("/api/v1/sessions/{}", Uuid::new_v4())).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "session_not_found");
}

#[tokio::test]
async fn test_five_turn_calls_complete_one_turn() {
    // Arrange
    let app = common::build_test_app(ScriptedGenerationService::new());
    let session_id = common::start_session(app.clone(), &["mira", "tobin"]).await;
    let uri = format!("/api/v1/sessions/{session_id}/turn");

    // Act
    let mut phases = Vec::new();
    let mut last = serde_json::Value::Null;
    for _ in 0..5 {
        let (status, json) = common::post_empty(app.clone(), &uri).await;
        assert_eq!(status, StatusCode::OK);
        phases.push(json["current_phase"].as_str().unwrap().to_owned());
        last = json;
    }

    // Assert
    assert_eq!(
        phases,
        vec!["planning", "execution", "synthesis", "output", "context_gathering"]
    );
    assert_eq!(last["status"], "idle");
    assert_eq!(last["turn_number"], 2);
    assert_eq!(last["metrics"]["turns_completed"], 1);
}

#[tokio::test]
async fn test_decision_round_trip() {
    // Arrange
    let app = common::build_test_app(conflicted_mira());
    let session_id = common::start_session(app.clone(), &["mira"]).await;
    let turn = format!("/api/v1/sessions/{session_id}/turn");
    common::post_empty(app.clone(), &turn).await;

    // Act
    let (status, waiting) = common::post_empty(app.clone(), &turn).await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(waiting["status"], "waiting_decision");
    assert_eq!(waiting["current_phase"], "planning");
    assert_eq!(waiting["pending_decision"]["kind"], "conflict_resolution");
    let decision_id = waiting["pending_decision"]["id"].as_str().unwrap();

    let (status, json) = common::post_empty(app.clone(), &turn).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json["error"], "invalid_state");

    let decide = format!("/api/v1/sessions/{session_id}/decisions/{decision_id}");
    let (status, json) = common::post_json(
        app.clone(),
        &decide,
        &serde_json::json!({ "option_id": "flee" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_option");

    let (status, json) = common::post_json(
        app.clone(),
        &format!("/api/v1/sessions/{session_id}/decisions/{}", Uuid::new_v4()),
        &serde_json::json!({ "option_id": "intervene" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "decision_not_found");

    let (status, resolved) = common::post_json(
        app.clone(),
        &decide,
        &serde_json::json!({ "option_id": "intervene" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "running");
    assert!(resolved.get("pending_decision").is_none());
    assert_eq!(resolved["metrics"]["decisions_resolved"], 1);

    let (status, json) = common::post_empty(app, &turn).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["current_phase"], "execution");
}

#[tokio::test]
async fn test_failed_phase_returns_502_then_410_until_reset() {
    // Arrange
    let generation = ScriptedGenerationService::new().always(
        "director",
        ScriptedReply::Fail(GenerationError::Rejected("content policy".into())),
    );
    let app = common::build_test_app(generation);
    let session_id = common::start_session(app.clone(), &["mira"]).await;
    let turn = format!("/api/v1/sessions/{session_id}/turn");

    // Act
    let (status, json) = common::post_empty(app.clone(), &turn).await;

    // Assert
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["error"], "phase_failed");
    assert_eq!(json["failure"]["agent_id"], "director");
    assert_eq!(json["failure"]["kind"], "rejected");

    let (_, snapshot) =
        common::get_json(app.clone(), &format!("/api/v1/sessions/{session_id}")).await;
    assert_eq!(snapshot["status"], "error");
    assert_eq!(snapshot["last_error"]["agent_id"], "director");

    let (status, json) = common::post_empty(app.clone(), &turn).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(json["status"], "error");

    let (status, json) =
        common::post_empty(app, &format!("/api/v1/sessions/{session_id}/reset")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "idle");
    assert_eq!(json["current_phase"], "context_gathering");
}

#[tokio::test]
async fn test_pause_blocks_turns_until_resumed() {
    let app = common::build_test_app(ScriptedGenerationService::new());
    let session_id = common::start_session(app.clone(), &["mira"]).await;
    let base = format!("/api/v1/sessions/{session_id}");

    let (status, json) = common::post_empty(app.clone(), &format!("{base}/pause")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "paused");

    let (status, _) = common::post_empty(app.clone(), &format!("{base}/turn")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, json) = common::post_empty(app.clone(), &format!("{base}/resume")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "idle");

    let (status, _) = common::post_empty(app, &format!("{base}/turn")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_stopped_session_returns_410_with_status() {
    let app = common::build_test_app(ScriptedGenerationService::new());
    let session_id = common::start_session(app.clone(), &["mira"]).await;
    let base = format!("/api/v1/sessions/{session_id}");

    let (status, json) = common::post_empty(app.clone(), &format!("{base}/stop")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "stopped");

    let (status, json) = common::post_empty(app.clone(), &format!("{base}/turn")).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(json["error"], "session_terminated");
    assert_eq!(json["status"], "stopped");

    let (status, _) = common::get_json(app, &format!("{base}/events")).await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn test_event_stream_carries_turn_events_until_stop() {
    // Arrange
    let app = common::build_test_app(ScriptedGenerationService::new());
    let session_id = common::start_session(app.clone(), &["mira"]).await;
    let base = format!("/api/v1/sessions/{session_id}");
    let request = Request::builder()
        .method("GET")
        .uri(format!("{base}/events"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/event-stream"
    );

    // Act
    common::post_empty(app.clone(), &format!("{base}/turn")).await;
    common::post_empty(app, &format!("{base}/stop")).await;
    let body = response.into_body().collect().await.unwrap().to_bytes();

    // Assert
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("event: agent_update"));
    assert!(text.contains("event: phase_change"));
    assert!(text.contains("id: 1\n"));
    assert!(text.contains(&format!("\"session_id\":\"{session_id}\"")));
}

#[tokio::test]
async fn test_events_for_unknown_session_returns_404() {
    let app = common::build_test_app(ScriptedGenerationService::new());

    let (status, json) = common::get_json(
        app,
        &format!("/api/v1/sessions/{}/events", Uuid::new_v4()),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "session_not_found");
}
