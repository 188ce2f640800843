//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use taleweaver_api::config::EngineConfig;
use taleweaver_api::state::AppState;
use taleweaver_core::clock::Clock;
use taleweaver_test_support::{FixedClock, MockRng, ScriptedGenerationService};
use tower::ServiceExt;

fn fixed_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock::reference())
}

/// Build the full app router around a scripted generation backend with
/// deterministic clock and RNG.
pub fn build_test_app(generation: ScriptedGenerationService) -> Router {
    taleweaver_api::app(test_state(generation))
}

/// The state behind [`build_test_app`], for tests that need the bus.
pub fn test_state(generation: ScriptedGenerationService) -> AppState {
    AppState::assemble(
        &EngineConfig::default(),
        Arc::new(generation),
        fixed_clock(),
        Box::new(MockRng),
    )
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap();

    send(app, request).await
}

/// Send a POST request without a body and return the response.
pub async fn post_empty(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    send(app, request).await
}

/// Start a session with the given personas and return its id.
pub async fn start_session(app: Router, personas: &[&str]) -> String {
    let (status, json) = post_json(
        app,
        "/api/v1/sessions",
        &serde_json::json!({ "personas": personas }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    json["session_id"].as_str().unwrap().to_owned()
}
