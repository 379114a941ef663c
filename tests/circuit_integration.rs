//! Integration tests for circuit breaker behavior through the HTTP API.
//!
//! Verifies that:
//! - Consultations skip providers with open circuits without invoking them
//! - Failed consultations are reported in-body with HTTP 200
//! - A successful half-open probe closes the circuit, a failed one reopens it
//! - POST /v1/circuits/:provider/reset closes a tripped circuit
//! - Resetting an unknown provider is a 404

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use http::Request;
use tower::ServiceExt;

use common::{router_with, MockProvider, Step};
use consultr::api::{create_router, AppState};
use consultr::consult::{CircuitState, ConsultRouter};
use consultr::provider::ProviderId;

fn setup_app(mocks: &[Arc<MockProvider>]) -> (axum::Router, Arc<ConsultRouter>) {
    let router = Arc::new(router_with(mocks));
    let app = create_router(AppState::new(router.clone()));
    (app, router)
}

async fn parse_body(response: axum::response::Response) -> (http::StatusCode, serde_json::Value) {
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), 1_048_576)
        .await
        .expect("read body");
    let json: serde_json::Value = serde_json::from_slice(&body_bytes).unwrap_or_default();
    (status, json)
}

/// POST a pinned, uncached consultation.
async fn consult_pinned(
    app: &axum::Router,
    provider: &str,
) -> (http::StatusCode, serde_json::Value) {
    let body = serde_json::json!({
        "query": "Hello there",
        "provider": provider,
        "use_cache": false
    });
    let request = Request::post("/v1/consult")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    parse_body(response).await
}

async fn post_empty(app: &axum::Router, uri: &str) -> (http::StatusCode, serde_json::Value) {
    let request = Request::post(uri).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    parse_body(response).await
}

#[tokio::test]
async fn test_open_circuit_skips_provider() {
    let gemini = MockProvider::failing(ProviderId::Gemini);
    let llama = MockProvider::answering(ProviderId::Llama, "fine");
    let (app, router) = setup_app(&[gemini.clone(), llama]);

    for i in 0..5 {
        let (status, json) = consult_pinned(&app, "gemini").await;
        assert_eq!(status, http::StatusCode::OK, "attempt {}", i);
        assert_eq!(json["success"], false);
        assert_eq!(json["responses"][0]["error_kind"], "provider_error");
    }

    let (status, json) = consult_pinned(&app, "gemini").await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(json["success"], false);
    assert_eq!(json["error_kind"], "all_providers_failed");
    assert_eq!(json["responses"][0]["error_kind"], "circuit_open");
    assert_eq!(gemini.calls(), 5);

    assert_eq!(router.circuit_breakers().trip_count(ProviderId::Gemini), Some(1));

    let (status, json) = consult_pinned(&app, "llama").await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["providers_used"][0], "llama");
}

#[tokio::test(start_paused = true)]
async fn test_half_open_probe_success_closes() {
    let gemini = MockProvider::answering(ProviderId::Gemini, "recovered");
    for _ in 0..5 {
        gemini.push(Step::fail("down"));
    }
    let (app, router) = setup_app(&[gemini.clone()]);

    for _ in 0..5 {
        consult_pinned(&app, "gemini").await;
    }
    assert_eq!(
        router.circuit_breakers().state(ProviderId::Gemini),
        Some(CircuitState::Open)
    );

    tokio::time::advance(Duration::from_secs(61)).await;

    let (_, json) = consult_pinned(&app, "gemini").await;
    assert_eq!(json["success"], true);
    assert_eq!(
        router.circuit_breakers().state(ProviderId::Gemini),
        Some(CircuitState::Closed)
    );
    assert_eq!(router.circuit_breakers().failure_count(ProviderId::Gemini), Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_half_open_probe_failure_reopens() {
    let gemini = MockProvider::failing(ProviderId::Gemini);
    let (app, router) = setup_app(&[gemini.clone()]);

    for _ in 0..5 {
        consult_pinned(&app, "gemini").await;
    }
    tokio::time::advance(Duration::from_secs(61)).await;

    let (_, json) = consult_pinned(&app, "gemini").await;
    assert_eq!(json["responses"][0]["error_kind"], "provider_error");
    assert_eq!(gemini.calls(), 6);
    assert_eq!(
        router.circuit_breakers().state(ProviderId::Gemini),
        Some(CircuitState::Open)
    );

    // Reopened: the next call is rejected before reaching the provider.
    let (_, json) = consult_pinned(&app, "gemini").await;
    assert_eq!(json["responses"][0]["error_kind"], "circuit_open");
    assert_eq!(gemini.calls(), 6);
}

#[tokio::test]
async fn test_reset_endpoint_closes_circuit() {
    let gemini = MockProvider::failing(ProviderId::Gemini);
    let (app, router) = setup_app(&[gemini.clone()]);

    for _ in 0..5 {
        consult_pinned(&app, "gemini").await;
    }
    assert_eq!(
        router.circuit_breakers().state(ProviderId::Gemini),
        Some(CircuitState::Open)
    );

    let (status, json) = post_empty(&app, "/v1/circuits/gemini/reset").await;
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(json["provider"], "gemini");
    assert_eq!(json["state"], "closed");
    assert_eq!(
        router.circuit_breakers().state(ProviderId::Gemini),
        Some(CircuitState::Closed)
    );

    // Calls reach the provider again.
    consult_pinned(&app, "gemini").await;
    assert_eq!(gemini.calls(), 6);
}

#[tokio::test]
async fn test_reset_unknown_provider_is_404() {
    let (app, _router) = setup_app(&[MockProvider::answering(ProviderId::Gemini, "ok")]);

    let (status, json) = post_empty(&app, "/v1/circuits/gpt/reset").await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["type"], "not_found");

    // Known id but not registered with this router.
    let (status, _) = post_empty(&app, "/v1/circuits/llama/reset").await;
    assert_eq!(status, http::StatusCode::NOT_FOUND);
}
