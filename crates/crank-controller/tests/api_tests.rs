use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use crank_controller::{router, AppState};
use crank_registry::Registry;
use http_body_util::BodyExt;
use tower::ServiceExt;

fn build_state(dir: &tempfile::TempDir, platform_auth_token: Option<&str>) -> AppState {
	let registry = Registry::open(dir.path().join("registry.jsonl"), Duration::from_secs(120))
		.expect("open registry");
	AppState {
		registry: Arc::new(registry),
		service_name: "crank-controller-test".to_string(),
		platform_auth_token: platform_auth_token.map(str::to_string),
	}
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
	let bytes = response.into_body().collect().await.unwrap().to_bytes();
	serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_healthy_with_no_auth_required() {
	let dir = tempfile::tempdir().unwrap();
	let state = build_state(&dir, Some("secret"));
	let app = router(state);

	let response = app
		.oneshot(
			Request::builder()
				.uri("/health")
				.body(Body::empty())
				.unwrap(),
		)
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn register_without_token_is_rejected_when_token_configured() {
	let dir = tempfile::tempdir().unwrap();
	let state = build_state(&dir, Some("secret"));
	let app = router(state);

	let body = serde_json::json!({
		"worker_id": "w1",
		"worker_url": "https://w1.internal:8500",
		"capabilities": [],
	});

	let response = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/register")
				.header("content-type", "application/json")
				.body(Body::from(body.to_string()))
				.unwrap(),
		)
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn register_with_valid_token_succeeds_and_echoes_correlation_id() {
	let dir = tempfile::tempdir().unwrap();
	let state = build_state(&dir, Some("secret"));
	let app = router(state);

	let body = serde_json::json!({
		"worker_id": "w1",
		"worker_url": "https://w1.internal:8500",
		"capabilities": [
			{
				"id": "email.classify",
				"verb": "classify",
				"version": {"major": 1, "minor": 0, "patch": 0},
			}
		],
	});

	let response = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/register")
				.header("content-type", "application/json")
				.header("authorization", "Bearer secret")
				.header("x-correlation-id", "corr-123")
				.body(Body::from(body.to_string()))
				.unwrap(),
		)
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::OK);
	assert_eq!(
		response
			.headers()
			.get("x-correlation-id")
			.and_then(|v| v.to_str().ok()),
		Some("corr-123")
	);
	let json = body_json(response).await;
	assert_eq!(json["capabilities_registered"], 1);
}

#[tokio::test]
async fn route_requires_no_auth_and_finds_registered_worker() {
	let dir = tempfile::tempdir().unwrap();
	let state = build_state(&dir, None);
	state
		.registry
		.register(
			"w1",
			"https://w1.internal:8500",
			vec![serde_json::from_value(serde_json::json!({
				"id": "email.classify",
				"verb": "classify",
				"version": {"major": 1, "minor": 0, "patch": 0},
			}))
			.unwrap()],
			Default::default(),
		)
		.await
		.unwrap();
	let app = router(state);

	let body = serde_json::json!({"verb": "classify", "capability": "email.classify"});
	let response = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/route")
				.header("content-type", "application/json")
				.body(Body::from(body.to_string()))
				.unwrap(),
		)
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::OK);
	let json = body_json(response).await;
	assert_eq!(json["worker_id"], "w1");
}

#[tokio::test]
async fn route_returns_404_when_no_worker_matches() {
	let dir = tempfile::tempdir().unwrap();
	let state = build_state(&dir, None);
	let app = router(state);

	let body = serde_json::json!({"verb": "classify", "capability": "nothing.here"});
	let response = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/route")
				.header("content-type", "application/json")
				.body(Body::from(body.to_string()))
				.unwrap(),
		)
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn heartbeat_for_unknown_worker_returns_404() {
	let dir = tempfile::tempdir().unwrap();
	let state = build_state(&dir, None);
	let app = router(state);

	let body = serde_json::json!({"worker_id": "ghost"});
	let response = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/heartbeat")
				.header("content-type", "application/json")
				.body(Body::from(body.to_string()))
				.unwrap(),
		)
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn no_token_configured_allows_writes_without_authorization_header() {
	let dir = tempfile::tempdir().unwrap();
	let state = build_state(&dir, None);
	let app = router(state);

	let body = serde_json::json!({
		"worker_id": "w1",
		"worker_url": "https://w1.internal:8500",
		"capabilities": [],
	});
	let response = app
		.oneshot(
			Request::builder()
				.method("POST")
				.uri("/register")
				.header("content-type", "application/json")
				.body(Body::from(body.to_string()))
				.unwrap(),
		)
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn deregister_is_idempotent_for_unknown_worker() {
	let dir = tempfile::tempdir().unwrap();
	let state = build_state(&dir, Some("secret"));
	let app = router(state);

	let response = app
		.oneshot(
			Request::builder()
				.method("DELETE")
				.uri("/deregister/ghost")
				.header("authorization", "Bearer secret")
				.body(Body::empty())
				.unwrap(),
		)
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::OK);
}
