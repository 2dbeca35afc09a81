//! Controller HTTPS API: the seven endpoints workers and requesters use
//! to register, heartbeat, route, and introspect the capability
//! registry.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use crank_registry::CapabilityDefinition;
use serde::{Deserialize, Serialize};

use crank_core::ErrorDetail;
use crank_registry::RegistryError;

use crate::auth::require_platform_token;
use crate::state::AppState;

const CORRELATION_ID_HEADER: &str = "x-correlation-id";

pub fn router(state: AppState) -> Router {
	let write_routes = Router::new()
		.route("/register", post(register))
		.route("/heartbeat", post(heartbeat))
		.route("/deregister/{worker_id}", delete(deregister))
		.route_layer(middleware::from_fn_with_state(
			state.clone(),
			require_platform_token,
		));

	let read_routes = Router::new()
		.route("/health", get(health))
		.route("/route", post(route))
		.route("/capabilities", get(capabilities))
		.route("/workers", get(workers));

	Router::new()
		.merge(write_routes)
		.merge(read_routes)
		.with_state(state)
}

fn correlation_id(headers: &HeaderMap) -> Option<String> {
	headers
		.get(CORRELATION_ID_HEADER)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string)
}

fn with_correlation(mut response: Response, correlation_id: Option<&str>) -> Response {
	if let Some(id) = correlation_id
		&& let Ok(value) = axum::http::HeaderValue::from_str(id)
	{
		response.headers_mut().insert(
			axum::http::HeaderName::from_static(CORRELATION_ID_HEADER),
			value,
		);
	}
	response
}

#[derive(Debug, Serialize)]
struct HealthResponse {
	status: &'static str,
	service: String,
}

async fn health(State(state): State<AppState>) -> Response {
	if state.registry.is_journal_available() {
		Json(HealthResponse {
			status: "healthy",
			service: state.service_name.clone(),
		})
		.into_response()
	} else {
		(
			StatusCode::SERVICE_UNAVAILABLE,
			Json(HealthResponse {
				status: "degraded",
				service: state.service_name.clone(),
			}),
		)
			.into_response()
	}
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
	worker_id: String,
	worker_url: String,
	#[serde(default)]
	capabilities: Vec<CapabilityDefinition>,
	#[serde(default)]
	registration_metadata: serde_json::Map<String, serde_json::Value>,
}

async fn register(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(req): Json<RegisterRequest>,
) -> Response {
	let correlation_id = correlation_id(&headers);
	let result = state
		.registry
		.register(
			&req.worker_id,
			&req.worker_url,
			req.capabilities,
			req.registration_metadata,
		)
		.await;

	let response = match result {
		Ok(outcome) => Json(outcome).into_response(),
		Err(RegistryError::Validation(detail)) => {
			(StatusCode::BAD_REQUEST, Json(ErrorDetail::new(detail))).into_response()
		}
		Err(RegistryError::Persistence(source)) => {
			(
				StatusCode::INTERNAL_SERVER_ERROR,
				Json(ErrorDetail::new(format!("persistence error: {source}"))),
			)
				.into_response()
		}
	};
	with_correlation(response, correlation_id.as_deref())
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
	worker_id: String,
}

async fn heartbeat(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(req): Json<HeartbeatRequest>,
) -> Response {
	let correlation_id = correlation_id(&headers);
	let response = match state.registry.heartbeat(&req.worker_id).await {
		Ok(result) if result.acknowledged => Json(result).into_response(),
		Ok(result) => (StatusCode::NOT_FOUND, Json(result)).into_response(),
		Err(RegistryError::Persistence(source)) => (
			StatusCode::INTERNAL_SERVER_ERROR,
			Json(ErrorDetail::new(format!("persistence error: {source}"))),
		)
			.into_response(),
		Err(RegistryError::Validation(detail)) => {
			(StatusCode::BAD_REQUEST, Json(ErrorDetail::new(detail))).into_response()
		}
	};
	with_correlation(response, correlation_id.as_deref())
}

#[derive(Debug, Serialize)]
struct DeregisterResponse {
	status: &'static str,
	worker_id: String,
}

async fn deregister(State(state): State<AppState>, Path(worker_id): Path<String>) -> Response {
	match state.registry.deregister(&worker_id).await {
		Ok(()) => Json(DeregisterResponse {
			status: "deregistered",
			worker_id,
		})
		.into_response(),
		Err(RegistryError::Persistence(source)) => (
			StatusCode::INTERNAL_SERVER_ERROR,
			Json(ErrorDetail::new(format!("persistence error: {source}"))),
		)
			.into_response(),
		Err(RegistryError::Validation(detail)) => {
			(StatusCode::BAD_REQUEST, Json(ErrorDetail::new(detail))).into_response()
		}
	}
}

#[derive(Debug, Deserialize)]
struct RouteRequest {
	verb: String,
	capability: String,
	#[allow(dead_code)]
	#[serde(default)]
	slo_constraints: Option<serde_json::Value>,
	#[allow(dead_code)]
	#[serde(default)]
	requester_identity: Option<String>,
	#[allow(dead_code)]
	#[serde(default)]
	budget_tokens: Option<u64>,
}

async fn route(State(state): State<AppState>, Json(req): Json<RouteRequest>) -> Response {
	match state.registry.route(&req.verb, &req.capability).await {
		Some(result) => Json(result).into_response(),
		None => (
			StatusCode::NOT_FOUND,
			Json(ErrorDetail::new("no worker available")),
		)
			.into_response(),
	}
}

async fn capabilities(State(state): State<AppState>) -> Response {
	Json(state.registry.get_all_capabilities().await).into_response()
}

async fn workers(State(state): State<AppState>) -> Response {
	Json(state.registry.get_all_workers().await).into_response()
}

pub fn correlation_id_header_name() -> &'static str {
	CORRELATION_ID_HEADER
}
