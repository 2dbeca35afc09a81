//! Optional bearer-token check layered on top of mTLS during migration.
//!
//! When `PLATFORM_AUTH_TOKEN` is configured, every write endpoint
//! (`register`, `heartbeat`, `deregister`) requires a matching
//! `Authorization: Bearer <token>` header. Read endpoints are never
//! gated by it; mTLS remains the primary authentication mechanism.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::Authorization;
use axum_extra::TypedHeader;

use crank_core::ErrorDetail;

use crate::state::AppState;

pub async fn require_platform_token(
	State(state): State<AppState>,
	auth: Option<TypedHeader<Authorization<Bearer>>>,
	request: Request<Body>,
	next: Next,
) -> Response {
	let Some(expected) = &state.platform_auth_token else {
		return next.run(request).await;
	};

	match auth {
		Some(TypedHeader(Authorization(bearer))) if bearer.token() == expected => {
			next.run(request).await
		}
		_ => (
			StatusCode::UNAUTHORIZED,
			Json(ErrorDetail::new("missing or invalid platform auth token")),
		)
			.into_response(),
	}
}
