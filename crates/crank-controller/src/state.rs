//! Shared application state handed to every controller route handler.

use std::sync::Arc;

use crank_registry::Registry;

#[derive(Clone)]
pub struct AppState {
	pub registry: Arc<Registry>,
	pub service_name: String,
	pub platform_auth_token: Option<String>,
}
