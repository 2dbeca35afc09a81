//! The controller's HTTPS API surface: route handlers and the shared
//! state they operate on. The binary in `crank-controller-app` wires
//! this router onto a TLS listener.

mod api;
mod auth;
mod state;

pub use api::{correlation_id_header_name, router};
pub use state::AppState;
