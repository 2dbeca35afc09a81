//! Base worker runtime: certificate bootstrap, controller registration
//! and heartbeating, health state, and LIFO shutdown hooks. A concrete
//! worker supplies its `CapabilityDefinition`s and its own
//! `axum::Router`; the runtime owns everything else described in
//! the worker lifecycle protocol.

mod controller_client;
mod health;
mod runtime;
mod shutdown;

pub use controller_client::{CallOutcome, ControllerClient, ControllerClientError};
pub use health::{Health, HealthState};
pub use runtime::{WorkerRuntime, WorkerRuntimeError};
pub use shutdown::{ShutdownHook, ShutdownRegistry};
