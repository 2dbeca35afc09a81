pub mod config;
pub mod error;
pub mod events;
pub mod telemetry;

pub use config::{ControllerConfig, WorkerConfig};
pub use error::{CoreError, ErrorDetail};
pub use events::{CertificateEvent, EventContext, emit};
