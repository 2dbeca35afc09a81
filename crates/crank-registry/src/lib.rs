pub mod journal;
pub mod registry;
pub mod types;

pub use registry::{HeartbeatResult, RegisterResult, Registry, RegistryError, RouteResult};
pub use types::{
	CapabilityContract, CapabilityDefinition, CapabilityHints, CapabilityKey, CapabilitySummary,
	CapabilityVersion, WorkerRecord, WorkerView,
};
