//! Data types shared across the capability registry and router.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Semantic version, ordered lexicographically on `(major, minor, patch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CapabilityVersion {
	pub major: u32,
	pub minor: u32,
	pub patch: u32,
}

impl fmt::Display for CapabilityVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
	}
}

impl std::str::FromStr for CapabilityVersion {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut parts = s.splitn(3, '.');
		let mut next = || {
			parts
				.next()
				.ok_or_else(|| format!("version {s:?} has fewer than 3 components"))
				.and_then(|p| p.parse::<u32>().map_err(|e| e.to_string()))
		};
		Ok(Self {
			major: next()?,
			minor: next()?,
			patch: next()?,
		})
	}
}

/// Opaque input/output schema pair attached to a capability.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapabilityContract {
	pub input_schema: Value,
	pub output_schema: Value,
}

/// Extended, optional hints the core accepts, stores, and returns
/// verbatim. It never branches on their contents.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapabilityHints {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub runtime: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub env_profile: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub constraints: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub slo: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub spiffe_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub required_capabilities: Option<Vec<String>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub cost_tokens_per_invocation: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub slo_bid: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub controller_affinity: Option<String>,
	/// Anything else a worker sends that the core has no named field
	/// for; preserved and returned verbatim.
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

/// Immutable descriptor of a single capability a worker provides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDefinition {
	pub id: String,
	#[serde(default)]
	pub verb: Option<String>,
	pub version: CapabilityVersion,
	#[serde(default)]
	pub contract: CapabilityContract,
	#[serde(default)]
	pub tags: BTreeSet<String>,
	#[serde(default)]
	pub hints: CapabilityHints,
}

impl CapabilityDefinition {
	pub fn verb_or_default(&self) -> &str {
		self.verb.as_deref().unwrap_or("invoke")
	}
}

/// Routing key `"{verb}:{capability_id}"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(transparent)]
pub struct CapabilityKey(String);

impl CapabilityKey {
	pub fn new(verb: &str, capability_id: &str) -> Self {
		Self(format!("{verb}:{capability_id}"))
	}

	pub fn from_definition(def: &CapabilityDefinition) -> Self {
		Self::new(def.verb_or_default(), &def.id)
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for CapabilityKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl Serialize for CapabilityKey {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str(&self.0)
	}
}

/// In-memory record of a single registered worker.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
	pub worker_id: String,
	pub worker_url: String,
	pub capabilities: Vec<CapabilityKey>,
	pub definitions: Vec<CapabilityDefinition>,
	/// Monotonic clock reading at last heartbeat/registration, used for
	/// health derivation. Never persisted.
	pub last_heartbeat_monotonic: std::time::Instant,
	/// Wall-clock timestamp of the same event, persisted for display.
	pub last_heartbeat_wall: chrono::DateTime<chrono::Utc>,
	pub registration_metadata: Map<String, Value>,
	/// Sequence number of the REGISTERED journal entry that created (or
	/// last replaced) this record; used for the earliest-registered
	/// routing tie-break.
	pub registration_seq: u64,
}

impl WorkerRecord {
	pub fn is_healthy(&self, heartbeat_timeout: std::time::Duration) -> bool {
		self.last_heartbeat_monotonic.elapsed() <= heartbeat_timeout
	}
}

/// A point-in-time external view of a `WorkerRecord`, as returned by
/// `GET /workers`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerView {
	pub worker_id: String,
	pub worker_url: String,
	pub capabilities: Vec<CapabilityKey>,
	pub is_healthy: bool,
	pub last_heartbeat: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilitySummary {
	pub workers: usize,
	pub healthy_workers: usize,
}
