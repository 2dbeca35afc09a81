//! Worker health state machine: `STARTING -> HEALTHY <-> DEGRADED ->
//! STOPPING`, exposed as a lock-free hot-swappable value the way the
//! teacher shares mutable state between a background task and request
//! handlers.

use std::sync::Arc;

use arc_swap::ArcSwap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
	Starting,
	Healthy,
	Degraded,
	Stopping,
}

/// Shared, readable-without-locking health state. Writers `store`,
/// readers `load` without blocking each other.
#[derive(Clone)]
pub struct Health(Arc<ArcSwap<HealthState>>);

impl Health {
	pub fn new() -> Self {
		Self(Arc::new(ArcSwap::from_pointee(HealthState::Starting)))
	}

	pub fn get(&self) -> HealthState {
		**self.0.load()
	}

	pub fn set(&self, state: HealthState) {
		self.0.store(Arc::new(state));
	}

	/// Marks a successful heartbeat: exits `Degraded` back to `Healthy`.
	/// A no-op from any other state.
	pub fn record_heartbeat_success(&self) {
		if self.get() == HealthState::Degraded {
			self.set(HealthState::Healthy);
		}
	}

	/// Marks sustained downstream failure: enters `Degraded` from
	/// `Healthy`. A no-op from `Starting` or `Stopping`.
	pub fn record_sustained_failure(&self) {
		if self.get() == HealthState::Healthy {
			self.set(HealthState::Degraded);
		}
	}
}

impl Default for Health {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn starts_in_starting_state() {
		let health = Health::new();
		assert_eq!(health.get(), HealthState::Starting);
	}

	#[test]
	fn degrades_and_recovers() {
		let health = Health::new();
		health.set(HealthState::Healthy);
		health.record_sustained_failure();
		assert_eq!(health.get(), HealthState::Degraded);
		health.record_heartbeat_success();
		assert_eq!(health.get(), HealthState::Healthy);
	}

	#[test]
	fn stopping_is_not_reopened_by_heartbeat_success() {
		let health = Health::new();
		health.set(HealthState::Stopping);
		health.record_heartbeat_success();
		assert_eq!(health.get(), HealthState::Stopping);
	}
}
