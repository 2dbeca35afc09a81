//! The capability registry: the controller's only piece of shared
//! mutable state. All mutations go through a single critical section
//! (`tokio::sync::Mutex`) that also guards the journal file, so an
//! in-flight mutation and its journal write are never observed apart.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::journal::{
	DeregisteredPayload, HeartbeatPayload, Journal, JournalEntry, JournalError, JournalKind,
	RegisteredPayload,
};
use crate::types::{
	CapabilityDefinition, CapabilitySummary, CapabilityKey, WorkerRecord, WorkerView,
};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
	#[error("validation error: {0}")]
	Validation(String),
	#[error("persistence error: {0}")]
	Persistence(#[from] JournalError),
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterResult {
	pub status: &'static str,
	pub worker_id: String,
	pub capabilities_registered: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatResult {
	pub status: &'static str,
	pub acknowledged: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteResult {
	pub worker_id: String,
	pub worker_url: String,
	pub capability: String,
}

struct Inner {
	journal: Journal,
	workers: HashMap<String, WorkerRecord>,
	/// CapabilityKey -> worker_ids providing it, insertion-ordered so
	/// the earliest-registered-among-healthy tie-break is well defined
	/// without re-sorting on every route call.
	capability_index: BTreeMap<CapabilityKey, Vec<String>>,
}

impl Inner {
	fn index_worker(&mut self, worker_id: &str, capabilities: &[CapabilityKey]) {
		for key in capabilities {
			let bucket = self.capability_index.entry(key.clone()).or_default();
			if !bucket.iter().any(|w| w == worker_id) {
				bucket.push(worker_id.to_string());
			}
		}
	}

	fn unindex_worker(&mut self, worker_id: &str) {
		self.capability_index.retain(|_, bucket| {
			bucket.retain(|w| w != worker_id);
			!bucket.is_empty()
		});
	}

	fn apply_registered(&mut self, seq: u64, payload: RegisteredPayload) {
		// Re-registration replaces any prior record atomically: drop the
		// old index entries first, then rebuild from the new payload.
		self.unindex_worker(&payload.worker_id);

		let keys: Vec<CapabilityKey> = payload
			.capabilities
			.iter()
			.map(CapabilityKey::from_definition)
			.collect();

		let now = Instant::now();
		self.workers.insert(
			payload.worker_id.clone(),
			WorkerRecord {
				worker_id: payload.worker_id.clone(),
				worker_url: payload.worker_url,
				capabilities: keys.clone(),
				definitions: payload.capabilities,
				last_heartbeat_monotonic: now,
				last_heartbeat_wall: chrono::Utc::now(),
				registration_metadata: payload.registration_metadata,
				registration_seq: seq,
			},
		);
		self.index_worker(&payload.worker_id, &keys);
	}

	fn apply_heartbeat(&mut self, payload: HeartbeatPayload) {
		if let Some(record) = self.workers.get_mut(&payload.worker_id) {
			record.last_heartbeat_monotonic = Instant::now();
			record.last_heartbeat_wall = chrono::Utc::now();
		}
		// Stray heartbeat for an unknown worker: skipped without error.
	}

	fn apply_deregistered(&mut self, payload: DeregisteredPayload) {
		if self.workers.remove(&payload.worker_id).is_some() {
			self.unindex_worker(&payload.worker_id);
		}
	}
}

/// Authoritative in-memory index of workers and their capabilities,
/// backed by the append-only journal for crash recovery.
pub struct Registry {
	inner: Mutex<Inner>,
	heartbeat_timeout: Duration,
	journal_healthy: AtomicBool,
}

impl Registry {
	/// Opens the journal at `journal_path`, replaying it into a fresh
	/// in-memory index. `heartbeat_timeout` governs health derivation.
	pub fn open(
		journal_path: impl AsRef<std::path::Path>,
		heartbeat_timeout: Duration,
	) -> Result<Self, RegistryError> {
		let mut workers: HashMap<String, WorkerRecord> = HashMap::new();
		let mut capability_index: BTreeMap<CapabilityKey, Vec<String>> = BTreeMap::new();

		let journal = Journal::open_and_recover(journal_path, |entry: JournalEntry| {
			apply_recovered_entry(&mut workers, &mut capability_index, entry);
		})?;

		// Journal replay has no monotonic clock to work with, only the
		// wall-clock timestamps recorded at write time. Re-derive each
		// worker's effective last-heartbeat instant from how long ago
		// that timestamp actually was, so a worker that went silent
		// before a controller restart is correctly unhealthy on reload
		// instead of appearing freshly alive.
		let now_wall = chrono::Utc::now();
		let now_monotonic = Instant::now();
		for record in workers.values_mut() {
			let elapsed = (now_wall - record.last_heartbeat_wall)
				.to_std()
				.unwrap_or(Duration::ZERO);
			record.last_heartbeat_monotonic =
				now_monotonic.checked_sub(elapsed).unwrap_or(now_monotonic);
		}

		Ok(Self {
			inner: Mutex::new(Inner {
				journal,
				workers,
				capability_index,
			}),
			heartbeat_timeout,
			journal_healthy: AtomicBool::new(true),
		})
	}

	/// Registers (or atomically replaces) a worker and its capabilities.
	pub async fn register(
		&self,
		worker_id: &str,
		worker_url: &str,
		capabilities: Vec<CapabilityDefinition>,
		registration_metadata: serde_json::Map<String, serde_json::Value>,
	) -> Result<RegisterResult, RegistryError> {
		validate_worker_id(worker_id)?;
		validate_https_url(worker_url)?;
		reject_duplicate_capability_ids(&capabilities)?;

		let payload = RegisteredPayload {
			worker_id: worker_id.to_string(),
			worker_url: worker_url.to_string(),
			capabilities,
			registration_metadata,
		};

		let mut guard = self.inner.lock().await;
		let seq = guard.journal.next_seq();
		let entry = JournalEntry::registered(seq, &payload);
		self.append_journal(&mut guard, &entry)?;

		let registered = payload.capabilities.len();
		guard.apply_registered(seq, payload);

		Ok(RegisterResult {
			status: "registered",
			worker_id: worker_id.to_string(),
			capabilities_registered: registered,
		})
	}

	/// Refreshes `last_heartbeat` for a known worker, or reports
	/// `unknown_worker` for the caller to map to HTTP 404.
	pub async fn heartbeat(&self, worker_id: &str) -> Result<HeartbeatResult, RegistryError> {
		let mut guard = self.inner.lock().await;
		if !guard.workers.contains_key(worker_id) {
			return Ok(HeartbeatResult {
				status: "unknown_worker",
				acknowledged: false,
			});
		}

		let seq = guard.journal.next_seq();
		let entry = JournalEntry::heartbeat(seq, worker_id);
		self.append_journal(&mut guard, &entry)?;
		guard.apply_heartbeat(HeartbeatPayload {
			worker_id: worker_id.to_string(),
		});

		Ok(HeartbeatResult {
			status: "ok",
			acknowledged: true,
		})
	}

	/// Removes a worker from the registry. Idempotent: deregistering an
	/// unknown id is a no-op success.
	pub async fn deregister(&self, worker_id: &str) -> Result<(), RegistryError> {
		let mut guard = self.inner.lock().await;
		if !guard.workers.contains_key(worker_id) {
			return Ok(());
		}

		let seq = guard.journal.next_seq();
		let entry = JournalEntry::deregistered(seq, worker_id);
		self.append_journal(&mut guard, &entry)?;
		guard.apply_deregistered(DeregisteredPayload {
			worker_id: worker_id.to_string(),
		});

		Ok(())
	}

	/// Picks a healthy worker for `(verb, capability)`: the earliest
	/// registered among currently healthy candidates. Read-only; never
	/// fails except by returning `None`.
	pub async fn route(&self, verb: &str, capability: &str) -> Option<RouteResult> {
		let key = CapabilityKey::new(verb, capability);
		let guard = self.inner.lock().await;
		let candidates = guard.capability_index.get(&key)?;

		let mut best: Option<&WorkerRecord> = None;
		for worker_id in candidates {
			let Some(record) = guard.workers.get(worker_id) else {
				continue;
			};
			if !record.is_healthy(self.heartbeat_timeout) {
				continue;
			}
			match best {
				None => best = Some(record),
				Some(current) if record.registration_seq < current.registration_seq => {
					best = Some(record);
				}
				_ => {}
			}
		}

		best.map(|record| RouteResult {
			worker_id: record.worker_id.clone(),
			worker_url: record.worker_url.clone(),
			capability: key.as_str().to_string(),
		})
	}

	pub async fn get_all_capabilities(&self) -> BTreeMap<String, CapabilitySummary> {
		let guard = self.inner.lock().await;
		guard
			.capability_index
			.iter()
			.map(|(key, worker_ids)| {
				let healthy = worker_ids
					.iter()
					.filter_map(|id| guard.workers.get(id))
					.filter(|w| w.is_healthy(self.heartbeat_timeout))
					.count();
				(
					key.as_str().to_string(),
					CapabilitySummary {
						workers: worker_ids.len(),
						healthy_workers: healthy,
					},
				)
			})
			.collect()
	}

	pub async fn get_all_workers(&self) -> Vec<WorkerView> {
		let guard = self.inner.lock().await;
		let mut views: Vec<WorkerView> = guard
			.workers
			.values()
			.map(|record| WorkerView {
				worker_id: record.worker_id.clone(),
				worker_url: record.worker_url.clone(),
				capabilities: record.capabilities.clone(),
				is_healthy: record.is_healthy(self.heartbeat_timeout),
				last_heartbeat: record.last_heartbeat_wall.to_rfc3339(),
			})
			.collect();
		views.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
		views
	}

	/// Whether the registry's journal is reachable, for `GET /health`.
	/// Goes false the first time an append fails and stays false: a
	/// controller whose journal has started failing is degraded for the
	/// rest of its lifetime, not just the failing request.
	pub fn is_journal_available(&self) -> bool {
		self.journal_healthy.load(Ordering::Acquire)
	}

	fn append_journal(
		&self,
		guard: &mut tokio::sync::MutexGuard<'_, Inner>,
		entry: &JournalEntry,
	) -> Result<(), RegistryError> {
		match guard.journal.append(entry) {
			Ok(()) => Ok(()),
			Err(e) => {
				self.journal_healthy.store(false, Ordering::Release);
				Err(RegistryError::Persistence(e))
			}
		}
	}
}

fn apply_recovered_entry(
	workers: &mut HashMap<String, WorkerRecord>,
	capability_index: &mut BTreeMap<CapabilityKey, Vec<String>>,
	entry: JournalEntry,
) {
	match entry.kind {
		JournalKind::Registered => {
			let Ok(payload) = serde_json::from_value::<RegisteredPayload>(entry.payload) else {
				return;
			};
			let worker_id = payload.worker_id.clone();
			capability_index.retain(|_, bucket| {
				bucket.retain(|w| w != &worker_id);
				!bucket.is_empty()
			});
			let keys: Vec<CapabilityKey> = payload
				.capabilities
				.iter()
				.map(CapabilityKey::from_definition)
				.collect();
			let now = Instant::now();
			workers.insert(
				worker_id.clone(),
				WorkerRecord {
					worker_id: worker_id.clone(),
					worker_url: payload.worker_url,
					capabilities: keys.clone(),
					definitions: payload.capabilities,
					last_heartbeat_monotonic: now,
					last_heartbeat_wall: entry.ts,
					registration_metadata: payload.registration_metadata,
					registration_seq: entry.seq,
				},
			);
			for key in keys {
				let bucket = capability_index.entry(key).or_default();
				if !bucket.iter().any(|w| w == &worker_id) {
					bucket.push(worker_id.clone());
				}
			}
		}
		JournalKind::Heartbeat => {
			let Ok(payload) = serde_json::from_value::<HeartbeatPayload>(entry.payload) else {
				return;
			};
			if let Some(record) = workers.get_mut(&payload.worker_id) {
				record.last_heartbeat_wall = entry.ts;
				// Recovery happens well after the original heartbeat; the
				// monotonic clock has no meaning across restarts, so the
				// post-recovery health check uses "now" at load time,
				// which this leaves unchanged here and is finalized when
				// `Registry::open` returns.
			}
		}
		JournalKind::Deregistered => {
			let Ok(payload) = serde_json::from_value::<DeregisteredPayload>(entry.payload) else {
				return;
			};
			if workers.remove(&payload.worker_id).is_some() {
				let worker_id = payload.worker_id;
				capability_index.retain(|_, bucket| {
					bucket.retain(|w| w != &worker_id);
					!bucket.is_empty()
				});
			}
		}
	}
}

fn validate_worker_id(worker_id: &str) -> Result<(), RegistryError> {
	if worker_id.trim().is_empty() {
		return Err(RegistryError::Validation("worker_id must not be empty".into()));
	}
	Ok(())
}

fn validate_https_url(url: &str) -> Result<(), RegistryError> {
	if !url.starts_with("https://") {
		return Err(RegistryError::Validation(format!(
			"worker_url {url:?} must begin with https://"
		)));
	}
	Ok(())
}

fn reject_duplicate_capability_ids(
	capabilities: &[CapabilityDefinition],
) -> Result<(), RegistryError> {
	let mut seen = std::collections::HashSet::new();
	for cap in capabilities {
		if !seen.insert(&cap.id) {
			return Err(RegistryError::Validation(format!(
				"duplicate capability id {:?} in one registration",
				cap.id
			)));
		}
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn def(id: &str, verb: Option<&str>) -> CapabilityDefinition {
		CapabilityDefinition {
			id: id.to_string(),
			verb: verb.map(str::to_string),
			version: crate::types::CapabilityVersion {
				major: 1,
				minor: 0,
				patch: 0,
			},
			contract: Default::default(),
			tags: Default::default(),
			hints: Default::default(),
		}
	}

	async fn open_tmp() -> (Registry, tempfile::TempDir) {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("registry.jsonl");
		let registry = Registry::open(&path, Duration::from_secs(120)).unwrap();
		(registry, dir)
	}

	#[tokio::test]
	async fn register_and_route_happy_path() {
		let (registry, _dir) = open_tmp().await;
		let result = registry
			.register(
				"w1",
				"https://w1:8500",
				vec![def("email.classify", Some("classify"))],
				Default::default(),
			)
			.await
			.unwrap();
		assert_eq!(result.capabilities_registered, 1);

		let route = registry.route("classify", "email.classify").await.unwrap();
		assert_eq!(route.worker_id, "w1");
		assert_eq!(route.capability, "classify:email.classify");

		let caps = registry.get_all_capabilities().await;
		let summary = caps.get("classify:email.classify").unwrap();
		assert_eq!(summary.workers, 1);
		assert_eq!(summary.healthy_workers, 1);
	}

	#[tokio::test]
	async fn heartbeat_unknown_worker() {
		let (registry, _dir) = open_tmp().await;
		let result = registry.heartbeat("ghost").await.unwrap();
		assert_eq!(result.status, "unknown_worker");
		assert!(!result.acknowledged);
	}

	#[tokio::test]
	async fn health_expiry_excludes_from_routing() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("registry.jsonl");
		let registry = Registry::open(&path, Duration::from_millis(10)).unwrap();
		registry
			.register(
				"w1",
				"https://w1:8500",
				vec![def("email.classify", Some("classify"))],
				Default::default(),
			)
			.await
			.unwrap();

		tokio::time::sleep(Duration::from_millis(30)).await;

		let workers = registry.get_all_workers().await;
		assert!(!workers[0].is_healthy);
		assert!(registry.route("classify", "email.classify").await.is_none());
	}

	#[tokio::test]
	async fn tie_break_prefers_earliest_healthy_registration() {
		let (registry, _dir) = open_tmp().await;
		registry
			.register(
				"w1",
				"https://w1:8500",
				vec![def("email.classify", None)],
				Default::default(),
			)
			.await
			.unwrap();
		registry
			.register(
				"w2",
				"https://w2:8500",
				vec![def("email.classify", None)],
				Default::default(),
			)
			.await
			.unwrap();

		let route = registry.route("invoke", "email.classify").await.unwrap();
		assert_eq!(route.worker_id, "w1");

		registry.deregister("w1").await.unwrap();
		let route = registry.route("invoke", "email.classify").await.unwrap();
		assert_eq!(route.worker_id, "w2");
	}

	#[tokio::test]
	async fn reregistration_replaces_capabilities_and_prunes_empty_keys() {
		let (registry, _dir) = open_tmp().await;
		registry
			.register(
				"w1",
				"https://w1:8500",
				vec![def("a", None)],
				Default::default(),
			)
			.await
			.unwrap();
		registry
			.register(
				"w1",
				"https://w1:8500",
				vec![def("b", None)],
				Default::default(),
			)
			.await
			.unwrap();

		let workers = registry.get_all_workers().await;
		assert_eq!(workers.len(), 1);
		assert_eq!(workers[0].capabilities, vec![CapabilityKey::new("invoke", "b")]);

		let caps = registry.get_all_capabilities().await;
		assert!(!caps.contains_key("invoke:a"));
		assert!(caps.contains_key("invoke:b"));
	}

	#[tokio::test]
	async fn duplicate_capability_ids_rejected() {
		let (registry, _dir) = open_tmp().await;
		let err = registry
			.register(
				"w1",
				"https://w1:8500",
				vec![def("a", None), def("a", Some("other"))],
				Default::default(),
			)
			.await
			.unwrap_err();
		assert!(matches!(err, RegistryError::Validation(_)));
	}

	#[tokio::test]
	async fn deregister_is_idempotent() {
		let (registry, _dir) = open_tmp().await;
		registry.deregister("ghost").await.unwrap();
		registry
			.register("w1", "https://w1:8500", vec![], Default::default())
			.await
			.unwrap();
		registry.deregister("w1").await.unwrap();
		registry.deregister("w1").await.unwrap();
		assert!(registry.get_all_workers().await.is_empty());
	}

	#[tokio::test]
	async fn journal_replays_to_identical_state() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("registry.jsonl");
		{
			let registry = Registry::open(&path, Duration::from_secs(120)).unwrap();
			registry
				.register(
					"w1",
					"https://w1:8500",
					vec![def("email.classify", Some("classify"))],
					Default::default(),
				)
				.await
				.unwrap();
			registry.heartbeat("w1").await.unwrap();
		}

		let reopened = Registry::open(&path, Duration::from_secs(120)).unwrap();
		let workers = reopened.get_all_workers().await;
		assert_eq!(workers.len(), 1);
		assert_eq!(workers[0].worker_id, "w1");
	}

	#[tokio::test]
	async fn rejects_non_https_worker_url() {
		let (registry, _dir) = open_tmp().await;
		let err = registry
			.register("w1", "http://insecure", vec![], Default::default())
			.await
			.unwrap_err();
		assert!(matches!(err, RegistryError::Validation(_)));
	}
}
