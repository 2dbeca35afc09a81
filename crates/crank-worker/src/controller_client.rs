//! Thin mTLS client wrapping the controller's `/register`, `/heartbeat`,
//! and `/deregister` endpoints, plus the background heartbeat task.

use std::sync::Arc;
use std::time::Duration;

use crank_certs::{CertificateBundle, MtlsTransport};
use crank_registry::CapabilityDefinition;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::health::Health;

#[derive(Debug, thiserror::Error)]
pub enum ControllerClientError {
	#[error("failed to build mTLS transport: {0}")]
	Transport(#[from] crank_certs::CertError),
}

/// Outcome of a single controller call, translated from HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
	Registered,
	UnknownWorker,
	PersistenceError,
	Unreachable,
}

#[derive(Serialize)]
struct RegisterPayload<'a> {
	worker_id: &'a str,
	worker_url: &'a str,
	capabilities: &'a [CapabilityDefinition],
}

#[derive(Serialize)]
struct HeartbeatPayload<'a> {
	worker_id: &'a str,
}

pub struct ControllerClient {
	client: reqwest::Client,
	controller_url: String,
	worker_id: String,
	heartbeat_interval: Duration,
	health: Health,
	cancel: CancellationToken,
	task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ControllerClient {
	pub fn new(
		bundle: &CertificateBundle,
		controller_url: String,
		worker_id: String,
		heartbeat_interval: Duration,
		health: Health,
	) -> Result<Self, ControllerClientError> {
		let client = MtlsTransport::build_client(bundle)?;
		Ok(Self {
			client,
			controller_url,
			worker_id,
			heartbeat_interval,
			health,
			cancel: CancellationToken::new(),
			task: std::sync::Mutex::new(None),
		})
	}

	pub async fn register(&self, worker_url: &str, capabilities: &[CapabilityDefinition]) -> CallOutcome {
		let body = RegisterPayload {
			worker_id: &self.worker_id,
			worker_url,
			capabilities,
		};
		let response = self
			.client
			.post(format!("{}/register", self.controller_url))
			.json(&body)
			.send()
			.await;

		match response {
			Ok(resp) if resp.status().is_success() => CallOutcome::Registered,
			Ok(resp) if resp.status() == reqwest::StatusCode::INTERNAL_SERVER_ERROR => {
				CallOutcome::PersistenceError
			}
			Ok(_) => CallOutcome::UnknownWorker,
			Err(_) => CallOutcome::Unreachable,
		}
	}

	async fn heartbeat_once(&self) -> CallOutcome {
		let body = HeartbeatPayload {
			worker_id: &self.worker_id,
		};
		let response = self
			.client
			.post(format!("{}/heartbeat", self.controller_url))
			.json(&body)
			.send()
			.await;

		match response {
			Ok(resp) if resp.status().is_success() => CallOutcome::Registered,
			Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => CallOutcome::UnknownWorker,
			Ok(resp) if resp.status() == reqwest::StatusCode::INTERNAL_SERVER_ERROR => {
				CallOutcome::PersistenceError
			}
			Ok(_) => CallOutcome::Unreachable,
			Err(_) => CallOutcome::Unreachable,
		}
	}

	pub async fn deregister(&self) -> CallOutcome {
		let response = self
			.client
			.delete(format!("{}/deregister/{}", self.controller_url, self.worker_id))
			.send()
			.await;

		match response {
			Ok(resp) if resp.status().is_success() => CallOutcome::Registered,
			Ok(_) => CallOutcome::UnknownWorker,
			Err(_) => CallOutcome::Unreachable,
		}
	}

	/// Starts the background heartbeat task. Heartbeat failures are
	/// logged at warning level and never stop the task; a 404 triggers
	/// one re-registration attempt, then heartbeating resumes.
	pub fn start(self: &Arc<Self>, worker_url: String, capabilities: Vec<CapabilityDefinition>) {
		let this = self.clone();
		let cancel = self.cancel.clone();
		let handle = tokio::spawn(async move {
			let mut interval = tokio::time::interval(this.heartbeat_interval);
			interval.tick().await; // first tick fires immediately; skip it
			loop {
				tokio::select! {
					_ = cancel.cancelled() => break,
					_ = interval.tick() => {
						match this.heartbeat_once().await {
							CallOutcome::Registered => this.health.record_heartbeat_success(),
							CallOutcome::UnknownWorker => {
								tracing::warn!(worker_id = %this.worker_id, "heartbeat 404, re-registering once");
								let _ = this.register(&worker_url, &capabilities).await;
							}
							CallOutcome::PersistenceError | CallOutcome::Unreachable => {
								tracing::warn!(worker_id = %this.worker_id, "heartbeat failed");
								this.health.record_sustained_failure();
							}
						}
					}
				}
			}
		});
		*self.task.lock().unwrap() = Some(handle);
	}

	/// Cancels the heartbeat task and awaits its completion.
	pub async fn stop(&self) {
		self.cancel.cancel();
		let handle = self.task.lock().unwrap().take();
		if let Some(handle) = handle {
			let _ = handle.await;
		}
	}
}
