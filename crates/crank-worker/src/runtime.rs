//! The worker runtime: owns startup, registration, heartbeating, health,
//! and shutdown so a concrete worker only supplies its capabilities and
//! its own route handlers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use crank_certs::bootstrap::initialize_worker_certificates;
use crank_certs::{CertificateBundle, MtlsTransport};
use crank_core::WorkerConfig;
use crank_registry::CapabilityDefinition;
use tokio::sync::Mutex as AsyncMutex;

use crate::controller_client::ControllerClient;
use crate::health::{Health, HealthState};
use crate::shutdown::{ShutdownHook, ShutdownRegistry};

#[derive(Debug, thiserror::Error)]
pub enum WorkerRuntimeError {
	#[error("certificate bootstrap failed: {0}")]
	Bootstrap(#[from] crank_certs::CertError),
	#[error("failed to build mTLS transport: {0}")]
	Controller(#[from] crate::controller_client::ControllerClientError),
	#[error("server error: {0}")]
	Server(std::io::Error),
}

/// Everything a concrete worker needs resolved before it can start
/// accepting requests: its own identity, its certificate bundle, and
/// an optional controller client.
pub struct WorkerRuntime {
	worker_id: String,
	worker_url: String,
	health: Health,
	shutdown_registry: AsyncMutex<ShutdownRegistry>,
	controller_client: Option<Arc<ControllerClient>>,
	bundle: CertificateBundle,
}

impl WorkerRuntime {
	/// Step 1-2: resolves configuration and ensures a certificate bundle
	/// exists, bootstrapping one from `ca_service_url` when the bundle
	/// is missing. Fails fast if neither a bundle nor a CA is available.
	pub async fn bootstrap(
		config: &WorkerConfig,
		worker_id: String,
		worker_url: String,
		extra_sans: Vec<String>,
	) -> Result<Self, WorkerRuntimeError> {
		if !CertificateBundle::exists_in(&config.cert_dir) {
			let Some(ca_url) = &config.ca_service_url else {
				return Err(WorkerRuntimeError::Bootstrap(
					crank_certs::CertError::Initialization(
						"no certificate bundle present and no CA_SERVICE_URL configured".into(),
					),
				));
			};
			initialize_worker_certificates(ca_url, &worker_id, &config.cert_dir, extra_sans).await?;
		}
		let bundle = CertificateBundle::from_dir(&config.cert_dir, &worker_id)?;

		let health = Health::new();
		let mut shutdown = ShutdownRegistry::new();

		let controller_client = match &config.controller_url {
			Some(controller_url) => {
				let client = Arc::new(ControllerClient::new(
					&bundle,
					controller_url.clone(),
					worker_id.clone(),
					Duration::from_secs(config.heartbeat_interval_secs),
					health.clone(),
				)?);
				Some(client)
			}
			None => None,
		};

		// Registered earliest, so it runs last: deregister before the
		// controller client's connection pool is needed no more.
		if let Some(client) = controller_client.clone() {
			let health_for_hook = health.clone();
			shutdown.register(ShutdownHook::new(
				"deregister-from-controller",
				"stop heartbeating and deregister this worker from the controller",
				Duration::from_secs(10),
				move || async move {
					health_for_hook.set(HealthState::Stopping);
					client.stop().await;
					let _ = client.deregister().await;
				},
			));
		} else {
			shutdown.register(ShutdownHook::new(
				"stop-standalone",
				"transition to stopping with no controller to deregister from",
				Duration::from_secs(1),
				{
					let health = health.clone();
					move || async move { health.set(HealthState::Stopping) }
				},
			));
		}

		Ok(Self {
			worker_id,
			worker_url,
			health,
			shutdown_registry: AsyncMutex::new(shutdown),
			controller_client,
			bundle,
		})
	}

	pub fn health(&self) -> Health {
		self.health.clone()
	}

	pub fn worker_id(&self) -> &str {
		&self.worker_id
	}

	/// Registers an additional shutdown hook. Hooks registered here run
	/// after the runtime's own default hooks (LIFO: later registrations
	/// run first).
	pub async fn register_shutdown_hook(&self, hook: ShutdownHook) {
		self.shutdown_registry.lock().await.register(hook);
	}

	/// Steps 3-7: binds the HTTPS listener, transitions to `STARTING`,
	/// attempts registration (best-effort), starts heartbeating, then
	/// transitions to `HEALTHY` and serves until a shutdown signal
	/// arrives.
	pub async fn serve(
		self,
		https_port: u16,
		capabilities: Vec<CapabilityDefinition>,
		routes: Router,
	) -> Result<(), WorkerRuntimeError> {
		let server_config = MtlsTransport::build_server_config(&self.bundle)?;
		let addr = SocketAddr::from(([0, 0, 0, 0], https_port));
		let tls_config = axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(server_config));

		self.health.set(HealthState::Starting);

		if let Some(client) = &self.controller_client {
			let outcome = client.register(&self.worker_url, &capabilities).await;
			if !matches!(outcome, crate::controller_client::CallOutcome::Registered) {
				tracing::warn!(worker_id = %self.worker_id, "controller registration failed, continuing standalone");
			}
			client.start(self.worker_url.clone(), capabilities);
		}

		self.health.set(HealthState::Healthy);
		tracing::info!(%addr, worker_id = %self.worker_id, "worker listening");

		let handle = axum_server::Handle::new();
		let shutdown_handle = handle.clone();
		tokio::spawn(async move {
			let _ = tokio::signal::ctrl_c().await;
			shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
		});

		let result = axum_server::bind_rustls(addr, tls_config)
			.handle(handle)
			.serve(routes.into_make_service())
			.await;

		self.shutdown().await;

		result.map_err(WorkerRuntimeError::Server)
	}

	/// Runs every registered shutdown hook in LIFO order. Called
	/// automatically at the end of `serve`; exposed separately so a
	/// worker that never calls `serve` (or a test) can still exercise
	/// the shutdown sequence.
	pub async fn shutdown(self) {
		self.shutdown_registry.into_inner().run_all().await;
	}
}
