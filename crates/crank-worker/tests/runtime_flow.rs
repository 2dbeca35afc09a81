use std::time::Duration;

use crank_certs::testutil::MockCertificateAuthority;
use crank_core::WorkerConfig;
use crank_worker::{HealthState, WorkerRuntime};

fn cert_dir() -> tempfile::TempDir {
	tempfile::tempdir().unwrap()
}

#[tokio::test]
async fn bootstraps_certificates_and_runs_standalone_without_controller() {
	let ca = MockCertificateAuthority::spawn().await;
	let dir = cert_dir();

	let config = WorkerConfig {
		controller_url: None,
		heartbeat_interval_secs: 20,
		ca_service_url: Some(ca.base_url.clone()),
		cert_dir: dir.path().to_path_buf(),
		service_name: "demo-worker".to_string(),
	};

	let worker = WorkerRuntime::bootstrap(
		&config,
		"demo-worker-1".to_string(),
		"https://localhost:0".to_string(),
		vec![],
	)
	.await
	.expect("bootstrap should succeed against the mock CA");

	assert!(dir.path().join("client.crt").exists());
	assert!(dir.path().join("client.key").exists());
	assert!(dir.path().join("ca.crt").exists());
	assert_eq!(worker.health().get(), crank_worker::HealthState::Starting);
}

#[tokio::test]
async fn bootstrap_fails_fast_without_bundle_or_ca() {
	let dir = cert_dir();
	let config = WorkerConfig {
		controller_url: None,
		heartbeat_interval_secs: 20,
		ca_service_url: None,
		cert_dir: dir.path().to_path_buf(),
		service_name: "demo-worker".to_string(),
	};

	let result = WorkerRuntime::bootstrap(
		&config,
		"demo-worker-1".to_string(),
		"https://localhost:0".to_string(),
		vec![],
	)
	.await;

	assert!(result.is_err());
}

#[tokio::test]
async fn shutdown_hooks_run_lifo_with_default_hook_last() {
	let ca = MockCertificateAuthority::spawn().await;
	let dir = cert_dir();
	let config = WorkerConfig {
		controller_url: None,
		heartbeat_interval_secs: 20,
		ca_service_url: Some(ca.base_url.clone()),
		cert_dir: dir.path().to_path_buf(),
		service_name: "demo-worker".to_string(),
	};

	let worker = WorkerRuntime::bootstrap(
		&config,
		"demo-worker-1".to_string(),
		"https://localhost:0".to_string(),
		vec![],
	)
	.await
	.unwrap();

	let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
	let o = order.clone();
	worker
		.register_shutdown_hook(crank_worker::ShutdownHook::new(
			"custom",
			"worker-specific cleanup",
			Duration::from_secs(1),
			move || async move { o.lock().unwrap().push("custom") },
		))
		.await;

	let health = worker.health();
	assert_eq!(health.get(), HealthState::Starting);

	worker.shutdown().await;

	// The custom hook was registered after bootstrap's own default
	// hook, so in LIFO order it runs first; the default hook's health
	// transition then runs last.
	assert_eq!(*order.lock().unwrap(), vec!["custom"]);
	assert_eq!(health.get(), HealthState::Stopping);
}
