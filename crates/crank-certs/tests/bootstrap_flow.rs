//! End-to-end bootstrap flow against the in-process mock CA.

use std::os::unix::fs::PermissionsExt;
use std::sync::{Arc, Mutex};

use crank_certs::bootstrap::initialize_worker_certificates;
use crank_certs::constants::{CA_CERT_FILE, CLIENT_CERT_FILE, CLIENT_KEY_FILE};
use crank_certs::testutil::MockCertificateAuthority;
use crank_core::events::{self, CertificateEvent};

#[tokio::test]
async fn happy_path_emits_expected_event_order_and_file_tree() {
	let ca = MockCertificateAuthority::spawn().await;
	let cert_dir = tempfile::tempdir().unwrap();

	let observed: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

	for (event, label) in [
		(CertificateEvent::CsrGenerated, "csr_generated"),
		(CertificateEvent::CsrSubmitted, "csr_submitted"),
		(CertificateEvent::CertIssued, "cert_issued"),
	] {
		let observed = observed.clone();
		events::register_handler(
			event,
			Box::new(move |_ctx| {
				observed.lock().unwrap().push(label);
			}),
		);
	}

	initialize_worker_certificates(&ca.base_url, "w1", cert_dir.path(), vec![])
		.await
		.expect("bootstrap should succeed against the mock CA");

	assert_eq!(
		*observed.lock().unwrap(),
		vec!["csr_generated", "csr_submitted", "cert_issued"]
	);

	let cert_path = cert_dir.path().join(CLIENT_CERT_FILE);
	let key_path = cert_dir.path().join(CLIENT_KEY_FILE);
	let ca_path = cert_dir.path().join(CA_CERT_FILE);
	assert!(cert_path.exists());
	assert!(key_path.exists());
	assert!(ca_path.exists());

	let key_mode = std::fs::metadata(&key_path).unwrap().permissions().mode() & 0o777;
	assert_eq!(key_mode, 0o600);
	let cert_mode = std::fs::metadata(&cert_path).unwrap().permissions().mode() & 0o777;
	assert_eq!(cert_mode, 0o644);

	let cert_contents = std::fs::read_to_string(&cert_path).unwrap();
	assert!(cert_contents.contains("BEGIN CERTIFICATE"));
}

#[tokio::test]
async fn bootstrap_fails_when_ca_unreachable() {
	let cert_dir = tempfile::tempdir().unwrap();
	// Nothing is listening on this port.
	let result = initialize_worker_certificates(
		"https://127.0.0.1:1",
		"w1",
		cert_dir.path(),
		vec![],
	)
	.await;
	assert!(result.is_err());
	assert!(!cert_dir.path().join(CLIENT_CERT_FILE).exists());
}
