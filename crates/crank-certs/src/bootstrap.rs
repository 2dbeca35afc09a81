//! Zero-trust certificate bootstrap: the CSR-based provisioning flow
//! that gets a worker or controller its first `CertificateBundle`.

use std::path::Path;
use std::time::{Duration, Instant};

use crank_core::events::{self, CertificateEvent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};

use crate::constants::{
	backoff_for_attempt, CA_CERT_FILE, CA_HEALTH_POLL_INTERVAL, CA_HEALTH_WAIT_TIMEOUT,
	CERT_FILE_MODE, CLIENT_CERT_FILE, CLIENT_KEY_FILE, KEY_FILE_MODE, MAX_RETRIES,
};
use crate::csr::{self, CsrOptions};
use crate::error::CertError;
use crate::transport::{bootstrap_client, ca_trusting_client};

#[derive(Debug, Deserialize)]
struct CaHealthResponse {
	#[allow(dead_code)]
	status: String,
}

#[derive(Debug, Deserialize)]
struct CaCertificateResponse {
	ca_certificate: String,
}

#[derive(Debug, Serialize)]
struct CsrSubmission {
	csr: String,
	service_name: String,
}

#[derive(Debug, Deserialize)]
struct CsrResponse {
	certificate: String,
}

/// Polls `GET {ca_url}/health` once a second until it succeeds or
/// `CA_HEALTH_WAIT_TIMEOUT` elapses.
pub async fn wait_for_ca_service(ca_url: &str, worker_id: &str) -> Result<(), CertError> {
	let client = bootstrap_client(Duration::from_secs(5))?;
	let deadline = Instant::now() + CA_HEALTH_WAIT_TIMEOUT;
	let mut last_error = String::from("timed out before first attempt");

	while Instant::now() < deadline {
		match client.get(format!("{ca_url}/health")).send().await {
			Ok(resp) if resp.status().is_success() => {
				if resp.json::<CaHealthResponse>().await.is_ok() {
					return Ok(());
				}
			}
			Ok(resp) => last_error = format!("unexpected status {}", resp.status()),
			Err(e) => last_error = e.to_string(),
		}
		tokio::time::sleep(CA_HEALTH_POLL_INTERVAL).await;
	}

	events::emit(
		CertificateEvent::CaUnavailable,
		worker_id,
		None,
		metadata(json!({ "reason": &last_error, "waited_secs": CA_HEALTH_WAIT_TIMEOUT.as_secs() })),
		tracing::Level::ERROR,
	);

	Err(CertError::CaUnavailable {
		waited_secs: CA_HEALTH_WAIT_TIMEOUT.as_secs(),
		reason: last_error,
	})
}

/// Retrieves the CA's own certificate over the unverified bootstrap
/// channel, retrying with exponential backoff.
pub async fn get_ca_certificate(ca_url: &str, worker_id: &str) -> Result<String, CertError> {
	let client = bootstrap_client(Duration::from_secs(30))?;

	with_retries(worker_id, "fetch_ca_certificate", || async {
		let resp = client
			.get(format!("{ca_url}/ca/certificate"))
			.send()
			.await
			.map_err(|e| e.to_string())?;
		if !resp.status().is_success() {
			return Err(format!("unexpected status {}", resp.status()));
		}
		resp.json::<CaCertificateResponse>()
			.await
			.map(|body| body.ca_certificate)
			.map_err(|e| e.to_string())
	})
	.await
}

/// Generates the local RSA-4096 key pair and CSR off the async
/// executor, since key generation is CPU-bound and must not block
/// concurrent request handling.
pub async fn generate_csr(worker_id: &str, extra_sans: Vec<String>) -> Result<csr::GeneratedCsr, CertError> {
	let worker_id = worker_id.to_string();
	let generated = tokio::task::spawn_blocking(move || {
		csr::generate(&CsrOptions {
			worker_id,
			extra_sans,
		})
	})
	.await
	.map_err(|e| CertError::KeyGeneration(format!("key generation task panicked: {e}")))??;

	Ok(generated)
}

/// Submits a CSR to the CA and returns the signed certificate PEM,
/// retrying with exponential backoff on transient failures. Verifies
/// the CA's server certificate against `ca_certificate_pem`, the cert
/// retrieved in the previous bootstrap step, rather than the insecure
/// bootstrap channel.
pub async fn submit_csr(
	ca_url: &str,
	worker_id: &str,
	csr_pem: &str,
	ca_certificate_pem: &str,
) -> Result<String, CertError> {
	let client = ca_trusting_client(ca_certificate_pem.as_bytes(), Duration::from_secs(30))?;

	events::emit(
		CertificateEvent::CsrSubmitted,
		worker_id,
		None,
		metadata(json!({})),
		tracing::Level::INFO,
	);

	let submission = CsrSubmission {
		csr: csr_pem.to_string(),
		service_name: worker_id.to_string(),
	};

	let result = with_retries(worker_id, "submit_csr", || async {
		let resp = client
			.post(format!("{ca_url}/certificates/csr"))
			.json(&submission)
			.send()
			.await
			.map_err(|e| e.to_string())?;
		if !resp.status().is_success() {
			return Err(format!("unexpected status {}", resp.status()));
		}
		resp.json::<CsrResponse>()
			.await
			.map(|body| body.certificate)
			.map_err(|e| e.to_string())
	})
	.await;

	result.map_err(|e| match e {
		CertError::CaUnavailable { reason, .. } => CertError::CsrSubmission(reason),
		other => other,
	})
}

/// Runs the full bootstrap protocol end to end and persists the
/// resulting bundle into `cert_dir`.
pub async fn initialize_worker_certificates(
	ca_url: &str,
	worker_id: &str,
	cert_dir: &Path,
	extra_sans: Vec<String>,
) -> Result<(), CertError> {
	wait_for_ca_service(ca_url, worker_id).await?;
	let ca_certificate = get_ca_certificate(ca_url, worker_id).await?;

	let generated = generate_csr(worker_id, extra_sans).await?;
	events::emit(
		CertificateEvent::CsrGenerated,
		worker_id,
		None,
		metadata(json!({})),
		tracing::Level::INFO,
	);

	let submission_result =
		submit_csr(ca_url, worker_id, &generated.csr_pem, &ca_certificate).await;
	let certificate_pem = match submission_result {
		Ok(cert) => cert,
		Err(e) => {
			events::emit(
				CertificateEvent::CsrFailed,
				worker_id,
				None,
				metadata(json!({ "phase": "csr_submission", "error": e.to_string() })),
				tracing::Level::ERROR,
			);
			return Err(e);
		}
	};

	if let Err(e) = persist_bundle(cert_dir, &certificate_pem, &generated.private_key_pem, &ca_certificate) {
		events::emit(
			CertificateEvent::CsrFailed,
			worker_id,
			None,
			metadata(json!({ "phase": "bootstrap_other", "error": e.to_string() })),
			tracing::Level::ERROR,
		);
		return Err(e);
	}

	events::emit(
		CertificateEvent::CertIssued,
		worker_id,
		None,
		metadata(json!({
			"cert_file": cert_dir.join(CLIENT_CERT_FILE).display().to_string(),
			"key_file": cert_dir.join(CLIENT_KEY_FILE).display().to_string(),
			"ca_file": cert_dir.join(CA_CERT_FILE).display().to_string(),
		})),
		tracing::Level::INFO,
	);

	Ok(())
}

fn persist_bundle(
	cert_dir: &Path,
	cert_pem: &str,
	key_pem: &str,
	ca_pem: &str,
) -> Result<(), CertError> {
	std::fs::create_dir_all(cert_dir).map_err(|source| CertError::Io {
		path: cert_dir.display().to_string(),
		source,
	})?;

	write_with_mode(&cert_dir.join(CLIENT_CERT_FILE), cert_pem.as_bytes(), CERT_FILE_MODE)?;
	write_with_mode(&cert_dir.join(CLIENT_KEY_FILE), key_pem.as_bytes(), KEY_FILE_MODE)?;
	write_with_mode(&cert_dir.join(CA_CERT_FILE), ca_pem.as_bytes(), CERT_FILE_MODE)?;
	Ok(())
}

#[cfg(unix)]
fn write_with_mode(path: &Path, contents: &[u8], mode: u32) -> Result<(), CertError> {
	use std::os::unix::fs::PermissionsExt;

	std::fs::write(path, contents).map_err(|source| CertError::Io {
		path: path.display().to_string(),
		source,
	})?;
	std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|source| {
		CertError::Io {
			path: path.display().to_string(),
			source,
		}
	})
}

#[cfg(not(unix))]
fn write_with_mode(path: &Path, contents: &[u8], _mode: u32) -> Result<(), CertError> {
	std::fs::write(path, contents).map_err(|source| CertError::Io {
		path: path.display().to_string(),
		source,
	})
}

fn metadata(value: serde_json::Value) -> Map<String, serde_json::Value> {
	match value {
		serde_json::Value::Object(map) => map,
		_ => Map::new(),
	}
}

/// Runs `step` up to `MAX_RETRIES` times with exponential backoff,
/// emitting `CA_UNAVAILABLE` on every failed attempt.
async fn with_retries<T, F, Fut>(worker_id: &str, step_name: &str, mut step: F) -> Result<T, CertError>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, String>>,
{
	let mut last_error = String::new();
	for attempt in 0..=MAX_RETRIES {
		match step().await {
			Ok(value) => return Ok(value),
			Err(e) => {
				last_error = e.clone();
				events::emit(
					CertificateEvent::CaUnavailable,
					worker_id,
					None,
					metadata(json!({
						"step": step_name,
						"attempt": attempt + 1,
						"max_attempts": MAX_RETRIES + 1,
						"error": e,
					})),
					tracing::Level::WARN,
				);
				if attempt < MAX_RETRIES {
					tokio::time::sleep(backoff_for_attempt(attempt)).await;
				}
			}
		}
	}

	Err(CertError::CaUnavailable {
		waited_secs: 0,
		reason: last_error,
	})
}
