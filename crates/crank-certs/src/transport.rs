//! The single shared factory for mTLS-pinned HTTPS transport.
//!
//! Every intra-fleet call is built from [`MtlsTransport`], which pins
//! both the trusted CA and the presented client identity. A narrow
//! [`bootstrap_client`] with verification disabled exists solely for
//! first contact with the CA service before any certificate exists.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::bundle::CertificateBundle;
use crate::error::CertError;

/// Builds the pinned `reqwest::Client` used for every mTLS call once a
/// [`CertificateBundle`] is available: trusts only the bundle's CA,
/// always presents the bundle's client certificate.
pub struct MtlsTransport;

impl MtlsTransport {
	pub fn build_client(bundle: &CertificateBundle) -> Result<reqwest::Client, CertError> {
		let ca_cert_pem = std::fs::read(&bundle.ca_file).map_err(|source| CertError::Io {
			path: bundle.ca_file.display().to_string(),
			source,
		})?;
		let identity_pem = build_identity_pem(bundle)?;

		let ca_cert =
			reqwest::Certificate::from_pem(&ca_cert_pem).map_err(|e| CertError::TlsConfig(e.to_string()))?;
		let identity =
			reqwest::Identity::from_pem(&identity_pem).map_err(|e| CertError::TlsConfig(e.to_string()))?;

		reqwest::Client::builder()
			.use_rustls_tls()
			.add_root_certificate(ca_cert)
			.identity(identity)
			.timeout(Duration::from_secs(30))
			.build()
			.map_err(|e| CertError::TlsConfig(e.to_string()))
	}

	/// Builds a `rustls::ServerConfig` that verifies a client certificate
	/// when one is presented but does not require one, so `GET /health`
	/// stays reachable without a client cert while every cert that is
	/// presented is still checked against the bundle's CA.
	pub fn build_server_config(bundle: &CertificateBundle) -> Result<rustls::ServerConfig, CertError> {
		let mut roots = RootCertStore::empty();
		roots
			.add(bundle.load_ca_cert()?)
			.map_err(|e| CertError::TlsConfig(e.to_string()))?;

		let client_verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
			.allow_unauthenticated()
			.build()
			.map_err(|e| CertError::TlsConfig(e.to_string()))?;

		rustls::ServerConfig::builder()
			.with_client_cert_verifier(client_verifier)
			.with_single_cert(bundle.load_client_chain()?, bundle.load_private_key()?)
			.map_err(|e| CertError::TlsConfig(e.to_string()))
	}
}

fn build_identity_pem(bundle: &CertificateBundle) -> Result<Vec<u8>, CertError> {
	let mut pem = std::fs::read(&bundle.cert_file).map_err(|source| CertError::Io {
		path: bundle.cert_file.display().to_string(),
		source,
	})?;
	let key_pem = std::fs::read(&bundle.key_file).map_err(|source| CertError::Io {
		path: bundle.key_file.display().to_string(),
		source,
	})?;
	pem.push(b'\n');
	pem.extend_from_slice(&key_pem);
	Ok(pem)
}

/// A `ServerCertVerifier` that accepts any certificate, used only by
/// [`bootstrap_client`] to fetch the CA's own certificate on first
/// contact. Never used for any call after bootstrap.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
	fn verify_server_cert(
		&self,
		_end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		_now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		_message: &[u8],
		_cert: &CertificateDer<'_>,
		_dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		Ok(HandshakeSignatureValid::assertion())
	}

	fn verify_tls13_signature(
		&self,
		_message: &[u8],
		_cert: &CertificateDer<'_>,
		_dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		Ok(HandshakeSignatureValid::assertion())
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		vec![
			SignatureScheme::RSA_PKCS1_SHA256,
			SignatureScheme::RSA_PKCS1_SHA384,
			SignatureScheme::RSA_PKCS1_SHA512,
			SignatureScheme::ECDSA_NISTP256_SHA256,
			SignatureScheme::ECDSA_NISTP384_SHA384,
			SignatureScheme::ED25519,
			SignatureScheme::RSA_PSS_SHA256,
			SignatureScheme::RSA_PSS_SHA384,
			SignatureScheme::RSA_PSS_SHA512,
		]
	}
}

/// Builds the narrow HTTPS client used only for the CA bootstrap
/// handshake, with server verification disabled. Documented as
/// bootstrap-only: it MUST NOT be reused once a `CertificateBundle`
/// exists.
pub fn bootstrap_client(timeout: Duration) -> Result<reqwest::Client, CertError> {
	let rustls_config = ClientConfig::builder()
		.dangerous()
		.with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
		.with_no_client_auth();

	reqwest::Client::builder()
		.use_preconfigured_tls(rustls_config)
		.timeout(timeout)
		.build()
		.map_err(|e| CertError::TlsConfig(e.to_string()))
}

/// Builds a client that trusts only `ca_cert_pem` and presents no
/// client identity, used once the CA's own certificate is known but
/// before the local worker has one of its own (CSR submission).
pub fn ca_trusting_client(ca_cert_pem: &[u8], timeout: Duration) -> Result<reqwest::Client, CertError> {
	let ca_cert =
		reqwest::Certificate::from_pem(ca_cert_pem).map_err(|e| CertError::TlsConfig(e.to_string()))?;

	reqwest::Client::builder()
		.use_rustls_tls()
		.tls_certs_only([ca_cert])
		.timeout(timeout)
		.build()
		.map_err(|e| CertError::TlsConfig(e.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bootstrap_client_builds() {
		bootstrap_client(Duration::from_secs(5)).unwrap();
	}
}
