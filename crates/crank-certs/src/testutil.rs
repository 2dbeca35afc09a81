//! In-process mock CA service for integration tests.
//!
//! Speaks the same three-endpoint contract as the real CA service
//! (`GET /health`, `GET /ca/certificate`, `POST /certificates/csr`)
//! over HTTPS, so bootstrap tests exercise the real transport stack.
//! It does not reuse the CSR's own public key when signing — the mock
//! exists to exercise the protocol, not to be a production CA.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use rcgen::{
	CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

struct CaState {
	ca_cert_pem: String,
	ca_params: CertificateParams,
	ca_key_pair: KeyPair,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
	status: &'static str,
	provider: &'static str,
}

#[derive(Debug, Serialize)]
struct CaCertificateResponse {
	ca_certificate: String,
}

#[derive(Debug, Deserialize)]
struct CsrRequest {
	#[allow(dead_code)]
	csr: String,
	service_name: String,
}

#[derive(Debug, Serialize)]
struct CsrResponse {
	certificate: String,
}

/// A running mock CA bound to an ephemeral local port.
pub struct MockCertificateAuthority {
	pub base_url: String,
	pub ca_cert_pem: String,
	handle: JoinHandle<()>,
}

impl Drop for MockCertificateAuthority {
	fn drop(&mut self) {
		self.handle.abort();
	}
}

impl MockCertificateAuthority {
	/// Generates a root CA, binds an HTTPS listener on an ephemeral
	/// port, and starts serving in the background.
	pub async fn spawn() -> Self {
		let (ca_cert_pem, ca_params, ca_key_pair) = generate_root_ca();
		let server_chain = generate_server_leaf(&ca_params, &ca_key_pair);

		let state = Arc::new(CaState {
			ca_cert_pem: ca_cert_pem.clone(),
			ca_params,
			ca_key_pair,
		});

		let app = Router::new()
			.route("/health", get(health))
			.route("/ca/certificate", get(ca_certificate))
			.route("/certificates/csr", post(sign_csr))
			.with_state(state);

		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr: SocketAddr = listener.local_addr().unwrap();
		let std_listener = listener.into_std().unwrap();
		std_listener.set_nonblocking(false).unwrap();

		let rustls_config =
			axum_server::tls_rustls::RustlsConfig::from_pem(
				server_chain.cert_pem.into_bytes(),
				server_chain.key_pem.into_bytes(),
			)
			.await
			.unwrap();

		let handle = tokio::spawn(async move {
			axum_server::from_tcp_rustls(std_listener, rustls_config)
				.serve(app.into_make_service())
				.await
				.ok();
		});

		Self {
			base_url: format!("https://{addr}"),
			ca_cert_pem,
			handle,
		}
	}
}

async fn health() -> Json<HealthResponse> {
	Json(HealthResponse {
		status: "healthy",
		provider: "mock",
	})
}

async fn ca_certificate(State(state): State<Arc<CaState>>) -> Json<CaCertificateResponse> {
	Json(CaCertificateResponse {
		ca_certificate: state.ca_cert_pem.clone(),
	})
}

async fn sign_csr(State(state): State<Arc<CaState>>, Json(req): Json<CsrRequest>) -> Json<CsrResponse> {
	let mut params = CertificateParams::default();
	let mut dn = DistinguishedName::new();
	dn.push(DnType::CommonName, req.service_name.as_str());
	dn.push(DnType::OrganizationName, "Crank Platform");
	params.distinguished_name = dn;
	params.is_ca = IsCa::ExplicitNoCa;
	params.key_usages = vec![
		KeyUsagePurpose::DigitalSignature,
		KeyUsagePurpose::KeyEncipherment,
	];

	let leaf_key = KeyPair::generate().unwrap();
	let issuer = rcgen::Issuer::from_params(&state.ca_params, &state.ca_key_pair);
	let leaf_cert = params.signed_by(&leaf_key, &issuer).unwrap();

	Json(CsrResponse {
		certificate: format!("{}\n{}", leaf_cert.pem(), state.ca_cert_pem),
	})
}

fn generate_root_ca() -> (String, CertificateParams, KeyPair) {
	let key_pair = KeyPair::generate().unwrap();
	let mut params = CertificateParams::default();
	let mut dn = DistinguishedName::new();
	dn.push(DnType::CommonName, "Crank Platform Mock Root CA");
	params.distinguished_name = dn;
	params.is_ca = IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
	params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

	let cert = params.self_signed(&key_pair).unwrap();
	let pem = cert.pem();
	(pem, params, key_pair)
}

struct ServerLeaf {
	cert_pem: String,
	key_pem: String,
}

fn generate_server_leaf(ca_params: &CertificateParams, ca_key_pair: &KeyPair) -> ServerLeaf {
	let key_pair = KeyPair::generate().unwrap();
	let mut params = CertificateParams::default();
	let mut dn = DistinguishedName::new();
	dn.push(DnType::CommonName, "localhost");
	params.distinguished_name = dn;
	params.is_ca = IsCa::ExplicitNoCa;
	params.subject_alt_names = vec![
		SanType::DnsName("localhost".try_into().unwrap()),
		SanType::IpAddress("127.0.0.1".parse().unwrap()),
	];

	let issuer = rcgen::Issuer::from_params(ca_params, ca_key_pair);
	let cert = params.signed_by(&key_pair, &issuer).unwrap();
	ServerLeaf {
		cert_pem: cert.pem(),
		key_pem: key_pair.serialize_pem(),
	}
}
