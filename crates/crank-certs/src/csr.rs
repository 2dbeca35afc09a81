//! Local key generation and CSR construction.
//!
//! RSA-4096 key generation takes on the order of seconds; callers on a
//! cooperative scheduler MUST run [`generate`] via `spawn_blocking` (see
//! `bootstrap::generate_csr`) rather than call it directly from an async
//! context.

use pkcs8::EncodePrivateKey;
use rcgen::{
	CertificateParams, DistinguishedName, DnType, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use rsa::rand_core::OsRng;
use rsa::RsaPrivateKey;

use crate::constants::RSA_KEY_BITS;
use crate::error::CertError;

/// Options describing the identity a CSR should claim.
pub struct CsrOptions {
	pub worker_id: String,
	pub extra_sans: Vec<String>,
}

/// Output of local key + CSR generation. `private_key_pem` never leaves
/// the process that called `generate`.
pub struct GeneratedCsr {
	pub csr_pem: String,
	pub private_key_pem: String,
}

/// Generates an RSA-4096 key pair and a CSR for it. CPU-bound: run off
/// the async executor.
pub fn generate(options: &CsrOptions) -> Result<GeneratedCsr, CertError> {
	let rsa_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
		.map_err(|e| CertError::KeyGeneration(e.to_string()))?;
	let private_key_pem = rsa_key
		.to_pkcs8_pem(pkcs8::LineEnding::LF)
		.map_err(|e| CertError::KeyGeneration(e.to_string()))?
		.to_string();

	let key_pair = KeyPair::from_pem(&private_key_pem)
		.map_err(|e| CertError::CsrBuild(e.to_string()))?;

	let mut params = CertificateParams::default();

	let mut dn = DistinguishedName::new();
	dn.push(DnType::CommonName, options.worker_id.as_str());
	dn.push(DnType::OrganizationName, "Crank Platform");
	dn.push(DnType::OrganizationalUnitName, "Worker Services");
	params.distinguished_name = dn;

	let mut sans = vec![options.worker_id.clone(), "localhost".to_string()];
	sans.extend(options.extra_sans.iter().cloned());
	sans.sort();
	sans.dedup();
	params.subject_alt_names = sans
		.into_iter()
		.map(|name| {
			Ok(SanType::DnsName(
				name.try_into()
					.map_err(|e| CertError::CsrBuild(format!("invalid SAN: {e}")))?,
			))
		})
		.collect::<Result<Vec<_>, CertError>>()?;

	params.is_ca = IsCa::ExplicitNoCa;
	params.key_usages = vec![
		KeyUsagePurpose::DigitalSignature,
		KeyUsagePurpose::KeyEncipherment,
		KeyUsagePurpose::ContentCommitment,
	];

	let csr_pem = params
		.serialize_request(&key_pair)
		.map_err(|e| CertError::CsrBuild(e.to_string()))?
		.pem()
		.map_err(|e| CertError::CsrBuild(e.to_string()))?;

	Ok(GeneratedCsr {
		csr_pem,
		private_key_pem,
	})
}
