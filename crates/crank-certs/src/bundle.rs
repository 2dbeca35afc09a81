//! On-disk certificate bundle: the three (or five) fixed-name files a
//! component reads to stand up mTLS.

use std::path::{Path, PathBuf};

use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::constants::{CA_CERT_FILE, CLIENT_CERT_FILE, CLIENT_KEY_FILE};
use crate::error::CertError;

/// Paths to a worker or controller's certificate material. All three
/// required paths must exist when constructed; absence is a fatal
/// error, never silently tolerated.
#[derive(Debug, Clone)]
pub struct CertificateBundle {
	pub cert_file: PathBuf,
	pub key_file: PathBuf,
	pub ca_file: PathBuf,
	pub worker_id: String,
}

impl CertificateBundle {
	/// Looks up the fixed-name bundle files under `cert_dir` and fails
	/// fast if any of them is missing.
	pub fn from_dir(cert_dir: &Path, worker_id: &str) -> Result<Self, CertError> {
		let bundle = Self {
			cert_file: cert_dir.join(CLIENT_CERT_FILE),
			key_file: cert_dir.join(CLIENT_KEY_FILE),
			ca_file: cert_dir.join(CA_CERT_FILE),
			worker_id: worker_id.to_string(),
		};
		bundle.require_files_exist()?;
		Ok(bundle)
	}

	fn require_files_exist(&self) -> Result<(), CertError> {
		for path in [&self.cert_file, &self.key_file, &self.ca_file] {
			if !path.exists() {
				return Err(CertError::BundleFileMissing {
					path: path.display().to_string(),
				});
			}
		}
		Ok(())
	}

	/// Whether a complete bundle already exists at `cert_dir`, without
	/// raising an error if it doesn't.
	pub fn exists_in(cert_dir: &Path) -> bool {
		[CLIENT_CERT_FILE, CLIENT_KEY_FILE, CA_CERT_FILE]
			.iter()
			.all(|name| cert_dir.join(name).exists())
	}

	pub fn load_client_chain(&self) -> Result<Vec<CertificateDer<'static>>, CertError> {
		load_cert_chain(&self.cert_file)
	}

	pub fn load_ca_cert(&self) -> Result<CertificateDer<'static>, CertError> {
		let chain = load_cert_chain(&self.ca_file)?;
		chain
			.into_iter()
			.next()
			.ok_or_else(|| CertError::PemParse {
				path: self.ca_file.display().to_string(),
				reason: "no certificate found".to_string(),
			})
	}

	pub fn load_private_key(&self) -> Result<PrivateKeyDer<'static>, CertError> {
		load_private_key(&self.key_file)
	}
}

pub fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, CertError> {
	let bytes = std::fs::read(path).map_err(|source| CertError::Io {
		path: path.display().to_string(),
		source,
	})?;
	rustls_pemfile::certs(&mut bytes.as_slice())
		.collect::<Result<Vec<_>, _>>()
		.map_err(|e| CertError::PemParse {
			path: path.display().to_string(),
			reason: e.to_string(),
		})
}

pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CertError> {
	let bytes = std::fs::read(path).map_err(|source| CertError::Io {
		path: path.display().to_string(),
		source,
	})?;
	rustls_pemfile::private_key(&mut bytes.as_slice())
		.map_err(|e| CertError::PemParse {
			path: path.display().to_string(),
			reason: e.to_string(),
		})?
		.ok_or_else(|| CertError::NoPrivateKey {
			path: path.display().to_string(),
		})
}
