//! Error taxonomy for certificate bootstrap and mTLS transport setup.

#[derive(Debug, thiserror::Error)]
pub enum CertError {
	#[error("certificate bundle file {path} does not exist")]
	BundleFileMissing { path: String },

	#[error("reading {path}: {source}")]
	Io {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("parsing PEM in {path}: {reason}")]
	PemParse { path: String, reason: String },

	#[error("no private key found in {path}")]
	NoPrivateKey { path: String },

	#[error("generating RSA key pair: {0}")]
	KeyGeneration(String),

	#[error("building CSR: {0}")]
	CsrBuild(String),

	#[error("CA service unavailable after waiting {waited_secs}s: {reason}")]
	CaUnavailable { waited_secs: u64, reason: String },

	#[error("CSR submission failed: {0}")]
	CsrSubmission(String),

	#[error("building TLS configuration: {0}")]
	TlsConfig(String),

	#[error("certificate initialization failed: {0}")]
	Initialization(String),
}
