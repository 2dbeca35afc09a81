use serde::Serialize;

/// Errors that can occur while resolving process-wide configuration.
///
/// Distinct from the per-component error enums (`RegistryError`,
/// `CertError`, ...) because configuration failures happen before any
/// component exists and always map to exit code 2.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
	#[error("missing required environment variable {0}")]
	MissingEnv(&'static str),
	#[error("invalid value for {key}: {value:?} ({reason})")]
	InvalidEnv {
		key: &'static str,
		value: String,
		reason: String,
	},
	#[error("config file {path}: {source}")]
	ConfigFile {
		path: String,
		#[source]
		source: std::io::Error,
	},
	#[error("config file {path}: {source}")]
	ConfigParse {
		path: String,
		#[source]
		source: toml::de::Error,
	},
}

/// Wire shape for every error response across the fleet: a short
/// machine-readable `detail` string. Never carries a stack trace.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
	pub detail: String,
}

impl ErrorDetail {
	pub fn new(detail: impl Into<String>) -> Self {
		Self {
			detail: detail.into(),
		}
	}
}
