//! Process configuration, loaded from environment variables with an
//! optional TOML file layered beneath them (env always wins).
//!
//! Mirrors the way the controller and worker runtimes are configured
//! end to end: typed defaults, a handful of recognized keys, no
//! configuration framework crate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::CoreError;

const DEFAULT_CONTROLLER_HTTPS_PORT: u16 = 9000;
const DEFAULT_CONTROLLER_STATE_FILE: &str = "state/controller/registry.jsonl";
const DEFAULT_CONTROLLER_HEARTBEAT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_WORKER_HEARTBEAT_INTERVAL_SECS: u64 = 20;
const DEFAULT_CERT_DIR: &str = "/etc/certs";
const FALLBACK_CERT_DIR: &str = ".crank/certs";

/// Raw key/value overlay loaded from a TOML file, consulted only for
/// keys missing from the environment.
#[derive(Debug, Default, Deserialize)]
struct FileOverlay {
	#[serde(flatten)]
	values: HashMap<String, String>,
}

impl FileOverlay {
	fn load(path: &Path) -> Result<Self, CoreError> {
		let raw = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigFile {
			path: path.display().to_string(),
			source,
		})?;
		toml::from_str(&raw).map_err(|source| CoreError::ConfigParse {
			path: path.display().to_string(),
			source,
		})
	}
}

/// Resolves a single config key: environment first, then the optional
/// file overlay, then the caller-supplied default.
struct Resolver<'a> {
	overlay: Option<&'a FileOverlay>,
}

impl<'a> Resolver<'a> {
	fn get(&self, key: &'static str) -> Option<String> {
		if let Ok(value) = std::env::var(key)
			&& !value.is_empty()
		{
			return Some(value);
		}
		self.overlay.and_then(|o| o.values.get(key).cloned())
	}

	fn get_or(&self, key: &'static str, default: &str) -> String {
		self.get(key).unwrap_or_else(|| default.to_string())
	}

	fn parse_or<T: std::str::FromStr>(&self, key: &'static str, default: T) -> Result<T, CoreError>
	where
		T::Err: std::fmt::Display,
	{
		match self.get(key) {
			None => Ok(default),
			Some(raw) => raw.parse().map_err(|e: T::Err| CoreError::InvalidEnv {
				key,
				value: raw,
				reason: e.to_string(),
			}),
		}
	}
}

fn build_resolver(overlay: &Option<FileOverlay>) -> Resolver<'_> {
	Resolver {
		overlay: overlay.as_ref(),
	}
}

fn load_overlay(config_file: Option<&Path>) -> Result<Option<FileOverlay>, CoreError> {
	config_file.map(FileOverlay::load).transpose()
}

/// Picks the certificate directory: `CERT_DIR` if set, else
/// `/etc/certs` if that path exists and is writable, else
/// `~/.crank/certs`.
fn resolve_cert_dir(resolver: &Resolver<'_>) -> PathBuf {
	if let Some(explicit) = resolver.get("CERT_DIR") {
		return PathBuf::from(explicit);
	}
	let default_dir = Path::new(DEFAULT_CERT_DIR);
	if is_writable_dir(default_dir) {
		return default_dir.to_path_buf();
	}
	dirs_home().join(FALLBACK_CERT_DIR)
}

fn is_writable_dir(path: &Path) -> bool {
	if let Ok(metadata) = std::fs::metadata(path) {
		return metadata.is_dir() && !metadata.permissions().readonly();
	}
	// Directory doesn't exist yet: writable if we can create it.
	std::fs::create_dir_all(path).is_ok()
}

fn dirs_home() -> PathBuf {
	std::env::var("HOME")
		.map(PathBuf::from)
		.unwrap_or_else(|_| PathBuf::from("."))
}

/// Configuration for the controller binary.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
	pub https_port: u16,
	pub state_file: PathBuf,
	pub heartbeat_timeout_secs: u64,
	pub cert_dir: PathBuf,
	pub service_name: String,
	pub platform_auth_token: Option<String>,
}

impl ControllerConfig {
	pub fn load(config_file: Option<&Path>) -> Result<Self, CoreError> {
		let overlay = load_overlay(config_file)?;
		let resolver = build_resolver(&overlay);

		Ok(Self {
			https_port: resolver.parse_or("CONTROLLER_HTTPS_PORT", DEFAULT_CONTROLLER_HTTPS_PORT)?,
			state_file: PathBuf::from(
				resolver.get_or("CONTROLLER_STATE_FILE", DEFAULT_CONTROLLER_STATE_FILE),
			),
			heartbeat_timeout_secs: resolver.parse_or(
				"CONTROLLER_HEARTBEAT_TIMEOUT",
				DEFAULT_CONTROLLER_HEARTBEAT_TIMEOUT_SECS,
			)?,
			cert_dir: resolve_cert_dir(&resolver),
			service_name: resolver.get_or("SERVICE_NAME", "crank-controller"),
			platform_auth_token: resolver.get("PLATFORM_AUTH_TOKEN"),
		})
	}
}

/// Configuration for the worker binary.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
	pub controller_url: Option<String>,
	pub heartbeat_interval_secs: u64,
	pub ca_service_url: Option<String>,
	pub cert_dir: PathBuf,
	pub service_name: String,
}

impl WorkerConfig {
	pub fn load(config_file: Option<&Path>) -> Result<Self, CoreError> {
		let overlay = load_overlay(config_file)?;
		let resolver = build_resolver(&overlay);

		let controller_url = resolver.get("CONTROLLER_URL");
		if let Some(url) = &controller_url {
			validate_https_url("CONTROLLER_URL", url)?;
		}
		let ca_service_url = resolver.get("CA_SERVICE_URL");
		if let Some(url) = &ca_service_url {
			validate_https_url("CA_SERVICE_URL", url)?;
		}

		Ok(Self {
			controller_url,
			heartbeat_interval_secs: resolver.parse_or(
				"WORKER_HEARTBEAT_INTERVAL",
				DEFAULT_WORKER_HEARTBEAT_INTERVAL_SECS,
			)?,
			ca_service_url,
			cert_dir: resolve_cert_dir(&resolver),
			service_name: resolver.get_or("SERVICE_NAME", "crank-worker"),
		})
	}
}

fn validate_https_url(key: &'static str, value: &str) -> Result<(), CoreError> {
	if !value.starts_with("https://") {
		return Err(CoreError::InvalidEnv {
			key,
			value: value.to_string(),
			reason: "must begin with https://".to_string(),
		});
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Mutex;

	// Environment variable mutation races across tests in the same
	// process; serialize them.
	static ENV_LOCK: Mutex<()> = Mutex::new(());

	fn clear_all() {
		for key in [
			"CONTROLLER_URL",
			"CONTROLLER_HTTPS_PORT",
			"CONTROLLER_STATE_FILE",
			"CONTROLLER_HEARTBEAT_TIMEOUT",
			"WORKER_HEARTBEAT_INTERVAL",
			"CA_SERVICE_URL",
			"CERT_DIR",
			"SERVICE_NAME",
			"PLATFORM_AUTH_TOKEN",
		] {
			unsafe { std::env::remove_var(key) };
		}
	}

	#[test]
	fn controller_defaults_apply_when_unset() {
		let _guard = ENV_LOCK.lock().unwrap();
		clear_all();
		unsafe { std::env::set_var("CERT_DIR", "/tmp/crank-test-certs-1") };
		let cfg = ControllerConfig::load(None).unwrap();
		assert_eq!(cfg.https_port, DEFAULT_CONTROLLER_HTTPS_PORT);
		assert_eq!(cfg.heartbeat_timeout_secs, DEFAULT_CONTROLLER_HEARTBEAT_TIMEOUT_SECS);
		assert_eq!(cfg.service_name, "crank-controller");
		assert!(cfg.platform_auth_token.is_none());
	}

	#[test]
	fn env_overrides_default() {
		let _guard = ENV_LOCK.lock().unwrap();
		clear_all();
		unsafe {
			std::env::set_var("CONTROLLER_HTTPS_PORT", "9443");
			std::env::set_var("CERT_DIR", "/tmp/crank-test-certs-2");
		}
		let cfg = ControllerConfig::load(None).unwrap();
		assert_eq!(cfg.https_port, 9443);
	}

	#[test]
	fn invalid_port_is_rejected() {
		let _guard = ENV_LOCK.lock().unwrap();
		clear_all();
		unsafe {
			std::env::set_var("CONTROLLER_HTTPS_PORT", "not-a-number");
			std::env::set_var("CERT_DIR", "/tmp/crank-test-certs-3");
		}
		let err = ControllerConfig::load(None).unwrap_err();
		assert!(matches!(err, CoreError::InvalidEnv { key: "CONTROLLER_HTTPS_PORT", .. }));
	}

	#[test]
	fn worker_rejects_non_https_controller_url() {
		let _guard = ENV_LOCK.lock().unwrap();
		clear_all();
		unsafe {
			std::env::set_var("CONTROLLER_URL", "http://insecure.example");
			std::env::set_var("CERT_DIR", "/tmp/crank-test-certs-4");
		}
		let err = WorkerConfig::load(None).unwrap_err();
		assert!(matches!(err, CoreError::InvalidEnv { key: "CONTROLLER_URL", .. }));
	}

	#[test]
	fn worker_runs_standalone_without_controller_url() {
		let _guard = ENV_LOCK.lock().unwrap();
		clear_all();
		unsafe { std::env::set_var("CERT_DIR", "/tmp/crank-test-certs-5") };
		let cfg = WorkerConfig::load(None).unwrap();
		assert!(cfg.controller_url.is_none());
	}

	#[test]
	fn env_wins_over_file_overlay() {
		let _guard = ENV_LOCK.lock().unwrap();
		clear_all();
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("crank.toml");
		std::fs::write(&file, "CONTROLLER_HTTPS_PORT = \"7000\"\nCERT_DIR = \"/tmp/crank-test-certs-6\"\n")
			.unwrap();
		unsafe { std::env::set_var("CONTROLLER_HTTPS_PORT", "8000") };
		let cfg = ControllerConfig::load(Some(&file)).unwrap();
		assert_eq!(cfg.https_port, 8000);
	}

	#[test]
	fn file_overlay_fills_in_unset_keys() {
		let _guard = ENV_LOCK.lock().unwrap();
		clear_all();
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("crank.toml");
		std::fs::write(&file, "CONTROLLER_HTTPS_PORT = \"7001\"\nCERT_DIR = \"/tmp/crank-test-certs-7\"\n")
			.unwrap();
		let cfg = ControllerConfig::load(Some(&file)).unwrap();
		assert_eq!(cfg.https_port, 7001);
	}
}
