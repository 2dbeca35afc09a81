//! Shared `tracing` initialization for both binaries.
//!
//! Plain text to stderr by default; set `LOG_FORMAT=json` for structured
//! output suitable for log aggregation. The filter is driven by the
//! standard `RUST_LOG` environment variable (`info` when unset).

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Initializes the global `tracing` subscriber. Call once at process
/// startup, before any other component logs.
pub fn init(service_name: &str) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	let json_output = std::env::var("LOG_FORMAT")
		.map(|v| v.eq_ignore_ascii_case("json"))
		.unwrap_or(false);

	let registry = Registry::default().with(filter);

	if json_output {
		registry
			.with(
				tracing_subscriber::fmt::layer()
					.json()
					.with_current_span(true)
					.with_target(true),
			)
			.init();
	} else {
		registry
			.with(tracing_subscriber::fmt::layer().with_target(true))
			.init();
	}

	tracing::info!(service = service_name, "telemetry initialized");
}
