//! The controller binary: loads configuration, ensures the controller
//! has its own mTLS certificate bundle, opens the registry, and serves
//! the HTTPS API until shutdown.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crank_certs::{CertificateBundle, MtlsTransport};
use crank_controller::{router, AppState};
use crank_core::ControllerConfig;
use crank_registry::Registry;

#[derive(Parser, Debug)]
#[command(name = "crank-controller", about = "Crank Platform controller")]
struct Cli {
	/// Optional TOML file layered beneath environment variables.
	#[arg(long)]
	config: Option<std::path::PathBuf>,
}

fn main() -> ExitCode {
	let cli = Cli::parse();

	let runtime = match tokio::runtime::Runtime::new() {
		Ok(rt) => rt,
		Err(e) => {
			eprintln!("failed to start async runtime: {e}");
			return ExitCode::from(1);
		}
	};

	runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
	let config = match ControllerConfig::load(cli.config.as_deref()) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("configuration error: {e}");
			return ExitCode::from(2);
		}
	};

	crank_core::telemetry::init(&config.service_name);

	tracing::info!(
		port = config.https_port,
		cert_dir = %config.cert_dir.display(),
		"starting crank-controller"
	);

	let cert_dir = config.cert_dir.clone();
	if !CertificateBundle::exists_in(&cert_dir) {
		tracing::warn!("no certificate bundle found; controller cannot bootstrap its own identity \
			without a CA_SERVICE_URL configured for a worker role, failing startup");
		eprintln!(
			"controller requires a pre-provisioned certificate bundle at {}",
			cert_dir.display()
		);
		return ExitCode::from(1);
	}

	let bundle = match CertificateBundle::from_dir(&cert_dir, &config.service_name) {
		Ok(bundle) => bundle,
		Err(e) => {
			eprintln!("unrecoverable startup failure: {e}");
			return ExitCode::from(1);
		}
	};

	let server_config = match MtlsTransport::build_server_config(&bundle) {
		Ok(cfg) => cfg,
		Err(e) => {
			eprintln!("unrecoverable startup failure: failed to build TLS server config: {e}");
			return ExitCode::from(1);
		}
	};

	let registry = match Registry::open(
		&config.state_file,
		Duration::from_secs(config.heartbeat_timeout_secs),
	) {
		Ok(registry) => registry,
		Err(e) => {
			eprintln!("unrecoverable startup failure: journal unreadable: {e}");
			return ExitCode::from(1);
		}
	};

	let state = AppState {
		registry: Arc::new(registry),
		service_name: config.service_name.clone(),
		platform_auth_token: config.platform_auth_token.clone(),
	};
	let app = router(state);

	let addr = SocketAddr::from(([0, 0, 0, 0], config.https_port));
	let tls_config = axum_server::tls_rustls::RustlsConfig::from_config(Arc::new(server_config));

	tracing::info!(%addr, "controller listening");

	let handle = axum_server::Handle::new();
	let shutdown_handle = handle.clone();
	tokio::spawn(async move {
		let _ = tokio::signal::ctrl_c().await;
		tracing::info!("shutdown signal received, stopping controller");
		shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
	});

	let result = axum_server::bind_rustls(addr, tls_config)
		.handle(handle)
		.serve(app.into_make_service())
		.await;

	match result {
		Ok(()) => {
			tracing::info!("controller shut down normally");
			ExitCode::SUCCESS
		}
		Err(e) => {
			eprintln!("controller server error: {e}");
			ExitCode::from(1)
		}
	}
}

