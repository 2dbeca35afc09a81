//! Example capability worker: registers a single `invoke:demo.echo`
//! capability with the controller and serves it over mTLS.

use std::process::ExitCode;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use crank_core::WorkerConfig;
use crank_registry::{CapabilityContract, CapabilityDefinition, CapabilityVersion};
use crank_worker::WorkerRuntime;

#[derive(Clone)]
struct DemoState;

async fn echo(State(_state): State<DemoState>, Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
	Json(serde_json::json!({ "echoed": body }))
}

fn capabilities() -> Vec<CapabilityDefinition> {
	vec![CapabilityDefinition {
		id: "demo.echo".to_string(),
		verb: Some("invoke".to_string()),
		version: CapabilityVersion {
			major: 1,
			minor: 0,
			patch: 0,
		},
		contract: CapabilityContract {
			input_schema: serde_json::json!({"type": "object"}),
			output_schema: serde_json::json!({"type": "object"}),
		},
		tags: Default::default(),
		hints: Default::default(),
	}]
}

fn setup_routes() -> Router {
	Router::new()
		.route("/invoke", post(echo))
		.with_state(DemoState)
}

fn main() -> ExitCode {
	let runtime = match tokio::runtime::Runtime::new() {
		Ok(rt) => rt,
		Err(e) => {
			eprintln!("failed to start async runtime: {e}");
			return ExitCode::from(1);
		}
	};
	runtime.block_on(run())
}

async fn run() -> ExitCode {
	let config = match WorkerConfig::load(None) {
		Ok(config) => config,
		Err(e) => {
			eprintln!("configuration error: {e}");
			return ExitCode::from(2);
		}
	};

	crank_core::telemetry::init(&config.service_name);

	let https_port: u16 = std::env::var("DEMO_WORKER_HTTPS_PORT")
		.ok()
		.and_then(|v| v.parse().ok())
		.unwrap_or(8500);
	let worker_id = format!("{}-1", config.service_name);
	let worker_url = format!("https://localhost:{https_port}");

	let worker = match WorkerRuntime::bootstrap(&config, worker_id, worker_url, vec!["localhost".to_string()]).await {
		Ok(worker) => worker,
		Err(e) => {
			eprintln!("unrecoverable startup failure: {e}");
			return ExitCode::from(1);
		}
	};

	match worker.serve(https_port, capabilities(), setup_routes()).await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			eprintln!("worker server error: {e}");
			ExitCode::from(1)
		}
	}
}
