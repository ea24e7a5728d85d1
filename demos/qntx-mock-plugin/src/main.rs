// SPDX-License-Identifier: Apache-2.0

//! Reference plugin exercising every surface a real QNTX plugin touches:
//! HTTP routes under `/api/mock/*`, the default WebSocket echo, and both
//! callback services. Not a template to copy business logic from, just a
//! demonstration that the SDK surface works end to end.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use qntx_plugin_sdk::prelude::*;

/// Reference QNTX plugin: HTTP routes, WebSocket echo, callback services.
#[derive(Debug, clap::Parser)]
#[command(about, version, long_about = None)]
struct Args {
	/// Port announced to the host and bound on startup (retried on collision).
	#[arg(long, default_value_t = 38700)]
	port: u16,
}

struct MockPlugin {
	services: tokio::sync::OnceCell<RemoteServices>,
}

impl MockPlugin {
	fn new() -> Self {
		MockPlugin {
			services: tokio::sync::OnceCell::new(),
		}
	}
}

#[derive(Debug, Deserialize)]
struct CreateAttestationBody {
	subjects: Vec<String>,
	predicates: Vec<String>,
	actors: Vec<String>,
	#[serde(default)]
	contexts: Vec<String>,
	#[serde(default)]
	attributes: Value,
}

#[derive(Debug, Serialize)]
struct CreateAttestationReply {
	id: String,
}

#[derive(Debug, Deserialize)]
struct ListAttestationsQuery {
	actor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnqueueJobBody {
	handler: String,
	#[serde(default)]
	payload: String,
	#[serde(default = "default_source")]
	source: String,
}

fn default_source() -> String {
	"qntx-mock-plugin".to_owned()
}

#[derive(Debug, Serialize)]
struct EnqueueJobReply {
	job_id: String,
}

#[tonic::async_trait]
impl Plugin for MockPlugin {
	fn metadata(&self) -> PluginMetadata {
		PluginMetadata {
			name: "mock".to_owned(),
			version: env!("CARGO_PKG_VERSION").to_owned(),
			required_host_version: "0.1".to_owned(),
			description: "Reference plugin demonstrating the QNTX plugin SDK surface".to_owned(),
			author: "QNTX".to_owned(),
			license: "Apache-2.0".to_owned(),
		}
	}

	async fn initialize(&self, services: RemoteServices, config: HashMap<String, String>) -> StdConfigResult {
		let view = services.config("mock");
		let _ = view.keys().count();
		let logger = services.logger("mock");
		logger.info(&format!("initialized with {} config entries", config.len()));

		self.services
			.set(services)
			.map_err(|_| ConfigError::Unspecified {
				message: "initialize called more than once".to_owned(),
			})
	}

	fn routes(&self) -> Router {
		let services = self
			.services
			.get()
			.cloned()
			.expect("routes() is only called after a successful initialize()");

		Router::new()
			.route("/echo", post(echo))
			.route("/attestations", post(create_attestation).get(list_attestations))
			.route("/jobs", post(enqueue_job))
			.route("/jobs/{id}", get(get_job))
			.with_state(services)
	}

	async fn health(&self) -> HealthStatus {
		HealthStatus {
			healthy: self.services.initialized(),
			paused: false,
			message: String::new(),
			detail: HashMap::new(),
		}
	}
}

async fn echo(body: axum::body::Bytes) -> impl IntoResponse {
	(StatusCode::OK, body)
}

async fn create_attestation(
	State(services): State<RemoteServices>,
	Json(body): Json<CreateAttestationBody>,
) -> impl IntoResponse {
	let command = AttestationCommand {
		subjects: body.subjects,
		predicates: body.predicates,
		contexts: body.contexts,
		actors: body.actors,
		timestamp_millis: 0,
		source: default_source(),
		attributes: body.attributes,
		signature: None,
		signer: None,
	};

	let client = match services.ats_store().await {
		Ok(client) => client,
		Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
	};

	match client.generate_and_create(command).await {
		Ok(attestation) => (StatusCode::CREATED, Json(CreateAttestationReply { id: attestation.id })).into_response(),
		Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
	}
}

async fn list_attestations(
	State(services): State<RemoteServices>,
	Query(query): Query<ListAttestationsQuery>,
) -> impl IntoResponse {
	let filter = AttestationFilter {
		actors: query.actor.into_iter().collect(),
		..AttestationFilter::default()
	};

	let client = match services.ats_store().await {
		Ok(client) => client,
		Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
	};

	match client.query(filter).await {
		Ok(attestations) => Json(attestations.into_iter().map(|a| a.id).collect::<Vec<_>>()).into_response(),
		Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
	}
}

async fn enqueue_job(State(services): State<RemoteServices>, Json(body): Json<EnqueueJobBody>) -> impl IntoResponse {
	let job = Job {
		id: String::new(),
		handler: body.handler,
		payload: body.payload.into_bytes(),
		source: body.source,
		status: JobStatus::Queued,
		progress_current: 0,
		progress_total: 0,
		cost_estimate: 0.0,
		cost_actual: 0.0,
		pulse_state: None,
		error: String::new(),
		parent_job_id: String::new(),
		retry_count: 0,
		created_at_millis: 0,
		started_at_millis: None,
		completed_at_millis: None,
	};

	let client = match services.queue().await {
		Ok(client) => client,
		Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
	};

	match client.enqueue(job).await {
		Ok(job_id) => (StatusCode::CREATED, Json(EnqueueJobReply { job_id })).into_response(),
		Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
	}
}

async fn get_job(State(services): State<RemoteServices>, Path(id): Path<String>) -> impl IntoResponse {
	let client = match services.queue().await {
		Ok(client) => client,
		Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
	};

	match client.get(&id).await {
		Ok(job) => Json(job.id).into_response(),
		Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
	}
}

#[tokio::main]
async fn main() -> qntx_plugin_sdk::Result<()> {
	tracing_subscriber::fmt().with_writer(std::io::stderr).init();

	let args = Args::parse();
	tracing::info!(port = args.port, "starting mock plugin");
	PluginServer::register(MockPlugin::new()).listen(args.port).await
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn metadata_identifies_the_plugin() {
		let plugin = MockPlugin::new();
		let metadata = plugin.metadata();
		assert_eq!(metadata.name, "mock");
		assert_eq!(metadata.license, "Apache-2.0");
	}

	#[tokio::test]
	async fn health_is_unhealthy_before_initialize() {
		let plugin = MockPlugin::new();
		assert!(!plugin.health().await.healthy);
	}
}
