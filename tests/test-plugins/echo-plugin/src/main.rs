// SPDX-License-Identifier: Apache-2.0

//! Minimal plugin binary the host's own lifecycle tests spawn (§8
//! "Lifecycle happy path", "Multi-value headers"). Echoes request bodies
//! back and attaches three `Set-Cookie` response headers so a caller
//! through the host's proxy can assert on ordered multi-value headers.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::http::header::SET_COOKIE;
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::{any, post};
use axum::Router;
use clap::Parser;

use qntx_plugin_sdk::prelude::*;

#[derive(Debug, clap::Parser)]
struct Args {
	#[arg(long)]
	port: u16,
}

struct EchoPlugin;

#[tonic::async_trait]
impl Plugin for EchoPlugin {
	fn metadata(&self) -> PluginMetadata {
		PluginMetadata {
			name: "echo".to_owned(),
			version: env!("CARGO_PKG_VERSION").to_owned(),
			required_host_version: "0.1".to_owned(),
			description: "Echoes request bodies, used by the host's own tests".to_owned(),
			author: "QNTX".to_owned(),
			license: "Apache-2.0".to_owned(),
		}
	}

	async fn initialize(&self, _services: RemoteServices, _config: HashMap<String, String>) -> StdConfigResult {
		Ok(())
	}

	fn routes(&self) -> Router {
		Router::new().route("/echo", post(echo)).route("/cookies", any(cookies))
	}
}

async fn echo(body: Bytes) -> impl IntoResponse {
	body
}

/// Responds with three `Set-Cookie` headers in a fixed order, exercising
/// the HTTP bridge's multi-value header round-trip (§4.9, §8 scenario 2).
async fn cookies() -> impl IntoResponse {
	let mut response = axum::http::Response::new(axum::body::Body::empty());
	let headers = response.headers_mut();
	for value in [
		"session=abc123; Path=/; HttpOnly",
		"user=john; Path=/; Secure",
		"theme=dark; Path=/",
	] {
		headers.append(SET_COOKIE, HeaderValue::from_static(value));
	}
	response
}

#[tokio::main]
async fn main() -> qntx_plugin_sdk::Result<()> {
	tracing_subscriber::fmt().with_writer(std::io::stderr).init();

	let args = Args::parse();
	tracing::info!(port = args.port, "starting echo plugin");
	PluginServer::register(EchoPlugin).listen(args.port).await
}
