// SPDX-License-Identifier: Apache-2.0

mod callback;
mod cli;
mod config;
mod error;
mod keepalive;
mod origin;
mod plugin;
#[cfg(test)]
mod tests;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, State};
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use bytes::Bytes;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use qntx_plugin_proto::types::{HttpRequest as WireRequest, WireHeaders};

use callback::{InMemoryAttestationStore, InMemoryJobQueue, ServicesManager};
use cli::Args;
use config::HostConfig;
use keepalive::KeepaliveHandler;
use origin::OriginPolicy;
use plugin::{CallbackEndpoints, Loader, PluginManager};

#[derive(Clone)]
struct AppState {
	manager: Arc<PluginManager>,
	origin_policy: Arc<OriginPolicy>,
	keepalive: config::KeepaliveConfig,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
	let args = Args::parse();
	init_tracing(&args);

	match run(args).await {
		Ok(()) => std::process::ExitCode::SUCCESS,
		Err(e) => {
			error!(error = %e, "qntx-plugin-host exited with an error");
			std::process::ExitCode::FAILURE
		}
	}
}

fn init_tracing(args: &Args) {
	let default_directive = args.verbose.tracing_level_filter().to_string();
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
	tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(args: Args) -> anyhow::Result<()> {
	let host_config = load_host_config(&args.config).await?;

	let services = ServicesManager::start(InMemoryAttestationStore::new(), InMemoryJobQueue::new()).await?;
	let callback = CallbackEndpoints {
		ats_store_endpoint: services.attestation_endpoint_url(),
		queue_endpoint: services.queue_endpoint_url(),
		auth_token: services.token.as_str().to_owned(),
	};

	let manager = Arc::new(PluginManager::new(args.plugins_dir.clone(), callback));

	let loader = Loader::new(&host_config.loader);
	let discovered = loader.discover(&host_config.loader, &host_config.overrides);
	info!(count = discovered.len(), "plugins discovered");

	let failures = manager.load_plugins(discovered).await;
	for failure in &failures {
		warn!(plugin = %failure.name, error = %failure.error, "plugin failed to load");
	}
	info!(loaded = manager.len().await, failed = failures.len(), "plugin loading complete");

	let state = AppState {
		manager: Arc::clone(&manager),
		origin_policy: Arc::new(OriginPolicy::new(&host_config.websocket)),
		keepalive: host_config.loader.keepalive.clone(),
	};

	let app = Router::new()
		.route("/api/{name}/", any(proxy_http_root))
		.route("/api/{name}/{*rest}", any(proxy_http_rest))
		.route("/{segment}", get(proxy_websocket))
		.layer(CorsLayer::permissive())
		.layer(TraceLayer::new_for_http())
		.with_state(state);

	let listener = tokio::net::TcpListener::bind(&args.bind).await?;
	info!(addr = %args.bind, "qntx-plugin-host listening");

	axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
		.with_graceful_shutdown(shutdown_signal())
		.await?;

	info!("shutting down plugin manager");
	let shutdown_failures = manager.shutdown().await;
	for failure in &shutdown_failures {
		warn!(plugin = %failure.name, error = %failure.error, "plugin shutdown failed");
	}
	services.shutdown().await;

	Ok(())
}

async fn load_host_config(path: &std::path::Path) -> anyhow::Result<HostConfig> {
	match tokio::fs::read_to_string(path).await {
		Ok(contents) => Ok(serde_json::from_str(&contents)?),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
			warn!(path = %path.display(), "no host config file found, starting with an empty plugin set");
			Ok(HostConfig::default())
		}
		Err(e) => Err(e.into()),
	}
}

async fn shutdown_signal() {
	let ctrl_c = async {
		let _ = tokio::signal::ctrl_c().await;
	};

	#[cfg(unix)]
	let terminate = async {
		let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler");
		sigterm.recv().await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}

async fn proxy_http_root(
	state: State<AppState>,
	path: Path<String>,
	method: Method,
	uri: Uri,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	proxy_http(state, path.0, String::new(), method, uri, headers, body).await
}

async fn proxy_http_rest(
	state: State<AppState>,
	Path((name, rest)): Path<(String, String)>,
	method: Method,
	uri: Uri,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	proxy_http(state, name, rest, method, uri, headers, body).await
}

/// Forwards one HTTP request into the named plugin's `HandleHTTP` RPC
/// (§4.3 "RegisterHTTP"). Method, the remaining path, raw query, all header
/// values, and the body pass through unchanged; a transport failure to the
/// plugin surfaces as 502, never a 5xx from inside the plugin's own
/// multiplexer leaking through as something else (§6).
async fn proxy_http(
	State(state): State<AppState>,
	name: String,
	rest: String,
	method: Method,
	uri: Uri,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	let Some(proxy) = state.manager.get(&name).await else {
		return (StatusCode::NOT_FOUND, format!("no such plugin '{name}'")).into_response();
	};

	let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
	let forwarded_path = format!("/{rest}{query}");

	let request = WireRequest {
		method: method.as_str().to_owned(),
		path: forwarded_path,
		headers: WireHeaders::from_header_map(&headers),
		body: body.to_vec(),
	};

	match proxy.handle_http(request).await {
		Ok(response) => {
			let mut builder = Response::builder().status(response.status);
			if let Some(response_headers) = builder.headers_mut() {
				response.headers.add_to_header_map(response_headers);
			}
			builder
				.body(axum::body::Body::from(response.body))
				.unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
		}
		Err(e) => {
			warn!(plugin = %name, error = %e, "plugin transport failure");
			(StatusCode::BAD_GATEWAY, "plugin transport failure").into_response()
		}
	}
}

/// `matchit` (axum's router) can't combine a literal suffix with a named
/// param in one path segment, so `/<name>-ws` is matched as one opaque
/// segment here and split by hand rather than via `Path<(String,)>`.
async fn proxy_websocket(
	State(state): State<AppState>,
	Path(segment): Path<String>,
	ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
	headers: HeaderMap,
	ws: WebSocketUpgrade,
) -> Response {
	let Some(name) = segment.strip_suffix("-ws") else {
		return StatusCode::NOT_FOUND.into_response();
	};

	let Some(proxy) = state.manager.get(name).await else {
		return (StatusCode::NOT_FOUND, format!("no such plugin '{name}'")).into_response();
	};

	let origin = headers.get("origin").and_then(|v| v.to_str().ok());
	let path = format!("/{segment}");
	if !state.origin_policy.check(origin, Some(remote_addr), &path) {
		return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
	}

	let keepalive = Arc::new(KeepaliveHandler::new(state.keepalive.clone()));
	ws.on_upgrade(move |socket: WebSocket| async move {
		proxy.bridge_websocket(socket, keepalive).await;
	})
}
