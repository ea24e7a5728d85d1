// SPDX-License-Identifier: Apache-2.0

//! Adapts an in-process [`crate::Plugin`] implementation to the
//! `DomainPluginService` gRPC surface (§4.2) the host's external proxy
//! drives.

use bytes::Bytes;
use http_body_util::BodyExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::result::Result as StdResult;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, OnceCell};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tower::ServiceExt;
use tracing::{debug, info, warn};

use qntx_plugin_proto::proto::domain_plugin_service_server::{
	DomainPluginService as DomainPluginServiceTrait, DomainPluginServiceServer,
};
use qntx_plugin_proto::proto::{
	ConfigSchemaResponse, Empty, HealthStatus as WireHealthStatus, InitializeRequest, InitializeResponse,
	PluginMetadata as WirePluginMetadata,
};
use qntx_plugin_proto::types::{HttpRequest as WireRequest, HttpResponse as WireResponse, WsFrame};

use crate::error::{Error, Result};
use crate::service_registry::RemoteServices;
use crate::Plugin;

const PORT_ANNOUNCEMENT_PREFIX: &str = "QNTX_PLUGIN_PORT=";

/// Runs the QNTX plugin gRPC protocol on behalf of a [`Plugin`] implementation.
///
/// The `DomainPluginService` trait methods are implemented here so plugin
/// authors never see gRPC, `tonic`, or `axum` directly: they only implement
/// [`Plugin`].
pub struct PluginServer<P> {
	plugin: Arc<P>,
	router: Mutex<Option<axum::Router>>,
	init_result: OnceCell<StdResult<(), String>>,
}

impl<P: Plugin> PluginServer<P> {
	/// Create a new plugin server for the provided plugin.
	pub fn register(plugin: P) -> PluginServer<P> {
		PluginServer {
			plugin: Arc::new(plugin),
			router: Mutex::new(None),
			init_result: OnceCell::new(),
		}
	}

	/// Bind on `port`, retrying up to 64 times on collision, and serve until
	/// the process receives a shutdown signal.
	pub async fn listen(self, port: u16) -> Result<()> {
		self.serve(port, 64).await
	}

	/// Bind starting at `base_port`, incrementing on "address in use" up to
	/// `max_attempts` times (§4.2). On the first successful bind, writes
	/// `QNTX_PLUGIN_PORT=<port>` to stdout exactly once, then serves until
	/// SIGINT/SIGTERM, draining in-flight RPCs before returning.
	pub async fn serve(self, base_port: u16, max_attempts: u32) -> Result<()> {
		let (listener, bound_port) = bind_with_retry(base_port, max_attempts).await?;
		println!("{PORT_ANNOUNCEMENT_PREFIX}{bound_port}");
		use std::io::Write;
		let _ = std::io::stdout().flush();
		info!(port = bound_port, "plugin server bound");

		let service = DomainPluginServiceServer::new(self);
		Server::builder()
			.add_service(service)
			.serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown_signal())
			.await
			.map_err(Error::FailedToStartServer)?;
		Ok(())
	}
}

async fn shutdown_signal() {
	let _ = tokio::signal::ctrl_c().await;
}

async fn bind_with_retry(base_port: u16, max_attempts: u32) -> Result<(TcpListener, u16)> {
	let mut port = base_port;
	for attempt in 0..max_attempts {
		let addr: SocketAddr = ([127, 0, 0, 1], port).into();
		match TcpListener::bind(addr).await {
			Ok(listener) => return Ok((listener, port)),
			Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
				debug!(attempt, port, "plugin server bind collision, retrying on next port");
				port = port.wrapping_add(1);
			}
			Err(e) => return Err(Error::Bind(e)),
		}
	}
	Err(Error::BindExhausted {
		base: base_port,
		attempts: max_attempts,
	})
}

#[tonic::async_trait]
impl<P: Plugin> DomainPluginServiceTrait for PluginServer<P> {
	type HandleWebSocketStream = ReceiverStream<StdResult<qntx_plugin_proto::proto::WsFrame, Status>>;

	async fn initialize(
		&self,
		request: Request<InitializeRequest>,
	) -> StdResult<Response<InitializeResponse>, Status> {
		let config = request.into_inner().config;
		let plugin = Arc::clone(&self.plugin);
		let config_for_init = config.clone();

		let outcome = self
			.init_result
			.get_or_init(|| async move {
				let services = RemoteServices::from_config(config_for_init.clone(), Some(plugin.metadata().version));
				match plugin.initialize(services, config_for_init).await {
					Ok(()) => Ok(()),
					Err(e) => Err(e.to_string()),
				}
			})
			.await
			.clone();

		if outcome.is_ok() {
			let mut router = self.router.lock().await;
			if router.is_none() {
				*router = Some(self.plugin.routes());
			}
		}

		match outcome {
			Ok(()) => Ok(Response::new(InitializeResponse {
				success: true,
				error: String::new(),
			})),
			Err(error) => Ok(Response::new(InitializeResponse { success: false, error })),
		}
	}

	async fn handle_http(&self, request: Request<qntx_plugin_proto::proto::HttpRequest>) -> StdResult<Response<qntx_plugin_proto::proto::HttpResponse>, Status> {
		let wire_request = WireRequest::from(request.into_inner());

		let router = { self.router.lock().await.clone() };
		let Some(router) = router else {
			let response = WireResponse {
				status: 503,
				headers: Default::default(),
				body: b"plugin not initialized".to_vec(),
			};
			return Ok(Response::new(response.into()));
		};

		let http_request = match build_http_request(&wire_request) {
			Ok(r) => r,
			Err(e) => {
				warn!(error = %e, "malformed HTTP request from host, returning 400");
				let response = WireResponse {
					status: 400,
					headers: Default::default(),
					body: e.into_bytes(),
				};
				return Ok(Response::new(response.into()));
			}
		};

		let axum_response = match router.oneshot(http_request).await {
			Ok(response) => response,
			Err(infallible) => match infallible {},
		};

		let wire_response = match to_wire_response(axum_response).await {
			Ok(r) => r,
			Err(e) => {
				warn!(error = %e, "failed to read plugin response body");
				WireResponse {
					status: 500,
					headers: Default::default(),
					body: Vec::new(),
				}
			}
		};

		Ok(Response::new(wire_response.into()))
	}

	async fn handle_web_socket(
		&self,
		request: Request<Streaming<qntx_plugin_proto::proto::WsFrame>>,
	) -> StdResult<Response<Self::HandleWebSocketStream>, Status> {
		let mut inbound = request.into_inner();
		let (tx, rx) = mpsc::channel(32);
		let plugin = Arc::clone(&self.plugin);

		tokio::spawn(async move {
			let mut connected = false;
			loop {
				let frame = match inbound.message().await {
					Ok(Some(frame)) => frame,
					Ok(None) => break,
					Err(e) => {
						warn!(error = %e, "websocket stream receive error, closing");
						break;
					}
				};

				let frame = match WsFrame::try_from(frame) {
					Ok(frame) => frame,
					Err(e) => {
						warn!(error = %e, "malformed websocket frame, closing");
						break;
					}
				};

				match frame {
					WsFrame::Connect => {
						connected = true;
						debug!("websocket connected");
					}
					WsFrame::Data { bytes, ts_millis } => {
						if let Some((reply_bytes, reply_ts)) = plugin.handle_ws_data(bytes, ts_millis).await {
							let reply = qntx_plugin_proto::proto::WsFrame::from(WsFrame::Data {
								bytes: reply_bytes,
								ts_millis: reply_ts,
							});
							if tx.send(Ok(reply)).await.is_err() {
								break;
							}
						}
					}
					WsFrame::Ping { ts_millis } => {
						let reply = qntx_plugin_proto::proto::WsFrame::from(WsFrame::Pong { ts_millis });
						if tx.send(Ok(reply)).await.is_err() {
							break;
						}
					}
					WsFrame::Pong { .. } => {
						debug!("websocket pong received");
					}
					WsFrame::Error { bytes } => {
						warn!(len = bytes.len(), "websocket error frame received");
					}
					WsFrame::Close { ts_millis } => {
						let reply = qntx_plugin_proto::proto::WsFrame::from(WsFrame::Close { ts_millis });
						let _ = tx.send(Ok(reply)).await;
						break;
					}
				}
			}
			let _ = connected;
		});

		Ok(Response::new(ReceiverStream::new(rx)))
	}

	async fn health(&self, _request: Request<Empty>) -> StdResult<Response<WireHealthStatus>, Status> {
		Ok(Response::new(self.plugin.health().await.into()))
	}

	async fn metadata(&self, _request: Request<Empty>) -> StdResult<Response<WirePluginMetadata>, Status> {
		Ok(Response::new(self.plugin.metadata().into()))
	}

	async fn config_schema(&self, _request: Request<Empty>) -> StdResult<Response<ConfigSchemaResponse>, Status> {
		let fields = self
			.plugin
			.config_schema()
			.into_iter()
			.map(|(name, schema)| (name, schema.into()))
			.collect::<HashMap<_, _>>();
		Ok(Response::new(ConfigSchemaResponse { fields }))
	}

	async fn shutdown(&self, _request: Request<Empty>) -> StdResult<Response<Empty>, Status> {
		self.plugin.shutdown().await;
		Ok(Response::new(Empty {}))
	}
}

fn build_http_request(wire: &WireRequest) -> StdResult<http::Request<axum::body::Body>, String> {
	let method = http::Method::from_bytes(wire.method.as_bytes()).map_err(|e| e.to_string())?;
	let uri: http::Uri = wire.path.parse().map_err(|e: http::uri::InvalidUri| e.to_string())?;

	let mut builder = http::Request::builder().method(method).uri(uri);
	if let Some(headers) = builder.headers_mut() {
		wire.headers.add_to_header_map(headers);
	}
	builder
		.body(axum::body::Body::from(Bytes::from(wire.body.clone())))
		.map_err(|e| e.to_string())
}

async fn to_wire_response(response: http::Response<axum::body::Body>) -> StdResult<WireResponse, String> {
	let (parts, body) = response.into_parts();
	let collected = body.collect().await.map_err(|e| e.to_string())?;
	let bytes = collected.to_bytes();
	Ok(WireResponse {
		status: parts.status.as_u16(),
		headers: qntx_plugin_proto::types::WireHeaders::from_header_map(&parts.headers),
		body: bytes.to_vec(),
	})
}
