// SPDX-License-Identifier: Apache-2.0

//! The external proxy (§4.3): the host-side adapter owning one gRPC
//! connection to one plugin process, presenting the same in-process
//! interface the host would see if the plugin were compiled in.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tonic::Request;
use tracing::warn;

use qntx_plugin_proto::proto::domain_plugin_service_client::DomainPluginServiceClient;
use qntx_plugin_proto::proto::{Empty, InitializeRequest};
use qntx_plugin_proto::types::{
	ConfigFieldSchema, HealthStatus, HttpRequest as WireRequest, HttpResponse as WireResponse, PluginMetadata, WsFrame,
};

use crate::error::{PluginError, Result};
use crate::keepalive::{KeepaliveHandler, KeepaliveOutcome};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_HEALTH_DEADLINE: Duration = Duration::from_secs(5);

/// One live gRPC connection to one out-of-process plugin, plus the metadata
/// it reported at connect time (§3 "PluginMetadata ... fetched exactly once
/// during proxy construction and cached").
pub struct ExternalProxy {
	name: String,
	address: String,
	client: DomainPluginServiceClient<Channel>,
	metadata: PluginMetadata,
}

/// Result of one `pump_websocket` iteration.
enum PumpOutcome {
	/// The browser closed or errored; the whole bridge is done.
	Terminated,
	/// The plugin-side stream errored or sent a malformed frame; the caller
	/// reconnects and resumes pumping on a fresh stream.
	PluginTransportError,
}

impl ExternalProxy {
	/// Dial `address` with a ten-second timeout, then immediately call
	/// `Metadata` to confirm the server answers real unary RPCs, not just
	/// TCP accepts (§4.3, GLOSSARY "Readiness").
	pub async fn connect(name: &str, address: &str) -> Result<Self> {
		let endpoint = Endpoint::from_shared(format!("http://{address}"))
			.map_err(|source| PluginError::Dial {
				name: name.to_owned(),
				addr: address.to_owned(),
				source,
			})?
			.connect_timeout(DIAL_TIMEOUT);

		let channel = endpoint.connect().await.map_err(|source| PluginError::Dial {
			name: name.to_owned(),
			addr: address.to_owned(),
			source,
		})?;

		let mut client = DomainPluginServiceClient::new(channel);
		let metadata = client
			.metadata(Request::new(Empty {}))
			.await
			.map_err(|source| PluginError::Transport {
				name: name.to_owned(),
				source,
			})?
			.into_inner();

		Ok(ExternalProxy {
			name: name.to_owned(),
			address: address.to_owned(),
			client,
			metadata: PluginMetadata::from(metadata),
		})
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn address(&self) -> &str {
		&self.address
	}

	pub fn metadata(&self) -> &PluginMetadata {
		&self.metadata
	}

	/// Serialize the merged config map (user config plus the three reserved
	/// callback keys) and call `Initialize`.
	pub async fn initialize(&self, config: HashMap<String, String>) -> Result<()> {
		let response = self
			.client
			.clone()
			.initialize(Request::new(InitializeRequest { config }))
			.await
			.map_err(|source| PluginError::Transport {
				name: self.name.clone(),
				source,
			})?
			.into_inner();

		if response.success {
			Ok(())
		} else {
			Err(PluginError::other(format!(
				"plugin '{}' failed to initialize: {}",
				self.name, response.error
			)))
		}
	}

	/// Forward one inbound HTTP request to the plugin's `HandleHTTP` RPC
	/// (§4.3 "RegisterHTTP").
	pub async fn handle_http(&self, request: WireRequest) -> Result<WireResponse> {
		let response = self
			.client
			.clone()
			.handle_http(Request::new(request.into()))
			.await
			.map_err(|source| PluginError::Transport {
				name: self.name.clone(),
				source,
			})?
			.into_inner();
		Ok(WireResponse::from(response))
	}

	/// Bridge a browser WebSocket to the plugin's `HandleWebSocket` stream
	/// (§4.3 "RegisterWebSocket", §4.8). Sends an initial CONNECT frame,
	/// then runs two pumps until either side closes or errors: browser
	/// messages become DATA frames; plugin DATA frames become WS text
	/// messages; keepalive PING/PONG is applied to the plugin-bound
	/// direction transparently to the browser. A plugin-side transport
	/// error (not a clean close) re-dials `HandleWebSocket` with
	/// exponential backoff rather than tearing down the browser
	/// connection (§4.8 "ConnectWithRetry").
	pub async fn bridge_websocket(&self, socket: WebSocket, keepalive: Arc<KeepaliveHandler>) {
		let (mut ws_sink, mut ws_stream) = socket.split();
		let plugin_name = self.name.clone();

		let Some((mut outbound_tx, mut upstream)) = self.open_websocket_stream(&keepalive).await else {
			return;
		};
		let mut ping_task = self.spawn_ping_task(&keepalive, outbound_tx.clone());

		loop {
			let outcome = self
				.pump_websocket(&mut ws_sink, &mut ws_stream, &outbound_tx, &mut upstream, &keepalive, &plugin_name)
				.await;

			match outcome {
				PumpOutcome::Terminated => break,
				PumpOutcome::PluginTransportError => {
					ping_task.abort();
					keepalive.stop().await;
					warn!(plugin = %plugin_name, "websocket bridge: reconnecting to plugin after transport error");
					match self.open_websocket_stream(&keepalive).await {
						Some((tx, up)) => {
							outbound_tx = tx;
							upstream = up;
							ping_task = self.spawn_ping_task(&keepalive, outbound_tx.clone());
						}
						None => break,
					}
				}
			}
		}

		keepalive.stop().await;
		ping_task.abort();
	}

	/// Dial `HandleWebSocket`, send the initial CONNECT frame, and hand back
	/// the sender half feeding the plugin plus the inbound stream, retrying
	/// with the keepalive handler's exponential backoff (§4.8). `None` means
	/// every attempt was exhausted.
	async fn open_websocket_stream(
		&self,
		keepalive: &KeepaliveHandler,
	) -> Option<(
		mpsc::Sender<qntx_plugin_proto::proto::WsFrame>,
		tonic::Streaming<qntx_plugin_proto::proto::WsFrame>,
	)> {
		let plugin_name = self.name.clone();
		let mut client = self.client.clone();

		let result = keepalive
			.reconnect(move || {
				let mut client = client.clone();
				async move {
					let (tx, rx) = mpsc::channel::<qntx_plugin_proto::proto::WsFrame>(32);
					let upstream = client
						.handle_web_socket(Request::new(ReceiverStream::new(rx)))
						.await
						.map_err(|e| e.to_string())?
						.into_inner();
					Ok::<_, String>((tx, upstream))
				}
			})
			.await;

		let (outbound_tx, upstream) = match result {
			Ok(pair) => pair,
			Err(e) => {
				warn!(plugin = %plugin_name, error = %e, "websocket bridge: exhausted reconnect attempts");
				return None;
			}
		};

		if outbound_tx.send(WsFrame::Connect.into()).await.is_err() {
			return None;
		}

		Some((outbound_tx, upstream))
	}

	fn spawn_ping_task(
		&self,
		keepalive: &Arc<KeepaliveHandler>,
		outbound_tx: mpsc::Sender<qntx_plugin_proto::proto::WsFrame>,
	) -> tokio::task::JoinHandle<()> {
		let ping_keepalive = Arc::clone(keepalive);
		tokio::spawn(async move {
			ping_keepalive
				.start(move |frame| {
					let tx = outbound_tx.clone();
					async move { tx.send(frame.into()).await.map_err(|e| e.to_string()) }
				})
				.await;
		})
	}

	/// Run one pump iteration (both directions) until the browser closes or
	/// errors (`Terminated`), or the plugin's stream errors (`PluginTransportError`,
	/// the caller reconnects and calls this again).
	#[allow(clippy::too_many_arguments)]
	async fn pump_websocket(
		&self,
		ws_sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
		ws_stream: &mut futures_util::stream::SplitStream<WebSocket>,
		outbound_tx: &mpsc::Sender<qntx_plugin_proto::proto::WsFrame>,
		upstream: &mut tonic::Streaming<qntx_plugin_proto::proto::WsFrame>,
		keepalive: &KeepaliveHandler,
		plugin_name: &str,
	) -> PumpOutcome {
		loop {
			tokio::select! {
				inbound = ws_stream.next() => {
					match inbound {
						Some(Ok(Message::Text(text))) => {
							let frame = WsFrame::Data { bytes: text.as_bytes().to_vec(), ts_millis: now_millis() };
							if outbound_tx.send(frame.into()).await.is_err() {
								return PumpOutcome::PluginTransportError;
							}
						}
						Some(Ok(Message::Binary(bytes))) => {
							let frame = WsFrame::Data { bytes: bytes.to_vec(), ts_millis: now_millis() };
							if outbound_tx.send(frame.into()).await.is_err() {
								return PumpOutcome::PluginTransportError;
							}
						}
						Some(Ok(Message::Close(_))) | None => {
							let _ = outbound_tx.send(WsFrame::Close { ts_millis: now_millis() }.into()).await;
							return PumpOutcome::Terminated;
						}
						Some(Ok(_)) => {}
						Some(Err(e)) => {
							warn!(plugin = %plugin_name, error = %e, "websocket bridge: browser stream error");
							return PumpOutcome::Terminated;
						}
					}
				}
				outbound = upstream.message() => {
					match outbound {
						Ok(Some(raw)) => {
							let frame = match WsFrame::try_from(raw) {
								Ok(frame) => frame,
								Err(e) => {
									warn!(plugin = %plugin_name, error = %e, "malformed websocket frame from plugin");
									return PumpOutcome::PluginTransportError;
								}
							};

							match keepalive.handle_frame(&frame).await {
								KeepaliveOutcome::Reply(reply) => {
									if outbound_tx.send(reply.into()).await.is_err() {
										return PumpOutcome::PluginTransportError;
									}
								}
								KeepaliveOutcome::Error(bytes) => {
									warn!(plugin = %plugin_name, len = bytes.len(), "plugin reported websocket error");
								}
								KeepaliveOutcome::None => match frame {
									WsFrame::Data { bytes, .. } => {
										let text = String::from_utf8_lossy(&bytes).into_owned();
										if ws_sink.send(Message::Text(text.into())).await.is_err() {
											return PumpOutcome::Terminated;
										}
									}
									WsFrame::Close { .. } => {
										let _ = ws_sink.send(Message::Close(None)).await;
										return PumpOutcome::Terminated;
									}
									_ => {}
								},
							}
						}
						Ok(None) => return PumpOutcome::Terminated,
						Err(e) => {
							warn!(plugin = %plugin_name, error = %e, "websocket bridge: plugin stream error");
							return PumpOutcome::PluginTransportError;
						}
					}
				}
			}
		}
	}

	/// Query health. `deadline` overrides the default only when set; absent
	/// a deadline the call never returns a transport error to the caller,
	/// only an unhealthy status (§4.3, §5 Cancellation iii).
	pub async fn health(&self, deadline: Option<Duration>) -> HealthStatus {
		let mut request = Request::new(Empty {});
		request.set_timeout(deadline.unwrap_or(DEFAULT_HEALTH_DEADLINE));
		match self.client.clone().health(request).await {
			Ok(response) => HealthStatus::from(response.into_inner()),
			Err(e) => HealthStatus::unhealthy(format!("health check failed: {e}")),
		}
	}

	/// Fetch the plugin's declared config schema, empty if it opted out.
	pub async fn config_schema(&self) -> Result<HashMap<String, ConfigFieldSchema>> {
		let response = self
			.client
			.clone()
			.config_schema(Request::new(Empty {}))
			.await
			.map_err(|source| PluginError::Transport {
				name: self.name.clone(),
				source,
			})?
			.into_inner();
		Ok(response.fields.into_iter().map(|(k, v)| (k, v.into())).collect())
	}

	/// Issue gRPC `Shutdown`, best-effort; the proxy retries nothing and the
	/// underlying plugin's idempotency is its own responsibility.
	pub async fn shutdown(&self) -> Result<()> {
		self.client
			.clone()
			.shutdown(Request::new(Empty {}))
			.await
			.map(|_| ())
			.map_err(|source| PluginError::Shutdown {
				name: self.name.clone(),
				source,
			})
	}
}

fn now_millis() -> i64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
