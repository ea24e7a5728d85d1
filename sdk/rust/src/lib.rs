// SPDX-License-Identifier: Apache-2.0

//! SDK for writing out-of-process QNTX plugins in Rust.
//!
//! A plugin implements [`Plugin`] and hands it to [`PluginServer::register`],
//! which adapts it to the `DomainPluginService` gRPC surface the host's
//! external proxy drives: `Initialize`, `HandleHTTP`, `HandleWebSocket`,
//! `Health`, `Metadata`, `ConfigSchema`, `Shutdown`. HTTP routes are plain
//! `axum::Router`s; everything arrives over gRPC rather than a real TCP
//! listener, so the wrapper dispatches into the router with
//! `tower::Service::oneshot`.
//!
//! `RemoteServices` (built from the config the host's `Initialize` call
//! carries) gives a plugin lazy gRPC clients back into the host's attestation
//! store and job queue, plus a namespaced logger and a typed view over its
//! own config map.

pub mod error;
pub mod plugin_server;
pub mod remote_clients;
pub mod service_registry;

pub use error::{ConfigError, Error, Result};
pub use plugin_server::PluginServer;
pub use qntx_plugin_proto::types::{
	ConfigFieldSchema, HealthStatus, PluginMetadata,
};
pub use service_registry::{ConfigView, RemoteServices};

use std::collections::HashMap;

/// The capability set a QNTX plugin implements (§9's "polymorphism across
/// local and remote plugins": this trait is the in-process half of that
/// capability set, the [`PluginServer`] wrapper is the out-of-process half).
#[tonic::async_trait]
pub trait Plugin: Send + Sync + 'static {
	/// Static identity returned by the `Metadata` RPC. Called once, lazily,
	/// by the wrapper, and cached for the life of the process.
	fn metadata(&self) -> PluginMetadata;

	/// Handle the host's `Initialize` call: validate configuration and wire
	/// up whatever the plugin needs from `services`. Called at most once
	/// per process (the wrapper's once-latch enforces this); a sticky error
	/// here is returned verbatim to every concurrent or later caller.
	async fn initialize(&self, services: RemoteServices, config: HashMap<String, String>) -> StdConfigResult;

	/// Build the router mounted under the host's `/api/<name>/*` prefix.
	/// Called once, immediately after a successful `initialize`.
	fn routes(&self) -> axum::Router {
		axum::Router::new()
	}

	/// Handle one inbound WebSocket `DATA` frame, returning the frame (and
	/// its timestamp) to send back, or `None` to send nothing. The default
	/// implementation echoes the frame unchanged, matching the reference
	/// behavior real plugins are expected to replace (§4.2).
	async fn handle_ws_data(&self, bytes: Vec<u8>, ts_millis: i64) -> Option<(Vec<u8>, i64)> {
		Some((bytes, ts_millis))
	}

	/// Current health. Forwarded verbatim by the wrapper; default is always
	/// healthy.
	async fn health(&self) -> HealthStatus {
		HealthStatus {
			healthy: true,
			paused: false,
			message: String::new(),
			detail: HashMap::new(),
		}
	}

	/// Typed configuration schema for UI-driven configuration. Plugins that
	/// do not opt in return the default empty map, which the wrapper
	/// reports as an empty `ConfigSchemaResponse`.
	fn config_schema(&self) -> HashMap<String, ConfigFieldSchema> {
		HashMap::new()
	}

	/// Graceful shutdown hook, run before the wrapper stops the gRPC server.
	async fn shutdown(&self) {}
}

/// Alias matching the wire contract for `Initialize`: `Ok(())` becomes
/// `InitializeResponse{success: true}`; `Err` becomes
/// `InitializeResponse{success: false, error: <display>}`.
pub type StdConfigResult = std::result::Result<(), ConfigError>;

/// A utility module containing everything needed to write a plugin.
pub mod prelude {
	pub use crate::error::{ConfigError, Error, Result};
	pub use crate::plugin_server::PluginServer;
	pub use crate::service_registry::{ConfigView, RemoteServices};
	pub use crate::{Plugin, StdConfigResult};
	pub use qntx_plugin_proto::types::{ConfigFieldSchema, ConfigFieldType, HealthStatus, PluginMetadata};
}
