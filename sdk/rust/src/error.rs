// SPDX-License-Identifier: Apache-2.0

use std::result::Result as StdResult;
use tonic::Status as TonicStatus;

/// Errors raised by plugin-side code: the [`crate::plugin_server::PluginServer`]
/// wrapper and the remote callback-service clients.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("failed to bind plugin server: exhausted {attempts} port attempts starting at {base}")]
	BindExhausted { base: u16, attempts: u32 },

	#[error("failed to bind plugin server")]
	Bind(#[source] std::io::Error),

	#[error("failed to start plugin server")]
	FailedToStartServer(#[source] tonic::transport::Error),

	#[error("plugin initialization failed: {0}")]
	InitializeFailed(String),

	#[error("gRPC transport error during '{operation}'")]
	Transport {
		operation: &'static str,
		#[source]
		source: tonic::transport::Error,
	},

	#[error("callback RPC '{operation}' failed")]
	Rpc {
		operation: &'static str,
		#[source]
		source: tonic::Status,
	},

	#[error("callback RPC '{operation}' rejected: {message}")]
	CallbackRejected { operation: &'static str, message: String },

	#[error("callback service endpoint not configured: {0}")]
	MissingEndpoint(&'static str),
}

pub type Result<T> = StdResult<T, Error>;

/// Errors specific to a plugin's own `Initialize` handling, reported back to
/// the host as an `InitializeResponse{success: false, error}`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("missing required config field '{field_name}'")]
	MissingRequiredConfig { field_name: String },

	#[error("invalid value for config field '{field_name}': {reason}")]
	InvalidConfigValue { field_name: String, reason: String },

	#[error("unrecognized config field '{field_name}'")]
	UnrecognizedConfig { field_name: String },

	#[error("{message}")]
	Unspecified { message: String },
}

impl From<ConfigError> for TonicStatus {
	fn from(val: ConfigError) -> Self {
		TonicStatus::invalid_argument(val.to_string())
	}
}
