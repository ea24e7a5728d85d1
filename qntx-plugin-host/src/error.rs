// SPDX-License-Identifier: Apache-2.0

//! Error types for the plugin host subsystem.
//!
//! Per-plugin failures (configuration, launch, identity, transport) are all
//! represented as variants of one [`PluginError`] enum rather than a type
//! hierarchy: callers at every call site want a label plus a message to log
//! and move on, never a type to match and recover from. Manager-level
//! failures that should abort the whole process use `anyhow::Result`
//! instead, at the binary boundary only.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PluginError>;

#[derive(Debug, Error)]
pub enum PluginError {
	#[error("plugin '{name}' is already loaded")]
	DuplicateName { name: String },

	#[error("plugin '{name}' config specifies neither `address` nor `binary`")]
	NoTransport { name: String },

	#[error("plugin '{name}' binary not found at {path}", path = .path.display())]
	BinaryNotFound { name: String, path: PathBuf },

	#[error("failed to launch plugin '{name}': {source}")]
	Launch {
		name: String,
		#[source]
		source: std::io::Error,
	},

	#[error("plugin '{name}' did not become ready within {timeout_ms}ms")]
	ReadinessTimeout { name: String, timeout_ms: u64 },

	#[error("failed to connect to plugin '{name}' at {addr}: {source}")]
	Dial {
		name: String,
		addr: String,
		#[source]
		source: tonic::transport::Error,
	},

	#[error("plugin '{name}' reported name '{reported}', expected '{expected}'")]
	IdentityMismatch {
		name: String,
		reported: String,
		expected: String,
	},

	#[error("gRPC call to plugin '{name}' failed: {source}")]
	Transport {
		name: String,
		#[source]
		source: tonic::Status,
	},

	#[error("plugin '{name}' shutdown failed: {source}")]
	Shutdown {
		name: String,
		#[source]
		source: tonic::Status,
	},

	#[error("no such plugin '{name}'")]
	NotFound { name: String },

	#[error("{0}")]
	Other(String),
}

impl PluginError {
	pub fn other(msg: impl Into<String>) -> Self {
		PluginError::Other(msg.into())
	}
}

/// A per-plugin failure collected during [`crate::plugin::PluginManager::load_plugins`].
///
/// `LoadPlugins` never aborts the whole set on one plugin's failure; it logs
/// and continues, then hands the caller this summary so the host can report
/// what didn't come up without losing the plugins that did.
#[derive(Debug)]
pub struct LoadFailure {
	pub name: String,
	pub error: PluginError,
}
