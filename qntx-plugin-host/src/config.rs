// SPDX-License-Identifier: Apache-2.0

//! Rust-facing configuration structures for the plugin host.
//!
//! Per the Non-goals on configuration-file loading, this module performs no
//! file I/O of its own: it defines `serde::Deserialize`-able shapes that a
//! collaborator (a TOML or JSON loader upstream) feeds directly, and the
//! defaults the wire format promises when a field is absent.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// The port the reference QNTX plugin mains allocate from by default,
/// chosen to avoid common developer ports (3000, 8000, 8080, ...).
pub const DEFAULT_PLUGIN_BASE_PORT: u16 = 38700;

fn default_true() -> bool {
	true
}

/// The configured intent for one plugin. Produced by discovery/the loader at
/// startup and immutable thereafter.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
	/// Logical name identifying the plugin; also the route segment under
	/// which it is exposed (`/api/<name>/*`, `/<name>-ws`).
	pub name: String,

	#[serde(default = "default_true")]
	pub enabled: bool,

	/// A pre-running plugin's address (`host:port`). Mutually exclusive in
	/// practice with `binary`, though nothing enforces it syntactically;
	/// `address` wins if both are set (skip launch, connect directly).
	#[serde(default)]
	pub address: Option<String>,

	/// Path to a local executable binary, absolute or resolved relative to
	/// the host's plugins directory.
	#[serde(default)]
	pub binary: Option<PathBuf>,

	/// Extra arguments appended after `--port <N>` on launch.
	#[serde(default)]
	pub args: Vec<String>,

	/// Environment overrides merged into the host's own environment for the
	/// spawned process.
	#[serde(default)]
	pub env: HashMap<String, String>,

	#[serde(default = "default_true")]
	pub auto_start: bool,

	/// Free-form key -> string config map passed to the plugin at
	/// initialization, alongside the three reserved callback keys the
	/// manager injects (`_ats_store_endpoint`, `_queue_endpoint`,
	/// `_auth_token`).
	#[serde(default)]
	pub config: HashMap<String, String>,
}

impl PluginConfig {
	/// A config for a plugin the manager dials directly, without launching
	/// a subprocess.
	pub fn for_address(name: impl Into<String>, address: impl Into<String>) -> Self {
		PluginConfig {
			name: name.into(),
			enabled: true,
			address: Some(address.into()),
			binary: None,
			args: Vec::new(),
			env: HashMap::new(),
			auto_start: false,
			config: HashMap::new(),
		}
	}
}

/// Allow-list of origin patterns for the WebSocket boundary (§4.7).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebSocketConfig {
	#[serde(default)]
	pub allowed_origins: Vec<String>,

	/// Development-only "allow everything" escape hatch.
	#[serde(default)]
	pub allow_all: bool,

	#[serde(default)]
	pub allow_credentials: bool,
}

/// Keepalive tuning. Defaults match §5's Timeouts table: 30s ping interval,
/// 60s pong timeout, 3 reconnect attempts, 1s exponential-backoff base.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
	pub enabled: bool,
	pub ping_interval_secs: u64,
	pub pong_timeout_secs: u64,
	pub reconnect_attempts: u32,
	pub backoff_base_secs: u64,
}

impl Default for KeepaliveConfig {
	fn default() -> Self {
		KeepaliveConfig {
			enabled: true,
			ping_interval_secs: 30,
			pong_timeout_secs: 60,
			reconnect_attempts: 3,
			backoff_base_secs: 1,
		}
	}
}

impl KeepaliveConfig {
	pub fn ping_interval(&self) -> Duration {
		Duration::from_secs(self.ping_interval_secs)
	}

	pub fn pong_timeout(&self) -> Duration {
		Duration::from_secs(self.pong_timeout_secs)
	}

	pub fn backoff_base(&self) -> Duration {
		Duration::from_secs(self.backoff_base_secs)
	}
}

/// The loader's input: enabled plugin names, where to look for their
/// binaries, and the WebSocket/keepalive policy to apply once loaded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoaderConfig {
	#[serde(default)]
	pub enabled: Vec<String>,

	/// Search paths, in probe order. `~` and relative-to-cwd resolution are
	/// the loader's job, not this struct's.
	#[serde(default)]
	pub search_paths: Vec<PathBuf>,

	#[serde(default)]
	pub keepalive: KeepaliveConfig,

	#[serde(default)]
	pub allowed_origins: Vec<String>,
}

/// Optional per-plugin overrides a collaborator (e.g. a per-plugin TOML
/// file under the plugins directory) may supply to the loader; any field
/// left `None`/empty falls back to the loader's discovered default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginConfigOverride {
	pub enabled: Option<bool>,
	pub address: Option<String>,
	pub binary: Option<PathBuf>,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub env: HashMap<String, String>,
	pub auto_start: Option<bool>,
	#[serde(default)]
	pub config: HashMap<String, String>,
}

/// The top-level shape of the host's own JSON configuration file. The file
/// itself is read and parsed at the binary boundary (`main.rs`); this
/// struct only describes what a well-formed one contains.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostConfig {
	#[serde(default)]
	pub loader: LoaderConfig,

	#[serde(default)]
	pub websocket: WebSocketConfig,

	#[serde(default)]
	pub overrides: HashMap<String, PluginConfigOverride>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keepalive_defaults_match_spec() {
		let k = KeepaliveConfig::default();
		assert_eq!(k.ping_interval_secs, 30);
		assert_eq!(k.pong_timeout_secs, 60);
		assert_eq!(k.reconnect_attempts, 3);
		assert_eq!(k.backoff_base_secs, 1);
	}

	#[test]
	fn plugin_config_deserializes_with_defaults() {
		let json = serde_json::json!({ "name": "mock" });
		let config: PluginConfig = serde_json::from_value(json).unwrap();
		assert_eq!(config.name, "mock");
		assert!(config.enabled);
		assert!(config.auto_start);
		assert!(config.address.is_none());
	}
}
