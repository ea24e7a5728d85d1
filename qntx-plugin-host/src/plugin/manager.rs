// SPDX-License-Identifier: Apache-2.0

//! The plugin manager (§4.1): discovers nothing itself (that's the
//! loader's job) but launches, supervises, and shuts down every plugin
//! process, and is the single owner of their child-process handles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{oneshot, RwLock};
use tokio::time::{sleep, Instant};
use tracing::warn;

use crate::config::{PluginConfig, DEFAULT_PLUGIN_BASE_PORT};
use crate::error::{LoadFailure, PluginError, Result};
use crate::plugin::proxy::ExternalProxy;
use crate::plugin::stdout_bridge::{await_port_announcement, bridge_stderr, bridge_stdout};
use crate::plugin::types::ManagedPlugin;

const READINESS_TIMEOUT: Duration = Duration::from_secs(5);
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The three reserved config keys crossing the trust boundary (§9).
pub const ATS_STORE_ENDPOINT_KEY: &str = "_ats_store_endpoint";
pub const QUEUE_ENDPOINT_KEY: &str = "_queue_endpoint";
pub const AUTH_TOKEN_KEY: &str = "_auth_token";

/// The callback-service endpoints injected into every plugin's `Initialize`
/// config map.
#[derive(Clone)]
pub struct CallbackEndpoints {
	pub ats_store_endpoint: String,
	pub queue_endpoint: String,
	pub auth_token: String,
}

/// Keyed set of loaded plugins. Guarded by a read/write lock; every
/// mutating operation (load, shutdown, reinit) takes the write lock (§5
/// "Shared state").
pub struct PluginManager {
	plugins_dir: PathBuf,
	callback: CallbackEndpoints,
	records: RwLock<HashMap<String, ManagedPlugin>>,
}

impl PluginManager {
	pub fn new(plugins_dir: PathBuf, callback: CallbackEndpoints) -> Self {
		PluginManager {
			plugins_dir,
			callback,
			records: RwLock::new(HashMap::new()),
		}
	}

	/// Load every config in caller order, continuing past individual
	/// failures and collecting them (§4.1 "resilient partial-failure
	/// loading").
	pub async fn load_plugins(&self, configs: Vec<PluginConfig>) -> Vec<LoadFailure> {
		let mut failures = Vec::new();
		for config in configs {
			let name = config.name.clone();
			if let Err(error) = self.load_plugin(config).await {
				warn!(plugin = %name, error = %error, "failed to load plugin");
				failures.push(LoadFailure { name, error });
			}
		}
		failures
	}

	/// Load one plugin: reject duplicate names, connect directly or launch
	/// and wait for readiness, verify identity, then publish the record
	/// (§4.1).
	pub async fn load_plugin(&self, config: PluginConfig) -> Result<()> {
		if !config.enabled {
			return Ok(());
		}

		{
			let records = self.records.read().await;
			if records.contains_key(&config.name) {
				return Err(PluginError::DuplicateName { name: config.name.clone() });
			}
		}

		if let Some(address) = config.address.clone() {
			let proxy = ExternalProxy::connect(&config.name, &address).await?;
			verify_identity(&config.name, &proxy)?;
			proxy.initialize(self.merged_config(&config)).await?;
			let port = parse_port(&address).unwrap_or(0);
			let record = ManagedPlugin {
				config,
				proxy: Arc::new(proxy),
				port,
				process: None,
			};
			self.publish(record).await;
			return Ok(());
		}

		let Some(binary) = config.binary.clone() else {
			return Err(PluginError::NoTransport { name: config.name.clone() });
		};
		if !config.auto_start {
			return Err(PluginError::NoTransport { name: config.name.clone() });
		}

		let binary_path = self.resolve_binary_path(&binary);
		if !binary_path.is_file() {
			return Err(PluginError::BinaryNotFound {
				name: config.name.clone(),
				path: binary_path,
			});
		}

		let port = self.next_port().await;
		let (port_tx, port_rx) = oneshot::channel();

		let mut command = Command::new(&binary_path);
		command
			.arg("--port")
			.arg(port.to_string())
			.args(&config.args)
			.envs(config.env.clone())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(false);

		let mut child = command.spawn().map_err(|source| PluginError::Launch {
			name: config.name.clone(),
			source,
		})?;

		let stdout = child.stdout.take().expect("stdout piped at spawn");
		let stderr = child.stderr.take().expect("stderr piped at spawn");
		bridge_stdout(config.name.clone(), stdout, port_tx);
		bridge_stderr(config.name.clone(), stderr);

		let actual_port = await_port_announcement(port_rx).await.unwrap_or(port);
		let address = format!("127.0.0.1:{actual_port}");

		let proxy = match wait_for_readiness(&config.name, &address).await {
			Ok(proxy) => proxy,
			Err(error) => {
				kill_child(&mut child).await;
				return Err(error);
			}
		};

		if let Err(error) = verify_identity(&config.name, &proxy) {
			kill_child(&mut child).await;
			return Err(error);
		}

		if let Err(error) = proxy.initialize(self.merged_config(&config)).await {
			kill_child(&mut child).await;
			return Err(error);
		}

		let record = ManagedPlugin {
			config,
			proxy: Arc::new(proxy),
			port: actual_port,
			process: Some(child),
		};
		self.publish(record).await;
		Ok(())
	}

	/// Re-issue `Initialize` on an existing proxy with a fresh config map,
	/// merged with the callback endpoints the manager owns.
	pub async fn reinitialize_plugin(&self, name: &str, config: HashMap<String, String>) -> Result<()> {
		let records = self.records.read().await;
		let record = records.get(name).ok_or_else(|| PluginError::NotFound { name: name.to_owned() })?;
		let mut merged = self.callback_config();
		merged.extend(config);
		record.proxy.initialize(merged).await
	}

	pub fn callback_config(&self) -> HashMap<String, String> {
		HashMap::from([
			(ATS_STORE_ENDPOINT_KEY.to_owned(), self.callback.ats_store_endpoint.clone()),
			(QUEUE_ENDPOINT_KEY.to_owned(), self.callback.queue_endpoint.clone()),
			(AUTH_TOKEN_KEY.to_owned(), self.callback.auth_token.clone()),
		])
	}

	/// The config map passed to `Initialize`: the plugin's own free-form
	/// config plus the three reserved callback keys, which always win on
	/// collision since a plugin config cannot legitimately need to override
	/// its own callback wiring.
	fn merged_config(&self, config: &PluginConfig) -> HashMap<String, String> {
		let mut merged = config.config.clone();
		merged.extend(self.callback_config());
		merged
	}

	pub async fn get(&self, name: &str) -> Option<Arc<ExternalProxy>> {
		self.records.read().await.get(name).map(|r| Arc::clone(&r.proxy))
	}

	pub async fn get_all(&self) -> Vec<Arc<ExternalProxy>> {
		self.records.read().await.values().map(|r| Arc::clone(&r.proxy)).collect()
	}

	pub async fn names(&self) -> Vec<String> {
		self.records.read().await.keys().cloned().collect()
	}

	pub async fn len(&self) -> usize {
		self.records.read().await.len()
	}

	async fn publish(&self, record: ManagedPlugin) {
		let mut records = self.records.write().await;
		records.insert(record.config.name.clone(), record);
	}

	fn resolve_binary_path(&self, binary: &Path) -> PathBuf {
		if binary.is_absolute() {
			binary.to_path_buf()
		} else {
			self.plugins_dir.join(binary)
		}
	}

	/// Next free port: one past the highest currently allocated, or the
	/// configured base if none are allocated yet. Deterministic under a
	/// given record set (§4.1 "Port allocation").
	async fn next_port(&self) -> u16 {
		let records = self.records.read().await;
		records
			.values()
			.map(|r| r.port)
			.max()
			.map(|p| p.saturating_add(1))
			.unwrap_or(DEFAULT_PLUGIN_BASE_PORT)
	}

	/// For every loaded plugin: call `Shutdown` over gRPC (best-effort,
	/// errors collected), then SIGINT the process, upgrading to kill if the
	/// signal fails. Clears the record set (§4.1).
	pub async fn shutdown(&self) -> Vec<LoadFailure> {
		let mut records = self.records.write().await;
		let mut failures = Vec::new();

		for (name, mut record) in records.drain() {
			if let Err(error) = record.proxy.shutdown().await {
				failures.push(LoadFailure { name: name.clone(), error });
			}

			if let Some(mut child) = record.process.take() {
				kill_child(&mut child).await;
			}
		}

		failures
	}
}

async fn wait_for_readiness(name: &str, address: &str) -> Result<ExternalProxy> {
	let deadline = Instant::now() + READINESS_TIMEOUT;
	loop {
		match ExternalProxy::connect(name, address).await {
			Ok(proxy) => return Ok(proxy),
			Err(_) if Instant::now() < deadline => {
				sleep(READINESS_POLL_INTERVAL).await;
			}
			Err(_) => {
				return Err(PluginError::ReadinessTimeout {
					name: name.to_owned(),
					timeout_ms: READINESS_TIMEOUT.as_millis() as u64,
				})
			}
		}
	}
}

fn verify_identity(expected_name: &str, proxy: &ExternalProxy) -> Result<()> {
	if proxy.metadata().name != expected_name {
		return Err(PluginError::IdentityMismatch {
			name: expected_name.to_owned(),
			reported: proxy.metadata().name.clone(),
			expected: expected_name.to_owned(),
		});
	}
	warn_on_host_version_mismatch(proxy.metadata());
	Ok(())
}

/// Warn (never fail the load) when a plugin's declared `required_host_version`
/// constraint doesn't match this host's own crate version. §3 only makes the
/// Name invariant load-fatal; the version constraint is informational, so an
/// unparseable or unsatisfied constraint is logged and the load proceeds.
fn warn_on_host_version_mismatch(metadata: &qntx_plugin_proto::types::PluginMetadata) {
	let req = match semver::VersionReq::parse(&metadata.required_host_version) {
		Ok(req) => req,
		Err(error) => {
			warn!(
				plugin = %metadata.name,
				constraint = %metadata.required_host_version,
				%error,
				"plugin declared an unparseable host-version constraint"
			);
			return;
		}
	};

	let host_version = semver::Version::parse(env!("CARGO_PKG_VERSION")).expect("crate version is valid semver");
	if !req.matches(&host_version) {
		warn!(
			plugin = %metadata.name,
			constraint = %metadata.required_host_version,
			host_version = %host_version,
			"plugin's required host-version constraint does not match this host"
		);
	}
}

/// SIGINT first, escalating to a hard kill if the signal can't be sent or
/// the process is already gone (§4.1 "Shutdown", §7 "Lifecycle").
async fn kill_child(child: &mut Child) {
	let signalled = child.id().is_some_and(send_sigint);
	if !signalled {
		let _ = child.start_kill();
	}
	let _ = child.wait().await;
}

#[cfg(unix)]
fn send_sigint(pid: u32) -> bool {
	// SAFETY: `kill(2)` on a pid we ourselves spawned; failure (process
	// already exited) just falls through to the hard-kill path above.
	unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) == 0 }
}

#[cfg(not(unix))]
fn send_sigint(_pid: u32) -> bool {
	false
}

fn parse_port(address: &str) -> Option<u16> {
	address.rsplit(':').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn next_port_parsing_falls_back_on_malformed_address() {
		assert_eq!(parse_port("127.0.0.1:38700"), Some(38700));
		assert_eq!(parse_port("not-an-address"), None);
	}

	fn metadata_with_constraint(constraint: &str) -> qntx_plugin_proto::types::PluginMetadata {
		qntx_plugin_proto::types::PluginMetadata {
			name: "mock".to_owned(),
			version: "1.0.0".to_owned(),
			required_host_version: constraint.to_owned(),
			description: String::new(),
			author: String::new(),
			license: String::new(),
		}
	}

	#[test]
	fn host_version_mismatch_only_warns_never_panics() {
		warn_on_host_version_mismatch(&metadata_with_constraint(">=999.0.0"));
	}

	#[test]
	fn unparseable_host_version_constraint_only_warns_never_panics() {
		warn_on_host_version_mismatch(&metadata_with_constraint("not-a-constraint"));
	}

	#[test]
	fn satisfied_host_version_constraint_is_silent() {
		warn_on_host_version_mismatch(&metadata_with_constraint("*"));
	}
}
