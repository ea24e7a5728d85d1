// SPDX-License-Identifier: Apache-2.0

//! The plugin-side remote service registry (§4.6): given the endpoints,
//! token, and config map the host's `Initialize` call carries, exposes a
//! namespaced logger, a typed view over the free-form config, and lazy gRPC
//! clients for the two callback services.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::remote_clients::{AttestationStoreClient, QueueClient};

/// The three reserved config keys the host injects alongside user-visible
/// configuration (§9 "Configuration keys that cross the trust boundary").
/// Never surfaced through [`ConfigView`]'s enumeration.
pub const ATS_STORE_ENDPOINT_KEY: &str = "_ats_store_endpoint";
pub const QUEUE_ENDPOINT_KEY: &str = "_queue_endpoint";
pub const AUTH_TOKEN_KEY: &str = "_auth_token";

const RESERVED_KEYS: [&str; 3] = [ATS_STORE_ENDPOINT_KEY, QUEUE_ENDPOINT_KEY, AUTH_TOKEN_KEY];

/// Constructed once per `Initialize` call and handed to the plugin. Lazy
/// clients are built on first access and reused thereafter.
#[derive(Clone)]
pub struct RemoteServices {
	inner: Arc<Inner>,
}

struct Inner {
	config: HashMap<String, String>,
	plugin_version: Option<String>,
	ats_store_endpoint: Option<String>,
	queue_endpoint: Option<String>,
	auth_token: Option<String>,
	ats_client: OnceCell<AttestationStoreClient>,
	queue_client: OnceCell<QueueClient>,
}

impl RemoteServices {
	/// Build the registry from the raw config map an `InitializeRequest`
	/// carries, pulling the three reserved keys out by convention.
	pub fn from_config(config: HashMap<String, String>, plugin_version: Option<String>) -> Self {
		let ats_store_endpoint = config.get(ATS_STORE_ENDPOINT_KEY).cloned();
		let queue_endpoint = config.get(QUEUE_ENDPOINT_KEY).cloned();
		let auth_token = config.get(AUTH_TOKEN_KEY).cloned();
		RemoteServices {
			inner: Arc::new(Inner {
				config,
				plugin_version,
				ats_store_endpoint,
				queue_endpoint,
				auth_token,
				ats_client: OnceCell::new(),
				queue_client: OnceCell::new(),
			}),
		}
	}

	/// Explicit non-capability: out-of-process plugins have no access to
	/// the host's storage engine (§4.6).
	pub fn database(&self) {}

	/// A namespaced logger; `domain` is the `tracing` target, with the
	/// plugin's own version appended when known, for correlating
	/// cross-process logs.
	pub fn logger(&self, domain: impl Into<String>) -> PluginLogger {
		let domain = domain.into();
		let target = match &self.inner.plugin_version {
			Some(version) => format!("{domain}@{version}"),
			None => domain,
		};
		PluginLogger { target }
	}

	/// A typed view over the config map, with the three reserved keys
	/// hidden from enumeration.
	pub fn config(&self, _domain: impl Into<String>) -> ConfigView {
		ConfigView {
			config: self.inner.config.clone(),
		}
	}

	/// Lazily dial the attestation-store callback service on first access.
	pub async fn ats_store(&self) -> Result<&AttestationStoreClient> {
		let endpoint = self
			.inner
			.ats_store_endpoint
			.as_deref()
			.ok_or(Error::MissingEndpoint(ATS_STORE_ENDPOINT_KEY))?;
		let token = self.inner.auth_token.clone().unwrap_or_default();
		self.inner
			.ats_client
			.get_or_try_init(|| async { AttestationStoreClient::connect(endpoint, token).await })
			.await
	}

	/// Lazily dial the job-queue callback service on first access.
	pub async fn queue(&self) -> Result<&QueueClient> {
		let endpoint = self
			.inner
			.queue_endpoint
			.as_deref()
			.ok_or(Error::MissingEndpoint(QUEUE_ENDPOINT_KEY))?;
		let token = self.inner.auth_token.clone().unwrap_or_default();
		self.inner
			.queue_client
			.get_or_try_init(|| async { QueueClient::connect(endpoint, token).await })
			.await
	}
}

/// A namespaced logging handle. `tracing`'s macros already carry a target;
/// this wrapper exists so call sites read `logger.info("...")` rather than
/// repeating the domain string at every call site.
#[derive(Clone)]
pub struct PluginLogger {
	target: String,
}

impl PluginLogger {
	pub fn info(&self, message: &str) {
		info!(target: "qntx_plugin", domain = %self.target, "{}", message);
	}

	pub fn warn(&self, message: &str) {
		warn!(target: "qntx_plugin", domain = %self.target, "{}", message);
	}

	pub fn error(&self, message: &str) {
		error!(target: "qntx_plugin", domain = %self.target, "{}", message);
	}

	pub fn debug(&self, message: &str) {
		debug!(target: "qntx_plugin", domain = %self.target, "{}", message);
	}
}

/// A typed view over a plugin's free-form config map (§4.6). Parsing rules:
/// booleans are permissive, ints truncate floats and default to 0 on
/// unparsable input, string-slices accept a JSON array, a comma-separated
/// string, or (via [`ConfigView::set_slice`]) an already-structured sequence.
#[derive(Debug, Clone, Default)]
pub struct ConfigView {
	config: HashMap<String, String>,
}

impl ConfigView {
	pub fn new(config: HashMap<String, String>) -> Self {
		ConfigView { config }
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.config.get(key).map(String::as_str)
	}

	pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.config.insert(key.into(), value.into());
	}

	/// Non-reserved keys, for enumeration UIs.
	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.config.keys().map(String::as_str).filter(|k| !RESERVED_KEYS.contains(k))
	}

	pub fn string(&self, key: &str) -> Option<String> {
		self.get(key).map(str::to_owned)
	}

	/// Permissive boolean parsing: `true/false`, `1/0`, `t/f`, `yes/no`,
	/// `y/n`, `on/off`, case-insensitive. Anything else is `false`.
	pub fn bool(&self, key: &str) -> bool {
		match self.get(key).map(str::to_ascii_lowercase).as_deref() {
			Some("true" | "1" | "t" | "yes" | "y" | "on") => true,
			_ => false,
		}
	}

	/// Int parsing truncates floats and returns 0 for unparsable input.
	pub fn int(&self, key: &str) -> i64 {
		let Some(raw) = self.get(key) else {
			return 0;
		};
		if let Ok(i) = raw.parse::<i64>() {
			return i;
		}
		raw.parse::<f64>().map(|f| f.trunc() as i64).unwrap_or(0)
	}

	/// Accepts an already-comma-separated string or a JSON array string;
	/// values are trimmed. Missing key yields an empty slice.
	pub fn string_slice(&self, key: &str) -> Vec<String> {
		let Some(raw) = self.get(key) else {
			return Vec::new();
		};
		let trimmed = raw.trim();
		if trimmed.starts_with('[') {
			if let Ok(values) = serde_json::from_str::<Vec<String>>(trimmed) {
				return values;
			}
		}
		trimmed
			.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(str::to_owned)
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn view(pairs: &[(&str, &str)]) -> ConfigView {
		ConfigView::new(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
	}

	#[test]
	fn bool_accepts_permissive_truthy_forms() {
		for value in ["true", "1", "t", "yes", "y", "on", "TRUE", "On"] {
			assert!(view(&[("flag", value)]).bool("flag"), "{value} should be truthy");
		}
		for value in ["false", "0", "nope", ""] {
			assert!(!view(&[("flag", value)]).bool("flag"), "{value} should be falsy");
		}
	}

	#[test]
	fn int_truncates_floats_and_defaults_to_zero() {
		assert_eq!(view(&[("n", "42")]).int("n"), 42);
		assert_eq!(view(&[("n", "3.9")]).int("n"), 3);
		assert_eq!(view(&[("n", "not-a-number")]).int("n"), 0);
		assert_eq!(view(&[]).int("missing"), 0);
	}

	#[test]
	fn string_slice_accepts_json_array_or_csv() {
		assert_eq!(view(&[("xs", r#"["a","b"]"#)]).string_slice("xs"), vec!["a", "b"]);
		assert_eq!(view(&[("xs", "a, b ,c")]).string_slice("xs"), vec!["a", "b", "c"]);
		assert!(view(&[]).string_slice("missing").is_empty());
	}

	#[test]
	fn reserved_keys_are_hidden_from_enumeration() {
		let registry = RemoteServices::from_config(
			HashMap::from([
				(AUTH_TOKEN_KEY.to_owned(), "secret".to_owned()),
				("user_key".to_owned(), "value".to_owned()),
			]),
			None,
		);
		let view = registry.config("test");
		let keys: Vec<&str> = view.keys().collect();
		assert_eq!(keys, vec!["user_key"]);
	}
}
