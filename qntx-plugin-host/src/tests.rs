// SPDX-License-Identifier: Apache-2.0

//! End-to-end lifecycle tests (§8 "Concrete end-to-end scenarios"): spawn
//! the `echo-plugin` test binary built alongside this crate and drive it
//! through a real `PluginManager`, a real gRPC channel, and a real HTTP
//! request/response round trip, the same path production traffic takes.

use std::path::PathBuf;

use crate::callback::{InMemoryAttestationStore, InMemoryJobQueue, ServicesManager};
use crate::config::PluginConfig;
use crate::plugin::{CallbackEndpoints, PluginManager};

fn echo_plugin_path() -> PathBuf {
	PathBuf::from(env!("CARGO_BIN_EXE_echo-plugin"))
}

async fn start_manager_with_echo_plugin() -> (PluginManager, ServicesManager) {
	let services = ServicesManager::start(InMemoryAttestationStore::new(), InMemoryJobQueue::new())
		.await
		.expect("callback services bind on ephemeral ports");
	let callback = CallbackEndpoints {
		ats_store_endpoint: services.attestation_endpoint_url(),
		queue_endpoint: services.queue_endpoint_url(),
		auth_token: services.token.as_str().to_owned(),
	};

	let manager = PluginManager::new(PathBuf::from("."), callback);
	let config = PluginConfig {
		name: "echo".to_owned(),
		enabled: true,
		address: None,
		binary: Some(echo_plugin_path()),
		args: Vec::new(),
		env: std::collections::HashMap::new(),
		auto_start: true,
		config: std::collections::HashMap::new(),
	};

	manager.load_plugin(config).await.expect("echo-plugin loads successfully");
	(manager, services)
}

/// §8 scenario 1, "Lifecycle happy path", against a launched subprocess
/// rather than a hand-rolled mock server.
#[tokio::test]
async fn lifecycle_happy_path() {
	let (manager, services) = start_manager_with_echo_plugin().await;

	assert_eq!(manager.len().await, 1);
	let proxy = manager.get("echo").await.expect("echo plugin registered");
	assert_eq!(proxy.metadata().name, "echo");
	assert!(proxy.health(None).await.healthy);

	let failures = manager.shutdown().await;
	assert!(failures.is_empty());
	assert_eq!(manager.len().await, 0);

	services.shutdown().await;
}

/// §8 scenario 2, "Multi-value headers": the plugin emits three
/// `Set-Cookie` headers and the host-facing proxy must preserve all three,
/// in order, under the `HandleHTTP` unary bridge (§4.9).
#[tokio::test]
async fn multi_value_headers_round_trip() {
	let (manager, services) = start_manager_with_echo_plugin().await;
	let proxy = manager.get("echo").await.expect("echo plugin registered");

	let request = qntx_plugin_proto::types::HttpRequest {
		method: "GET".to_owned(),
		path: "/cookies".to_owned(),
		headers: Default::default(),
		body: Vec::new(),
	};
	let response = proxy.handle_http(request).await.expect("plugin answers HandleHTTP");

	let cookies = response
		.headers
		.0
		.iter()
		.find(|(name, _)| name.eq_ignore_ascii_case("set-cookie"))
		.map(|(_, values)| values.clone())
		.unwrap_or_default();
	assert_eq!(
		cookies,
		vec![
			"session=abc123; Path=/; HttpOnly".to_owned(),
			"user=john; Path=/; Secure".to_owned(),
			"theme=dark; Path=/".to_owned(),
		]
	);

	manager.shutdown().await;
	services.shutdown().await;
}

/// A request body round-trips through the plugin's own `/echo` route
/// unchanged, exercising the byte-identical body contract of §8's
/// round-trip laws.
#[tokio::test]
async fn http_body_round_trips_through_the_plugin() {
	let (manager, services) = start_manager_with_echo_plugin().await;
	let proxy = manager.get("echo").await.expect("echo plugin registered");

	let request = qntx_plugin_proto::types::HttpRequest {
		method: "POST".to_owned(),
		path: "/echo".to_owned(),
		headers: Default::default(),
		body: b"hello from the host".to_vec(),
	};
	let response = proxy.handle_http(request).await.expect("plugin answers HandleHTTP");

	assert_eq!(response.status, 200);
	assert_eq!(response.body, b"hello from the host");

	manager.shutdown().await;
	services.shutdown().await;
}
