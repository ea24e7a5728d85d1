// SPDX-License-Identifier: Apache-2.0

//! Binds the two callback services (§4.4) on ephemeral localhost ports and
//! hands their endpoints to the plugin manager for inclusion in the
//! `Initialize` config map under `_ats_store_endpoint`/`_queue_endpoint`.
//!
//! Mirrors the reference `PluginServer::serve` shutdown pattern: a
//! `tonic::transport::Server` driven to completion by a shutdown future,
//! spawned on its own task so startup can proceed without waiting for it to
//! exit.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::info;

use qntx_plugin_proto::proto::attestation_store_service_server::AttestationStoreServiceServer;
use qntx_plugin_proto::proto::queue_service_server::QueueServiceServer;

use crate::callback::attestation::AttestationStoreService;
use crate::callback::auth::CallbackToken;
use crate::callback::backend::{AttestationBackend, JobBackend};
use crate::callback::queue::QueueService;

/// The bound endpoints and lifetime handle for the callback service plane.
pub struct ServicesManager {
	pub attestation_endpoint: SocketAddr,
	pub queue_endpoint: SocketAddr,
	pub token: CallbackToken,
	shutdown_tx: Option<oneshot::Sender<()>>,
	join: Option<JoinHandle<()>>,
}

impl ServicesManager {
	/// Bind both services on `127.0.0.1:0` and spawn a task driving them
	/// until `shutdown` is called.
	pub async fn start(
		attestation_backend: Arc<dyn AttestationBackend>,
		job_backend: Arc<dyn JobBackend>,
	) -> std::io::Result<Self> {
		let token = CallbackToken::generate();

		let attestation_listener = TcpListener::bind("127.0.0.1:0").await?;
		let attestation_endpoint = attestation_listener.local_addr()?;

		let queue_listener = TcpListener::bind("127.0.0.1:0").await?;
		let queue_endpoint = queue_listener.local_addr()?;

		let attestation_service = AttestationStoreServiceServer::new(AttestationStoreService::new(
			attestation_backend,
			token.clone(),
		));
		let queue_service = QueueServiceServer::new(QueueService::new(job_backend, token.clone()));

		let (attestation_shutdown_tx, attestation_shutdown_rx) = oneshot::channel::<()>();
		let (queue_shutdown_tx, queue_shutdown_rx) = oneshot::channel::<()>();
		let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

		info!(
			attestation_endpoint = %attestation_endpoint,
			queue_endpoint = %queue_endpoint,
			"callback services bound"
		);

		let join = tokio::spawn(async move {
			let attestation_server = Server::builder()
				.add_service(attestation_service)
				.serve_with_incoming_shutdown(TcpListenerStream::new(attestation_listener), async {
					attestation_shutdown_rx.await.ok();
				});
			let queue_server = Server::builder()
				.add_service(queue_service)
				.serve_with_incoming_shutdown(TcpListenerStream::new(queue_listener), async {
					queue_shutdown_rx.await.ok();
				});

			tokio::spawn(async move {
				if let Err(e) = attestation_server.await {
					tracing::warn!(error = %e, "attestation callback service exited with error");
				}
			});
			tokio::spawn(async move {
				if let Err(e) = queue_server.await {
					tracing::warn!(error = %e, "queue callback service exited with error");
				}
			});

			shutdown_rx.await.ok();
			let _ = attestation_shutdown_tx.send(());
			let _ = queue_shutdown_tx.send(());
		});

		Ok(ServicesManager {
			attestation_endpoint,
			queue_endpoint,
			token,
			shutdown_tx: Some(shutdown_tx),
			join: Some(join),
		})
	}

	pub fn attestation_endpoint_url(&self) -> String {
		format!("http://{}", self.attestation_endpoint)
	}

	pub fn queue_endpoint_url(&self) -> String {
		format!("http://{}", self.queue_endpoint)
	}

	/// Signal both services to stop accepting new connections and drain
	/// in-flight RPCs, then wait for the driving task to exit.
	pub async fn shutdown(mut self) {
		if let Some(tx) = self.shutdown_tx.take() {
			let _ = tx.send(());
		}
		if let Some(join) = self.join.take() {
			let _ = join.await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::callback::backend::{InMemoryAttestationStore, InMemoryJobQueue};

	#[tokio::test]
	async fn binds_two_distinct_ephemeral_ports() {
		let manager = ServicesManager::start(InMemoryAttestationStore::new(), InMemoryJobQueue::new())
			.await
			.unwrap();
		assert_ne!(manager.attestation_endpoint.port(), 0);
		assert_ne!(manager.queue_endpoint.port(), 0);
		assert_ne!(manager.attestation_endpoint, manager.queue_endpoint);
		manager.shutdown().await;
	}
}
