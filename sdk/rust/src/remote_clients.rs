// SPDX-License-Identifier: Apache-2.0

//! Plugin-side lazy gRPC clients (§4.5) implementing the in-process
//! attestation-store and job-queue contracts by serializing calls to the
//! host's callback services. Every method translates the wire
//! success/error shape into a plain `Result`: a transport error becomes a
//! wrapped [`Error::Rpc`] with operation context; a `success=false`
//! response becomes an [`Error::CallbackRejected`] carrying the
//! server-supplied reason.

use tonic::transport::Channel;

use qntx_plugin_proto::proto::attestation_store_service_client::AttestationStoreServiceClient;
use qntx_plugin_proto::proto::queue_service_client::QueueServiceClient;
use qntx_plugin_proto::proto::{
	AttestationExistsRequest, CreateAttestationRequest, EnqueueRequest, GenerateAndCreateAttestationRequest,
	GetAttestationsRequest, GetJobRequest, ListJobsRequest, UpdateJobRequest,
};
use qntx_plugin_proto::types::{Attestation, AttestationCommand, AttestationFilter, Job};

use crate::error::{Error, Result};

fn rpc(operation: &'static str) -> impl Fn(tonic::Status) -> Error {
	move |source| Error::Rpc { operation, source }
}

fn rejected(operation: &'static str, message: String) -> Error {
	Error::CallbackRejected { operation, message }
}

/// A lazy gRPC client for the host's `AttestationStoreService`.
pub struct AttestationStoreClient {
	client: AttestationStoreServiceClient<Channel>,
	token: String,
}

impl AttestationStoreClient {
	pub(crate) async fn connect(endpoint: &str, token: String) -> Result<Self> {
		let channel = Channel::from_shared(endpoint.to_owned())
			.map_err(|source| Error::Transport {
				operation: "connect",
				source,
			})?
			.connect()
			.await
			.map_err(|source| Error::Transport {
				operation: "connect",
				source,
			})?;
		Ok(AttestationStoreClient {
			client: AttestationStoreServiceClient::new(channel),
			token,
		})
	}

	pub async fn create(&self, attestation: Attestation) -> Result<()> {
		let response = self
			.client
			.clone()
			.create_attestation(CreateAttestationRequest {
				token: self.token.clone(),
				attestation: Some(attestation.into()),
			})
			.await
			.map_err(rpc("create_attestation"))?
			.into_inner();
		let result = response.result.unwrap_or_default();
		if result.success {
			Ok(())
		} else {
			Err(rejected("create_attestation", result.message))
		}
	}

	pub async fn exists(&self, id: &str) -> Result<bool> {
		let response = self
			.client
			.clone()
			.attestation_exists(AttestationExistsRequest {
				token: self.token.clone(),
				id: id.to_owned(),
			})
			.await
			.map_err(rpc("attestation_exists"))?
			.into_inner();
		let result = response.result.unwrap_or_default();
		if result.success {
			Ok(response.exists)
		} else {
			Err(rejected("attestation_exists", result.message))
		}
	}

	pub async fn generate_and_create(&self, command: AttestationCommand) -> Result<Attestation> {
		let response = self
			.client
			.clone()
			.generate_and_create_attestation(GenerateAndCreateAttestationRequest {
				token: self.token.clone(),
				command: Some(command.into()),
			})
			.await
			.map_err(rpc("generate_and_create_attestation"))?
			.into_inner();
		let result = response.result.unwrap_or_default();
		if !result.success {
			return Err(rejected("generate_and_create_attestation", result.message));
		}
		response
			.attestation
			.map(Attestation::from)
			.ok_or_else(|| rejected("generate_and_create_attestation", "missing attestation in response".to_owned()))
	}

	pub async fn query(&self, filter: AttestationFilter) -> Result<Vec<Attestation>> {
		let response = self
			.client
			.clone()
			.get_attestations(GetAttestationsRequest {
				token: self.token.clone(),
				filter: Some(filter.into()),
			})
			.await
			.map_err(rpc("get_attestations"))?
			.into_inner();
		let result = response.result.unwrap_or_default();
		if result.success {
			Ok(response.attestations.into_iter().map(Attestation::from).collect())
		} else {
			Err(rejected("get_attestations", result.message))
		}
	}
}

/// A lazy gRPC client for the host's `QueueService`.
pub struct QueueClient {
	client: QueueServiceClient<Channel>,
	token: String,
}

impl QueueClient {
	pub(crate) async fn connect(endpoint: &str, token: String) -> Result<Self> {
		let channel = Channel::from_shared(endpoint.to_owned())
			.map_err(|source| Error::Transport {
				operation: "connect",
				source,
			})?
			.connect()
			.await
			.map_err(|source| Error::Transport {
				operation: "connect",
				source,
			})?;
		Ok(QueueClient {
			client: QueueServiceClient::new(channel),
			token,
		})
	}

	pub async fn enqueue(&self, job: Job) -> Result<String> {
		let response = self
			.client
			.clone()
			.enqueue(EnqueueRequest {
				token: self.token.clone(),
				job: Some(job.into()),
			})
			.await
			.map_err(rpc("enqueue"))?
			.into_inner();
		let result = response.result.unwrap_or_default();
		if result.success {
			Ok(response.job_id)
		} else {
			Err(rejected("enqueue", result.message))
		}
	}

	pub async fn get(&self, id: &str) -> Result<Job> {
		let response = self
			.client
			.clone()
			.get_job(GetJobRequest {
				token: self.token.clone(),
				id: id.to_owned(),
			})
			.await
			.map_err(rpc("get_job"))?
			.into_inner();
		let result = response.result.unwrap_or_default();
		if !result.success {
			return Err(rejected("get_job", result.message));
		}
		response
			.job
			.map(Job::try_from)
			.transpose()
			.map_err(|e| rejected("get_job", e.to_string()))?
			.ok_or_else(|| rejected("get_job", "missing job in response".to_owned()))
	}

	pub async fn update(&self, job: Job) -> Result<()> {
		let result = self
			.client
			.clone()
			.update_job(UpdateJobRequest {
				token: self.token.clone(),
				job: Some(job.into()),
			})
			.await
			.map_err(rpc("update_job"))?
			.into_inner();
		if result.success {
			Ok(())
		} else {
			Err(rejected("update_job", result.message))
		}
	}

	pub async fn list(&self, status: Option<&str>, limit: u32) -> Result<Vec<Job>> {
		let response = self
			.client
			.clone()
			.list_jobs(ListJobsRequest {
				token: self.token.clone(),
				status: status.unwrap_or_default().to_owned(),
				limit,
			})
			.await
			.map_err(rpc("list_jobs"))?
			.into_inner();
		let result = response.result.unwrap_or_default();
		if !result.success {
			return Err(rejected("list_jobs", result.message));
		}
		response
			.jobs
			.into_iter()
			.map(Job::try_from)
			.collect::<std::result::Result<Vec<_>, _>>()
			.map_err(|e| rejected("list_jobs", e.to_string()))
	}
}
