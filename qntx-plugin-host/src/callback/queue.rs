// SPDX-License-Identifier: Apache-2.0

//! The `QueueService` callback (§4.4): a plugin dials back into this to
//! enqueue asynchronous jobs and track their progress. Token-guarded the
//! same way as [`super::attestation::AttestationStoreService`].

use std::sync::Arc;
use tonic::{Request, Response, Status};

use qntx_plugin_proto::proto::queue_service_server::QueueService as QueueServiceTrait;
use qntx_plugin_proto::proto::{
	CallbackResult, EnqueueRequest, EnqueueResponse, GetJobRequest, GetJobResponse, ListJobsRequest,
	ListJobsResponse, UpdateJobRequest,
};
use qntx_plugin_proto::types::{Job, JobStatus};

use crate::callback::auth::{CallbackToken, INVALID_TOKEN_MESSAGE};
use crate::callback::backend::{JobBackend, DEFAULT_LIST_JOBS_LIMIT};

pub struct QueueService {
	backend: Arc<dyn JobBackend>,
	token: CallbackToken,
}

impl QueueService {
	pub fn new(backend: Arc<dyn JobBackend>, token: CallbackToken) -> Self {
		QueueService { backend, token }
	}

	fn check(&self, candidate: &str) -> Option<CallbackResult> {
		if self.token.matches(candidate) {
			None
		} else {
			Some(CallbackResult {
				success: false,
				message: INVALID_TOKEN_MESSAGE.to_owned(),
			})
		}
	}
}

/// Parse the free-form `status` filter string against the known status
/// names, case-insensitively. An empty or unrecognized string means "all
/// statuses" rather than an error: the filter is advisory, not validated
/// wire input.
fn parse_status_filter(status: &str) -> Option<JobStatus> {
	match status.to_ascii_lowercase().as_str() {
		"queued" => Some(JobStatus::Queued),
		"running" => Some(JobStatus::Running),
		"paused" => Some(JobStatus::Paused),
		"completed" => Some(JobStatus::Completed),
		"failed" => Some(JobStatus::Failed),
		"cancelled" | "canceled" => Some(JobStatus::Cancelled),
		_ => None,
	}
}

#[tonic::async_trait]
impl QueueServiceTrait for QueueService {
	async fn enqueue(&self, request: Request<EnqueueRequest>) -> Result<Response<EnqueueResponse>, Status> {
		let request = request.into_inner();
		if let Some(result) = self.check(&request.token) {
			return Ok(Response::new(EnqueueResponse {
				result: Some(result),
				job_id: String::new(),
			}));
		}

		let Some(job) = request.job else {
			return Ok(Response::new(EnqueueResponse {
				result: Some(CallbackResult {
					success: false,
					message: "missing job".to_owned(),
				}),
				job_id: String::new(),
			}));
		};

		let job = match Job::try_from(job) {
			Ok(job) => job,
			Err(e) => {
				return Ok(Response::new(EnqueueResponse {
					result: Some(CallbackResult {
						success: false,
						message: e.to_string(),
					}),
					job_id: String::new(),
				}))
			}
		};

		match self.backend.enqueue(job).await {
			Ok(job_id) => Ok(Response::new(EnqueueResponse {
				result: Some(CallbackResult {
					success: true,
					message: String::new(),
				}),
				job_id,
			})),
			Err(message) => Ok(Response::new(EnqueueResponse {
				result: Some(CallbackResult { success: false, message }),
				job_id: String::new(),
			})),
		}
	}

	async fn get_job(&self, request: Request<GetJobRequest>) -> Result<Response<GetJobResponse>, Status> {
		let request = request.into_inner();
		if let Some(result) = self.check(&request.token) {
			return Ok(Response::new(GetJobResponse {
				result: Some(result),
				job: None,
			}));
		}

		match self.backend.get(&request.id).await {
			Some(job) => Ok(Response::new(GetJobResponse {
				result: Some(CallbackResult {
					success: true,
					message: String::new(),
				}),
				job: Some(job.into()),
			})),
			None => Ok(Response::new(GetJobResponse {
				result: Some(CallbackResult {
					success: false,
					message: format!("job '{}' not found", request.id),
				}),
				job: None,
			})),
		}
	}

	async fn update_job(&self, request: Request<UpdateJobRequest>) -> Result<Response<CallbackResult>, Status> {
		let request = request.into_inner();
		if let Some(result) = self.check(&request.token) {
			return Ok(Response::new(result));
		}

		let Some(job) = request.job else {
			return Ok(Response::new(CallbackResult {
				success: false,
				message: "missing job".to_owned(),
			}));
		};

		let job = match Job::try_from(job) {
			Ok(job) => job,
			Err(e) => {
				return Ok(Response::new(CallbackResult {
					success: false,
					message: e.to_string(),
				}))
			}
		};

		match self.backend.update(job).await {
			Ok(()) => Ok(Response::new(CallbackResult {
				success: true,
				message: String::new(),
			})),
			Err(message) => Ok(Response::new(CallbackResult { success: false, message })),
		}
	}

	async fn list_jobs(&self, request: Request<ListJobsRequest>) -> Result<Response<ListJobsResponse>, Status> {
		let request = request.into_inner();
		if let Some(result) = self.check(&request.token) {
			return Ok(Response::new(ListJobsResponse {
				result: Some(result),
				jobs: Vec::new(),
			}));
		}

		let status = if request.status.is_empty() {
			None
		} else {
			parse_status_filter(&request.status)
		};
		let limit = if request.limit == 0 {
			DEFAULT_LIST_JOBS_LIMIT
		} else {
			request.limit
		};

		let jobs = self.backend.list(status, limit).await;
		Ok(Response::new(ListJobsResponse {
			result: Some(CallbackResult {
				success: true,
				message: String::new(),
			}),
			jobs: jobs.into_iter().map(Into::into).collect(),
		}))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::callback::backend::InMemoryJobQueue;
	use qntx_plugin_proto::proto;

	fn service() -> (QueueService, CallbackToken) {
		let token = CallbackToken::generate();
		(QueueService::new(InMemoryJobQueue::new(), token.clone()), token)
	}

	fn wire_job(id: &str) -> proto::Job {
		proto::Job {
			id: id.to_owned(),
			handler: "h".to_owned(),
			payload: vec![],
			source: "test".to_owned(),
			status: proto::JobStatus::Queued as i32,
			progress_current: 0,
			progress_total: 0,
			cost_estimate: 0.0,
			cost_actual: 0.0,
			pulse_state: None,
			error: String::new(),
			parent_job_id: String::new(),
			retry_count: 0,
			created_at_millis: 0,
			started_at_millis: None,
			completed_at_millis: None,
		}
	}

	#[tokio::test]
	async fn enqueue_assigns_job_id() {
		let (service, token) = service();
		let response = service
			.enqueue(Request::new(EnqueueRequest {
				token: token.as_str().to_owned(),
				job: Some(wire_job("")),
			}))
			.await
			.unwrap()
			.into_inner();
		assert!(response.result.unwrap().success);
		assert!(!response.job_id.is_empty());
	}

	#[tokio::test]
	async fn get_job_missing_reports_failure_without_transport_error() {
		let (service, token) = service();
		let response = service
			.get_job(Request::new(GetJobRequest {
				token: token.as_str().to_owned(),
				id: "missing".to_owned(),
			}))
			.await
			.unwrap()
			.into_inner();
		assert!(!response.result.unwrap().success);
	}

	#[tokio::test]
	async fn list_jobs_defaults_limit_to_100_when_zero() {
		let (service, token) = service();
		service
			.enqueue(Request::new(EnqueueRequest {
				token: token.as_str().to_owned(),
				job: Some(wire_job("j1")),
			}))
			.await
			.unwrap();

		let response = service
			.list_jobs(Request::new(ListJobsRequest {
				token: token.as_str().to_owned(),
				status: String::new(),
				limit: 0,
			}))
			.await
			.unwrap()
			.into_inner();
		assert!(response.result.unwrap().success);
		assert_eq!(response.jobs.len(), 1);
	}

	#[tokio::test]
	async fn rejects_wrong_token_on_update() {
		let (service, _token) = service();
		let response = service
			.update_job(Request::new(UpdateJobRequest {
				token: "wrong".to_owned(),
				job: Some(wire_job("j1")),
			}))
			.await
			.unwrap()
			.into_inner();
		assert!(!response.success);
		assert_eq!(response.message, INVALID_TOKEN_MESSAGE);
	}
}
