// SPDX-License-Identifier: Apache-2.0

//! The `AttestationStoreService` callback (§4.4): a plugin dials back into
//! this to record or query attestations. Every RPC is token-guarded; an
//! invalid token is reported through `CallbackResult.success = false`, never
//! a gRPC `Status` error, so a misbehaving plugin cannot distinguish "bad
//! token" from "bad request" by transport-level signal alone.

use std::sync::Arc;
use tonic::{Request, Response, Status};

use qntx_plugin_proto::proto::attestation_store_service_server::AttestationStoreService as AttestationStoreServiceTrait;
use qntx_plugin_proto::proto::{
	AttestationExistsRequest, AttestationExistsResponse, CallbackResult, CreateAttestationRequest,
	CreateAttestationResponse, GenerateAndCreateAttestationRequest, GenerateAndCreateAttestationResponse,
	GetAttestationsRequest, GetAttestationsResponse,
};
use qntx_plugin_proto::types::{Attestation, AttestationCommand, AttestationFilter};

use crate::callback::auth::{CallbackToken, INVALID_TOKEN_MESSAGE};
use crate::callback::backend::AttestationBackend;

pub struct AttestationStoreService {
	backend: Arc<dyn AttestationBackend>,
	token: CallbackToken,
}

impl AttestationStoreService {
	pub fn new(backend: Arc<dyn AttestationBackend>, token: CallbackToken) -> Self {
		AttestationStoreService { backend, token }
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

#[tonic::async_trait]
impl AttestationStoreServiceTrait for AttestationStoreService {
	async fn create_attestation(
		&self,
		request: Request<CreateAttestationRequest>,
	) -> Result<Response<CreateAttestationResponse>, Status> {
		let request = request.into_inner();
		if let Some(result) = self.check(&request.token) {
			return Ok(Response::new(CreateAttestationResponse { result: Some(result) }));
		}

		let Some(attestation) = request.attestation else {
			return Ok(Response::new(CreateAttestationResponse {
				result: Some(CallbackResult {
					success: false,
					message: "missing attestation".to_owned(),
				}),
			}));
		};

		let result = match self.backend.create(Attestation::from(attestation)).await {
			Ok(()) => CallbackResult {
				success: true,
				message: String::new(),
			},
			Err(message) => CallbackResult { success: false, message },
		};
		Ok(Response::new(CreateAttestationResponse { result: Some(result) }))
	}

	async fn attestation_exists(
		&self,
		request: Request<AttestationExistsRequest>,
	) -> Result<Response<AttestationExistsResponse>, Status> {
		let request = request.into_inner();
		if let Some(result) = self.check(&request.token) {
			return Ok(Response::new(AttestationExistsResponse {
				result: Some(result),
				exists: false,
			}));
		}

		let exists = self.backend.exists(&request.id).await;
		Ok(Response::new(AttestationExistsResponse {
			result: Some(CallbackResult {
				success: true,
				message: String::new(),
			}),
			exists,
		}))
	}

	async fn generate_and_create_attestation(
		&self,
		request: Request<GenerateAndCreateAttestationRequest>,
	) -> Result<Response<GenerateAndCreateAttestationResponse>, Status> {
		let request = request.into_inner();
		if let Some(result) = self.check(&request.token) {
			return Ok(Response::new(GenerateAndCreateAttestationResponse {
				result: Some(result),
				attestation: None,
			}));
		}

		let Some(command) = request.command else {
			return Ok(Response::new(GenerateAndCreateAttestationResponse {
				result: Some(CallbackResult {
					success: false,
					message: "missing command".to_owned(),
				}),
				attestation: None,
			}));
		};

		match self.backend.generate_and_create(AttestationCommand::from(command)).await {
			Ok(attestation) => Ok(Response::new(GenerateAndCreateAttestationResponse {
				result: Some(CallbackResult {
					success: true,
					message: String::new(),
				}),
				attestation: Some(attestation.into()),
			})),
			Err(message) => Ok(Response::new(GenerateAndCreateAttestationResponse {
				result: Some(CallbackResult { success: false, message }),
				attestation: None,
			})),
		}
	}

	async fn get_attestations(
		&self,
		request: Request<GetAttestationsRequest>,
	) -> Result<Response<GetAttestationsResponse>, Status> {
		let request = request.into_inner();
		if let Some(result) = self.check(&request.token) {
			return Ok(Response::new(GetAttestationsResponse {
				result: Some(result),
				attestations: Vec::new(),
			}));
		}

		let filter = request.filter.map(AttestationFilter::from).unwrap_or_default();
		let attestations = self.backend.query(filter).await;
		Ok(Response::new(GetAttestationsResponse {
			result: Some(CallbackResult {
				success: true,
				message: String::new(),
			}),
			attestations: attestations.into_iter().map(Into::into).collect(),
		}))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::callback::backend::InMemoryAttestationStore;

	fn service() -> (AttestationStoreService, CallbackToken) {
		let token = CallbackToken::generate();
		(AttestationStoreService::new(InMemoryAttestationStore::new(), token.clone()), token)
	}

	#[tokio::test]
	async fn rejects_wrong_token_without_transport_error() {
		let (service, _token) = service();
		let response = service
			.create_attestation(Request::new(CreateAttestationRequest {
				token: "wrong".to_owned(),
				attestation: None,
			}))
			.await
			.unwrap()
			.into_inner();
		let result = response.result.unwrap();
		assert!(!result.success);
		assert_eq!(result.message, INVALID_TOKEN_MESSAGE);
	}

	#[tokio::test]
	async fn create_then_exists_round_trips() {
		let (service, token) = service();
		let attestation = qntx_plugin_proto::proto::Attestation {
			id: "a1".to_owned(),
			subjects: vec![],
			predicates: vec![],
			contexts: vec![],
			actors: vec!["alice".to_owned()],
			timestamp_millis: 1,
			source: "test".to_owned(),
			attributes: None,
			created_at_millis: 1,
			signature: None,
			signer: None,
		};
		let response = service
			.create_attestation(Request::new(CreateAttestationRequest {
				token: token.as_str().to_owned(),
				attestation: Some(attestation),
			}))
			.await
			.unwrap()
			.into_inner();
		assert!(response.result.unwrap().success);

		let exists = service
			.attestation_exists(Request::new(AttestationExistsRequest {
				token: token.as_str().to_owned(),
				id: "a1".to_owned(),
			}))
			.await
			.unwrap()
			.into_inner();
		assert!(exists.exists);
	}

	#[tokio::test]
	async fn generate_and_create_assigns_id_and_is_queryable() {
		let (service, token) = service();
		let command = qntx_plugin_proto::proto::AttestationCommand {
			subjects: vec![],
			predicates: vec![],
			contexts: vec![],
			actors: vec!["bob".to_owned()],
			timestamp_millis: 5,
			source: "test".to_owned(),
			attributes: None,
			signature: None,
			signer: None,
		};
		let response = service
			.generate_and_create_attestation(Request::new(GenerateAndCreateAttestationRequest {
				token: token.as_str().to_owned(),
				command: Some(command),
			}))
			.await
			.unwrap()
			.into_inner();
		let result = response.result.unwrap();
		assert!(result.success);
		assert!(!response.attestation.unwrap().id.is_empty());
	}

	#[tokio::test]
	async fn get_attestations_with_no_match_returns_success_and_empty() {
		let (service, token) = service();
		let response = service
			.get_attestations(Request::new(GetAttestationsRequest {
				token: token.as_str().to_owned(),
				filter: None,
			}))
			.await
			.unwrap()
			.into_inner();
		assert!(response.result.unwrap().success);
		assert!(response.attestations.is_empty());
	}
}
