// SPDX-License-Identifier: Apache-2.0

//! The callback service plane (§4.4): two host-side gRPC services a plugin
//! dials back into, each guarded by the shared bearer token handed out at
//! `Initialize` time under the reserved `_auth_token` config key.

pub mod attestation;
pub mod auth;
pub mod backend;
pub mod queue;
pub mod services_manager;

pub use auth::CallbackToken;
pub use backend::{AttestationBackend, InMemoryAttestationStore, InMemoryJobQueue, JobBackend};
pub use services_manager::ServicesManager;
