// SPDX-License-Identifier: Apache-2.0

//! The host collaborators the callback services front: an attestation store
//! and a job queue. Per §1's Non-goals, the actual database engine and job
//! execution engine are external collaborators; these traits are the seam
//! the callback services program against, and the in-memory implementations
//! below exist only to make the subsystem runnable standalone (demos,
//! integration tests) without a real backing store.

use qntx_plugin_proto::types::{Attestation, AttestationCommand, AttestationFilter, Job, JobStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

fn now_millis() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_millis() as i64
}

#[tonic::async_trait]
pub trait AttestationBackend: Send + Sync {
	async fn create(&self, attestation: Attestation) -> Result<(), String>;
	async fn exists(&self, id: &str) -> bool;
	async fn generate_and_create(&self, command: AttestationCommand) -> Result<Attestation, String>;
	async fn query(&self, filter: AttestationFilter) -> Vec<Attestation>;
}

#[tonic::async_trait]
pub trait JobBackend: Send + Sync {
	async fn enqueue(&self, job: Job) -> Result<String, String>;
	async fn get(&self, id: &str) -> Option<Job>;
	async fn update(&self, job: Job) -> Result<(), String>;
	async fn list(&self, status: Option<JobStatus>, limit: u32) -> Vec<Job>;
}

/// A simple append-and-scan attestation store. Real deployments front an
/// actual database; this exists for the demo plugin and integration tests.
#[derive(Default)]
pub struct InMemoryAttestationStore {
	attestations: RwLock<HashMap<String, Attestation>>,
	next_id: AtomicU64,
}

impl InMemoryAttestationStore {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	fn generate_id(&self) -> String {
		let n = self.next_id.fetch_add(1, Ordering::Relaxed);
		format!("att-{n:016x}")
	}
}

#[tonic::async_trait]
impl AttestationBackend for InMemoryAttestationStore {
	async fn create(&self, attestation: Attestation) -> Result<(), String> {
		let mut guard = self.attestations.write().await;
		guard.insert(attestation.id.clone(), attestation);
		Ok(())
	}

	async fn exists(&self, id: &str) -> bool {
		self.attestations.read().await.contains_key(id)
	}

	async fn generate_and_create(&self, command: AttestationCommand) -> Result<Attestation, String> {
		let id = self.generate_id();
		let attestation = command.into_attestation(id, now_millis());
		self.attestations
			.write()
			.await
			.insert(attestation.id.clone(), attestation.clone());
		Ok(attestation)
	}

	async fn query(&self, filter: AttestationFilter) -> Vec<Attestation> {
		let guard = self.attestations.read().await;
		let mut matched: Vec<Attestation> = guard
			.values()
			.filter(|a| matches_filter(a, &filter))
			.cloned()
			.collect();
		matched.sort_by_key(|a| a.timestamp_millis);
		if let Some(limit) = filter.limit {
			matched.truncate(limit as usize);
		}
		matched
	}
}

fn matches_filter(attestation: &Attestation, filter: &AttestationFilter) -> bool {
	fn any_overlap(wanted: &[String], have: &[String]) -> bool {
		wanted.is_empty() || wanted.iter().any(|w| have.contains(w))
	}

	if !any_overlap(&filter.actors, &attestation.actors) {
		return false;
	}
	if !any_overlap(&filter.subjects, &attestation.subjects) {
		return false;
	}
	if !any_overlap(&filter.predicates, &attestation.predicates) {
		return false;
	}
	if !any_overlap(&filter.contexts, &attestation.contexts) {
		return false;
	}
	if let Some(start) = filter.time_start_millis {
		if attestation.timestamp_millis < start {
			return false;
		}
	}
	if let Some(end) = filter.time_end_millis {
		if attestation.timestamp_millis > end {
			return false;
		}
	}
	true
}

/// A simple in-memory job queue, FIFO per caller, with full-record updates.
#[derive(Default)]
pub struct InMemoryJobQueue {
	jobs: RwLock<HashMap<String, Job>>,
	next_id: AtomicU64,
}

impl InMemoryJobQueue {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	fn generate_id(&self) -> String {
		let n = self.next_id.fetch_add(1, Ordering::Relaxed);
		format!("job-{n:016x}")
	}
}

#[tonic::async_trait]
impl JobBackend for InMemoryJobQueue {
	async fn enqueue(&self, mut job: Job) -> Result<String, String> {
		if job.id.is_empty() {
			job.id = self.generate_id();
		}
		if job.created_at_millis == 0 {
			job.created_at_millis = now_millis();
		}
		let id = job.id.clone();
		self.jobs.write().await.insert(id.clone(), job);
		Ok(id)
	}

	async fn get(&self, id: &str) -> Option<Job> {
		self.jobs.read().await.get(id).cloned()
	}

	async fn update(&self, job: Job) -> Result<(), String> {
		let mut guard = self.jobs.write().await;
		if !guard.contains_key(&job.id) {
			return Err(format!("job '{}' not found", job.id));
		}
		guard.insert(job.id.clone(), job);
		Ok(())
	}

	async fn list(&self, status: Option<JobStatus>, limit: u32) -> Vec<Job> {
		let guard = self.jobs.read().await;
		let mut jobs: Vec<Job> = guard
			.values()
			.filter(|j| status.map(|s| j.status == s).unwrap_or(true))
			.cloned()
			.collect();
		jobs.sort_by_key(|j| j.created_at_millis);
		jobs.truncate(limit as usize);
		jobs
	}
}

/// Default limit applied to `ListJobs` when the caller leaves it unset or
/// zero.
pub const DEFAULT_LIST_JOBS_LIMIT: u32 = 100;

#[cfg(test)]
mod tests {
	use super::*;

	fn attestation(id: &str, actor: &str, ts: i64) -> Attestation {
		Attestation {
			id: id.to_owned(),
			subjects: vec![],
			predicates: vec![],
			contexts: vec![],
			actors: vec![actor.to_owned()],
			timestamp_millis: ts,
			source: "test".to_owned(),
			attributes: serde_json::json!({}),
			created_at_millis: ts,
			signature: None,
			signer: None,
		}
	}

	#[tokio::test]
	async fn create_then_exists() {
		let store = InMemoryAttestationStore::new();
		store.create(attestation("a1", "alice", 100)).await.unwrap();
		assert!(store.exists("a1").await);
		assert!(!store.exists("a2").await);
	}

	#[tokio::test]
	async fn generate_and_create_assigns_id() {
		let store = InMemoryAttestationStore::new();
		let command = AttestationCommand {
			subjects: vec![],
			predicates: vec![],
			contexts: vec![],
			actors: vec!["bob".to_owned()],
			timestamp_millis: 1,
			source: "test".to_owned(),
			attributes: serde_json::json!({}),
			signature: None,
			signer: None,
		};
		let created = store.generate_and_create(command).await.unwrap();
		assert!(!created.id.is_empty());
		assert!(store.exists(&created.id).await);
	}

	#[tokio::test]
	async fn query_honors_actor_filter_and_limit() {
		let store = InMemoryAttestationStore::new();
		store.create(attestation("a1", "alice", 1)).await.unwrap();
		store.create(attestation("a2", "bob", 2)).await.unwrap();
		store.create(attestation("a3", "alice", 3)).await.unwrap();

		let filter = AttestationFilter {
			actors: vec!["alice".to_owned()],
			limit: Some(1),
			..Default::default()
		};
		let results = store.query(filter).await;
		assert_eq!(results.len(), 1);
		assert_eq!(results[0].id, "a1");
	}

	#[tokio::test]
	async fn query_with_no_match_returns_empty_not_error() {
		let store = InMemoryAttestationStore::new();
		let filter = AttestationFilter {
			actors: vec!["nobody".to_owned()],
			..Default::default()
		};
		assert!(store.query(filter).await.is_empty());
	}

	fn job(id: &str, status: JobStatus) -> Job {
		Job {
			id: id.to_owned(),
			handler: "h".to_owned(),
			payload: vec![],
			source: "test".to_owned(),
			status,
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
	async fn enqueue_assigns_id_when_absent() {
		let queue = InMemoryJobQueue::new();
		let id = queue.enqueue(job("", JobStatus::Queued)).await.unwrap();
		assert!(!id.is_empty());
		assert!(queue.get(&id).await.is_some());
	}

	#[tokio::test]
	async fn update_requires_existing_job() {
		let queue = InMemoryJobQueue::new();
		let result = queue.update(job("missing", JobStatus::Running)).await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn list_jobs_filters_by_status() {
		let queue = InMemoryJobQueue::new();
		queue.enqueue(job("j1", JobStatus::Queued)).await.unwrap();
		queue.enqueue(job("j2", JobStatus::Running)).await.unwrap();

		let running = queue.list(Some(JobStatus::Running), DEFAULT_LIST_JOBS_LIMIT).await;
		assert_eq!(running.len(), 1);
		assert_eq!(running[0].id, "j2");
	}
}
