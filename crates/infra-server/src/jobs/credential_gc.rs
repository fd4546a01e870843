// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Expires credential requests nobody answered and deletes old ones.

use async_trait::async_trait;
use chrono::Utc;
use infra_server_db::CredentialRequestRepository;
use infra_server_jobs::{Job, JobContext, JobError, JobOutput};
use tracing::{debug, instrument};

pub struct CredentialGcJob {
	requests: CredentialRequestRepository,
	/// How long a closed request stays readable after its expiry.
	retention: chrono::Duration,
}

impl CredentialGcJob {
	pub fn new(requests: CredentialRequestRepository, retention: std::time::Duration) -> Self {
		Self {
			requests,
			retention: chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(36_500)),
		}
	}
}

#[async_trait]
impl Job for CredentialGcJob {
	fn id(&self) -> &str {
		"credential-gc"
	}

	fn name(&self) -> &str {
		"Credential Request GC"
	}

	fn description(&self) -> &str {
		"Expire open credential requests past their deadline and delete old closed ones"
	}

	#[instrument(skip(self, ctx), fields(job_id = "credential-gc"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let now = Utc::now();
		let expired = self.requests.expire_open_requests(now).await?;
		let before = now.checked_sub_signed(self.retention).unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
		let deleted = self.requests.delete_expired_requests(before).await?;
		debug!(expired, deleted, "credential requests collected");

		Ok(JobOutput::new(format!("expired {expired}, deleted {deleted} credential requests"))
			.with_metadata(serde_json::json!({ "expired": expired, "deleted": deleted })))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use infra_server_api::{CredentialRequestStatus, Id};
	use infra_server_db::testing;
	use infra_server_jobs::{CancellationToken, TriggerSource};

	fn ctx() -> JobContext {
		JobContext {
			run_id: "run".into(),
			triggered_by: TriggerSource::Schedule,
			cancellation_token: CancellationToken::new(),
		}
	}

	#[tokio::test]
	async fn open_requests_past_expiry_are_expired_then_deleted() {
		let store = testing::create_test_store().await;
		let requests = &store.credential_requests;
		let past = Utc::now() - chrono::Duration::minutes(5);
		let stale = requests.create_request(Id::generate(), Id::generate(), "c1", past).await.unwrap();
		let live = requests
			.create_request(Id::generate(), Id::generate(), "c1", Utc::now() + chrono::Duration::minutes(2))
			.await
			.unwrap();

		// long retention: expired, still readable
		let job = CredentialGcJob::new(requests.clone(), std::time::Duration::from_secs(3600));
		job.run(&ctx()).await.unwrap();
		let read = requests.get_request(stale.id).await.unwrap().unwrap();
		assert_eq!(read.status, CredentialRequestStatus::Expired);
		assert_eq!(
			requests.get_request(live.id).await.unwrap().unwrap().status,
			CredentialRequestStatus::Open
		);

		// no retention: gone
		let job = CredentialGcJob::new(requests.clone(), std::time::Duration::ZERO);
		job.run(&ctx()).await.unwrap();
		assert!(requests.get_request(stale.id).await.unwrap().is_none());
		assert!(requests.get_request(live.id).await.unwrap().is_some());
	}
}
