// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use infra_server_jobs::{Job, JobContext, JobError, JobOutput};
use tracing::instrument;

use crate::sync::ProviderSync;

pub const PROVIDER_SYNC_JOB_ID: &str = "provider-sync";

pub struct ProviderSyncJob {
	sync: Arc<ProviderSync>,
}

impl ProviderSyncJob {
	pub fn new(sync: Arc<ProviderSync>) -> Self {
		Self { sync }
	}
}

#[async_trait]
impl Job for ProviderSyncJob {
	fn id(&self) -> &str {
		PROVIDER_SYNC_JOB_ID
	}

	fn name(&self) -> &str {
		"Provider Sync"
	}

	fn description(&self) -> &str {
		"Mirror users and groups from every identity provider"
	}

	#[instrument(skip(self, ctx), fields(job_id = PROVIDER_SYNC_JOB_ID))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let report = self
			.sync
			.sync_all(&ctx.cancellation_token)
			.await
			.map_err(|e| JobError::retryable(format!("listing providers: {e}")))?;
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let message = format!("synced {} providers, {} failed", report.synced, report.failed.len());
		let output = JobOutput::new(message).with_metadata(serde_json::json!({
			"synced": report.synced,
			"failed": report.failed,
		}));
		// peers already ran; a partial failure marks the run without retrying it
		if !report.failed.is_empty() && report.synced == 0 {
			return Err(JobError::fatal(format!(
				"every provider failed to sync: {}",
				report.failed.join(", ")
			)));
		}
		Ok(output)
	}
}
