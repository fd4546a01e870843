// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Trims the scheduler's own run history.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use infra_server_db::JobRepository;
use infra_server_jobs::{Job, JobContext, JobError, JobOutput};
use tracing::{debug, instrument};

/// Finished runs older than this are deleted.
pub const JOB_RUN_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub const JOB_HISTORY_GC_INTERVAL: Duration = Duration::from_secs(60 * 60);

pub struct JobHistoryGcJob {
	jobs: JobRepository,
	retention: chrono::Duration,
}

impl JobHistoryGcJob {
	pub fn new(jobs: JobRepository, retention: Duration) -> Self {
		Self {
			jobs,
			retention: chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(36_500)),
		}
	}
}

#[async_trait]
impl Job for JobHistoryGcJob {
	fn id(&self) -> &str {
		"job-history-gc"
	}

	fn name(&self) -> &str {
		"Job History GC"
	}

	fn description(&self) -> &str {
		"Delete finished job runs past the retention window"
	}

	#[instrument(skip(self, ctx), fields(job_id = "job-history-gc"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let before = Utc::now()
			.checked_sub_signed(self.retention)
			.unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
		let deleted = self.jobs.delete_old_runs(before).await?;
		debug!(deleted, "job runs collected");

		Ok(JobOutput::new(format!("deleted {deleted} job runs"))
			.with_metadata(serde_json::json!({ "deleted": deleted })))
	}
}
