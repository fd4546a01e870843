// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Removes destinations whose connector has gone quiet.

use async_trait::async_trait;
use chrono::Utc;
use infra_server_db::{DbError, DestinationRepository};
use infra_server_jobs::{Job, JobContext, JobError, JobOutput};
use tracing::{info, instrument, warn};

pub struct DestinationSweepJob {
	destinations: DestinationRepository,
	max_age: chrono::Duration,
}

impl DestinationSweepJob {
	pub fn new(destinations: DestinationRepository, max_age: std::time::Duration) -> Self {
		Self {
			destinations,
			max_age: chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(36_500)),
		}
	}
}

#[async_trait]
impl Job for DestinationSweepJob {
	fn id(&self) -> &str {
		"destination-sweep"
	}

	fn name(&self) -> &str {
		"Destination Sweep"
	}

	fn description(&self) -> &str {
		"Soft-delete destinations with no update or heartbeat within the max age"
	}

	#[instrument(skip(self, ctx), fields(job_id = "destination-sweep"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let cutoff = Utc::now()
			.checked_sub_signed(self.max_age)
			.unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
		let stale = self.destinations.list_stale_destinations(cutoff).await?;

		let mut removed = 0;
		for destination in stale {
			if ctx.is_cancelled() {
				return Err(JobError::Cancelled);
			}
			match self.destinations.soft_delete_destination(destination.id).await {
				Ok(()) => {
					info!(
						destination = %destination.spec.name,
						last_activity = %destination.last_activity(),
						"removed stale destination"
					);
					removed += 1;
				}
				// deleted through the API meanwhile
				Err(DbError::NotFound(_)) => {}
				Err(e) => warn!(destination = %destination.spec.name, error = %e, "failed to remove stale destination"),
			}
		}

		Ok(JobOutput::new(format!("removed {removed} stale destinations"))
			.with_metadata(serde_json::json!({ "removed": removed })))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use infra_server_db::{testing, DestinationSpec};
	use infra_server_jobs::{CancellationToken, TriggerSource};

	fn ctx() -> JobContext {
		JobContext {
			run_id: "run".into(),
			triggered_by: TriggerSource::Schedule,
			cancellation_token: CancellationToken::new(),
		}
	}

	fn spec(name: &str) -> DestinationSpec {
		DestinationSpec {
			name: name.into(),
			unique_id: format!("{name}-uid"),
			kind: "kubernetes".into(),
			connection_url: "10.0.0.1:6443".into(),
			connection_ca: String::new(),
			resources: vec![],
			roles: vec![],
			labels: vec![],
			version: "0.1.0".into(),
		}
	}

	#[tokio::test]
	async fn fresh_destinations_survive() {
		let store = testing::create_test_store().await;
		store.destinations.create_destination(&spec("c1")).await.unwrap();

		let job = DestinationSweepJob::new(store.destinations.clone(), std::time::Duration::from_secs(900));
		let output = job.run(&ctx()).await.unwrap();
		assert_eq!(output.message, "removed 0 stale destinations");
		assert!(store.destinations.get_destination_by_name("c1").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn zero_max_age_sweeps_everything() {
		let store = testing::create_test_store().await;
		store.destinations.create_destination(&spec("c1")).await.unwrap();
		tokio::time::sleep(std::time::Duration::from_millis(5)).await;

		let job = DestinationSweepJob::new(store.destinations.clone(), std::time::Duration::ZERO);
		job.run(&ctx()).await.unwrap();
		assert!(store.destinations.get_destination_by_name("c1").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn cancelled_run_stops() {
		let store = testing::create_test_store().await;
		let job = DestinationSweepJob::new(store.destinations.clone(), std::time::Duration::ZERO);
		let ctx = ctx();
		ctx.cancellation_token.cancel();
		assert!(matches!(job.run(&ctx).await, Err(JobError::Cancelled)));
	}
}
