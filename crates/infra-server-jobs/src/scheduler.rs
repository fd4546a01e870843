// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::context::{CancellationToken, JobContext};
use crate::error::{JobError, Result};
use crate::health::{determine_health_state, HealthState, JobHealthStatus, JobsHealthStatus};
use crate::job::Job;
use crate::types::{JobDefinition, JobRun, JobStatus, JobType, TriggerSource};
use chrono::Utc;
use infra_server_api::Id;
use infra_server_db::JobRepository;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Delay between attempts of a retryable failure: `base * factor^(n-1)`,
/// capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub base: Duration,
	pub max: Duration,
	pub factor: f64,
	pub max_retries: u32,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			base: Duration::from_secs(1),
			max: Duration::from_secs(60),
			factor: 2.0,
			max_retries: 3,
		}
	}
}

impl RetryPolicy {
	pub(crate) fn delay(&self, retry_count: u32) -> Duration {
		let exponent = retry_count.saturating_sub(1).min(63) as i32;
		let secs = self.base.as_secs_f64() * self.factor.powi(exponent);
		Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
	}
}

struct RegisteredJob {
	job: Arc<dyn Job>,
	job_type: JobType,
	cancellation_token: CancellationToken,
}

pub struct JobScheduler {
	jobs: BTreeMap<String, RegisteredJob>,
	repository: JobRepository,
	retry: RetryPolicy,
	shutdown: CancellationToken,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
	pub fn new(repository: JobRepository) -> Self {
		Self {
			jobs: BTreeMap::new(),
			repository,
			retry: RetryPolicy::default(),
			shutdown: CancellationToken::new(),
			handles: Mutex::new(Vec::new()),
		}
	}

	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;
		self
	}

	fn register(&mut self, job: Arc<dyn Job>, job_type: JobType) {
		let id = job.id().to_string();
		self.jobs.insert(
			id,
			RegisteredJob {
				job,
				job_type,
				cancellation_token: self.shutdown.child_token(),
			},
		);
	}

	pub fn register_periodic(&mut self, job: Arc<dyn Job>, interval: Duration) {
		self.register(job, JobType::Periodic { interval });
	}

	pub fn register_one_shot(&mut self, job: Arc<dyn Job>) {
		self.register(job, JobType::OneShot);
	}

	/// Records every definition and spawns one loop per periodic job. The
	/// first scheduled run happens one interval after start.
	#[instrument(skip(self))]
	pub async fn start(&self) -> Result<()> {
		let mut handles = self.handles.lock().await;

		for (job_id, registered) in &self.jobs {
			let def = JobDefinition {
				id: job_id.clone(),
				name: registered.job.name().to_string(),
				description: registered.job.description().to_string(),
				interval_secs: match &registered.job_type {
					JobType::Periodic { interval } => Some(interval.as_secs() as i64),
					JobType::OneShot => None,
				},
				enabled: true,
			};
			self.repository.upsert_definition(&def).await?;

			if let JobType::Periodic { interval } = registered.job_type {
				let job = Arc::clone(&registered.job);
				let repository = self.repository.clone();
				let retry = self.retry;
				let shutdown = self.shutdown.clone();
				let cancellation_token = registered.cancellation_token.clone();
				let job_id = job_id.clone();

				let handle = tokio::spawn(async move {
					let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
					ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
					loop {
						tokio::select! {
							_ = ticker.tick() => {
								if cancellation_token.is_cancelled() {
									continue;
								}
								let _ = run_job_with_retry(
									&job,
									&repository,
									retry,
									TriggerSource::Schedule,
									&cancellation_token,
								)
								.await;
							}
							_ = shutdown.cancelled() => {
								info!(job_id = %job_id, "shutting down periodic job");
								break;
							}
						}
					}
				});

				handles.push(handle);
			}
		}

		info!(job_count = handles.len(), "job scheduler started");
		Ok(())
	}

	/// Runs a job now, outside its schedule, and waits for it to finish.
	#[instrument(skip(self))]
	pub async fn trigger_job(&self, job_id: &str, triggered_by: TriggerSource) -> Result<String> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		run_job_with_retry(
			&registered.job,
			&self.repository,
			self.retry,
			triggered_by,
			&registered.cancellation_token,
		)
		.await
	}

	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.shutdown.cancel();

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}

		info!("job scheduler shut down");
	}

	#[instrument(skip(self))]
	pub async fn job_status(&self, job_id: &str) -> Option<JobHealthStatus> {
		let registered = self.jobs.get(job_id)?;

		let last_run = self.repository.get_last_run(job_id).await.ok().flatten();
		let consecutive_failures = self
			.repository
			.count_consecutive_failures(job_id)
			.await
			.unwrap_or(0);

		Some(JobHealthStatus {
			job_id: job_id.to_string(),
			name: registered.job.name().to_string(),
			status: determine_health_state(last_run.as_ref(), consecutive_failures),
			last_run: last_run.map(Into::into),
			consecutive_failures,
		})
	}

	#[instrument(skip(self))]
	pub async fn health_status(&self) -> JobsHealthStatus {
		let mut jobs = Vec::new();
		let mut worst_state = HealthState::Healthy;

		for job_id in self.jobs.keys() {
			if let Some(status) = self.job_status(job_id).await {
				worst_state = worst_state.max(status.status);
				jobs.push(status);
			}
		}

		JobsHealthStatus {
			status: worst_state,
			jobs,
		}
	}
}

async fn run_job_with_retry(
	job: &Arc<dyn Job>,
	repository: &JobRepository,
	retry: RetryPolicy,
	triggered_by: TriggerSource,
	cancellation_token: &CancellationToken,
) -> Result<String> {
	let mut retry_count = 0u32;
	let run_id = Id::generate().to_string();

	loop {
		let ctx = JobContext {
			run_id: run_id.clone(),
			triggered_by: if retry_count > 0 {
				TriggerSource::Retry
			} else {
				triggered_by
			},
			cancellation_token: cancellation_token.clone(),
		};

		if retry_count == 0 {
			let run = JobRun {
				id: run_id.clone(),
				job_id: job.id().to_string(),
				status: JobStatus::Running,
				started_at: Utc::now(),
				completed_at: None,
				duration_ms: None,
				error_message: None,
				retry_count,
				triggered_by: ctx.triggered_by,
				metadata: None,
			};
			repository.record_run_start(&run).await?;
		}

		match job.run(&ctx).await {
			Ok(output) => {
				repository
					.record_run_complete(&run_id, JobStatus::Succeeded, None, output.metadata)
					.await?;
				info!(job_id = %job.id(), run_id = %run_id, message = %output.message, "job completed");
				return Ok(run_id);
			}
			Err(JobError::Cancelled) => {
				repository
					.record_run_complete(&run_id, JobStatus::Cancelled, None, None)
					.await?;
				info!(job_id = %job.id(), run_id = %run_id, "job cancelled");
				return Err(JobError::Cancelled);
			}
			Err(JobError::Failed { message, retryable }) => {
				if retryable && retry_count < retry.max_retries && !cancellation_token.is_cancelled() {
					retry_count += 1;
					let delay = retry.delay(retry_count);
					warn!(
						job_id = %job.id(),
						run_id = %run_id,
						retry_count,
						delay_ms = delay.as_millis() as u64,
						error = %message,
						"job failed, retrying"
					);
					tokio::select! {
						_ = tokio::time::sleep(delay) => continue,
						_ = cancellation_token.cancelled() => {
							repository
								.record_run_complete(&run_id, JobStatus::Cancelled, Some(message), None)
								.await?;
							return Err(JobError::Cancelled);
						}
					}
				}

				repository
					.record_run_complete(&run_id, JobStatus::Failed, Some(message.clone()), None)
					.await?;
				warn!(job_id = %job.id(), run_id = %run_id, error = %message, "job failed");
				return Err(JobError::Failed { message, retryable });
			}
			Err(e) => {
				let message = e.to_string();
				repository
					.record_run_complete(&run_id, JobStatus::Failed, Some(message.clone()), None)
					.await?;
				warn!(job_id = %job.id(), run_id = %run_id, error = %message, "job failed with error");
				return Err(e);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::JobOutput;
	use async_trait::async_trait;
	use infra_server_db::testing::create_test_pool;
	use std::sync::atomic::{AtomicU32, Ordering};

	/// Fails `failures` times (retryable or not), then succeeds.
	struct CountingJob {
		id: String,
		failures: u32,
		retryable: bool,
		calls: AtomicU32,
	}

	impl CountingJob {
		fn new(id: &str, failures: u32, retryable: bool) -> Self {
			Self {
				id: id.to_string(),
				failures,
				retryable,
				calls: AtomicU32::new(0),
			}
		}

		fn calls(&self) -> u32 {
			self.calls.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl Job for CountingJob {
		fn id(&self) -> &str {
			&self.id
		}

		fn name(&self) -> &str {
			"Counting job"
		}

		fn description(&self) -> &str {
			"Fails a fixed number of times"
		}

		async fn run(&self, ctx: &JobContext) -> std::result::Result<JobOutput, JobError> {
			if ctx.is_cancelled() {
				return Err(JobError::Cancelled);
			}
			let n = self.calls.fetch_add(1, Ordering::SeqCst);
			if n < self.failures {
				return Err(JobError::Failed {
					message: format!("attempt {n} failed"),
					retryable: self.retryable,
				});
			}
			Ok(JobOutput::new("done"))
		}
	}

	fn fast_retry() -> RetryPolicy {
		RetryPolicy {
			base: Duration::from_millis(1),
			max: Duration::from_millis(5),
			factor: 2.0,
			max_retries: 3,
		}
	}

	async fn scheduler() -> JobScheduler {
		let pool = create_test_pool().await;
		JobScheduler::new(JobRepository::new(pool)).with_retry_policy(fast_retry())
	}

	#[test]
	fn default_backoff_doubles_and_caps() {
		let policy = RetryPolicy::default();
		assert_eq!(policy.delay(1), Duration::from_secs(1));
		assert_eq!(policy.delay(2), Duration::from_secs(2));
		assert_eq!(policy.delay(3), Duration::from_secs(4));
		assert_eq!(policy.delay(10), Duration::from_secs(60));
		assert_eq!(policy.delay(100), Duration::from_secs(60));
	}

	#[tokio::test]
	async fn register_lists_jobs_in_order() {
		let mut scheduler = scheduler().await;
		scheduler.register_periodic(Arc::new(CountingJob::new("b-sync", 0, false)), Duration::from_secs(60));
		scheduler.register_one_shot(Arc::new(CountingJob::new("a-import", 0, false)));
		let ids: Vec<String> = scheduler.health_status().await.jobs.into_iter().map(|j| j.job_id).collect();
		assert_eq!(ids, vec!["a-import".to_string(), "b-sync".to_string()]);
	}

	#[tokio::test]
	async fn trigger_unknown_job_is_not_found() {
		let scheduler = scheduler().await;
		match scheduler.trigger_job("missing", TriggerSource::Startup).await {
			Err(JobError::NotFound(id)) => assert_eq!(id, "missing"),
			other => panic!("expected NotFound, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn retryable_failure_is_retried_to_success() {
		let mut scheduler = scheduler().await;
		let job = Arc::new(CountingJob::new("sync", 2, true));
		scheduler.register_one_shot(job.clone());
		scheduler.start().await.unwrap();

		let run_id = scheduler.trigger_job("sync", TriggerSource::Startup).await.unwrap();
		assert_eq!(job.calls(), 3);

		let status = scheduler.job_status("sync").await.unwrap();
		assert_eq!(status.status, HealthState::Healthy);
		let last = status.last_run.unwrap();
		assert_eq!(last.run_id, run_id);
		assert_eq!(last.status, JobStatus::Succeeded);
	}

	#[tokio::test]
	async fn fatal_failure_is_recorded_without_retry() {
		let mut scheduler = scheduler().await;
		let job = Arc::new(CountingJob::new("import", 5, false));
		scheduler.register_one_shot(job.clone());
		scheduler.start().await.unwrap();

		let result = scheduler.trigger_job("import", TriggerSource::Reload).await;
		assert!(matches!(result, Err(JobError::Failed { retryable: false, .. })));
		assert_eq!(job.calls(), 1);

		let status = scheduler.job_status("import").await.unwrap();
		assert_eq!(status.status, HealthState::Degraded);
		assert_eq!(status.consecutive_failures, 1);
		assert_eq!(status.last_run.unwrap().error.as_deref(), Some("attempt 0 failed"));
	}

	#[tokio::test]
	async fn retries_are_bounded() {
		let mut scheduler = scheduler().await;
		let job = Arc::new(CountingJob::new("flaky", 100, true));
		scheduler.register_one_shot(job.clone());
		scheduler.start().await.unwrap();

		assert!(scheduler.trigger_job("flaky", TriggerSource::Schedule).await.is_err());
		assert_eq!(job.calls(), 4);
	}

	#[tokio::test]
	async fn repeated_failures_make_scheduler_unhealthy() {
		let mut scheduler = scheduler().await;
		scheduler.register_one_shot(Arc::new(CountingJob::new("broken", 100, false)));
		scheduler.register_one_shot(Arc::new(CountingJob::new("fine", 0, false)));
		scheduler.start().await.unwrap();

		for _ in 0..3 {
			let _ = scheduler.trigger_job("broken", TriggerSource::Schedule).await;
			tokio::time::sleep(Duration::from_millis(2)).await;
		}
		scheduler.trigger_job("fine", TriggerSource::Schedule).await.unwrap();

		let health = scheduler.health_status().await;
		assert_eq!(health.status, HealthState::Unhealthy);
		assert_eq!(health.jobs.len(), 2);
	}

	#[tokio::test]
	async fn runs_after_shutdown_report_cancelled() {
		let mut scheduler = scheduler().await;
		scheduler.register_one_shot(Arc::new(CountingJob::new("gc", 0, false)));
		scheduler.start().await.unwrap();
		scheduler.shutdown().await;

		let result = scheduler.trigger_job("gc", TriggerSource::Schedule).await;
		assert!(matches!(result, Err(JobError::Cancelled)));
		let status = scheduler.job_status("gc").await.unwrap();
		assert_eq!(status.last_run.unwrap().status, JobStatus::Cancelled);
	}

	#[tokio::test]
	async fn periodic_job_runs_and_stops_on_shutdown() {
		let mut scheduler = scheduler().await;
		let job = Arc::new(CountingJob::new("sweep", 0, false));
		scheduler.register_periodic(job.clone(), Duration::from_millis(20));
		scheduler.start().await.unwrap();

		tokio::time::sleep(Duration::from_millis(110)).await;
		scheduler.shutdown().await;
		let after_shutdown = job.calls();
		assert!(after_shutdown >= 2, "expected at least two runs, got {after_shutdown}");

		tokio::time::sleep(Duration::from_millis(60)).await;
		assert_eq!(job.calls(), after_shutdown);
	}
}
