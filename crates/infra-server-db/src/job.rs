// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::error::{DbError, Result};
use crate::types::{db_time, parse_opt_time, parse_time};

const RUN_COLUMNS: &str = "id, job_id, status, started_at, completed_at, duration_ms, error_message, retry_count, triggered_by, metadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	Running,
	Succeeded,
	Failed,
	Cancelled,
}

impl JobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobStatus::Running => "running",
			JobStatus::Succeeded => "succeeded",
			JobStatus::Failed => "failed",
			JobStatus::Cancelled => "cancelled",
		}
	}
}

impl std::str::FromStr for JobStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"running" => Ok(JobStatus::Running),
			"succeeded" => Ok(JobStatus::Succeeded),
			"failed" => Ok(JobStatus::Failed),
			"cancelled" => Ok(JobStatus::Cancelled),
			_ => Err(format!("unknown job status: {s}")),
		}
	}
}

/// What started a run. `Reload` is a SIGHUP-driven rerun of the importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
	Schedule,
	Startup,
	Reload,
	Retry,
}

impl TriggerSource {
	pub fn as_str(&self) -> &'static str {
		match self {
			TriggerSource::Schedule => "schedule",
			TriggerSource::Startup => "startup",
			TriggerSource::Reload => "reload",
			TriggerSource::Retry => "retry",
		}
	}
}

impl std::str::FromStr for TriggerSource {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"schedule" => Ok(TriggerSource::Schedule),
			"startup" => Ok(TriggerSource::Startup),
			"reload" => Ok(TriggerSource::Reload),
			"retry" => Ok(TriggerSource::Retry),
			_ => Err(format!("unknown trigger source: {s}")),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
	pub id: String,
	pub name: String,
	pub description: String,
	pub interval_secs: Option<i64>,
	pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
	pub id: String,
	pub job_id: String,
	pub status: JobStatus,
	pub started_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
	pub duration_ms: Option<i64>,
	pub error_message: Option<String>,
	pub retry_count: u32,
	pub triggered_by: TriggerSource,
	pub metadata: Option<serde_json::Value>,
}

/// Bookkeeping for the background job scheduler.
#[derive(Clone)]
pub struct JobRepository {
	pool: SqlitePool,
}

impl JobRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, def), fields(job_id = %def.id))]
	pub async fn upsert_definition(&self, def: &JobDefinition) -> Result<()> {
		let now = db_time(&Utc::now());
		sqlx::query(
			r#"
			INSERT INTO job_definitions (id, name, description, interval_secs, enabled, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?)
			ON CONFLICT(id) DO UPDATE SET
				name = excluded.name,
				description = excluded.description,
				interval_secs = excluded.interval_secs,
				enabled = excluded.enabled,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(&def.id)
		.bind(&def.name)
		.bind(&def.description)
		.bind(def.interval_secs)
		.bind(def.enabled)
		.bind(&now)
		.bind(&now)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self, run), fields(run_id = %run.id, job_id = %run.job_id))]
	pub async fn record_run_start(&self, run: &JobRun) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO job_runs (id, job_id, status, started_at, retry_count, triggered_by)
			VALUES (?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&run.id)
		.bind(&run.job_id)
		.bind(run.status.as_str())
		.bind(db_time(&run.started_at))
		.bind(run.retry_count as i64)
		.bind(run.triggered_by.as_str())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self, metadata))]
	pub async fn record_run_complete(
		&self,
		run_id: &str,
		status: JobStatus,
		error: Option<String>,
		metadata: Option<serde_json::Value>,
	) -> Result<()> {
		let now = Utc::now();
		let started: Option<String> =
			sqlx::query_scalar("SELECT started_at FROM job_runs WHERE id = ?")
				.bind(run_id)
				.fetch_optional(&self.pool)
				.await?;
		let Some(started) = started else {
			return Err(DbError::NotFound(format!("job run {run_id}")));
		};
		let duration_ms = (now - parse_time(&started)?).num_milliseconds();

		sqlx::query(
			r#"
			UPDATE job_runs
			SET status = ?, completed_at = ?, duration_ms = ?, error_message = ?, metadata = ?
			WHERE id = ?
			"#,
		)
		.bind(status.as_str())
		.bind(db_time(&now))
		.bind(duration_ms)
		.bind(error)
		.bind(metadata.map(|m| m.to_string()))
		.bind(run_id)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
		let row = sqlx::query(&format!(
			"SELECT {RUN_COLUMNS} FROM job_runs WHERE job_id = ? ORDER BY started_at DESC LIMIT 1"
		))
		.bind(job_id)
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(parse_run_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn count_consecutive_failures(&self, job_id: &str) -> Result<u32> {
		let statuses: Vec<String> = sqlx::query_scalar(
			"SELECT status FROM job_runs WHERE job_id = ? ORDER BY started_at DESC LIMIT 100",
		)
		.bind(job_id)
		.fetch_all(&self.pool)
		.await?;
		Ok(statuses.iter().take_while(|s| *s == "failed").count() as u32)
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_old_runs(&self, before: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query("DELETE FROM job_runs WHERE completed_at < ?")
			.bind(db_time(&before))
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}
}

fn parse_run_row(row: &SqliteRow) -> Result<JobRun> {
	let status: String = row.get("status");
	let triggered_by: String = row.get("triggered_by");
	let metadata: Option<String> = row.get("metadata");
	let retry_count: i64 = row.get("retry_count");
	Ok(JobRun {
		id: row.get("id"),
		job_id: row.get("job_id"),
		status: status.parse().map_err(DbError::Internal)?,
		started_at: parse_time(row.get("started_at"))?,
		completed_at: parse_opt_time(row.get("completed_at"))?,
		duration_ms: row.get("duration_ms"),
		error_message: row.get("error_message"),
		retry_count: retry_count as u32,
		triggered_by: triggered_by.parse().map_err(DbError::Internal)?,
		metadata: metadata.as_deref().and_then(|s| serde_json::from_str(s).ok()),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;

	fn definition(id: &str, name: &str) -> JobDefinition {
		JobDefinition {
			id: id.to_string(),
			name: name.to_string(),
			description: "test".to_string(),
			interval_secs: Some(60),
			enabled: true,
		}
	}

	fn run(id: &str, job_id: &str, started_at: DateTime<Utc>) -> JobRun {
		JobRun {
			id: id.to_string(),
			job_id: job_id.to_string(),
			status: JobStatus::Running,
			started_at,
			completed_at: None,
			duration_ms: None,
			error_message: None,
			retry_count: 0,
			triggered_by: TriggerSource::Schedule,
			metadata: None,
		}
	}

	#[tokio::test]
	async fn upsert_replaces_definition() {
		let repo = JobRepository::new(create_test_pool().await);
		repo.upsert_definition(&definition("sync", "Provider sync")).await.unwrap();
		repo.upsert_definition(&JobDefinition {
			enabled: false,
			..definition("sync", "Provider sync")
		})
		.await
		.unwrap();

		let enabled: Vec<bool> = sqlx::query_scalar("SELECT enabled FROM job_definitions")
			.fetch_all(&repo.pool)
			.await
			.unwrap();
		assert_eq!(enabled, vec![false]);
	}

	#[tokio::test]
	async fn run_lifecycle_and_failure_streak() {
		let repo = JobRepository::new(create_test_pool().await);
		repo.upsert_definition(&definition("gc", "GC")).await.unwrap();
		let base = Utc::now() - chrono::Duration::minutes(10);

		for (i, status) in [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Failed]
			.into_iter()
			.enumerate()
		{
			let id = format!("run-{i}");
			repo.record_run_start(&run(&id, "gc", base + chrono::Duration::minutes(i as i64)))
				.await
				.unwrap();
			repo.record_run_complete(&id, status, None, Some(serde_json::json!({"n": i})))
				.await
				.unwrap();
		}

		let last = repo.get_last_run("gc").await.unwrap().unwrap();
		assert_eq!(last.id, "run-2");
		assert_eq!(last.status, JobStatus::Failed);
		assert!(last.duration_ms.unwrap() >= 0);
		assert_eq!(last.metadata, Some(serde_json::json!({"n": 2})));
		assert_eq!(repo.count_consecutive_failures("gc").await.unwrap(), 2);

		let removed = repo
			.delete_old_runs(Utc::now() + chrono::Duration::minutes(1))
			.await
			.unwrap();
		assert_eq!(removed, 3);
		assert!(repo.get_last_run("gc").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn completing_unknown_run_is_not_found() {
		let repo = JobRepository::new(create_test_pool().await);
		let result = repo
			.record_run_complete("missing", JobStatus::Succeeded, None, None)
			.await;
		assert!(matches!(result, Err(DbError::NotFound(_))));
	}
}
