// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Re-reads the import document. Triggered on SIGHUP; a failed reload is
//! recorded against the job and leaves the store as it was.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use infra_server_jobs::{Job, JobContext, JobError, JobOutput};
use tracing::{info, instrument};

use crate::importer::{ConfigImporter, ImportError};

pub const CONFIG_IMPORT_JOB_ID: &str = "config-import";

pub struct ConfigImportJob {
	importer: Arc<ConfigImporter>,
	path: PathBuf,
}

impl ConfigImportJob {
	pub fn new(importer: Arc<ConfigImporter>, path: PathBuf) -> Self {
		Self { importer, path }
	}
}

#[async_trait]
impl Job for ConfigImportJob {
	fn id(&self) -> &str {
		CONFIG_IMPORT_JOB_ID
	}

	fn name(&self) -> &str {
		"Config Import"
	}

	fn description(&self) -> &str {
		"Apply the providers, grants and users declared in the import file"
	}

	#[instrument(skip(self, ctx), fields(job_id = CONFIG_IMPORT_JOB_ID, path = %self.path.display()))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let summary = self.importer.import_file(&self.path).await.map_err(|e| match e {
			// a broken file stays broken until someone edits it
			ImportError::Config(_) | ImportError::Invalid(_) => JobError::fatal(e.to_string()),
			ImportError::Db(_) | ImportError::Secret { .. } => JobError::retryable(e.to_string()),
		})?;
		info!(triggered_by = ?ctx.triggered_by, "import file applied");

		Ok(JobOutput::new(format!(
			"imported {} providers, {} grants, {} users",
			summary.providers, summary.grants, summary.users
		))
		.with_metadata(serde_json::json!({
			"providers": summary.providers,
			"grants": summary.grants,
			"users": summary.users,
			"removedProviders": summary.removed_providers,
			"removedGrants": summary.removed_grants,
		})))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use infra_server_db::testing;
	use infra_server_jobs::{CancellationToken, TriggerSource};
	use infra_server_secrets::SecretRegistry;

	fn ctx() -> JobContext {
		JobContext {
			run_id: "run".into(),
			triggered_by: TriggerSource::Reload,
			cancellation_token: CancellationToken::new(),
		}
	}

	fn job(store: infra_server_db::Store, path: PathBuf) -> ConfigImportJob {
		let secrets = Arc::new(SecretRegistry::with_defaults(std::env::temp_dir()));
		ConfigImportJob::new(Arc::new(ConfigImporter::new(store, secrets, true)), path)
	}

	#[tokio::test]
	async fn reload_applies_the_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("import.yaml");
		std::fs::write(&path, "users:\n  - name: bob@example.com\n    groups: [eng]\n").unwrap();

		let store = testing::create_test_store().await;
		let output = job(store.clone(), path).run(&ctx()).await.unwrap();
		assert_eq!(output.message, "imported 0 providers, 0 grants, 1 users");
		assert!(store.groups.get_group_by_name("eng").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn broken_file_is_not_retried() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("import.yaml");
		std::fs::write(&path, "grants: [{resource: c1}]\n").unwrap();

		let store = testing::create_test_store().await;
		let err = job(store, path).run(&ctx()).await.unwrap_err();
		assert!(matches!(err, JobError::Failed { retryable: false, .. }), "{err}");
	}
}
