// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use std::str::FromStr;

use crate::error::DbError;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Opens a WAL-mode SQLite pool, creating the file when missing.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.busy_timeout(std::time::Duration::from_secs(5))
		.create_if_missing(true);

	let pool = SqlitePool::connect_with(options).await?;

	tracing::debug!("database pool created");
	Ok(pool)
}

/// Applies bundled migrations not yet recorded in `_sqlx_migrations`.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	MIGRATOR.run(pool).await.inspect_err(|e| {
		tracing::error!(error = %e, "migration failed");
	})?;
	tracing::debug!(
		latest = MIGRATOR.iter().map(|m| m.version).max().unwrap_or(0),
		"migrations applied"
	);
	Ok(())
}
