// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wrapped data keys. The bytes in `encrypted` are only usable through the
//! root key provider named by `algorithm`.

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::error::Result;
use crate::types::{db_time, parse_time, EncryptionKey};

#[derive(Clone)]
pub struct EncryptionKeyRepository {
	pool: SqlitePool,
}

impl EncryptionKeyRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_by_name(&self, name: &str) -> Result<Option<EncryptionKey>> {
		let row = sqlx::query(
			"SELECT key_id, name, encrypted, algorithm, root_key_id, created_at FROM encryption_keys WHERE name = ?",
		)
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(parse_key_row).transpose()
	}

	/// Stores a newly wrapped key. A second writer racing on the same name
	/// gets [`crate::DbError::Duplicate`].
	#[tracing::instrument(skip(self, key), fields(name = %key.name, key_id = key.key_id))]
	pub async fn create(&self, key: &EncryptionKey) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO encryption_keys (key_id, name, encrypted, algorithm, root_key_id, created_at)
			VALUES (?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(key.key_id)
		.bind(&key.name)
		.bind(&key.encrypted)
		.bind(&key.algorithm)
		.bind(&key.root_key_id)
		.bind(db_time(&key.created_at))
		.execute(&self.pool)
		.await?;

		tracing::info!(name = %key.name, algorithm = %key.algorithm, "data key stored");
		Ok(())
	}
}

fn parse_key_row(row: &SqliteRow) -> Result<EncryptionKey> {
	Ok(EncryptionKey {
		key_id: row.get("key_id"),
		name: row.get("name"),
		encrypted: row.get("encrypted"),
		algorithm: row.get("algorithm"),
		root_key_id: row.get("root_key_id"),
		created_at: parse_time(row.get("created_at"))?,
	})
}
