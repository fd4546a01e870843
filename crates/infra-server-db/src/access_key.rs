// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Access key repository.
//!
//! Only the SHA-256 checksum of a key's secret half is stored; the plaintext
//! exists once, in the response that created it.

use async_trait::async_trait;
use chrono::Utc;
use infra_server_api::Id;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::error::{DbError, Result};
use crate::types::{db_time, join_list, parse_id, parse_time, split_list, AccessKeyRecord};

const ACCESS_KEY_COLUMNS: &str =
	"id, name, issued_for, key_id, secret_checksum, permissions, expires_at, created_at";

#[async_trait]
pub trait AccessKeyStore: Send + Sync {
	async fn create_access_key(&self, record: &AccessKeyRecord) -> Result<()>;
	async fn get_access_key_by_key_id(&self, key_id: &str) -> Result<Option<AccessKeyRecord>>;
	async fn get_access_key_by_name(&self, name: &str) -> Result<Option<AccessKeyRecord>>;
	async fn soft_delete_access_key(&self, id: Id) -> Result<()>;
}

#[async_trait]
impl AccessKeyStore for AccessKeyRepository {
	async fn create_access_key(&self, record: &AccessKeyRecord) -> Result<()> {
		self.create_access_key(record).await
	}

	async fn get_access_key_by_key_id(&self, key_id: &str) -> Result<Option<AccessKeyRecord>> {
		self.get_access_key_by_key_id(key_id).await
	}

	async fn get_access_key_by_name(&self, name: &str) -> Result<Option<AccessKeyRecord>> {
		self.get_access_key_by_name(name).await
	}

	async fn soft_delete_access_key(&self, id: Id) -> Result<()> {
		self.soft_delete_access_key(id).await
	}
}

#[derive(Clone)]
pub struct AccessKeyRepository {
	pool: SqlitePool,
}

impl AccessKeyRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, record), fields(access_key_id = %record.id, issued_for = %record.issued_for))]
	pub async fn create_access_key(&self, record: &AccessKeyRecord) -> Result<()> {
		let now = db_time(&Utc::now());
		sqlx::query(
			r#"
			INSERT INTO access_keys (id, name, issued_for, key_id, secret_checksum, permissions, expires_at, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(record.id.to_string())
		.bind(&record.name)
		.bind(record.issued_for.to_string())
		.bind(&record.key_id)
		.bind(&record.secret_checksum)
		.bind(join_list(&record.permissions))
		.bind(db_time(&record.expires_at))
		.bind(db_time(&record.created_at))
		.bind(&now)
		.execute(&self.pool)
		.await?;

		tracing::debug!(access_key_id = %record.id, "access key created");
		Ok(())
	}

	/// Looks up by the public half. Deleted keys are invisible.
	#[tracing::instrument(skip(self))]
	pub async fn get_access_key_by_key_id(&self, key_id: &str) -> Result<Option<AccessKeyRecord>> {
		let row = sqlx::query(&format!(
			"SELECT {ACCESS_KEY_COLUMNS} FROM access_keys WHERE key_id = ? AND deleted_at IS NULL"
		))
		.bind(key_id)
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(parse_access_key_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_access_key_by_name(&self, name: &str) -> Result<Option<AccessKeyRecord>> {
		let row = sqlx::query(&format!(
			"SELECT {ACCESS_KEY_COLUMNS} FROM access_keys WHERE name = ? AND deleted_at IS NULL"
		))
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(parse_access_key_row).transpose()
	}

	/// Any row holding `key_id`, deleted or not. Key IDs are never reused.
	#[tracing::instrument(skip(self))]
	pub async fn key_id_exists(&self, key_id: &str) -> Result<bool> {
		let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM access_keys WHERE key_id = ?")
			.bind(key_id)
			.fetch_one(&self.pool)
			.await?;
		Ok(count > 0)
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_access_key(&self, id: Id) -> Result<Option<AccessKeyRecord>> {
		let row = sqlx::query(&format!(
			"SELECT {ACCESS_KEY_COLUMNS} FROM access_keys WHERE id = ? AND deleted_at IS NULL"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(parse_access_key_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_access_keys(&self, issued_for: Option<Id>) -> Result<Vec<AccessKeyRecord>> {
		let rows = sqlx::query(&format!(
			"SELECT {ACCESS_KEY_COLUMNS} FROM access_keys WHERE deleted_at IS NULL AND (?1 IS NULL OR issued_for = ?1) ORDER BY created_at"
		))
		.bind(issued_for.map(|i| i.to_string()))
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(parse_access_key_row).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn soft_delete_access_key(&self, id: Id) -> Result<()> {
		let now = db_time(&Utc::now());
		let result = sqlx::query(
			"UPDATE access_keys SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
		)
		.bind(&now)
		.bind(&now)
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("access key {id}")));
		}
		tracing::debug!(access_key_id = %id, "access key revoked");
		Ok(())
	}
}

fn parse_access_key_row(row: &SqliteRow) -> Result<AccessKeyRecord> {
	Ok(AccessKeyRecord {
		id: parse_id(row.get("id"))?,
		name: row.get("name"),
		issued_for: parse_id(row.get("issued_for"))?,
		key_id: row.get("key_id"),
		secret_checksum: row.get("secret_checksum"),
		permissions: split_list(row.get("permissions")),
		expires_at: parse_time(row.get("expires_at"))?,
		created_at: parse_time(row.get("created_at"))?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_store;

	fn record(name: &str, key_id: &str) -> AccessKeyRecord {
		AccessKeyRecord {
			id: Id::generate(),
			name: name.into(),
			issued_for: Id::generate(),
			key_id: key_id.into(),
			secret_checksum: vec![1, 2, 3],
			permissions: vec!["infra.user".into()],
			expires_at: Utc::now() + chrono::Duration::hours(12),
			created_at: Utc::now(),
		}
	}

	#[tokio::test]
	async fn create_then_lookup_by_key_id() {
		let store = create_test_store().await;
		let rec = record("alice-1", "abcdefghij");
		store.access_keys.create_access_key(&rec).await.unwrap();
		let found = store
			.access_keys
			.get_access_key_by_key_id("abcdefghij")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(found.id, rec.id);
		assert_eq!(found.secret_checksum, vec![1, 2, 3]);
		assert_eq!(found.permissions, vec!["infra.user"]);
	}

	#[tokio::test]
	async fn revoked_keys_are_invisible_but_reserved() {
		let store = create_test_store().await;
		let rec = record("alice-1", "abcdefghij");
		store.access_keys.create_access_key(&rec).await.unwrap();
		store.access_keys.soft_delete_access_key(rec.id).await.unwrap();
		assert!(store
			.access_keys
			.get_access_key_by_key_id("abcdefghij")
			.await
			.unwrap()
			.is_none());
		assert!(store.access_keys.key_id_exists("abcdefghij").await.unwrap());
		assert!(matches!(
			store.access_keys.create_access_key(&record("other", "abcdefghij")).await,
			Err(DbError::Duplicate(_))
		));
	}

	#[tokio::test]
	async fn list_filters_by_identity() {
		let store = create_test_store().await;
		let a = record("a", "aaaaaaaaaa");
		store.access_keys.create_access_key(&a).await.unwrap();
		store.access_keys.create_access_key(&record("b", "bbbbbbbbbb")).await.unwrap();
		let mine = store.access_keys.list_access_keys(Some(a.issued_for)).await.unwrap();
		assert_eq!(mine.len(), 1);
		assert_eq!(store.access_keys.list_access_keys(None).await.unwrap().len(), 2);
	}
}
