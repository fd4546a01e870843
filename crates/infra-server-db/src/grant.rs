// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Grants. Every write takes the next grant update index in the same
//! transaction and publishes it after commit.

use std::sync::Arc;

use chrono::Utc;
use infra_server_api::{Id, Subject};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::error::{DbError, Result};
use crate::notify::{next_update_index, ChangeHub, Table};
use crate::types::{db_time, destination_of, parse_id, parse_opt_time, parse_time, Grant, NewGrant};

const GRANT_COLUMNS: &str = "id, subject, resource, privilege, created_by, from_config, expires_at, update_index, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct GrantFilter {
	pub subject: Option<Subject>,
	pub resource: Option<String>,
	pub destination: Option<String>,
	pub privilege: Option<String>,
}

#[derive(Clone)]
pub struct GrantRepository {
	pool: SqlitePool,
	hub: Arc<ChangeHub>,
}

impl GrantRepository {
	pub fn new(pool: SqlitePool, hub: Arc<ChangeHub>) -> Self {
		Self { pool, hub }
	}

	#[tracing::instrument(skip(self, grant), fields(subject = %grant.subject, resource = %grant.resource, privilege = %grant.privilege))]
	pub async fn create_grant(&self, grant: &NewGrant) -> Result<Grant> {
		let id = Id::generate();
		let now = db_time(&Utc::now());
		let mut tx = self.pool.begin().await?;
		let index = next_update_index(&mut tx, Table::Grants).await?;

		sqlx::query(
			r#"
			INSERT INTO grants (id, subject, resource, destination_name, privilege, created_by, from_config, expires_at, update_index, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(id.to_string())
		.bind(grant.subject.to_string())
		.bind(&grant.resource)
		.bind(destination_of(&grant.resource))
		.bind(&grant.privilege)
		.bind(grant.created_by.map(|c| c.to_string()))
		.bind(grant.from_config)
		.bind(grant.expires_at.as_ref().map(db_time))
		.bind(index)
		.bind(&now)
		.bind(&now)
		.execute(&mut *tx)
		.await?;
		tx.commit().await?;

		self.hub.publish(Table::Grants, index);
		tracing::debug!(grant_id = %id, update_index = index, "grant created");
		self
			.get_grant(id)
			.await?
			.ok_or_else(|| DbError::Internal("grant vanished after insert".to_string()))
	}

	/// Returns the live grant for the triple, creating it when absent. The
	/// flag reports whether a row was written.
	#[tracing::instrument(skip(self, grant), fields(subject = %grant.subject, resource = %grant.resource))]
	pub async fn upsert_grant(&self, grant: &NewGrant) -> Result<(Grant, bool)> {
		if let Some(existing) = self
			.find_grant(&grant.subject, &grant.resource, &grant.privilege)
			.await?
		{
			if grant.from_config && !existing.from_config {
				sqlx::query("UPDATE grants SET from_config = 1 WHERE id = ?")
					.bind(existing.id.to_string())
					.execute(&self.pool)
					.await?;
				return Ok((Grant {
					from_config: true,
					..existing
				}, true));
			}
			return Ok((existing, false));
		}
		match self.create_grant(grant).await {
			Ok(created) => Ok((created, true)),
			Err(DbError::Duplicate(_)) => self
				.find_grant(&grant.subject, &grant.resource, &grant.privilege)
				.await?
				.map(|g| (g, false))
				.ok_or_else(|| DbError::Conflict("grant deleted concurrently".to_string())),
			Err(e) => Err(e),
		}
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_grant(&self, id: Id) -> Result<Option<Grant>> {
		let row = sqlx::query(&format!(
			"SELECT {GRANT_COLUMNS} FROM grants WHERE id = ? AND deleted_at IS NULL"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(parse_grant_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn find_grant(
		&self,
		subject: &Subject,
		resource: &str,
		privilege: &str,
	) -> Result<Option<Grant>> {
		let row = sqlx::query(&format!(
			"SELECT {GRANT_COLUMNS} FROM grants WHERE subject = ? AND resource = ? AND privilege = ? AND deleted_at IS NULL"
		))
		.bind(subject.to_string())
		.bind(resource)
		.bind(privilege)
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(parse_grant_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_grants(&self, filter: &GrantFilter) -> Result<Vec<Grant>> {
		let rows = sqlx::query(&format!(
			r#"
			SELECT {GRANT_COLUMNS} FROM grants
			WHERE deleted_at IS NULL
			AND (?1 IS NULL OR subject = ?1)
			AND (?2 IS NULL OR resource = ?2)
			AND (?3 IS NULL OR destination_name = ?3)
			AND (?4 IS NULL OR privilege = ?4)
			ORDER BY update_index
			"#
		))
		.bind(filter.subject.map(|s| s.to_string()))
		.bind(filter.resource.as_deref())
		.bind(filter.destination.as_deref())
		.bind(filter.privilege.as_deref())
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(parse_grant_row).collect()
	}

	/// Highest grant index touching the destination, deleted rows included,
	/// so removals advance the watermark too.
	#[tracing::instrument(skip(self))]
	pub async fn max_update_index(&self, destination: &str) -> Result<i64> {
		let max: Option<i64> =
			sqlx::query_scalar("SELECT MAX(update_index) FROM grants WHERE destination_name = ?")
				.bind(destination)
				.fetch_one(&self.pool)
				.await?;
		Ok(max.unwrap_or(0))
	}

	#[tracing::instrument(skip(self))]
	pub async fn soft_delete_grant(&self, id: Id) -> Result<()> {
		let now = db_time(&Utc::now());
		let mut tx = self.pool.begin().await?;
		let index = next_update_index(&mut tx, Table::Grants).await?;
		let result = sqlx::query(
			"UPDATE grants SET deleted_at = ?, updated_at = ?, update_index = ? WHERE id = ? AND deleted_at IS NULL",
		)
		.bind(&now)
		.bind(&now)
		.bind(index)
		.bind(id.to_string())
		.execute(&mut *tx)
		.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("grant {id}")));
		}
		tx.commit().await?;
		self.hub.publish(Table::Grants, index);
		tracing::debug!(grant_id = %id, update_index = index, "grant soft-deleted");
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_config_grants(&self) -> Result<Vec<Grant>> {
		let rows = sqlx::query(&format!(
			"SELECT {GRANT_COLUMNS} FROM grants WHERE deleted_at IS NULL AND from_config = 1 ORDER BY update_index"
		))
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(parse_grant_row).collect()
	}
}

fn parse_grant_row(row: &SqliteRow) -> Result<Grant> {
	let subject: String = row.get("subject");
	let created_by: Option<String> = row.get("created_by");
	Ok(Grant {
		id: parse_id(row.get("id"))?,
		subject: subject
			.parse()
			.map_err(|e| DbError::Internal(format!("invalid subject {subject:?}: {e}")))?,
		resource: row.get("resource"),
		privilege: row.get("privilege"),
		created_by: created_by.as_deref().map(parse_id).transpose()?,
		from_config: row.get("from_config"),
		expires_at: parse_opt_time(row.get("expires_at"))?,
		update_index: row.get("update_index"),
		created_at: parse_time(row.get("created_at"))?,
		updated_at: parse_time(row.get("updated_at"))?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_store;
	use std::time::Duration;

	fn view(user: Id, resource: &str) -> NewGrant {
		NewGrant {
			subject: Subject::User(user),
			resource: resource.into(),
			privilege: "view".into(),
			created_by: None,
			from_config: false,
			expires_at: None,
		}
	}

	#[tokio::test]
	async fn indices_strictly_increase() {
		let store = create_test_store().await;
		let u = Id::generate();
		let a = store.grants.create_grant(&view(u, "c1")).await.unwrap();
		let b = store.grants.create_grant(&view(u, "c1.prod")).await.unwrap();
		assert!(b.update_index > a.update_index);
		store.grants.soft_delete_grant(a.id).await.unwrap();
		assert!(store.grants.max_update_index("c1").await.unwrap() > b.update_index);
	}

	#[tokio::test]
	async fn triple_is_unique_while_live() {
		let store = create_test_store().await;
		let u = Id::generate();
		let first = store.grants.create_grant(&view(u, "c1")).await.unwrap();
		assert!(matches!(
			store.grants.create_grant(&view(u, "c1")).await,
			Err(DbError::Duplicate(_))
		));
		let (again, written) = store.grants.upsert_grant(&view(u, "c1")).await.unwrap();
		assert_eq!(again.id, first.id);
		assert!(!written);
	}

	#[tokio::test]
	async fn destination_filter_covers_namespaces() {
		let store = create_test_store().await;
		let u = Id::generate();
		store.grants.create_grant(&view(u, "c1")).await.unwrap();
		store.grants.create_grant(&view(u, "c1.prod")).await.unwrap();
		store.grants.create_grant(&view(u, "c2")).await.unwrap();
		let c1 = store
			.grants
			.list_grants(&GrantFilter {
				destination: Some("c1".into()),
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(c1.len(), 2);
	}

	#[tokio::test]
	async fn writes_wake_subscribers() {
		let store = create_test_store().await;
		let mut sub = store.hub.subscribe(Table::Grants);
		store.grants.create_grant(&view(Id::generate(), "c1")).await.unwrap();
		assert!(sub.changed_within(Duration::from_millis(50)).await);
	}

	#[tokio::test]
	async fn upsert_marks_existing_grant_as_config_owned() {
		let store = create_test_store().await;
		let u = Id::generate();
		store.grants.create_grant(&view(u, "c1")).await.unwrap();
		let mut from_config = view(u, "c1");
		from_config.from_config = true;
		let (grant, written) = store.grants.upsert_grant(&from_config).await.unwrap();
		assert!(written);
		assert!(grant.from_config);
		assert_eq!(store.grants.list_config_grants().await.unwrap().len(), 1);
	}
}
