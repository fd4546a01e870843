// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Groups and membership.

use std::collections::BTreeSet;

use chrono::Utc;
use infra_server_api::Id;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::error::{DbError, Result};
use crate::types::{db_time, parse_id, parse_time, Group};

const GROUP_COLUMNS: &str = "id, name, provider_id, created_at, updated_at";

#[derive(Clone)]
pub struct GroupRepository {
	pool: SqlitePool,
}

impl GroupRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self))]
	pub async fn create_group(&self, name: &str, provider_id: Option<Id>) -> Result<Group> {
		let id = Id::generate();
		let now = db_time(&Utc::now());
		sqlx::query(
			"INSERT INTO groups (id, name, provider_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
		)
		.bind(id.to_string())
		.bind(name)
		.bind(provider_id.map(|p| p.to_string()))
		.bind(&now)
		.bind(&now)
		.execute(&self.pool)
		.await?;

		tracing::debug!(group_id = %id, "group created");
		self
			.get_group(id)
			.await?
			.ok_or_else(|| DbError::Internal("group vanished after insert".to_string()))
	}

	#[tracing::instrument(skip(self))]
	pub async fn find_or_create_group(&self, name: &str, provider_id: Option<Id>) -> Result<Group> {
		if let Some(group) = self.get_group_by_name(name).await? {
			return Ok(group);
		}
		self.create_group(name, provider_id).await
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_group(&self, id: Id) -> Result<Option<Group>> {
		let row = sqlx::query(&format!(
			"SELECT {GROUP_COLUMNS} FROM groups WHERE id = ? AND deleted_at IS NULL"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(parse_group_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_group_by_name(&self, name: &str) -> Result<Option<Group>> {
		let row = sqlx::query(&format!(
			"SELECT {GROUP_COLUMNS} FROM groups WHERE name = ? AND deleted_at IS NULL"
		))
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(parse_group_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_groups(&self, provider_id: Option<Id>) -> Result<Vec<Group>> {
		let rows = sqlx::query(&format!(
			"SELECT {GROUP_COLUMNS} FROM groups WHERE deleted_at IS NULL AND (?1 IS NULL OR provider_id = ?1) ORDER BY name"
		))
		.bind(provider_id.map(|p| p.to_string()))
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(parse_group_row).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn soft_delete_group(&self, id: Id) -> Result<()> {
		let now = db_time(&Utc::now());
		let result = sqlx::query(
			"UPDATE groups SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
		)
		.bind(&now)
		.bind(&now)
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("group {id}")));
		}
		sqlx::query("DELETE FROM group_users WHERE group_id = ?")
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_member_ids(&self, group: Id) -> Result<BTreeSet<Id>> {
		let ids: Vec<String> = sqlx::query_scalar(
			r#"
			SELECT gu.user_id FROM group_users gu
			JOIN users u ON u.id = gu.user_id
			WHERE gu.group_id = ? AND u.deleted_at IS NULL
			"#,
		)
		.bind(group.to_string())
		.fetch_all(&self.pool)
		.await?;
		ids.iter().map(|s| parse_id(s)).collect()
	}

	/// Makes the membership exactly `members`. Returns whether anything
	/// changed.
	#[tracing::instrument(skip(self, members), fields(count = members.len()))]
	pub async fn set_group_members(&self, group: Id, members: &[Id]) -> Result<bool> {
		let current = self.list_member_ids(group).await?;
		let wanted: BTreeSet<Id> = members.iter().copied().collect();
		if current == wanted {
			return Ok(false);
		}

		let mut tx = self.pool.begin().await?;
		for removed in current.difference(&wanted) {
			sqlx::query("DELETE FROM group_users WHERE group_id = ? AND user_id = ?")
				.bind(group.to_string())
				.bind(removed.to_string())
				.execute(&mut *tx)
				.await?;
		}
		for added in wanted.difference(&current) {
			sqlx::query("INSERT OR IGNORE INTO group_users (group_id, user_id) VALUES (?, ?)")
				.bind(group.to_string())
				.bind(added.to_string())
				.execute(&mut *tx)
				.await?;
		}
		tx.commit().await?;
		Ok(true)
	}

	#[tracing::instrument(skip(self))]
	pub async fn add_member(&self, group: Id, user: Id) -> Result<bool> {
		let result = sqlx::query("INSERT OR IGNORE INTO group_users (group_id, user_id) VALUES (?, ?)")
			.bind(group.to_string())
			.bind(user.to_string())
			.execute(&self.pool)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	#[tracing::instrument(skip(self))]
	pub async fn count_members(&self, group: Id) -> Result<i64> {
		Ok(self.list_member_ids(group).await?.len() as i64)
	}

	/// Live groups the user belongs to.
	#[tracing::instrument(skip(self))]
	pub async fn list_group_ids_for_user(&self, user: Id) -> Result<Vec<Id>> {
		let ids: Vec<String> = sqlx::query_scalar(
			r#"
			SELECT gu.group_id FROM group_users gu
			JOIN groups g ON g.id = gu.group_id
			WHERE gu.user_id = ? AND g.deleted_at IS NULL
			"#,
		)
		.bind(user.to_string())
		.fetch_all(&self.pool)
		.await?;
		ids.iter().map(|s| parse_id(s)).collect()
	}
}

fn parse_group_row(row: &SqliteRow) -> Result<Group> {
	let provider_id: Option<String> = row.get("provider_id");
	Ok(Group {
		id: parse_id(row.get("id"))?,
		name: row.get("name"),
		provider_id: provider_id.as_deref().map(parse_id).transpose()?,
		created_at: parse_time(row.get("created_at"))?,
		updated_at: parse_time(row.get("updated_at"))?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_store;

	#[tokio::test]
	async fn membership_sync_reports_changes() {
		let store = create_test_store().await;
		let a = store.users.find_or_create_user("a@example.com").await.unwrap();
		let b = store.users.find_or_create_user("b@example.com").await.unwrap();
		let group = store.groups.find_or_create_group("ops", None).await.unwrap();

		assert!(store.groups.set_group_members(group.id, &[a.id, b.id]).await.unwrap());
		assert!(!store.groups.set_group_members(group.id, &[b.id, a.id]).await.unwrap());
		assert!(store.groups.set_group_members(group.id, &[b.id]).await.unwrap());
		assert_eq!(store.groups.count_members(group.id).await.unwrap(), 1);
		assert_eq!(
			store.groups.list_group_ids_for_user(b.id).await.unwrap(),
			vec![group.id]
		);
	}

	#[tokio::test]
	async fn deleted_users_are_not_members() {
		let store = create_test_store().await;
		let a = store.users.find_or_create_user("a@example.com").await.unwrap();
		let group = store.groups.find_or_create_group("ops", None).await.unwrap();
		store.groups.add_member(group.id, a.id).await.unwrap();
		store.users.soft_delete_user(a.id).await.unwrap();
		assert_eq!(store.groups.count_members(group.id).await.unwrap(), 0);
	}

	#[tokio::test]
	async fn list_by_provider() {
		let store = create_test_store().await;
		let provider = store
			.providers
			.create_provider(&crate::testing::provider("okta"))
			.await
			.unwrap();
		store.groups.create_group("owned", Some(provider.id)).await.unwrap();
		store.groups.create_group("local", None).await.unwrap();
		let owned = store.groups.list_groups(Some(provider.id)).await.unwrap();
		assert_eq!(owned.len(), 1);
		assert_eq!(owned[0].name, "owned");
		assert_eq!(store.groups.list_groups(None).await.unwrap().len(), 2);
	}
}
