// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Users and their provider bindings.

use chrono::Utc;
use infra_server_api::Id;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::error::{DbError, Result};
use crate::types::{db_time, join_list, parse_id, parse_opt_time, parse_time, split_list, User};

const USER_COLUMNS: &str = "id, name, permissions, last_seen_at, created_at, updated_at";

#[derive(Clone)]
pub struct UserRepository {
	pool: SqlitePool,
}

impl UserRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self))]
	pub async fn create_user(&self, name: &str, permissions: &[String]) -> Result<User> {
		let id = Id::generate();
		let now = db_time(&Utc::now());
		sqlx::query(
			"INSERT INTO users (id, name, permissions, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
		)
		.bind(id.to_string())
		.bind(name)
		.bind(join_list(permissions))
		.bind(&now)
		.bind(&now)
		.execute(&self.pool)
		.await?;

		tracing::debug!(user_id = %id, "user created");
		self
			.get_user(id)
			.await?
			.ok_or_else(|| DbError::Internal("user vanished after insert".to_string()))
	}

	#[tracing::instrument(skip(self))]
	pub async fn find_or_create_user(&self, name: &str) -> Result<User> {
		if let Some(user) = self.get_user_by_name(name).await? {
			return Ok(user);
		}
		match self.create_user(name, &[]).await {
			Ok(user) => Ok(user),
			Err(DbError::Duplicate(_)) => self
				.get_user_by_name(name)
				.await?
				.ok_or_else(|| DbError::NotFound(format!("user {name}"))),
			Err(e) => Err(e),
		}
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_user(&self, id: Id) -> Result<Option<User>> {
		let row = sqlx::query(&format!(
			"SELECT {USER_COLUMNS} FROM users WHERE id = ? AND deleted_at IS NULL"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(parse_user_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_user_by_name(&self, name: &str) -> Result<Option<User>> {
		let row = sqlx::query(&format!(
			"SELECT {USER_COLUMNS} FROM users WHERE name = ? AND deleted_at IS NULL"
		))
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;
		row.as_ref().map(parse_user_row).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_users(&self, name: Option<&str>, group: Option<Id>) -> Result<Vec<User>> {
		let rows = sqlx::query(&format!(
			r#"
			SELECT {USER_COLUMNS} FROM users
			WHERE deleted_at IS NULL
			AND (?1 IS NULL OR name = ?1)
			AND (?2 IS NULL OR id IN (SELECT user_id FROM group_users WHERE group_id = ?2))
			ORDER BY name
			"#
		))
		.bind(name)
		.bind(group.map(|g| g.to_string()))
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(parse_user_row).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn soft_delete_user(&self, id: Id) -> Result<()> {
		let now = db_time(&Utc::now());
		let result = sqlx::query(
			"UPDATE users SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
		)
		.bind(&now)
		.bind(&now)
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("user {id}")));
		}
		sqlx::query("DELETE FROM group_users WHERE user_id = ?")
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn touch_last_seen(&self, id: Id) -> Result<()> {
		sqlx::query("UPDATE users SET last_seen_at = ? WHERE id = ?")
			.bind(db_time(&Utc::now()))
			.bind(id.to_string())
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	/// Returns whether anything was written.
	#[tracing::instrument(skip(self))]
	pub async fn set_permissions(&self, id: Id, permissions: &[String]) -> Result<bool> {
		let result = sqlx::query(
			"UPDATE users SET permissions = ?1, updated_at = ?2 WHERE id = ?3 AND deleted_at IS NULL AND permissions != ?1",
		)
		.bind(join_list(permissions))
		.bind(db_time(&Utc::now()))
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected() > 0)
	}

	/// Returns whether a new binding was written.
	#[tracing::instrument(skip(self))]
	pub async fn bind_provider(&self, user: Id, provider: Id) -> Result<bool> {
		let result =
			sqlx::query("INSERT OR IGNORE INTO provider_users (provider_id, user_id) VALUES (?, ?)")
				.bind(provider.to_string())
				.bind(user.to_string())
				.execute(&self.pool)
				.await?;
		Ok(result.rows_affected() > 0)
	}

	/// Live users bound to `provider`.
	#[tracing::instrument(skip(self))]
	pub async fn list_provider_users(&self, provider: Id) -> Result<Vec<User>> {
		let rows = sqlx::query(&format!(
			r#"
			SELECT {USER_COLUMNS} FROM users
			WHERE deleted_at IS NULL
			AND id IN (SELECT user_id FROM provider_users WHERE provider_id = ?)
			ORDER BY name
			"#
		))
		.bind(provider.to_string())
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(parse_user_row).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn provider_names_for_user(&self, user: Id) -> Result<Vec<String>> {
		let names = sqlx::query_scalar(
			r#"
			SELECT p.name FROM providers p
			JOIN provider_users pu ON pu.provider_id = p.id
			WHERE pu.user_id = ? AND p.deleted_at IS NULL
			ORDER BY p.name
			"#,
		)
		.bind(user.to_string())
		.fetch_all(&self.pool)
		.await?;
		Ok(names)
	}

	/// Removes the binding; soft-deletes the user when no other live provider
	/// still claims it. Returns whether the user was deleted.
	#[tracing::instrument(skip(self))]
	pub async fn unbind_provider(&self, user: Id, provider: Id) -> Result<bool> {
		let mut tx = self.pool.begin().await?;
		sqlx::query("DELETE FROM provider_users WHERE provider_id = ? AND user_id = ?")
			.bind(provider.to_string())
			.bind(user.to_string())
			.execute(&mut *tx)
			.await?;

		let remaining: i64 = sqlx::query_scalar(
			r#"
			SELECT COUNT(*) FROM provider_users pu
			JOIN providers p ON p.id = pu.provider_id
			WHERE pu.user_id = ? AND p.deleted_at IS NULL
			"#,
		)
		.bind(user.to_string())
		.fetch_one(&mut *tx)
		.await?;

		let deleted = if remaining == 0 {
			let now = db_time(&Utc::now());
			sqlx::query(
				"UPDATE users SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
			)
			.bind(&now)
			.bind(&now)
			.bind(user.to_string())
			.execute(&mut *tx)
			.await?;
			sqlx::query("DELETE FROM group_users WHERE user_id = ?")
				.bind(user.to_string())
				.execute(&mut *tx)
				.await?;
			true
		} else {
			false
		};
		tx.commit().await?;
		Ok(deleted)
	}
}

fn parse_user_row(row: &SqliteRow) -> Result<User> {
	Ok(User {
		id: parse_id(row.get("id"))?,
		name: row.get("name"),
		permissions: split_list(row.get("permissions")),
		last_seen_at: parse_opt_time(row.get("last_seen_at"))?,
		created_at: parse_time(row.get("created_at"))?,
		updated_at: parse_time(row.get("updated_at"))?,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_store;

	#[tokio::test]
	async fn find_or_create_is_idempotent() {
		let store = create_test_store().await;
		let a = store.users.find_or_create_user("alice@example.com").await.unwrap();
		let b = store.users.find_or_create_user("alice@example.com").await.unwrap();
		assert_eq!(a.id, b.id);
	}

	#[tokio::test]
	async fn permissions_round_trip_and_skip_no_op_writes() {
		let store = create_test_store().await;
		let user = store.users.create_user("admin", &["infra.admin".into()]).await.unwrap();
		assert_eq!(user.permissions, vec!["infra.admin"]);
		assert!(!store.users.set_permissions(user.id, &["infra.admin".into()]).await.unwrap());
		assert!(store.users.set_permissions(user.id, &["infra.user".into()]).await.unwrap());
	}

	#[tokio::test]
	async fn unbind_last_provider_deletes_user() {
		let store = create_test_store().await;
		let provider = store.providers.create_provider(&crate::testing::provider("okta")).await.unwrap();
		let user = store.users.find_or_create_user("carol@example.com").await.unwrap();
		assert!(store.users.bind_provider(user.id, provider.id).await.unwrap());
		assert!(!store.users.bind_provider(user.id, provider.id).await.unwrap());
		assert_eq!(
			store.users.provider_names_for_user(user.id).await.unwrap(),
			vec!["okta"]
		);
		assert!(store.users.unbind_provider(user.id, provider.id).await.unwrap());
		assert!(store.users.get_user(user.id).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn list_filters_by_group() {
		let store = create_test_store().await;
		let a = store.users.find_or_create_user("a@example.com").await.unwrap();
		store.users.find_or_create_user("b@example.com").await.unwrap();
		let group = store.groups.find_or_create_group("devs", None).await.unwrap();
		store.groups.set_group_members(group.id, &[a.id]).await.unwrap();

		let members = store.users.list_users(None, Some(group.id)).await.unwrap();
		assert_eq!(members.len(), 1);
		assert_eq!(members[0].id, a.id);
		assert_eq!(store.users.list_users(None, None).await.unwrap().len(), 2);
	}
}
