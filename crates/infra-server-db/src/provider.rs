// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identity providers. Client secrets and API tokens are sealed columns.

use std::sync::Arc;

use chrono::Utc;
use infra_server_api::Id;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::cipher::{open_secret, seal_secret, ColumnCipher};
use crate::error::{DbError, Result};
use crate::types::{db_time, parse_id, parse_time, NewProvider, Provider};

const PROVIDER_COLUMNS: &str = "id, name, url, client_id, client_secret, api_token, kind, from_config, created_at, updated_at";

#[derive(Clone)]
pub struct ProviderRepository {
	pool: SqlitePool,
	cipher: Arc<dyn ColumnCipher>,
}

impl ProviderRepository {
	pub fn new(pool: SqlitePool, cipher: Arc<dyn ColumnCipher>) -> Self {
		Self { pool, cipher }
	}

	#[tracing::instrument(skip(self, provider), fields(name = %provider.name))]
	pub async fn create_provider(&self, provider: &NewProvider) -> Result<Provider> {
		let id = Id::generate();
		let now = db_time(&Utc::now());
		let secret = seal_secret(self.cipher.as_ref(), &provider.client_secret)?;
		let api_token = provider
			.api_token
			.as_ref()
			.map(|t| seal_secret(self.cipher.as_ref(), t))
			.transpose()?;

		sqlx::query(
			r#"
			INSERT INTO providers (id, name, url, client_id, client_secret, api_token, kind, from_config, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(id.to_string())
		.bind(&provider.name)
		.bind(&provider.url)
		.bind(&provider.client_id)
		.bind(secret)
		.bind(api_token)
		.bind(provider.kind.as_str())
		.bind(provider.from_config)
		.bind(&now)
		.bind(&now)
		.execute(&self.pool)
		.await?;

		tracing::debug!(provider_id = %id, "provider created");
		self
			.get_provider(id)
			.await?
			.ok_or_else(|| DbError::Internal("provider vanished after insert".to_string()))
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_provider(&self, id: Id) -> Result<Option<Provider>> {
		let row = sqlx::query(&format!(
			"SELECT {PROVIDER_COLUMNS} FROM providers WHERE id = ? AND deleted_at IS NULL"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;
		row.map(|r| self.parse_provider_row(&r)).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_provider_by_name(&self, name: &str) -> Result<Option<Provider>> {
		let row = sqlx::query(&format!(
			"SELECT {PROVIDER_COLUMNS} FROM providers WHERE name = ? AND deleted_at IS NULL"
		))
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;
		row.map(|r| self.parse_provider_row(&r)).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_providers(&self) -> Result<Vec<Provider>> {
		let rows = sqlx::query(&format!(
			"SELECT {PROVIDER_COLUMNS} FROM providers WHERE deleted_at IS NULL ORDER BY name"
		))
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(|r| self.parse_provider_row(r)).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn count_providers(&self) -> Result<i64> {
		let count = sqlx::query_scalar("SELECT COUNT(*) FROM providers WHERE deleted_at IS NULL")
			.fetch_one(&self.pool)
			.await?;
		Ok(count)
	}

	/// Rewrites every mutable field. Unchanged rows are left untouched so a
	/// repeated import causes no writes.
	#[tracing::instrument(skip(self, provider), fields(name = %provider.name))]
	pub async fn update_provider(&self, id: Id, provider: &NewProvider) -> Result<Provider> {
		let current = self
			.get_provider(id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("provider {id}")))?;

		let unchanged = current.name == provider.name
			&& current.url == provider.url
			&& current.client_id == provider.client_id
			&& current.client_secret == provider.client_secret
			&& current.api_token == provider.api_token
			&& current.kind == provider.kind
			&& current.from_config == provider.from_config;
		if unchanged {
			return Ok(current);
		}

		let secret = seal_secret(self.cipher.as_ref(), &provider.client_secret)?;
		let api_token = provider
			.api_token
			.as_ref()
			.map(|t| seal_secret(self.cipher.as_ref(), t))
			.transpose()?;

		sqlx::query(
			r#"
			UPDATE providers
			SET name = ?, url = ?, client_id = ?, client_secret = ?, api_token = ?, kind = ?, from_config = ?, updated_at = ?
			WHERE id = ? AND deleted_at IS NULL
			"#,
		)
		.bind(&provider.name)
		.bind(&provider.url)
		.bind(&provider.client_id)
		.bind(secret)
		.bind(api_token)
		.bind(provider.kind.as_str())
		.bind(provider.from_config)
		.bind(db_time(&Utc::now()))
		.bind(id.to_string())
		.execute(&self.pool)
		.await?;

		self
			.get_provider(id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("provider {id}")))
	}

	/// Soft-deletes the provider and cascades to what it owns: its groups,
	/// users bound to no other live provider, bindings and stored tokens.
	#[tracing::instrument(skip(self))]
	pub async fn soft_delete_provider(&self, id: Id) -> Result<()> {
		let now = db_time(&Utc::now());
		let id_str = id.to_string();
		let mut tx = self.pool.begin().await?;

		let result =
			sqlx::query("UPDATE providers SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
				.bind(&now)
				.bind(&now)
				.bind(&id_str)
				.execute(&mut *tx)
				.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("provider {id}")));
		}

		let users = sqlx::query(
			r#"
			UPDATE users SET deleted_at = ?, updated_at = ?
			WHERE deleted_at IS NULL AND id IN (
				SELECT pu.user_id FROM provider_users pu
				WHERE pu.provider_id = ?
				AND NOT EXISTS (
					SELECT 1 FROM provider_users other
					JOIN providers p ON p.id = other.provider_id
					WHERE other.user_id = pu.user_id
					AND other.provider_id != pu.provider_id
					AND p.deleted_at IS NULL
				)
			)
			"#,
		)
		.bind(&now)
		.bind(&now)
		.bind(&id_str)
		.execute(&mut *tx)
		.await?;

		let groups = sqlx::query(
			"UPDATE groups SET deleted_at = ?, updated_at = ? WHERE provider_id = ? AND deleted_at IS NULL",
		)
		.bind(&now)
		.bind(&now)
		.bind(&id_str)
		.execute(&mut *tx)
		.await?;

		sqlx::query("DELETE FROM provider_users WHERE provider_id = ?")
			.bind(&id_str)
			.execute(&mut *tx)
			.await?;
		sqlx::query("DELETE FROM provider_tokens WHERE provider_id = ?")
			.bind(&id_str)
			.execute(&mut *tx)
			.await?;

		tx.commit().await?;
		tracing::debug!(
			provider_id = %id,
			users = users.rows_affected(),
			groups = groups.rows_affected(),
			"provider soft-deleted"
		);
		Ok(())
	}

	fn parse_provider_row(&self, row: &SqliteRow) -> Result<Provider> {
		let api_token: Option<String> = row.get("api_token");
		let kind: String = row.get("kind");
		Ok(Provider {
			id: parse_id(row.get("id"))?,
			name: row.get("name"),
			url: row.get("url"),
			client_id: row.get("client_id"),
			client_secret: open_secret(self.cipher.as_ref(), row.get("client_secret"))?,
			api_token: api_token
				.as_deref()
				.map(|t| open_secret(self.cipher.as_ref(), t))
				.transpose()?,
			kind: kind.parse().map_err(DbError::Internal)?,
			from_config: row.get("from_config"),
			created_at: parse_time(row.get("created_at"))?,
			updated_at: parse_time(row.get("updated_at"))?,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_store;
	use infra_common_config::SecretString;
	use infra_server_api::ProviderKind;

	fn okta() -> NewProvider {
		NewProvider {
			name: "okta".into(),
			url: "example.okta.com".into(),
			client_id: "0oa1".into(),
			client_secret: SecretString::from("client-secret"),
			api_token: Some(SecretString::from("ssws-token")),
			kind: ProviderKind::Okta,
			from_config: true,
		}
	}

	#[tokio::test]
	async fn create_then_get_returns_same_fields() {
		let store = create_test_store().await;
		let created = store.providers.create_provider(&okta()).await.unwrap();
		let fetched = store.providers.get_provider(created.id).await.unwrap().unwrap();
		assert_eq!(fetched.name, "okta");
		assert_eq!(fetched.client_secret.expose(), "client-secret");
		assert_eq!(fetched.api_token.unwrap().expose(), "ssws-token");
		assert!(fetched.from_config);
	}

	#[tokio::test]
	async fn secrets_are_sealed_at_rest() {
		let store = create_test_store().await;
		let created = store.providers.create_provider(&okta()).await.unwrap();
		let raw: String = sqlx::query_scalar("SELECT client_secret FROM providers WHERE id = ?")
			.bind(created.id.to_string())
			.fetch_one(&store.pool)
			.await
			.unwrap();
		assert!(!raw.contains("client-secret"));
	}

	#[tokio::test]
	async fn live_name_is_unique_but_reusable_after_delete() {
		let store = create_test_store().await;
		let first = store.providers.create_provider(&okta()).await.unwrap();
		assert!(matches!(
			store.providers.create_provider(&okta()).await,
			Err(DbError::Duplicate(_))
		));
		store.providers.soft_delete_provider(first.id).await.unwrap();
		assert!(store.providers.get_provider(first.id).await.unwrap().is_none());
		store.providers.create_provider(&okta()).await.unwrap();
	}

	#[tokio::test]
	async fn delete_cascades_to_exclusive_users_and_groups() {
		let store = create_test_store().await;
		let okta = store.providers.create_provider(&okta()).await.unwrap();
		let mut other = self::okta();
		other.name = "google".into();
		let google = store.providers.create_provider(&other).await.unwrap();

		let alice = store.users.find_or_create_user("alice@example.com").await.unwrap();
		let bob = store.users.find_or_create_user("bob@example.com").await.unwrap();
		store.users.bind_provider(alice.id, okta.id).await.unwrap();
		store.users.bind_provider(bob.id, okta.id).await.unwrap();
		store.users.bind_provider(bob.id, google.id).await.unwrap();
		let admins = store.groups.find_or_create_group("admins", Some(okta.id)).await.unwrap();

		store.providers.soft_delete_provider(okta.id).await.unwrap();

		assert!(store.users.get_user(alice.id).await.unwrap().is_none());
		assert!(store.users.get_user(bob.id).await.unwrap().is_some());
		assert!(store.groups.get_group(admins.id).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn identical_update_is_a_no_op() {
		let store = create_test_store().await;
		let created = store.providers.create_provider(&okta()).await.unwrap();
		let updated = store.providers.update_provider(created.id, &okta()).await.unwrap();
		assert_eq!(updated.updated_at, created.updated_at);
	}
}
