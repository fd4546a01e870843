// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Upstream OIDC tokens captured at login, kept so group membership can be
//! refreshed without the user present.

use std::sync::Arc;

use chrono::Utc;
use infra_server_api::Id;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::cipher::{open_secret, seal_secret, ColumnCipher};
use crate::error::Result;
use crate::types::{db_time, parse_id, parse_time, ProviderToken};

#[derive(Clone)]
pub struct ProviderTokenRepository {
	pool: SqlitePool,
	cipher: Arc<dyn ColumnCipher>,
}

impl ProviderTokenRepository {
	pub fn new(pool: SqlitePool, cipher: Arc<dyn ColumnCipher>) -> Self {
		Self { pool, cipher }
	}

	#[tracing::instrument(skip(self, token), fields(user_id = %token.user_id, provider_id = %token.provider_id))]
	pub async fn upsert_token(&self, token: &ProviderToken) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO provider_tokens (user_id, provider_id, access_token, refresh_token, expires_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?)
			ON CONFLICT(user_id, provider_id) DO UPDATE SET
				access_token = excluded.access_token,
				refresh_token = excluded.refresh_token,
				expires_at = excluded.expires_at,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(token.user_id.to_string())
		.bind(token.provider_id.to_string())
		.bind(seal_secret(self.cipher.as_ref(), &token.access_token)?)
		.bind(seal_secret(self.cipher.as_ref(), &token.refresh_token)?)
		.bind(db_time(&token.expires_at))
		.bind(db_time(&Utc::now()))
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_token(&self, user_id: Id, provider_id: Id) -> Result<Option<ProviderToken>> {
		let row = sqlx::query(
			"SELECT user_id, provider_id, access_token, refresh_token, expires_at FROM provider_tokens WHERE user_id = ? AND provider_id = ?",
		)
		.bind(user_id.to_string())
		.bind(provider_id.to_string())
		.fetch_optional(&self.pool)
		.await?;
		row.map(|r| self.parse_token_row(&r)).transpose()
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_tokens_for_provider(&self, provider_id: Id) -> Result<Vec<ProviderToken>> {
		let rows = sqlx::query(
			"SELECT user_id, provider_id, access_token, refresh_token, expires_at FROM provider_tokens WHERE provider_id = ? ORDER BY user_id",
		)
		.bind(provider_id.to_string())
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(|r| self.parse_token_row(r)).collect()
	}

	fn parse_token_row(&self, row: &SqliteRow) -> Result<ProviderToken> {
		let access: String = row.get("access_token");
		let refresh: String = row.get("refresh_token");
		Ok(ProviderToken {
			user_id: parse_id(row.get("user_id"))?,
			provider_id: parse_id(row.get("provider_id"))?,
			access_token: open_secret(self.cipher.as_ref(), &access)?,
			refresh_token: open_secret(self.cipher.as_ref(), &refresh)?,
			expires_at: parse_time(row.get("expires_at"))?,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_store;
	use infra_common_config::SecretString;

	#[tokio::test]
	async fn upsert_overwrites_tokens() {
		let store = create_test_store().await;
		let user = Id::generate();
		let provider = Id::generate();
		let mut token = ProviderToken {
			user_id: user,
			provider_id: provider,
			access_token: SecretString::from("a1"),
			refresh_token: SecretString::from("r1"),
			expires_at: Utc::now(),
		};
		store.provider_tokens.upsert_token(&token).await.unwrap();
		token.access_token = SecretString::from("a2");
		store.provider_tokens.upsert_token(&token).await.unwrap();

		let stored = store.provider_tokens.get_token(user, provider).await.unwrap().unwrap();
		assert_eq!(stored.access_token.expose(), "a2");
		assert_eq!(stored.refresh_token.expose(), "r1");
		assert_eq!(
			store.provider_tokens.list_tokens_for_provider(provider).await.unwrap().len(),
			1
		);
	}
}
