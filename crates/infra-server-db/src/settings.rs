// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Singleton organization settings: the organization id and the session
//! signing keypair. The private JWK is sealed at rest.

use std::sync::Arc;

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::cipher::{open_secret, seal_secret, ColumnCipher};
use crate::error::{DbError, Result};
use crate::types::{db_time, parse_id, Settings};

#[derive(Clone)]
pub struct SettingsRepository {
	pool: SqlitePool,
	cipher: Arc<dyn ColumnCipher>,
}

impl SettingsRepository {
	pub fn new(pool: SqlitePool, cipher: Arc<dyn ColumnCipher>) -> Self {
		Self { pool, cipher }
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_settings(&self) -> Result<Option<Settings>> {
		let row = sqlx::query("SELECT organization_id, private_jwk, public_jwk FROM settings WHERE id = 1")
			.fetch_optional(&self.pool)
			.await?;
		let Some(row) = row else {
			return Ok(None);
		};
		let private_jwk: String = row.get("private_jwk");
		Ok(Some(Settings {
			organization_id: parse_id(row.get("organization_id"))?,
			private_jwk: open_secret(self.cipher.as_ref(), &private_jwk)?,
			public_jwk: row.get("public_jwk"),
		}))
	}

	/// Inserts `settings` unless a row exists, then returns whichever row won.
	#[tracing::instrument(skip(self, settings), fields(organization_id = %settings.organization_id))]
	pub async fn create_settings(&self, settings: &Settings) -> Result<Settings> {
		let now = db_time(&Utc::now());
		let result = sqlx::query(
			r#"
			INSERT OR IGNORE INTO settings (id, organization_id, private_jwk, public_jwk, created_at, updated_at)
			VALUES (1, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(settings.organization_id.to_string())
		.bind(seal_secret(self.cipher.as_ref(), &settings.private_jwk)?)
		.bind(&settings.public_jwk)
		.bind(&now)
		.bind(&now)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 1 {
			tracing::info!(organization_id = %settings.organization_id, "settings initialized");
		}
		self
			.get_settings()
			.await?
			.ok_or_else(|| DbError::Internal("settings row missing after insert".to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_store;
	use infra_common_config::SecretString;
	use infra_server_api::Id;

	fn settings(jwk: &str) -> Settings {
		Settings {
			organization_id: Id::generate(),
			private_jwk: SecretString::from(jwk),
			public_jwk: "{\"kty\":\"OKP\"}".to_string(),
		}
	}

	#[tokio::test]
	async fn first_writer_wins() {
		let store = create_test_store().await;
		assert!(store.settings.get_settings().await.unwrap().is_none());

		let first = settings("private-1");
		let stored = store.settings.create_settings(&first).await.unwrap();
		assert_eq!(stored.organization_id, first.organization_id);
		assert_eq!(stored.private_jwk.expose(), "private-1");

		let again = store.settings.create_settings(&settings("private-2")).await.unwrap();
		assert_eq!(again.organization_id, first.organization_id);
		assert_eq!(again.private_jwk.expose(), "private-1");
	}

	#[tokio::test]
	async fn private_jwk_is_sealed_at_rest() {
		let store = create_test_store().await;
		store.settings.create_settings(&settings("private")).await.unwrap();
		let raw: String = sqlx::query_scalar("SELECT private_jwk FROM settings")
			.fetch_one(&store.pool)
			.await
			.unwrap();
		assert!(raw.starts_with("hex:"));
	}
}
