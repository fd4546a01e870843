// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Helpers for tests in this crate and in dependents.

use std::sync::Arc;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::cipher::{ColumnCipher, SealError};
use crate::notify::ChangeHub;
use crate::Store;

/// In-memory SQLite with the full schema. One connection, so every query
/// sees the same database.
pub async fn create_test_pool() -> SqlitePool {
	let pool = SqlitePoolOptions::new()
		.max_connections(1)
		.connect("sqlite::memory:")
		.await
		.unwrap();
	crate::run_migrations(&pool).await.unwrap();
	pool
}

/// Reversible, keyless cipher: hex with a marker prefix.
#[derive(Debug, Default)]
pub struct HexCipher;

impl ColumnCipher for HexCipher {
	fn seal(&self, plaintext: &[u8]) -> Result<String, SealError> {
		Ok(format!("hex:{}", hex::encode(plaintext)))
	}

	fn open(&self, sealed: &str) -> Result<Vec<u8>, SealError> {
		let body = sealed
			.strip_prefix("hex:")
			.ok_or_else(|| SealError("missing hex: prefix".to_string()))?;
		hex::decode(body).map_err(|e| SealError(e.to_string()))
	}
}

pub async fn create_test_store() -> Store {
	let pool = create_test_pool().await;
	Store::new(pool, Arc::new(HexCipher), Arc::new(ChangeHub::new()))
}

pub fn provider(name: &str) -> crate::types::NewProvider {
	crate::types::NewProvider {
		name: name.to_string(),
		url: format!("{name}.example.com"),
		client_id: format!("{name}-client"),
		client_secret: infra_common_config::SecretString::from("client-secret"),
		api_token: None,
		kind: infra_server_api::ProviderKind::Oidc,
		from_config: false,
	}
}
