// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Startup: secret storages, the database key, the store, the signing key
//! and the bootstrap identities.

use std::sync::Arc;

use infra_common_config::SecretString;
use infra_server_api::Id;
use infra_server_auth::{
	access_key, load_or_create_settings,
	permissions::{ADMIN, CONNECTOR},
	AuthError, SessionSigner,
};
use infra_server_config::ServerConfig;
use infra_server_db::{
	create_pool, run_migrations, ChangeHub, ColumnCipher, DbError, EncryptionKeyRepository, Store,
};
use infra_server_secrets::{
	load_or_create_db_key, RegistryOptions, SecretRegistry, SecretsError, StorageDeclaration,
};

/// Identity the root access key is imported for.
pub const ADMIN_IDENTITY: &str = "admin";
/// Identity the connector access key is imported for.
pub const CONNECTOR_IDENTITY: &str = "connector";

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
	#[error("unsupported database driver {0:?}")]
	UnsupportedDriver(String),

	#[error("database: {0}")]
	Db(#[from] DbError),

	#[error("secrets: {0}")]
	Secrets(#[from] SecretsError),

	#[error("auth: {0}")]
	Auth(#[from] AuthError),

	#[error("{key}: {source}")]
	AccessKey {
		key: &'static str,
		#[source]
		source: SecretsError,
	},
}

pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Everything the registry opens before it can serve.
pub struct Registry {
	pub store: Store,
	pub secrets: Arc<SecretRegistry>,
	pub signer: Arc<SessionSigner>,
	pub organization_id: Id,
}

pub async fn build_secret_registry(config: &ServerConfig) -> Result<SecretRegistry> {
	let declarations: Vec<StorageDeclaration> = config
		.secrets
		.iter()
		.map(|s| StorageDeclaration {
			name: s.name.clone(),
			kind: s.kind.clone(),
			config: s.config.clone(),
		})
		.collect();
	let options = RegistryOptions {
		file_dir: config.paths.data_dir.join("secrets"),
		kube_client: None,
	};
	Ok(SecretRegistry::from_declarations(&declarations, options).await?)
}

/// Opens the database, recovers its encryption key and loads the registry's
/// settings.
#[tracing::instrument(skip_all, fields(driver = %config.database.driver))]
pub async fn open(config: &ServerConfig) -> Result<Registry> {
	if config.database.driver != "sqlite" {
		return Err(BootstrapError::UnsupportedDriver(config.database.driver.clone()));
	}
	let secrets = Arc::new(build_secret_registry(config).await?);

	let pool = create_pool(&config.database.url).await?;
	run_migrations(&pool).await?;

	let key_provider = secrets.key_provider(&config.keys.provider, config.keys.storage.as_deref())?;
	let keys = EncryptionKeyRepository::new(pool.clone());
	let data_key = load_or_create_db_key(&keys, key_provider.as_ref(), &config.keys.root_key_id).await?;
	let cipher: Arc<dyn ColumnCipher> = Arc::new(data_key);

	let store = Store::new(pool, cipher, Arc::new(ChangeHub::new()));
	let (settings, signer) = load_or_create_settings(&store.settings).await?;
	tracing::info!(organization_id = %settings.organization_id, "registry settings loaded");

	Ok(Registry {
		store,
		secrets,
		signer: Arc::new(signer),
		organization_id: settings.organization_id,
	})
}

/// Imports the configured root and connector access keys. Both are secret
/// references; an absent one is skipped.
pub async fn bootstrap_identities(
	store: &Store,
	secrets: &SecretRegistry,
	config: &ServerConfig,
) -> Result<()> {
	let keys = [
		("root_access_key", &config.auth.root_access_key, ADMIN_IDENTITY, ADMIN),
		("connector_access_key", &config.auth.connector_access_key, CONNECTOR_IDENTITY, CONNECTOR),
	];
	for (key, reference, identity, permission) in keys {
		let Some(raw) = secrets
			.resolve_optional(reference.as_ref().map(|r| r.expose().as_str()))
			.await
			.map_err(|source| BootstrapError::AccessKey { key, source })?
		else {
			continue;
		};
		ensure_identity(store, identity, permission, &raw).await?;
	}
	Ok(())
}

/// Makes `name` exist with `permission` and owns `raw`. Idempotent.
#[tracing::instrument(skip(store, raw))]
pub async fn ensure_identity(
	store: &Store,
	name: &str,
	permission: &str,
	raw: &SecretString,
) -> Result<Id> {
	let user = store.users.find_or_create_user(name).await?;
	if !user.permissions.iter().any(|p| p == permission) {
		let mut permissions = user.permissions.clone();
		permissions.push(permission.to_string());
		store.users.set_permissions(user.id, &permissions).await?;
	}
	access_key::import(
		&store.access_keys,
		raw,
		&format!("{name}-bootstrap"),
		user.id,
		vec![permission.to_string()],
	)
	.await?;
	Ok(user.id)
}

#[cfg(test)]
mod tests {
	use super::*;
	use infra_server_db::testing;

	const ROOT_KEY: &str = "aaaaaaaaaa.bbbbbbbbbbbbbbbbbbbbbbbb";

	#[tokio::test]
	async fn ensure_identity_is_idempotent() {
		let store = testing::create_test_store().await;
		let raw = SecretString::from(ROOT_KEY);

		let first = ensure_identity(&store, ADMIN_IDENTITY, ADMIN, &raw).await.unwrap();
		let second = ensure_identity(&store, ADMIN_IDENTITY, ADMIN, &raw).await.unwrap();
		assert_eq!(first, second);

		let admin = store.users.get_user(first).await.unwrap().unwrap();
		assert_eq!(admin.permissions, vec![ADMIN.to_string()]);

		let record = access_key::lookup(&store.access_keys, ROOT_KEY).await.unwrap();
		assert_eq!(record.issued_for, first);
		assert_eq!(store.access_keys.list_access_keys(Some(first)).await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn bootstrap_skips_absent_keys() {
		let store = testing::create_test_store().await;
		let secrets = SecretRegistry::with_defaults(std::env::temp_dir());
		let mut config = ServerConfig::default();
		config.auth.connector_access_key = Some(SecretString::from(format!("plaintext:{ROOT_KEY}")));

		bootstrap_identities(&store, &secrets, &config).await.unwrap();
		assert!(store.users.get_user_by_name(ADMIN_IDENTITY).await.unwrap().is_none());
		let connector = store.users.get_user_by_name(CONNECTOR_IDENTITY).await.unwrap().unwrap();
		assert_eq!(connector.permissions, vec![CONNECTOR.to_string()]);
	}
}
