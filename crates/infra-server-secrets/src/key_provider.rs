// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Root key providers wrap and unwrap the data key.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{info, instrument};
use zeroize::Zeroizing;

use crate::data_key::DataKey;
use crate::encryption::{generate_key, key_from_slice, unwrap_key, wrap_key, KEY_SIZE};
use crate::error::{SecretsError, SecretsResult};
use crate::storage::{SecretStorage, VaultClient};

pub const NATIVE_ALGORITHM: &str = "aesgcm";

/// Generates data keys and recovers them from their wrapped form.
#[async_trait]
pub trait RootKeyProvider: Send + Sync {
	/// Algorithm label stored next to the wrapped key.
	fn algorithm(&self) -> &'static str;

	async fn generate_data_key(&self, root_key_id: &str) -> SecretsResult<DataKey>;

	async fn decrypt_data_key(&self, root_key_id: &str, encrypted: &[u8]) -> SecretsResult<DataKey>;
}

/// Keeps the root key in a secret storage under the root key id.
pub struct NativeKeyProvider {
	storage: Arc<dyn SecretStorage>,
}

impl NativeKeyProvider {
	pub fn new(storage: Arc<dyn SecretStorage>) -> Self {
		Self { storage }
	}

	async fn load_root_key(&self, root_key_id: &str) -> SecretsResult<Option<Zeroizing<[u8; KEY_SIZE]>>> {
		let Some(stored) = self.storage.get(root_key_id).await? else {
			return Ok(None);
		};
		let text = std::str::from_utf8(&stored)
			.map_err(|_| SecretsError::CorruptedData("root key is not base64 text".into()))?;
		let raw = Zeroizing::new(
			STANDARD
				.decode(text.trim())
				.map_err(|e| SecretsError::CorruptedData(format!("root key: {e}")))?,
		);
		key_from_slice(&raw).map(Some)
	}

	async fn root_key_or_create(&self, root_key_id: &str) -> SecretsResult<Zeroizing<[u8; KEY_SIZE]>> {
		if let Some(key) = self.load_root_key(root_key_id).await? {
			return Ok(key);
		}
		let key = generate_key();
		let encoded = Zeroizing::new(STANDARD.encode(key.as_slice()));
		self.storage.set(root_key_id, encoded.as_bytes()).await?;
		info!(
			root_key_id = %root_key_id,
			storage = self.storage.kind(),
			"created root key"
		);
		Ok(key)
	}
}

#[async_trait]
impl RootKeyProvider for NativeKeyProvider {
	fn algorithm(&self) -> &'static str {
		NATIVE_ALGORITHM
	}

	#[instrument(skip(self))]
	async fn generate_data_key(&self, root_key_id: &str) -> SecretsResult<DataKey> {
		let root = self.root_key_or_create(root_key_id).await?;
		let data_key = generate_key();
		let encrypted = wrap_key(&root, &data_key)?;
		Ok(DataKey::new(data_key, encrypted, NATIVE_ALGORITHM, root_key_id))
	}

	#[instrument(skip(self, encrypted))]
	async fn decrypt_data_key(&self, root_key_id: &str, encrypted: &[u8]) -> SecretsResult<DataKey> {
		let root = self
			.load_root_key(root_key_id)
			.await?
			.ok_or_else(|| SecretsError::SecretNotFound(format!("root key {root_key_id}")))?;
		let data_key = unwrap_key(&root, encrypted)?;
		Ok(DataKey::new(
			data_key,
			encrypted.to_vec(),
			NATIVE_ALGORITHM,
			root_key_id,
		))
	}
}

/// Vault transit engine as root key provider.
pub struct VaultKeyProvider {
	vault: Arc<VaultClient>,
}

impl VaultKeyProvider {
	pub fn new(vault: Arc<VaultClient>) -> Self {
		Self { vault }
	}
}

#[async_trait]
impl RootKeyProvider for VaultKeyProvider {
	fn algorithm(&self) -> &'static str {
		crate::storage::DEFAULT_VAULT_ALGORITHM
	}

	#[instrument(skip(self))]
	async fn generate_data_key(&self, root_key_id: &str) -> SecretsResult<DataKey> {
		self.vault.create_transit_key(root_key_id).await?;
		let data_key = generate_key();
		let encrypted = self.vault.transit_encrypt(root_key_id, data_key.as_slice()).await?;
		Ok(DataKey::new(data_key, encrypted, self.algorithm(), root_key_id))
	}

	#[instrument(skip(self, encrypted))]
	async fn decrypt_data_key(&self, root_key_id: &str, encrypted: &[u8]) -> SecretsResult<DataKey> {
		let plain = Zeroizing::new(self.vault.transit_decrypt(root_key_id, encrypted).await?);
		let data_key = key_from_slice(&plain)?;
		Ok(DataKey::new(
			data_key,
			encrypted.to_vec(),
			self.algorithm(),
			root_key_id,
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::{Encoding, FileStorage};

	fn provider(dir: &std::path::Path) -> NativeKeyProvider {
		NativeKeyProvider::new(Arc::new(FileStorage::new(dir, Encoding::None)))
	}

	#[tokio::test]
	async fn generated_key_decrypts_with_same_root() {
		let dir = tempfile::tempdir().unwrap();
		let native = provider(dir.path());

		let generated = native.generate_data_key("db.key").await.unwrap();
		assert_eq!(generated.algorithm(), "aesgcm");
		assert!(dir.path().join("db.key").exists());

		let recovered = native
			.decrypt_data_key("db.key", generated.encrypted())
			.await
			.unwrap();
		assert_eq!(recovered.key_id(), generated.key_id());
	}

	#[tokio::test]
	async fn root_key_is_reused() {
		let dir = tempfile::tempdir().unwrap();
		let native = provider(dir.path());
		native.generate_data_key("db.key").await.unwrap();
		let first = std::fs::read(dir.path().join("db.key")).unwrap();
		native.generate_data_key("db.key").await.unwrap();
		assert_eq!(std::fs::read(dir.path().join("db.key")).unwrap(), first);
	}

	#[tokio::test]
	async fn missing_root_key_fails_decrypt() {
		let dir = tempfile::tempdir().unwrap();
		let native = provider(dir.path());
		let err = native.decrypt_data_key("absent", b"whatever").await.unwrap_err();
		assert!(matches!(err, SecretsError::SecretNotFound(_)));
	}

	#[tokio::test]
	async fn different_root_cannot_decrypt() {
		let a = tempfile::tempdir().unwrap();
		let b = tempfile::tempdir().unwrap();
		let generated = provider(a.path()).generate_data_key("db.key").await.unwrap();
		provider(b.path()).generate_data_key("db.key").await.unwrap();

		let err = provider(b.path())
			.decrypt_data_key("db.key", generated.encrypted())
			.await
			.unwrap_err();
		assert!(matches!(err, SecretsError::Decryption(_)));
	}
}
