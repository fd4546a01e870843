// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The process-wide data key that seals database columns.
//!
//! Sealed columns are `<key-id>:<base64(nonce ‖ ciphertext)>`, where the key
//! id is the hex checksum of the wrapped data key. A value sealed under any
//! other data key is rejected before decryption is attempted.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use infra_server_db::{ColumnCipher, DbError, EncryptionKey, EncryptionKeyRepository, SealError};
use tracing::{info, instrument, warn};
use zeroize::Zeroizing;

use crate::encryption::{decrypt, encrypt, key_checksum, EncryptedData, KEY_ID_SIZE, KEY_SIZE};
use crate::error::{SecretsError, SecretsResult};
use crate::key_provider::RootKeyProvider;

/// Name of the stored row holding the wrapped database key.
pub const DB_KEY_NAME: &str = "dbkey";

pub struct DataKey {
	plaintext: Zeroizing<[u8; KEY_SIZE]>,
	encrypted: Vec<u8>,
	algorithm: String,
	root_key_id: String,
	checksum: [u8; KEY_ID_SIZE],
}

impl DataKey {
	pub fn new(
		plaintext: Zeroizing<[u8; KEY_SIZE]>,
		encrypted: Vec<u8>,
		algorithm: impl Into<String>,
		root_key_id: impl Into<String>,
	) -> Self {
		let checksum = key_checksum(&encrypted);
		Self {
			plaintext,
			encrypted,
			algorithm: algorithm.into(),
			root_key_id: root_key_id.into(),
			checksum,
		}
	}

	pub fn encrypted(&self) -> &[u8] {
		&self.encrypted
	}

	pub fn algorithm(&self) -> &str {
		&self.algorithm
	}

	pub fn root_key_id(&self) -> &str {
		&self.root_key_id
	}

	/// Numeric form of the checksum, stored as the key row id.
	pub fn key_id(&self) -> i32 {
		i32::from_be_bytes(self.checksum)
	}

	fn checksum_hex(&self) -> String {
		hex::encode(self.checksum)
	}

	pub fn seal_bytes(&self, plaintext: &[u8]) -> SecretsResult<String> {
		let sealed = encrypt(&self.plaintext, plaintext)?;
		Ok(format!(
			"{}:{}",
			self.checksum_hex(),
			STANDARD.encode(sealed.to_bytes())
		))
	}

	pub fn open_bytes(&self, sealed: &str) -> SecretsResult<Zeroizing<Vec<u8>>> {
		let (id, body) = sealed
			.split_once(':')
			.ok_or_else(|| SecretsError::CorruptedData("sealed value has no key id".into()))?;
		if id != self.checksum_hex() {
			return Err(SecretsError::WrongKey);
		}
		let raw = STANDARD
			.decode(body)
			.map_err(|e| SecretsError::CorruptedData(format!("decoding payload: {e}")))?;
		decrypt(&self.plaintext, &EncryptedData::from_bytes(&raw)?)
	}
}

impl fmt::Debug for DataKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DataKey")
			.field("key_id", &self.checksum_hex())
			.field("algorithm", &self.algorithm)
			.field("root_key_id", &self.root_key_id)
			.finish_non_exhaustive()
	}
}

impl ColumnCipher for DataKey {
	fn seal(&self, plaintext: &[u8]) -> Result<String, SealError> {
		self.seal_bytes(plaintext).map_err(|e| SealError(e.to_string()))
	}

	fn open(&self, sealed: &str) -> Result<Vec<u8>, SealError> {
		self
			.open_bytes(sealed)
			.map(|plain| plain.to_vec())
			.map_err(|e| SealError(e.to_string()))
	}
}

/// Recover the database key, or create and store one on first start.
///
/// A stored key wrapped by a different provider, or by a root key the
/// provider no longer holds, is an error: the caller must not continue.
#[instrument(skip(keys, provider), fields(algorithm = provider.algorithm()))]
pub async fn load_or_create_db_key(
	keys: &EncryptionKeyRepository,
	provider: &dyn RootKeyProvider,
	root_key_id: &str,
) -> SecretsResult<DataKey> {
	if let Some(stored) = keys.get_by_name(DB_KEY_NAME).await? {
		return unwrap_stored(provider, &stored).await;
	}

	let key = provider.generate_data_key(root_key_id).await?;
	let row = EncryptionKey {
		key_id: key.key_id(),
		name: DB_KEY_NAME.to_string(),
		encrypted: key.encrypted().to_vec(),
		algorithm: key.algorithm().to_string(),
		root_key_id: key.root_key_id().to_string(),
		created_at: Utc::now(),
	};
	match keys.create(&row).await {
		Ok(()) => {
			info!(key_id = %key.checksum_hex(), "created database encryption key");
			Ok(key)
		}
		Err(DbError::Duplicate(_)) => {
			warn!("database key created concurrently, using the stored key");
			let stored = keys
				.get_by_name(DB_KEY_NAME)
				.await?
				.ok_or_else(|| SecretsError::Internal("database key vanished".into()))?;
			unwrap_stored(provider, &stored).await
		}
		Err(e) => Err(e.into()),
	}
}

async fn unwrap_stored(provider: &dyn RootKeyProvider, stored: &EncryptionKey) -> SecretsResult<DataKey> {
	if stored.algorithm != provider.algorithm() {
		return Err(SecretsError::Configuration(format!(
			"database key was wrapped with {:?} but the configured key provider uses {:?}",
			stored.algorithm,
			provider.algorithm()
		)));
	}
	provider
		.decrypt_data_key(&stored.root_key_id, &stored.encrypted)
		.await
}
