// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use super::{Encoding, SecretStorage};
use crate::error::{SecretsError, SecretsResult};

/// The reference name is the secret itself.
#[derive(Debug, Default, Clone)]
pub struct PlaintextStorage {
	encoding: Encoding,
}

impl PlaintextStorage {
	pub fn new(encoding: Encoding) -> Self {
		Self { encoding }
	}
}

#[async_trait]
impl SecretStorage for PlaintextStorage {
	fn kind(&self) -> &'static str {
		"plaintext"
	}

	async fn get(&self, name: &str) -> SecretsResult<Option<Vec<u8>>> {
		self.encoding.decode(name.as_bytes()).map(Some)
	}

	async fn set(&self, _name: &str, _value: &[u8]) -> SecretsResult<()> {
		Err(SecretsError::ReadOnly("plaintext"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn returns_name_verbatim() {
		let storage = PlaintextStorage::default();
		assert_eq!(storage.get("hunter2").await.unwrap(), Some(b"hunter2".to_vec()));
		assert!(storage.set("a", b"b").await.is_err());
	}

	#[tokio::test]
	async fn decodes_when_configured() {
		let storage = PlaintextStorage::new(Encoding::Base64);
		assert_eq!(storage.get("aGk=").await.unwrap(), Some(b"hi".to_vec()));
	}
}
