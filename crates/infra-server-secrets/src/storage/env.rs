// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;

use super::{Encoding, SecretStorage};
use crate::error::{SecretsError, SecretsResult};

/// Reads secrets from environment variables named by the reference.
#[derive(Debug, Default, Clone)]
pub struct EnvStorage {
	encoding: Encoding,
}

impl EnvStorage {
	pub fn new(encoding: Encoding) -> Self {
		Self { encoding }
	}
}

#[async_trait]
impl SecretStorage for EnvStorage {
	fn kind(&self) -> &'static str {
		"env"
	}

	async fn get(&self, name: &str) -> SecretsResult<Option<Vec<u8>>> {
		match std::env::var_os(name) {
			Some(value) => {
				let value = value
					.into_string()
					.map_err(|_| SecretsError::CorruptedData(format!("{name} is not valid unicode")))?;
				self.encoding.decode(value.as_bytes()).map(Some)
			}
			None => Ok(None),
		}
	}

	async fn set(&self, _name: &str, _value: &[u8]) -> SecretsResult<()> {
		Err(SecretsError::ReadOnly("env"))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn missing_variable_is_none() {
		let storage = EnvStorage::default();
		assert!(storage
			.get("INFRA_TEST_SURELY_UNSET_VARIABLE")
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn reads_process_environment() {
		let storage = EnvStorage::default();
		let path = std::env::var("PATH").unwrap_or_default();
		if !path.is_empty() {
			assert_eq!(storage.get("PATH").await.unwrap(), Some(path.into_bytes()));
		}
	}
}
