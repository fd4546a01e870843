// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use infra_server_k8s::K8sClient;

use super::SecretStorage;
use crate::error::{SecretsError, SecretsResult};

/// Secrets stored as keys of namespace secrets, addressed as `secret/key`.
pub struct KubernetesStorage {
	client: Arc<dyn K8sClient>,
	namespace: String,
}

impl KubernetesStorage {
	pub fn new(client: Arc<dyn K8sClient>, namespace: impl Into<String>) -> Self {
		Self {
			client,
			namespace: namespace.into(),
		}
	}

	pub fn namespace(&self) -> &str {
		&self.namespace
	}
}

/// Replace characters Kubernetes does not allow in names and keys, then split
/// into `(secret, key)`.
fn split_name(name: &str) -> SecretsResult<(String, String)> {
	let cleaned: String = name
		.chars()
		.map(|c| {
			if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '/') {
				c
			} else {
				'_'
			}
		})
		.collect();
	let parts: Vec<&str> = cleaned.split('/').collect();
	match parts.as_slice() {
		[secret, key] => Ok((secret.to_string(), key.to_string())),
		_ => Err(SecretsError::InvalidSecretName(format!(
			"expected exactly 2 parts in kubernetes secret path but was {}",
			parts.len()
		))),
	}
}

#[async_trait]
impl SecretStorage for KubernetesStorage {
	fn kind(&self) -> &'static str {
		"kubernetes"
	}

	async fn get(&self, name: &str) -> SecretsResult<Option<Vec<u8>>> {
		let (secret, key) = split_name(name)?;
		match self.client.get_secret(&self.namespace, &secret).await? {
			None => Ok(None),
			Some(data) => data
				.get(&key)
				.cloned()
				.map(Some)
				.ok_or_else(|| SecretsError::SecretNotFound(format!("kubernetes:{name}"))),
		}
	}

	#[tracing::instrument(skip(self, value), fields(namespace = %self.namespace))]
	async fn set(&self, name: &str, value: &[u8]) -> SecretsResult<()> {
		let (secret, key) = split_name(name)?;
		self
			.client
			.set_secret_key(&self.namespace, &secret, &key, value)
			.await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use infra_server_k8s::MockK8sClient;

	#[test]
	fn names_need_two_parts() {
		assert_eq!(
			split_name("infra/root-key").unwrap(),
			("infra".to_string(), "root-key".to_string())
		);
		assert!(split_name("single").is_err());
		assert!(split_name("a/b/c").is_err());
	}

	#[test]
	fn invalid_characters_become_underscores() {
		assert_eq!(
			split_name("my secret/key:1").unwrap(),
			("my_secret".to_string(), "key_1".to_string())
		);
	}

	#[tokio::test]
	async fn absent_secret_is_none_missing_key_is_error() {
		let storage = KubernetesStorage::new(Arc::new(MockK8sClient::new()), "infra");
		assert!(storage.get("keys/root").await.unwrap().is_none());

		storage.set("keys/root", b"value").await.unwrap();
		assert_eq!(storage.get("keys/root").await.unwrap(), Some(b"value".to_vec()));
		assert!(matches!(
			storage.get("keys/other").await,
			Err(SecretsError::SecretNotFound(_))
		));
	}
}
