// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HashiCorp Vault over its HTTP API: KV v2 for secret storage and the
//! transit engine for wrapping data keys.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use infra_common_config::SecretString;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tracing::instrument;

use super::SecretStorage;
use crate::error::{SecretsError, SecretsResult};

pub const DEFAULT_VAULT_ALGORITHM: &str = "aes256-gcm96";

#[derive(Debug, Clone)]
pub struct VaultConfig {
	pub address: String,
	pub token: SecretString,
	pub namespace: Option<String>,
	pub secret_mount: String,
	pub transit_mount: String,
}

impl VaultConfig {
	pub fn new(address: impl Into<String>, token: SecretString) -> Self {
		Self {
			address: address.into(),
			token,
			namespace: None,
			secret_mount: "/secret".to_string(),
			transit_mount: "/transit".to_string(),
		}
	}
}

pub struct VaultClient {
	http: Client,
	config: VaultConfig,
}

/// Vault paths may not contain `/` or `:` inside a single secret name.
fn escape_name(name: &str) -> String {
	name.replace(['/', ':'], "_")
}

fn mount(path: &str) -> String {
	format!("/{}", path.trim_matches('/'))
}

impl VaultClient {
	pub fn new(config: VaultConfig) -> SecretsResult<Self> {
		let http = infra_common_http::builder("registry").build()?;
		Ok(Self::with_client(http, config))
	}

	pub fn with_client(http: Client, config: VaultConfig) -> Self {
		Self { http, config }
	}

	fn url(&self, path: &str) -> String {
		format!("{}/v1{}", self.config.address.trim_end_matches('/'), path)
	}

	async fn call(&self, method: Method, path: &str, body: Option<Value>) -> SecretsResult<Option<Value>> {
		let mut request = self
			.http
			.request(method, self.url(path))
			.header("X-Vault-Token", self.config.token.expose().as_str());
		if let Some(ns) = &self.config.namespace {
			request = request.header("X-Vault-Namespace", ns);
		}
		if let Some(body) = body {
			request = request.json(&body);
		}

		let response = request.send().await?;
		let status = response.status();
		if status == StatusCode::NOT_FOUND {
			return Ok(None);
		}
		if status == StatusCode::NO_CONTENT {
			return Ok(Some(Value::Null));
		}
		if !status.is_success() {
			let message = response.text().await.unwrap_or_default();
			return Err(SecretsError::Vault {
				status: status.as_u16(),
				message,
			});
		}
		Ok(Some(response.json::<Value>().await?))
	}

	/// Create a transit key; existing keys are left as they are.
	#[instrument(skip(self))]
	pub async fn create_transit_key(&self, name: &str) -> SecretsResult<()> {
		let path = format!("{}/keys/{}", mount(&self.config.transit_mount), escape_name(name));
		self
			.call(
				Method::POST,
				&path,
				Some(json!({
					"convergent_encryption": false,
					"derived": false,
					"exportable": false,
					"allow_plaintext_backup": false,
					"type": DEFAULT_VAULT_ALGORITHM,
				})),
			)
			.await?;
		Ok(())
	}

	#[instrument(skip(self, plaintext))]
	pub async fn transit_encrypt(&self, key_id: &str, plaintext: &[u8]) -> SecretsResult<Vec<u8>> {
		let path = format!("{}/encrypt/{}", mount(&self.config.transit_mount), escape_name(key_id));
		let body = self
			.call(Method::POST, &path, Some(json!({ "plaintext": STANDARD.encode(plaintext) })))
			.await?
			.ok_or_else(|| SecretsError::SecretNotFound(format!("vault transit key {key_id}")))?;
		body["data"]["ciphertext"]
			.as_str()
			.map(|c| c.as_bytes().to_vec())
			.ok_or_else(|| SecretsError::Encryption("vault returned no ciphertext".into()))
	}

	#[instrument(skip(self, ciphertext))]
	pub async fn transit_decrypt(&self, key_id: &str, ciphertext: &[u8]) -> SecretsResult<Vec<u8>> {
		let path = format!("{}/decrypt/{}", mount(&self.config.transit_mount), escape_name(key_id));
		let ciphertext = String::from_utf8(ciphertext.to_vec())
			.map_err(|_| SecretsError::CorruptedData("vault ciphertext is not utf-8".into()))?;
		let body = self
			.call(Method::POST, &path, Some(json!({ "ciphertext": ciphertext })))
			.await?
			.ok_or_else(|| SecretsError::SecretNotFound(format!("vault transit key {key_id}")))?;
		let plaintext = body["data"]["plaintext"]
			.as_str()
			.ok_or_else(|| SecretsError::Decryption("vault returned no plaintext".into()))?;
		STANDARD
			.decode(plaintext)
			.map_err(|e| SecretsError::Decryption(format!("vault plaintext: {e}")))
	}

	fn kv_path(&self, name: &str) -> String {
		format!("{}/data/{}", mount(&self.config.secret_mount), escape_name(name))
	}
}

#[async_trait]
impl SecretStorage for VaultClient {
	fn kind(&self) -> &'static str {
		"vault"
	}

	#[instrument(skip(self))]
	async fn get(&self, name: &str) -> SecretsResult<Option<Vec<u8>>> {
		let Some(body) = self.call(Method::GET, &self.kv_path(name), None).await? else {
			return Ok(None);
		};
		match &body["data"]["data"] {
			Value::Null => Ok(None),
			Value::Object(map) => match map.get("data") {
				Some(Value::String(s)) => Ok(Some(s.as_bytes().to_vec())),
				None => Ok(None),
				Some(_) => Err(SecretsError::CorruptedData("vault: secret data is not a string".into())),
			},
			_ => Err(SecretsError::CorruptedData(
				"vault: secret data is unexpectedly not stored in a map".into(),
			)),
		}
	}

	#[instrument(skip(self, value))]
	async fn set(&self, name: &str, value: &[u8]) -> SecretsResult<()> {
		let value = String::from_utf8(value.to_vec())
			.map_err(|_| SecretsError::Configuration("vault secrets must be utf-8".into()))?;
		self
			.call(
				Method::POST,
				&self.kv_path(name),
				Some(json!({ "data": { "data": value } })),
			)
			.await?;
		Ok(())
	}
}
