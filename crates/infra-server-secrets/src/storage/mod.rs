// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret storage backends addressed by `kind:name` references.

mod env;
mod file;
mod kubernetes;
mod plaintext;
mod vault;

use async_trait::async_trait;
use base64::{
	engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE},
	Engine,
};

use crate::error::{SecretsError, SecretsResult};

pub use env::EnvStorage;
pub use file::FileStorage;
pub use kubernetes::KubernetesStorage;
pub use plaintext::PlaintextStorage;
pub use vault::{VaultClient, VaultConfig, DEFAULT_VAULT_ALGORITHM};

/// A place secrets can be read from and, for most kinds, written to.
#[async_trait]
pub trait SecretStorage: Send + Sync {
	/// Kind label used in logs and errors.
	fn kind(&self) -> &'static str;

	/// Read a secret; `None` when the backend has nothing under `name`.
	async fn get(&self, name: &str) -> SecretsResult<Option<Vec<u8>>>;

	async fn set(&self, name: &str, value: &[u8]) -> SecretsResult<()>;
}

/// How stored values are encoded before being handed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
	#[default]
	None,
	Base64,
	Base64Url,
	Base64Raw,
}

impl Encoding {
	pub fn parse(value: Option<&str>) -> SecretsResult<Self> {
		match value.map(str::trim) {
			None | Some("") | Some("none") => Ok(Encoding::None),
			Some("base64") => Ok(Encoding::Base64),
			Some("base64url") => Ok(Encoding::Base64Url),
			Some("base64raw") => Ok(Encoding::Base64Raw),
			Some(other) => Err(SecretsError::Configuration(format!(
				"unknown encoding {other:?}, expected base64, base64url or base64raw"
			))),
		}
	}

	pub fn decode(&self, raw: &[u8]) -> SecretsResult<Vec<u8>> {
		let trimmed = trim_ascii(raw);
		let decoded = match self {
			Encoding::None => return Ok(raw.to_vec()),
			Encoding::Base64 => STANDARD.decode(trimmed),
			Encoding::Base64Url => URL_SAFE.decode(trimmed),
			Encoding::Base64Raw => STANDARD_NO_PAD.decode(trimmed),
		};
		decoded.map_err(|e| SecretsError::CorruptedData(format!("decoding secret: {e}")))
	}

	pub fn encode(&self, value: &[u8]) -> Vec<u8> {
		match self {
			Encoding::None => value.to_vec(),
			Encoding::Base64 => STANDARD.encode(value).into_bytes(),
			Encoding::Base64Url => URL_SAFE.encode(value).into_bytes(),
			Encoding::Base64Raw => STANDARD_NO_PAD.encode(value).into_bytes(),
		}
	}
}

fn trim_ascii(raw: &[u8]) -> &[u8] {
	let start = raw.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(raw.len());
	let end = raw
		.iter()
		.rposition(|b| !b.is_ascii_whitespace())
		.map_or(start, |i| i + 1);
	&raw[start..end]
}
