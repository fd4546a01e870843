// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Declared secret storages.
//!
//! ```toml
//! [[secrets]]
//! name = "prod-vault"
//! kind = "vault"
//! config = { address = "https://vault:8200", token = "env:VAULT_TOKEN" }
//! ```
//!
//! The keys under `config` depend on the kind and are checked when the
//! storage is built.

use std::collections::BTreeMap;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SecretStorageConfig {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub kind: String,
	#[serde(default)]
	pub config: BTreeMap<String, String>,
}

impl SecretStorageConfig {
	pub fn storage_name(&self) -> &str {
		match self.name.as_deref() {
			Some(name) if !name.is_empty() => name,
			_ => &self.kind,
		}
	}
}
