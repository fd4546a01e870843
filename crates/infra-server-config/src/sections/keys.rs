// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Root key provider selection.

use serde::Deserialize;

const DEFAULT_ROOT_KEY_ID: &str = "infra-root-key";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct KeysConfigLayer {
	#[serde(default)]
	pub provider: Option<String>,
	/// Storage that holds the native root key, or the vault storage name.
	#[serde(default)]
	pub storage: Option<String>,
	#[serde(default)]
	pub root_key_id: Option<String>,
}

impl KeysConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.provider.is_some() {
			self.provider = other.provider;
		}
		if other.storage.is_some() {
			self.storage = other.storage;
		}
		if other.root_key_id.is_some() {
			self.root_key_id = other.root_key_id;
		}
	}

	pub fn finalize(self) -> KeysConfig {
		KeysConfig {
			provider: self.provider.unwrap_or_else(|| "native".to_string()),
			storage: self.storage,
			root_key_id: self
				.root_key_id
				.unwrap_or_else(|| DEFAULT_ROOT_KEY_ID.to_string()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeysConfig {
	pub provider: String,
	pub storage: Option<String>,
	pub root_key_id: String,
}

impl Default for KeysConfig {
	fn default() -> Self {
		KeysConfigLayer::default().finalize()
	}
}
