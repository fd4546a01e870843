// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authentication configuration section.
//!
//! Access keys are secret references (`kind:name`) resolved at startup, so
//! they are held as [`SecretString`] even when the reference itself is a
//! plaintext key.

use infra_common_config::SecretString;
use serde::Deserialize;

const DEFAULT_SESSION_DURATION_SECS: u64 = 12 * 60 * 60;
const DEFAULT_TOKEN_DURATION_SECS: u64 = 5 * 60;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfigLayer {
	#[serde(default)]
	pub root_access_key: Option<SecretString>,
	#[serde(default)]
	pub connector_access_key: Option<SecretString>,
	#[serde(default)]
	pub session_duration_secs: Option<u64>,
	#[serde(default)]
	pub token_duration_secs: Option<u64>,
}

impl AuthConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.root_access_key.is_some() {
			self.root_access_key = other.root_access_key;
		}
		if other.connector_access_key.is_some() {
			self.connector_access_key = other.connector_access_key;
		}
		if other.session_duration_secs.is_some() {
			self.session_duration_secs = other.session_duration_secs;
		}
		if other.token_duration_secs.is_some() {
			self.token_duration_secs = other.token_duration_secs;
		}
	}

	pub fn finalize(self) -> AuthConfig {
		AuthConfig {
			root_access_key: self.root_access_key.filter(|k| !k.is_empty()),
			connector_access_key: self.connector_access_key.filter(|k| !k.is_empty()),
			session_duration_secs: self
				.session_duration_secs
				.unwrap_or(DEFAULT_SESSION_DURATION_SECS),
			token_duration_secs: self.token_duration_secs.unwrap_or(DEFAULT_TOKEN_DURATION_SECS),
		}
	}
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
	/// Reference to the key imported for the `admin` identity.
	pub root_access_key: Option<SecretString>,
	/// Reference to the key imported for the `connector` identity.
	pub connector_access_key: Option<SecretString>,
	/// Lifetime of keys issued by login.
	pub session_duration_secs: u64,
	/// Lifetime of session JWTs minted by `/v1/tokens`.
	pub token_duration_secs: u64,
}

impl Default for AuthConfig {
	fn default() -> Self {
		AuthConfigLayer::default().finalize()
	}
}
