// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration layer for merging from multiple sources.

use serde::Deserialize;

use crate::sections::{
	AuthConfigLayer, CredentialsConfigLayer, DatabaseConfigLayer, DestinationsConfigLayer,
	HttpConfigLayer, ImportConfigLayer, KeysConfigLayer, LoggingConfigLayer, PathsConfigLayer,
	SecretStorageConfig, SyncConfigLayer,
};

/// Server configuration layer - all fields are Option for merging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfigLayer {
	#[serde(default)]
	pub http: Option<HttpConfigLayer>,
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub auth: Option<AuthConfigLayer>,
	#[serde(default)]
	pub keys: Option<KeysConfigLayer>,
	/// Replaced wholesale by a higher layer, never merged item by item.
	#[serde(default)]
	pub secrets: Option<Vec<SecretStorageConfig>>,
	#[serde(default)]
	pub sync: Option<SyncConfigLayer>,
	#[serde(default)]
	pub destinations: Option<DestinationsConfigLayer>,
	#[serde(default)]
	pub credentials: Option<CredentialsConfigLayer>,
	#[serde(default)]
	pub import: Option<ImportConfigLayer>,
	#[serde(default)]
	pub paths: Option<PathsConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

impl ServerConfigLayer {
	/// Merge another layer into this one. Other layer takes precedence.
	pub fn merge(&mut self, other: ServerConfigLayer) {
		merge_option(&mut self.http, other.http, HttpConfigLayer::merge);
		merge_option(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_option(&mut self.auth, other.auth, AuthConfigLayer::merge);
		merge_option(&mut self.keys, other.keys, KeysConfigLayer::merge);
		if other.secrets.is_some() {
			self.secrets = other.secrets;
		}
		merge_option(&mut self.sync, other.sync, SyncConfigLayer::merge);
		merge_option(
			&mut self.destinations,
			other.destinations,
			DestinationsConfigLayer::merge,
		);
		merge_option(
			&mut self.credentials,
			other.credentials,
			CredentialsConfigLayer::merge,
		);
		merge_option(&mut self.import, other.import, ImportConfigLayer::merge);
		merge_option(&mut self.paths, other.paths, PathsConfigLayer::merge);
		merge_option(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_option<T, F>(target: &mut Option<T>, source: Option<T>, merge_fn: F)
where
	F: FnOnce(&mut T, T),
{
	match (target.as_mut(), source) {
		(Some(t), Some(s)) => merge_fn(t, s),
		(None, Some(s)) => *target = Some(s),
		_ => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_merge_empty_layers() {
		let mut base = ServerConfigLayer::default();
		base.merge(ServerConfigLayer::default());
		assert!(base.http.is_none());
		assert!(base.secrets.is_none());
	}

	#[test]
	fn test_merge_preserves_base_when_other_empty() {
		let mut base = ServerConfigLayer {
			http: Some(HttpConfigLayer {
				port: Some(9000),
				..Default::default()
			}),
			..Default::default()
		};
		base.merge(ServerConfigLayer::default());
		assert_eq!(base.http.and_then(|h| h.port), Some(9000));
	}

	#[test]
	fn test_secrets_replaced_not_appended() {
		let storage = |kind: &str| SecretStorageConfig {
			kind: kind.to_string(),
			..Default::default()
		};
		let mut base = ServerConfigLayer {
			secrets: Some(vec![storage("env"), storage("file")]),
			..Default::default()
		};
		base.merge(ServerConfigLayer {
			secrets: Some(vec![storage("vault")]),
			..Default::default()
		});
		let secrets = base.secrets.unwrap();
		assert_eq!(secrets.len(), 1);
		assert_eq!(secrets[0].kind, "vault");
	}
}
