// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The declarative import document.
//!
//! ```yaml
//! providers:
//!   - name: okta
//!     url: example.okta.com
//!     clientID: 0oa1
//!     clientSecret: kubernetes:infra-okta/clientSecret
//!     kind: okta
//!     apiToken: env:OKTA_API_TOKEN
//! grants:
//!   - user: alice@example.com
//!     role: admin
//!     resource: c1
//!   - group: engineering
//!     provider: okta
//!     role: edit
//!     resource: c1.prod
//! users:
//!   - name: bob@example.com
//!     groups: [engineering]
//! ```
//!
//! A missing `providers` or `grants` key leaves that part of the store alone;
//! an explicit empty list is a request to remove everything imported before.

use std::collections::BTreeSet;
use std::path::Path;

use infra_common_config::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Privilege used when a grant does not name a role.
pub const DEFAULT_GRANT_ROLE: &str = "connect";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDocument {
	#[serde(default)]
	pub providers: Option<Vec<ProviderDeclaration>>,
	#[serde(default)]
	pub grants: Option<Vec<GrantDeclaration>>,
	#[serde(default)]
	pub users: Vec<UserDeclaration>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDeclaration {
	pub name: String,
	pub url: String,
	#[serde(rename = "clientID", alias = "clientId")]
	pub client_id: String,
	/// Secret reference.
	pub client_secret: SecretString,
	#[serde(default)]
	pub kind: Option<String>,
	/// Secret reference for the directory API used by sync.
	#[serde(default)]
	pub api_token: Option<SecretString>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct GrantDeclaration {
	#[serde(default)]
	pub user: Option<String>,
	#[serde(default)]
	pub group: Option<String>,
	#[serde(default)]
	pub provider: Option<String>,
	#[serde(default)]
	pub role: Option<String>,
	pub resource: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantIdentity<'a> {
	User(&'a str),
	Group(&'a str),
}

impl GrantDeclaration {
	pub fn identity(&self) -> Option<GrantIdentity<'_>> {
		match (non_empty(&self.user), non_empty(&self.group)) {
			(Some(user), None) => Some(GrantIdentity::User(user)),
			(None, Some(group)) => Some(GrantIdentity::Group(group)),
			_ => None,
		}
	}

	pub fn role(&self) -> &str {
		non_empty(&self.role).unwrap_or(DEFAULT_GRANT_ROLE)
	}

	pub fn provider(&self) -> Option<&str> {
		non_empty(&self.provider)
	}

	/// `<identity> - <role> - <resource>`, for error messages.
	pub fn describe(&self) -> String {
		let who = match self.identity() {
			Some(GrantIdentity::User(name)) | Some(GrantIdentity::Group(name)) => name,
			None => "<no identity>",
		};
		format!("{who} - {} - {}", self.role(), self.resource)
	}
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct UserDeclaration {
	pub name: String,
	#[serde(default)]
	pub groups: Vec<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
	value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ImportDocument {
	pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
		if content.trim().is_empty() {
			return Ok(Self::default());
		}
		serde_yaml::from_str(content)
	}

	pub fn load(path: &Path) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
			path: path.to_path_buf(),
			source,
		})?;
		let document = Self::from_yaml(&content).map_err(|source| ConfigError::YamlParse {
			path: path.to_path_buf(),
			source,
		})?;
		document.validate()?;
		Ok(document)
	}

	/// Structural checks that need no store access.
	pub fn validate(&self) -> Result<(), ConfigError> {
		let mut names = BTreeSet::new();
		for provider in self.providers.iter().flatten() {
			if provider.name.trim().is_empty() {
				return Err(ConfigError::Validation("provider name is required".into()));
			}
			if provider.url.trim().is_empty() || provider.client_id.trim().is_empty() {
				return Err(ConfigError::Validation(format!(
					"provider {:?} requires url and clientID",
					provider.name
				)));
			}
			if provider.client_secret.is_empty() {
				return Err(ConfigError::Validation(format!(
					"provider {:?} requires clientSecret",
					provider.name
				)));
			}
			if !names.insert(provider.name.as_str()) {
				return Err(ConfigError::Validation(format!(
					"provider {:?} is declared more than once",
					provider.name
				)));
			}
		}

		for grant in self.grants.iter().flatten() {
			if grant.identity().is_none() {
				return Err(ConfigError::Validation(format!(
					"grant {}: exactly one of user or group is required",
					grant.describe()
				)));
			}
			if grant.resource.trim().is_empty() {
				return Err(ConfigError::Validation(format!(
					"grant {}: resource is required",
					grant.describe()
				)));
			}
		}

		for user in &self.users {
			if user.name.trim().is_empty() {
				return Err(ConfigError::Validation("user name is required".into()));
			}
		}

		Ok(())
	}
}
