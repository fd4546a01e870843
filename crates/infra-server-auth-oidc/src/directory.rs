// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identity directories: the set of users and groups a provider knows about.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use infra_common_config::SecretString;
use reqwest::header::{HeaderMap, LINK};
use serde::Deserialize;
use url::Url;

use crate::client::{provider_base_url, PROVIDER_REQUEST_TIMEOUT};
use crate::error::{OidcError, Result};

const PAGE_LIMIT: &str = "200";

/// Everything a provider reports in one sync pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
	/// User emails.
	pub users: BTreeSet<String>,
	/// Group name to member emails.
	pub groups: BTreeMap<String, BTreeSet<String>>,
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
	async fn snapshot(&self) -> Result<DirectorySnapshot>;
}

/// Okta management API at the domain root, authenticated with an `SSWS` API
/// token. Users and groups are those assigned to the provider's OIDC
/// application.
#[derive(Debug, Clone)]
pub struct OktaDirectory {
	base_url: Url,
	client_id: String,
	api_token: SecretString,
	http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OktaAppUser {
	#[serde(default)]
	credentials: Option<OktaAppUserCredentials>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OktaAppUserCredentials {
	user_name: String,
}

#[derive(Debug, Deserialize)]
struct OktaAppGroup {
	id: String,
}

#[derive(Debug, Deserialize)]
struct OktaGroup {
	profile: OktaGroupProfile,
}

#[derive(Debug, Deserialize)]
struct OktaGroupProfile {
	name: String,
}

#[derive(Debug, Deserialize)]
struct OktaUser {
	#[serde(default)]
	status: String,
	profile: OktaUserProfile,
}

#[derive(Debug, Deserialize)]
struct OktaUserProfile {
	#[serde(default)]
	email: Option<String>,
	login: String,
}

impl OktaUser {
	fn email(&self) -> Option<&str> {
		if !self.status.is_empty() && self.status != "ACTIVE" {
			return None;
		}
		Some(self.profile.email.as_deref().unwrap_or(&self.profile.login))
	}
}

/// The `rel="next"` target of a `Link` header, if any.
pub fn next_page(headers: &HeaderMap) -> Option<String> {
	headers
		.get_all(LINK)
		.iter()
		.filter_map(|v| v.to_str().ok())
		.flat_map(|v| v.split(','))
		.find_map(|link| {
			let (target, params) = link.split_once(';')?;
			let is_next = params
				.split(';')
				.any(|p| p.trim().trim_matches('"') == "rel=next" || p.trim() == "rel=\"next\"");
			if !is_next {
				return None;
			}
			let target = target.trim();
			target
				.strip_prefix('<')
				.and_then(|t| t.strip_suffix('>'))
				.map(str::to_string)
		})
}

impl OktaDirectory {
	pub fn new(domain: &str, client_id: impl Into<String>, api_token: SecretString) -> Result<Self> {
		let http_client = infra_common_http::builder("registry")
			.timeout(PROVIDER_REQUEST_TIMEOUT)
			.build()?;
		Ok(Self {
			base_url: provider_base_url(domain)?,
			client_id: client_id.into(),
			api_token,
			http_client,
		})
	}

	fn endpoint(&self, path: &str) -> Result<Url> {
		let mut url = self
			.base_url
			.join(path)
			.map_err(|e| OidcError::InvalidUrl(e.to_string()))?;
		url.query_pairs_mut().append_pair("limit", PAGE_LIMIT);
		Ok(url)
	}

	/// Follows `Link: rel="next"` until exhausted.
	async fn get_all<T: for<'de> Deserialize<'de>>(&self, first: Url) -> Result<Vec<T>> {
		let mut items = Vec::new();
		let mut next = Some(first.to_string());
		while let Some(url) = next.take() {
			let response = self
				.http_client
				.get(&url)
				.header("Accept", "application/json")
				.header("Authorization", format!("SSWS {}", self.api_token.expose()))
				.send()
				.await?;
			if !response.status().is_success() {
				let status = response.status();
				let body = response.text().await.unwrap_or_default();
				return Err(OidcError::ProviderError(format!("okta returned {status}: {body}")));
			}
			next = next_page(response.headers());
			let page: Vec<T> = response
				.json()
				.await
				.map_err(|e| OidcError::ParseError(format!("failed to parse okta page: {e}")))?;
			items.extend(page);
		}
		Ok(items)
	}

	async fn get_one<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
		let url = self
			.base_url
			.join(path)
			.map_err(|e| OidcError::InvalidUrl(e.to_string()))?;
		let response = self
			.http_client
			.get(url)
			.header("Accept", "application/json")
			.header("Authorization", format!("SSWS {}", self.api_token.expose()))
			.send()
			.await?
			.error_for_status()?;
		response
			.json()
			.await
			.map_err(|e| OidcError::ParseError(format!("failed to parse okta response: {e}")))
	}
}

#[async_trait]
impl IdentityDirectory for OktaDirectory {
	#[tracing::instrument(skip(self), fields(provider = %self.base_url))]
	async fn snapshot(&self) -> Result<DirectorySnapshot> {
		let app = format!("/api/v1/apps/{}", self.client_id);

		let app_users: Vec<OktaAppUser> = self.get_all(self.endpoint(&format!("{app}/users"))?).await?;
		let users: BTreeSet<String> = app_users
			.into_iter()
			.filter_map(|u| u.credentials.map(|c| c.user_name))
			.filter(|name| !name.is_empty())
			.collect();

		let app_groups: Vec<OktaAppGroup> = self.get_all(self.endpoint(&format!("{app}/groups"))?).await?;
		let mut groups = BTreeMap::new();
		for group in app_groups {
			let detail: OktaGroup = self.get_one(&format!("/api/v1/groups/{}", group.id)).await?;
			let members: Vec<OktaUser> = self
				.get_all(self.endpoint(&format!("/api/v1/groups/{}/users", group.id))?)
				.await?;
			let emails: BTreeSet<String> = members
				.iter()
				.filter_map(OktaUser::email)
				.map(str::to_string)
				.collect();
			groups.insert(detail.profile.name, emails);
		}

		tracing::debug!(users = users.len(), groups = groups.len(), "okta directory listed");
		Ok(DirectorySnapshot { users, groups })
	}
}

/// Fixed, replaceable directory for tests and for providers that only
/// support interactive login.
#[derive(Debug, Default)]
pub struct StaticDirectory {
	snapshot: Mutex<DirectorySnapshot>,
}

impl StaticDirectory {
	pub fn new(snapshot: DirectorySnapshot) -> Self {
		Self {
			snapshot: Mutex::new(snapshot),
		}
	}

	pub fn set(&self, snapshot: DirectorySnapshot) {
		if let Ok(mut guard) = self.snapshot.lock() {
			*guard = snapshot;
		}
	}
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
	async fn snapshot(&self) -> Result<DirectorySnapshot> {
		self
			.snapshot
			.lock()
			.map(|s| s.clone())
			.map_err(|_| OidcError::ProviderError("directory lock poisoned".to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use reqwest::header::HeaderValue;

	#[test]
	fn next_page_follows_rel_next() {
		let mut headers = HeaderMap::new();
		headers.append(
			LINK,
			HeaderValue::from_static("<https://x.okta.com/api/v1/users?limit=200>; rel=\"self\""),
		);
		headers.append(
			LINK,
			HeaderValue::from_static("<https://x.okta.com/api/v1/users?after=abc&limit=200>; rel=\"next\""),
		);
		assert_eq!(
			next_page(&headers).as_deref(),
			Some("https://x.okta.com/api/v1/users?after=abc&limit=200")
		);
	}

	#[test]
	fn next_page_handles_combined_header() {
		let mut headers = HeaderMap::new();
		headers.insert(
			LINK,
			HeaderValue::from_static("<https://a/self>; rel=\"self\", <https://a/next>; rel=\"next\""),
		);
		assert_eq!(next_page(&headers).as_deref(), Some("https://a/next"));
	}

	#[test]
	fn no_next_page_on_last() {
		let mut headers = HeaderMap::new();
		headers.insert(LINK, HeaderValue::from_static("<https://a/self>; rel=\"self\""));
		assert!(next_page(&headers).is_none());
		assert!(next_page(&HeaderMap::new()).is_none());
	}

	#[test]
	fn okta_users_prefer_email_and_skip_inactive() {
		let users: Vec<OktaUser> = serde_json::from_str(
			r#"[
				{"status": "ACTIVE", "profile": {"email": "alice@example.com", "login": "alice"}},
				{"status": "ACTIVE", "profile": {"login": "bob@example.com"}},
				{"status": "DEPROVISIONED", "profile": {"email": "carol@example.com", "login": "carol"}}
			]"#,
		)
		.unwrap();
		let emails: Vec<&str> = users.iter().filter_map(OktaUser::email).collect();
		assert_eq!(emails, vec!["alice@example.com", "bob@example.com"]);
	}

	#[test]
	fn okta_app_user_deserializes() {
		let users: Vec<OktaAppUser> = serde_json::from_str(
			r#"[{"id": "00u1", "credentials": {"userName": "alice@example.com"}}, {"id": "00u2"}]"#,
		)
		.unwrap();
		assert_eq!(
			users[0].credentials.as_ref().map(|c| c.user_name.as_str()),
			Some("alice@example.com")
		);
		assert!(users[1].credentials.is_none());
	}

	#[test]
	fn endpoint_adds_page_limit() {
		let dir = OktaDirectory::new("x.okta.com", "app-1", SecretString::from("token")).unwrap();
		assert_eq!(
			dir.endpoint("/api/v1/apps/app-1/users").unwrap().as_str(),
			"https://x.okta.com/api/v1/apps/app-1/users?limit=200"
		);
	}

	#[tokio::test]
	async fn static_directory_returns_latest_snapshot() {
		let dir = StaticDirectory::default();
		assert_eq!(dir.snapshot().await.unwrap(), DirectorySnapshot::default());

		let mut next = DirectorySnapshot::default();
		next.users.insert("alice@example.com".into());
		next.groups.insert(
			"Everyone".into(),
			["alice@example.com".to_string()].into_iter().collect(),
		);
		dir.set(next.clone());
		assert_eq!(dir.snapshot().await.unwrap(), next);
	}
}
