// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request and response bodies for `/v1`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use infra_common_config::REDACTED;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::id::{Id, ParseIdError};

/// Grant subject: `u:<id>` for a user, `g:<id>` for a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
	User(Id),
	Group(Id),
}

impl Subject {
	pub fn id(&self) -> Id {
		match self {
			Subject::User(id) | Subject::Group(id) => *id,
		}
	}
}

impl fmt::Display for Subject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Subject::User(id) => write!(f, "u:{id}"),
			Subject::Group(id) => write!(f, "g:{id}"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseSubjectError {
	#[error("subject must start with u: or g:")]
	Prefix,
	#[error(transparent)]
	Id(#[from] ParseIdError),
}

impl FromStr for Subject {
	type Err = ParseSubjectError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.split_once(':') {
			Some(("u", id)) => Ok(Subject::User(id.parse()?)),
			Some(("g", id)) => Ok(Subject::Group(id.parse()?)),
			_ => Err(ParseSubjectError::Prefix),
		}
	}
}

impl Serialize for Subject {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for Subject {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

/// A page of results plus the highest update index the server observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
	pub items: Vec<T>,
	pub count: usize,
	#[serde(default)]
	pub max_update_index: i64,
}

impl<T> ListResponse<T> {
	pub fn new(items: Vec<T>, max_update_index: i64) -> Self {
		Self {
			count: items.len(),
			items,
			max_update_index,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
	#[default]
	Oidc,
	Okta,
}

impl ProviderKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ProviderKind::Oidc => "oidc",
			ProviderKind::Okta => "okta",
		}
	}
}

impl FromStr for ProviderKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"oidc" => Ok(ProviderKind::Oidc),
			"okta" => Ok(ProviderKind::Okta),
			other => Err(format!("unknown provider kind: {other}")),
		}
	}
}

/// Public view of an identity provider. Never carries secrets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
	pub id: Id,
	pub name: String,
	pub url: String,
	#[serde(rename = "clientID")]
	pub client_id: String,
	pub kind: ProviderKind,
	pub created: DateTime<Utc>,
	pub updated: DateTime<Utc>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProviderRequest {
	pub name: String,
	pub url: String,
	#[serde(rename = "clientID")]
	pub client_id: String,
	pub client_secret: String,
	#[serde(default)]
	pub kind: ProviderKind,
	/// Management API token used for directory sync.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub api_token: Option<String>,
}

impl fmt::Debug for CreateProviderRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CreateProviderRequest")
			.field("name", &self.name)
			.field("url", &self.url)
			.field("client_id", &self.client_id)
			.field("client_secret", &REDACTED)
			.field("kind", &self.kind)
			.field("api_token", &self.api_token.as_ref().map(|_| REDACTED))
			.finish()
	}
}

pub type UpdateProviderRequest = CreateProviderRequest;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub ca: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
	pub id: Id,
	pub name: String,
	#[serde(rename = "uniqueID")]
	pub unique_id: String,
	pub kind: String,
	pub connection: Connection,
	#[serde(default)]
	pub resources: Vec<String>,
	#[serde(default)]
	pub roles: Vec<String>,
	#[serde(default)]
	pub labels: Vec<String>,
	#[serde(default)]
	pub version: String,
	#[serde(default)]
	pub last_seen: Option<DateTime<Utc>>,
	pub created: DateTime<Utc>,
	pub updated: DateTime<Utc>,
}

fn default_destination_kind() -> String {
	"kubernetes".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDestinationRequest {
	pub name: String,
	#[serde(rename = "uniqueID")]
	pub unique_id: String,
	#[serde(default = "default_destination_kind")]
	pub kind: String,
	#[serde(default)]
	pub connection: Connection,
	#[serde(default)]
	pub resources: Vec<String>,
	#[serde(default)]
	pub roles: Vec<String>,
	#[serde(default)]
	pub labels: Vec<String>,
	#[serde(default)]
	pub version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDestinationRequest {
	pub name: String,
	#[serde(rename = "uniqueID")]
	pub unique_id: String,
	#[serde(default = "default_destination_kind")]
	pub kind: String,
	#[serde(default)]
	pub connection: Connection,
	#[serde(default)]
	pub resources: Vec<String>,
	#[serde(default)]
	pub roles: Vec<String>,
	#[serde(default)]
	pub labels: Vec<String>,
	#[serde(default)]
	pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDestinationsRequest {
	#[serde(rename = "uniqueID", default, skip_serializing_if = "Option::is_none")]
	pub unique_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
	pub id: Id,
	pub identity: Subject,
	pub resource: String,
	pub privilege: String,
	#[serde(default)]
	pub created_by: Option<Id>,
	#[serde(default)]
	pub expires_at: Option<DateTime<Utc>>,
	pub update_index: i64,
	pub created: DateTime<Utc>,
	pub updated: DateTime<Utc>,
}

impl Grant {
	/// Destination named by the resource, i.e. everything before the first dot.
	pub fn destination(&self) -> &str {
		self
			.resource
			.split_once('.')
			.map(|(d, _)| d)
			.unwrap_or(&self.resource)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGrantRequest {
	pub identity: Subject,
	pub resource: String,
	pub privilege: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListGrantsRequest {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub destination: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resource: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub identity: Option<Subject>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub privilege: Option<String>,
	/// Highest update index the caller has already seen.
	#[serde(default)]
	pub last_update_index: i64,
	/// Seconds to block for when nothing is newer than the watermark.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub wait: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
	pub id: Id,
	pub name: String,
	#[serde(default)]
	pub last_seen_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub provider_names: Vec<String>,
	#[serde(default)]
	pub permissions: Vec<String>,
	pub created: DateTime<Utc>,
	pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
	pub id: Id,
	pub name: String,
	#[serde(rename = "providerID", default)]
	pub provider_id: Option<Id>,
	#[serde(default)]
	pub total_users: i64,
	pub created: DateTime<Utc>,
	pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListUsersRequest {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub group: Option<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialRequestStatus {
	Open,
	Fulfilled,
	Expired,
}

impl CredentialRequestStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			CredentialRequestStatus::Open => "open",
			CredentialRequestStatus::Fulfilled => "fulfilled",
			CredentialRequestStatus::Expired => "expired",
		}
	}
}

impl FromStr for CredentialRequestStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"open" => Ok(CredentialRequestStatus::Open),
			"fulfilled" => Ok(CredentialRequestStatus::Fulfilled),
			"expired" => Ok(CredentialRequestStatus::Expired),
			other => Err(format!("unknown credential request status: {other}")),
		}
	}
}

/// An open request as handed to a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequest {
	pub id: Id,
	#[serde(rename = "organizationID")]
	pub organization_id: Id,
	#[serde(rename = "userID")]
	pub user_id: Id,
	pub destination: String,
	pub update_index: i64,
	#[serde(default)]
	pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCredentialRequest {
	/// Defaults to the caller.
	#[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<Id>,
	pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateCredentialResponse {
	pub id: Id,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCredentialRequestsRequest {
	pub destination: String,
	#[serde(default)]
	pub last_update_index: i64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub wait: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCredentialRequestsResponse {
	pub items: Vec<CredentialRequest>,
	pub max_update_index: i64,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCredentialRequest {
	#[serde(rename = "organizationID", default, skip_serializing_if = "Option::is_none")]
	pub organization_id: Option<Id>,
	pub bearer_token: String,
	pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for UpdateCredentialRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("UpdateCredentialRequest")
			.field("organization_id", &self.organization_id)
			.field("bearer_token", &REDACTED)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetCredentialRequest {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub wait: Option<u64>,
}

/// The requester's view of a credential request; carries the token once
/// fulfilled.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialResponse {
	pub id: Id,
	pub destination: String,
	pub status: CredentialRequestStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bearer_token: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for CredentialResponse {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CredentialResponse")
			.field("id", &self.id)
			.field("destination", &self.destination)
			.field("status", &self.status)
			.field("bearer_token", &self.bearer_token.as_ref().map(|_| REDACTED))
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginOidc {
	#[serde(rename = "providerID")]
	pub provider_id: Id,
	pub code: String,
	#[serde(rename = "redirectURL")]
	pub redirect_url: String,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub oidc: Option<LoginOidc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub access_key: Option<String>,
}

impl fmt::Debug for LoginRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LoginRequest")
			.field("oidc", &self.oidc.as_ref().map(|o| o.provider_id))
			.field("access_key", &self.access_key.as_ref().map(|_| REDACTED))
			.finish()
	}
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
	#[serde(rename = "userID")]
	pub user_id: Id,
	pub name: String,
	pub access_key: String,
	pub expires: DateTime<Utc>,
}

impl fmt::Debug for LoginResponse {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LoginResponse")
			.field("user_id", &self.user_id)
			.field("name", &self.name)
			.field("access_key", &REDACTED)
			.field("expires", &self.expires)
			.finish()
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateTokenRequest {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub destination: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct CreateTokenResponse {
	pub token: String,
	pub expires: DateTime<Utc>,
}

impl fmt::Debug for CreateTokenResponse {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CreateTokenResponse")
			.field("token", &REDACTED)
			.field("expires", &self.expires)
			.finish()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKey {
	pub id: Id,
	pub name: String,
	pub issued_for: Id,
	pub issued_for_name: String,
	#[serde(default)]
	pub permissions: Vec<String>,
	pub expires: DateTime<Utc>,
	pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAccessKeysRequest {
	#[serde(rename = "userID", default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<Id>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccessKeyRequest {
	#[serde(rename = "userID")]
	pub user_id: Id,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Lifetime in seconds; the registry default applies when absent.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ttl: Option<u64>,
	#[serde(default)]
	pub permissions: Vec<String>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccessKeyResponse {
	pub id: Id,
	pub name: String,
	pub issued_for: Id,
	pub access_key: String,
	pub expires: DateTime<Utc>,
}

impl fmt::Debug for CreateAccessKeyResponse {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CreateAccessKeyResponse")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("issued_for", &self.issued_for)
			.field("access_key", &REDACTED)
			.field("expires", &self.expires)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn subject_parses_prefixes() {
		let id = Id::from_u128(1234);
		assert_eq!(format!("u:{id}").parse::<Subject>().unwrap(), Subject::User(id));
		assert_eq!(format!("g:{id}").parse::<Subject>().unwrap(), Subject::Group(id));
		assert_eq!("x:abc".parse::<Subject>(), Err(ParseSubjectError::Prefix));
		assert!("u:".parse::<Subject>().is_err());
	}

	#[test]
	fn grant_destination_strips_namespace() {
		let grant = Grant {
			id: Id::from_u128(1),
			identity: Subject::User(Id::from_u128(2)),
			resource: "c1.prod".into(),
			privilege: "edit".into(),
			created_by: None,
			expires_at: None,
			update_index: 3,
			created: Utc::now(),
			updated: Utc::now(),
		};
		assert_eq!(grant.destination(), "c1");
	}

	#[test]
	fn destination_request_uses_wire_names() {
		let req = CreateDestinationRequest {
			name: "c1".into(),
			unique_id: "Z9".into(),
			kind: "kubernetes".into(),
			connection: Connection {
				url: "10.0.0.5:6443".into(),
				ca: "-----BEGIN CERTIFICATE-----".into(),
			},
			resources: vec![],
			roles: vec![],
			labels: vec![],
			version: "0.1.0".into(),
		};
		let json = serde_json::to_value(&req).unwrap();
		assert_eq!(json["uniqueID"], "Z9");
		assert_eq!(json["connection"]["url"], "10.0.0.5:6443");
	}

	#[test]
	fn create_destination_defaults_kind() {
		let req: CreateDestinationRequest =
			serde_json::from_str(r#"{"name":"c1","uniqueID":"Z9"}"#).unwrap();
		assert_eq!(req.kind, "kubernetes");
	}

	#[test]
	fn secrets_are_redacted_in_debug() {
		let req = UpdateCredentialRequest {
			organization_id: None,
			bearer_token: "tok-very-secret".into(),
			expires_at: Utc::now(),
		};
		assert!(!format!("{req:?}").contains("tok-very-secret"));

		let login = LoginRequest {
			oidc: None,
			access_key: Some("abc.defghijklmnopqrstuvwx".into()),
		};
		assert!(!format!("{login:?}").contains("defghijk"));
	}

	#[test]
	fn list_grants_query_omits_unset_fields() {
		let query = ListGrantsRequest {
			destination: Some("c1".into()),
			last_update_index: 4,
			wait: Some(30),
			..Default::default()
		};
		let json = serde_json::to_value(&query).unwrap();
		assert_eq!(json["lastUpdateIndex"], 4);
		assert!(json.get("privilege").is_none());
	}
}
