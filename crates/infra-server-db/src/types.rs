// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Stored entities and their conversion to wire types.

use chrono::{DateTime, SecondsFormat, Utc};
use infra_common_config::SecretString;
use infra_server_api as api;
use infra_server_api::{CredentialRequestStatus, Id, ProviderKind, Subject};

use crate::error::{DbError, Result};

pub(crate) fn db_time(t: &DateTime<Utc>) -> String {
	t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_time(s: &str) -> Result<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(s)
		.map(|t| t.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("invalid timestamp {s:?}: {e}")))
}

pub(crate) fn parse_opt_time(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
	s.as_deref().map(parse_time).transpose()
}

pub(crate) fn parse_id(s: &str) -> Result<Id> {
	s.parse()
		.map_err(|e| DbError::Internal(format!("invalid id {s:?}: {e}")))
}

pub(crate) fn join_list(items: &[String]) -> String {
	items.join(",")
}

pub(crate) fn split_list(s: &str) -> Vec<String> {
	s.split(',')
		.filter(|p| !p.is_empty())
		.map(str::to_string)
		.collect()
}

#[derive(Debug, Clone)]
pub struct Provider {
	pub id: Id,
	pub name: String,
	pub url: String,
	pub client_id: String,
	pub client_secret: SecretString,
	pub api_token: Option<SecretString>,
	pub kind: ProviderKind,
	pub from_config: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProvider {
	pub name: String,
	pub url: String,
	pub client_id: String,
	pub client_secret: SecretString,
	pub api_token: Option<SecretString>,
	pub kind: ProviderKind,
	pub from_config: bool,
}

impl From<&Provider> for api::Provider {
	fn from(p: &Provider) -> Self {
		api::Provider {
			id: p.id,
			name: p.name.clone(),
			url: p.url.clone(),
			client_id: p.client_id.clone(),
			kind: p.kind,
			created: p.created_at,
			updated: p.updated_at,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
	pub id: Id,
	/// Email for people, a plain name for machine identities.
	pub name: String,
	pub permissions: Vec<String>,
	pub last_seen_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl User {
	pub fn to_api(&self, provider_names: Vec<String>) -> api::User {
		api::User {
			id: self.id,
			name: self.name.clone(),
			last_seen_at: self.last_seen_at,
			provider_names,
			permissions: self.permissions.clone(),
			created: self.created_at,
			updated: self.updated_at,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
	pub id: Id,
	pub name: String,
	pub provider_id: Option<Id>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Group {
	pub fn to_api(&self, total_users: i64) -> api::Group {
		api::Group {
			id: self.id,
			name: self.name.clone(),
			provider_id: self.provider_id,
			total_users,
			created: self.created_at,
			updated: self.updated_at,
		}
	}
}

/// Fields a connector (or admin) supplies for a destination.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DestinationSpec {
	pub name: String,
	pub unique_id: String,
	pub kind: String,
	pub connection_url: String,
	pub connection_ca: String,
	pub resources: Vec<String>,
	pub roles: Vec<String>,
	pub labels: Vec<String>,
	pub version: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
	pub id: Id,
	pub spec: DestinationSpec,
	pub last_seen_at: Option<DateTime<Utc>>,
	pub update_index: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Destination {
	/// Most recent sign of life: an update or a heartbeat.
	pub fn last_activity(&self) -> DateTime<Utc> {
		match self.last_seen_at {
			Some(seen) if seen > self.updated_at => seen,
			_ => self.updated_at,
		}
	}
}

impl From<&Destination> for api::Destination {
	fn from(d: &Destination) -> Self {
		api::Destination {
			id: d.id,
			name: d.spec.name.clone(),
			unique_id: d.spec.unique_id.clone(),
			kind: d.spec.kind.clone(),
			connection: api::Connection {
				url: d.spec.connection_url.clone(),
				ca: d.spec.connection_ca.clone(),
			},
			resources: d.spec.resources.clone(),
			roles: d.spec.roles.clone(),
			labels: d.spec.labels.clone(),
			version: d.spec.version.clone(),
			last_seen: d.last_seen_at,
			created: d.created_at,
			updated: d.updated_at,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
	pub id: Id,
	pub subject: Subject,
	pub resource: String,
	pub privilege: String,
	pub created_by: Option<Id>,
	pub from_config: bool,
	pub expires_at: Option<DateTime<Utc>>,
	pub update_index: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewGrant {
	pub subject: Subject,
	pub resource: String,
	pub privilege: String,
	pub created_by: Option<Id>,
	pub from_config: bool,
	pub expires_at: Option<DateTime<Utc>>,
}

/// Destination named by a grant resource (`<destination>[.<namespace>]`).
pub fn destination_of(resource: &str) -> &str {
	resource.split_once('.').map(|(d, _)| d).unwrap_or(resource)
}

impl From<&Grant> for api::Grant {
	fn from(g: &Grant) -> Self {
		api::Grant {
			id: g.id,
			identity: g.subject,
			resource: g.resource.clone(),
			privilege: g.privilege.clone(),
			created_by: g.created_by,
			expires_at: g.expires_at,
			update_index: g.update_index,
			created: g.created_at,
			updated: g.updated_at,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessKeyRecord {
	pub id: Id,
	pub name: String,
	pub issued_for: Id,
	pub key_id: String,
	pub secret_checksum: Vec<u8>,
	pub permissions: Vec<String>,
	pub expires_at: DateTime<Utc>,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CredentialRequest {
	pub id: Id,
	pub organization_id: Id,
	pub user_id: Id,
	pub destination: String,
	pub status: CredentialRequestStatus,
	pub bearer_token: Option<SecretString>,
	pub bearer_token_expires_at: Option<DateTime<Utc>>,
	pub expires_at: DateTime<Utc>,
	pub update_index: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl From<&CredentialRequest> for api::CredentialRequest {
	fn from(r: &CredentialRequest) -> Self {
		api::CredentialRequest {
			id: r.id,
			organization_id: r.organization_id,
			user_id: r.user_id,
			destination: r.destination.clone(),
			update_index: r.update_index,
			expires_at: Some(r.expires_at),
		}
	}
}

impl From<&CredentialRequest> for api::CredentialResponse {
	fn from(r: &CredentialRequest) -> Self {
		api::CredentialResponse {
			id: r.id,
			destination: r.destination.clone(),
			status: r.status,
			bearer_token: r.bearer_token.as_ref().map(|t| t.expose().clone()),
			expires_at: r.bearer_token_expires_at,
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncryptionKey {
	pub key_id: i32,
	pub name: String,
	pub encrypted: Vec<u8>,
	pub algorithm: String,
	pub root_key_id: String,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Settings {
	pub organization_id: Id,
	pub private_jwk: SecretString,
	pub public_jwk: String,
}

#[derive(Debug, Clone)]
pub struct ProviderToken {
	pub user_id: Id,
	pub provider_id: Id,
	pub access_token: SecretString,
	pub refresh_token: SecretString,
	pub expires_at: DateTime<Utc>,
}
