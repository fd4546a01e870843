// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Access key handlers. Users manage their own keys; admins manage anyone's.

use std::collections::HashMap;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::Duration;
use infra_server_api::{
	self as api, CreateAccessKeyRequest, CreateAccessKeyResponse, Id, ListAccessKeysRequest,
	ListResponse,
};
use infra_server_auth::{
	access_key::{self, DEFAULT_TTL_SECS},
	permissions, AuthError, IssueRequest, Principal,
};
use infra_server_db::AccessKeyRecord;

use crate::{
	api::AppState,
	auth_middleware::RequireAuth,
	error::{Result, ServerError},
	extract::{ApiJson, ApiPath, ApiQuery},
	routes::auth::default_key_name,
};

fn key_to_api(record: &AccessKeyRecord, issued_for_name: String) -> api::AccessKey {
	api::AccessKey {
		id: record.id,
		name: record.name.clone(),
		issued_for: record.issued_for,
		issued_for_name,
		permissions: record.permissions.clone(),
		expires: record.expires_at,
		created: record.created_at,
	}
}

/// Only known permissions, and only ones the caller holds unless they are an
/// admin.
fn check_grantable(principal: &Principal, requested: &[String]) -> Result<()> {
	for permission in requested {
		if !permissions::is_known(permission) {
			return Err(ServerError::invalid(format!("unknown permission {permission:?}")));
		}
		if !principal.is_admin() && !principal.has(permission) {
			return Err(AuthError::PermissionDenied(permission.clone()).into());
		}
	}
	Ok(())
}

/// GET /v1/access-keys
pub async fn list_access_keys(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiQuery(query): ApiQuery<ListAccessKeysRequest>,
) -> Result<Json<ListResponse<api::AccessKey>>> {
	let issued_for = match query.user_id {
		Some(user_id) => {
			principal.require_self_or_admin(user_id)?;
			Some(user_id)
		}
		None if principal.is_admin() => None,
		None => Some(principal.identity_id),
	};

	let records = state.store.access_keys.list_access_keys(issued_for).await?;
	let mut names: HashMap<Id, String> = HashMap::new();
	let mut items = Vec::with_capacity(records.len());
	for record in &records {
		if !names.contains_key(&record.issued_for) {
			let name = state
				.store
				.users
				.get_user(record.issued_for)
				.await?
				.map(|u| u.name)
				.unwrap_or_default();
			names.insert(record.issued_for, name);
		}
		let name = names.get(&record.issued_for).cloned().unwrap_or_default();
		items.push(key_to_api(record, name));
	}
	Ok(Json(ListResponse::new(items, 0)))
}

/// POST /v1/access-keys
#[tracing::instrument(
	skip(state, principal, request),
	fields(identity_id = %principal.identity_id, user_id = %request.user_id)
)]
pub async fn create_access_key(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiJson(request): ApiJson<CreateAccessKeyRequest>,
) -> Result<impl IntoResponse> {
	principal.require_self_or_admin(request.user_id)?;
	check_grantable(&principal, &request.permissions)?;

	let user = state
		.store
		.users
		.get_user(request.user_id)
		.await?
		.ok_or_else(|| ServerError::not_found(format!("user {}", request.user_id)))?;

	let name = match request.name.as_deref().map(str::trim) {
		Some(name) if !name.is_empty() => name.to_string(),
		_ => default_key_name(&user.name),
	};
	if state.store.access_keys.get_access_key_by_name(&name).await?.is_some() {
		return Err(ServerError::new(
			api::ErrorKind::Duplicate,
			format!("access key {name:?} already exists"),
		));
	}

	let ttl = match request.ttl {
		None => Duration::seconds(DEFAULT_TTL_SECS),
		Some(secs) => i64::try_from(secs)
			.ok()
			.and_then(Duration::try_seconds)
			.ok_or_else(|| ServerError::invalid(format!("ttl {secs} is out of range")))?,
	};

	let issued = access_key::issue(
		&state.store.access_keys,
		IssueRequest {
			name,
			issued_for: user.id,
			ttl,
			permissions: request.permissions,
		},
	)
	.await?;

	tracing::info!(access_key_id = %issued.record.id, name = %issued.record.name, "access key created");
	Ok((
		StatusCode::CREATED,
		Json(CreateAccessKeyResponse {
			id: issued.record.id,
			name: issued.record.name.clone(),
			issued_for: issued.record.issued_for,
			access_key: issued.access_key.expose().clone(),
			expires: issued.record.expires_at,
		}),
	))
}

/// DELETE /v1/access-keys/{id}
#[tracing::instrument(skip(state, principal), fields(identity_id = %principal.identity_id))]
pub async fn delete_access_key(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiPath(id): ApiPath<Id>,
) -> Result<StatusCode> {
	let record = state
		.store
		.access_keys
		.get_access_key(id)
		.await?
		.ok_or_else(|| ServerError::not_found(format!("access key {id}")))?;
	principal.require_self_or_admin(record.issued_for)?;
	state.store.access_keys.soft_delete_access_key(id).await?;
	tracing::info!(access_key_id = %id, "access key deleted");
	Ok(StatusCode::NO_CONTENT)
}
