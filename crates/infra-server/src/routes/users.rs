// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Read-only user and group handlers. Connectors resolve grant subjects to
//! names through these.

use axum::{extract::State, Json};
use infra_server_api::{self as api, Id, ListResponse, ListUsersRequest};
use infra_server_auth::{
	permissions::{ADMIN, CONNECTOR},
	Principal,
};
use infra_server_db::User;

use crate::{
	api::AppState,
	auth_middleware::RequireAuth,
	error::{Result, ServerError},
	extract::{ApiPath, ApiQuery},
};

fn require_directory_read(principal: &Principal) -> Result<()> {
	principal.require_any(&[CONNECTOR, ADMIN])?;
	Ok(())
}

async fn user_to_api(state: &AppState, user: &User) -> Result<api::User> {
	let providers = state.store.users.provider_names_for_user(user.id).await?;
	Ok(user.to_api(providers))
}

/// GET /v1/users
pub async fn list_users(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiQuery(query): ApiQuery<ListUsersRequest>,
) -> Result<Json<ListResponse<api::User>>> {
	require_directory_read(&principal)?;
	let users = state
		.store
		.users
		.list_users(query.name.as_deref(), query.group)
		.await?;

	let mut items = Vec::with_capacity(users.len());
	for user in &users {
		items.push(user_to_api(&state, user).await?);
	}
	Ok(Json(ListResponse::new(items, 0)))
}

/// GET /v1/users/{id}
pub async fn get_user(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiPath(id): ApiPath<Id>,
) -> Result<Json<api::User>> {
	if principal.identity_id != id {
		require_directory_read(&principal)?;
	}
	let user = state
		.store
		.users
		.get_user(id)
		.await?
		.ok_or_else(|| ServerError::not_found(format!("user {id}")))?;
	Ok(Json(user_to_api(&state, &user).await?))
}

/// GET /v1/groups
pub async fn list_groups(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
) -> Result<Json<ListResponse<api::Group>>> {
	require_directory_read(&principal)?;
	let groups = state.store.groups.list_groups(None).await?;

	let mut items = Vec::with_capacity(groups.len());
	for group in &groups {
		let total = state.store.groups.count_members(group.id).await?;
		items.push(group.to_api(total));
	}
	Ok(Json(ListResponse::new(items, 0)))
}

/// GET /v1/groups/{id}
pub async fn get_group(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiPath(id): ApiPath<Id>,
) -> Result<Json<api::Group>> {
	require_directory_read(&principal)?;
	let group = state
		.store
		.groups
		.get_group(id)
		.await?
		.ok_or_else(|| ServerError::not_found(format!("group {id}")))?;
	let total = state.store.groups.count_members(group.id).await?;
	Ok(Json(group.to_api(total)))
}
