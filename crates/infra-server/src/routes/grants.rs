// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Grant handlers, including the long-poll connectors use to follow a
//! destination's grants.

use axum::{
	extract::State,
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use infra_server_api::{
	self as api, CreateGrantRequest, Id, ListGrantsRequest, ListResponse, Subject, INFRA_DESTINATION,
};
use infra_server_auth::{
	permissions::{ADMIN, CONNECTOR},
	AuthError, Principal,
};
use infra_server_db::{destination_of, GrantFilter, NewGrant, Table};

use crate::{
	api::AppState,
	auth_middleware::RequireAuth,
	error::{Result, ServerError},
	extract::{ApiJson, ApiPath, ApiQuery},
	long_poll::{self, Snapshot},
	metrics::PollOutcome,
};

/// Connectors and admins see every grant; anyone else only their own.
fn authorize_read(principal: &Principal, identity: Option<Subject>) -> Result<()> {
	if principal.has(CONNECTOR) || principal.is_admin() {
		return Ok(());
	}
	match identity {
		Some(Subject::User(id)) if id == principal.identity_id => Ok(()),
		_ => Err(AuthError::PermissionDenied(format!("{CONNECTOR} or {ADMIN}")).into()),
	}
}

/// Fails with 404 unless `name` is a live destination or the registry itself.
async fn require_destination(state: &AppState, name: &str) -> Result<()> {
	if name == INFRA_DESTINATION {
		return Ok(());
	}
	state
		.store
		.destinations
		.get_destination_by_name(name)
		.await?
		.map(|_| ())
		.ok_or_else(|| ServerError::not_found(format!("destination {name:?}")))
}

async fn require_subject(state: &AppState, subject: Subject) -> Result<()> {
	let exists = match subject {
		Subject::User(id) => state.store.users.get_user(id).await?.is_some(),
		Subject::Group(id) => state.store.groups.get_group(id).await?.is_some(),
	};
	if exists {
		Ok(())
	} else {
		Err(ServerError::invalid(format!("identity {subject} does not exist")))
	}
}

/// GET /v1/grants
///
/// With `destination` and `wait`, blocks until a grant for the destination
/// is written past `lastUpdateIndex`, answering `304` when the wait runs
/// out. The body is always the full current grant list for the filter.
#[tracing::instrument(
	skip(state, principal, query),
	fields(
		identity_id = %principal.identity_id,
		destination = ?query.destination,
		last_update_index = query.last_update_index,
		wait = ?query.wait,
	)
)]
pub async fn list_grants(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiQuery(query): ApiQuery<ListGrantsRequest>,
) -> Result<Response> {
	authorize_read(&principal, query.identity)?;
	if let Some(destination) = query.destination.as_deref() {
		require_destination(&state, destination).await?;
	}

	let filter = GrantFilter {
		subject: query.identity,
		resource: query.resource.clone(),
		destination: query.destination.clone(),
		privilege: query.privilege.clone(),
	};
	let wait = long_poll::wait_budget(query.wait, state.config.http.request_timeout());
	let grants = &state.store.grants;
	let filter = &filter;

	let result = long_poll::poll(
		&state.store.hub,
		Table::Grants,
		query.last_update_index,
		wait,
		&state.shutdown,
		move || async move {
			let items = grants.list_grants(filter).await?;
			let max_update_index = match filter.destination.as_deref() {
				Some(destination) => grants.max_update_index(destination).await?,
				None => items.iter().map(|g| g.update_index).max().unwrap_or(0),
			};
			Ok::<_, ServerError>(Snapshot {
				items,
				max_update_index,
			})
		},
	)
	.await?;

	match result {
		Some(snapshot) => {
			if wait.is_some() {
				state.metrics.record_poll("grants", PollOutcome::Changed);
			}
			let items = snapshot.items.iter().map(api::Grant::from).collect();
			Ok(Json(ListResponse::new(items, snapshot.max_update_index)).into_response())
		}
		None => {
			state.metrics.record_poll("grants", PollOutcome::NotModified);
			Ok(StatusCode::NOT_MODIFIED.into_response())
		}
	}
}

/// GET /v1/grants/{id}
pub async fn get_grant(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiPath(id): ApiPath<Id>,
) -> Result<Json<api::Grant>> {
	let grant = state
		.store
		.grants
		.get_grant(id)
		.await?
		.ok_or_else(|| ServerError::not_found(format!("grant {id}")))?;
	authorize_read(&principal, Some(grant.subject))?;
	Ok(Json(api::Grant::from(&grant)))
}

/// POST /v1/grants
///
/// Idempotent on `(identity, resource, privilege)`: `201` when the grant was
/// written, `200` with the existing grant otherwise.
#[tracing::instrument(
	skip(state, principal, request),
	fields(identity_id = %principal.identity_id, subject = %request.identity, resource = %request.resource)
)]
pub async fn create_grant(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiJson(request): ApiJson<CreateGrantRequest>,
) -> Result<Response> {
	principal.require(ADMIN)?;

	let resource = request.resource.trim();
	let privilege = request.privilege.trim();
	if resource.is_empty() || privilege.is_empty() {
		return Err(ServerError::invalid("grant requires resource and privilege"));
	}
	require_subject(&state, request.identity).await?;
	let destination = destination_of(resource);
	if require_destination(&state, destination).await.is_err() {
		return Err(ServerError::invalid(format!(
			"resource {resource:?} names unknown destination {destination:?}"
		)));
	}

	let (grant, created) = state
		.store
		.grants
		.upsert_grant(&NewGrant {
			subject: request.identity,
			resource: resource.to_string(),
			privilege: privilege.to_string(),
			created_by: Some(principal.identity_id),
			from_config: false,
			expires_at: None,
		})
		.await?;

	let status = if created {
		tracing::info!(grant_id = %grant.id, update_index = grant.update_index, "grant created");
		StatusCode::CREATED
	} else {
		StatusCode::OK
	};
	Ok((status, Json(api::Grant::from(&grant))).into_response())
}

/// DELETE /v1/grants/{id}
#[tracing::instrument(skip(state, principal), fields(identity_id = %principal.identity_id))]
pub async fn delete_grant(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiPath(id): ApiPath<Id>,
) -> Result<StatusCode> {
	principal.require(ADMIN)?;
	state.store.grants.soft_delete_grant(id).await?;
	tracing::info!(grant_id = %id, "grant deleted");
	Ok(StatusCode::NO_CONTENT)
}
