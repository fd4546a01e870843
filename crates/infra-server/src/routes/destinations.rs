// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Destination handlers. Connectors register and refresh their destination;
//! admins may remove one.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use infra_server_api::{
	self as api, CreateDestinationRequest, Id, ListDestinationsRequest, ListResponse,
	UpdateDestinationRequest, INFRA_DESTINATION,
};
use infra_server_auth::permissions::{ADMIN, CONNECTOR};
use infra_server_db::{DestinationFilter, DestinationSpec};

use crate::{
	api::AppState,
	auth_middleware::RequireAuth,
	error::{Result, ServerError},
	extract::{ApiJson, ApiPath, ApiQuery},
};

#[allow(clippy::too_many_arguments)]
fn destination_spec(
	name: String,
	unique_id: String,
	kind: String,
	connection: api::Connection,
	resources: Vec<String>,
	roles: Vec<String>,
	labels: Vec<String>,
	version: String,
) -> Result<DestinationSpec> {
	let name = name.trim().to_string();
	if name.is_empty() {
		return Err(ServerError::invalid("destination name is required"));
	}
	if name == INFRA_DESTINATION {
		return Err(ServerError::invalid(format!(
			"destination name {INFRA_DESTINATION:?} is reserved"
		)));
	}
	// grant resources are `<destination>.<namespace>`
	if name.contains('.') {
		return Err(ServerError::invalid(format!(
			"destination name {name:?} must not contain '.'"
		)));
	}
	if unique_id.trim().is_empty() {
		return Err(ServerError::invalid("destination uniqueID is required"));
	}

	Ok(DestinationSpec {
		name,
		unique_id: unique_id.trim().to_string(),
		kind,
		connection_url: connection.url,
		connection_ca: connection.ca,
		resources,
		roles,
		labels,
		version,
	})
}

fn create_spec(r: CreateDestinationRequest) -> Result<DestinationSpec> {
	destination_spec(r.name, r.unique_id, r.kind, r.connection, r.resources, r.roles, r.labels, r.version)
}

fn update_spec(r: UpdateDestinationRequest) -> Result<DestinationSpec> {
	destination_spec(r.name, r.unique_id, r.kind, r.connection, r.resources, r.roles, r.labels, r.version)
}

/// GET /v1/destinations
pub async fn list_destinations(
	State(state): State<AppState>,
	RequireAuth(_principal): RequireAuth,
	ApiQuery(query): ApiQuery<ListDestinationsRequest>,
) -> Result<Json<ListResponse<api::Destination>>> {
	let filter = DestinationFilter {
		unique_id: query.unique_id,
		name: query.name,
		kind: query.kind,
	};
	let destinations = state.store.destinations.list_destinations(&filter).await?;
	let max = destinations.iter().map(|d| d.update_index).max().unwrap_or(0);
	let items = destinations.iter().map(api::Destination::from).collect();
	Ok(Json(ListResponse::new(items, max)))
}

/// GET /v1/destinations/{id}
pub async fn get_destination(
	State(state): State<AppState>,
	RequireAuth(_principal): RequireAuth,
	ApiPath(id): ApiPath<Id>,
) -> Result<Json<api::Destination>> {
	let destination = state
		.store
		.destinations
		.get_destination(id)
		.await?
		.ok_or_else(|| ServerError::not_found(format!("destination {id}")))?;
	Ok(Json(api::Destination::from(&destination)))
}

/// POST /v1/destinations
#[tracing::instrument(skip(state, principal, request), fields(identity_id = %principal.identity_id))]
pub async fn create_destination(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiJson(request): ApiJson<CreateDestinationRequest>,
) -> Result<impl IntoResponse> {
	principal.require_any(&[CONNECTOR, ADMIN])?;
	let spec = create_spec(request)?;
	let destination = state.store.destinations.create_destination(&spec).await?;
	tracing::info!(
		destination_id = %destination.id,
		name = %destination.spec.name,
		unique_id = %destination.spec.unique_id,
		"destination registered"
	);
	Ok((StatusCode::CREATED, Json(api::Destination::from(&destination))))
}

/// PUT /v1/destinations/{id}
#[tracing::instrument(skip(state, principal, request), fields(identity_id = %principal.identity_id))]
pub async fn update_destination(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiPath(id): ApiPath<Id>,
	ApiJson(request): ApiJson<UpdateDestinationRequest>,
) -> Result<Json<api::Destination>> {
	principal.require_any(&[CONNECTOR, ADMIN])?;
	let spec = update_spec(request)?;
	let destination = state.store.destinations.update_destination(id, &spec).await?;
	Ok(Json(api::Destination::from(&destination)))
}

/// DELETE /v1/destinations/{id}
#[tracing::instrument(skip(state, principal), fields(identity_id = %principal.identity_id))]
pub async fn delete_destination(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiPath(id): ApiPath<Id>,
) -> Result<StatusCode> {
	principal.require(ADMIN)?;
	state.store.destinations.soft_delete_destination(id).await?;
	tracing::info!(destination_id = %id, "destination deleted");
	Ok(StatusCode::NO_CONTENT)
}
