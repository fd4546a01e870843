// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Credential request queue handlers.
//!
//! A user enqueues a request for a destination, the destination's connector
//! long-polls for open requests, mints a token in the cluster and writes it
//! back with a compare-and-set. The requester long-polls its request until
//! the token arrives. Only one connector's write can win; the rest get `409`.

use axum::{
	extract::State,
	http::{HeaderMap, StatusCode},
	response::{IntoResponse, Response},
	Json,
};
use chrono::Utc;
use infra_common_config::SecretString;
use infra_server_api::{
	self as api, CreateCredentialRequest, CreateCredentialResponse, CredentialRequestStatus,
	GetCredentialRequest, Id, ListCredentialRequestsRequest, ListCredentialRequestsResponse,
	UpdateCredentialRequest,
};
use infra_server_auth::{
	extract_destination_header,
	permissions::{ADMIN, CONNECTOR},
};
use infra_server_db::{CredentialRequest, Destination, Table};

use crate::{
	api::AppState,
	auth_middleware::RequireAuth,
	error::{Result, ServerError},
	extract::{ApiJson, ApiPath, ApiQuery},
	long_poll::{self, Snapshot},
	metrics::PollOutcome,
};

async fn destination_by_name(state: &AppState, name: &str) -> Result<Destination> {
	state
		.store
		.destinations
		.get_destination_by_name(name)
		.await?
		.ok_or_else(|| ServerError::not_found(format!("destination {name:?}")))
}

/// The requester's view; an open request past its expiry reads as expired
/// before the collector gets to it.
fn credential_response(request: &CredentialRequest) -> api::CredentialResponse {
	let mut response = api::CredentialResponse::from(request);
	if request.status == CredentialRequestStatus::Open && request.expires_at < Utc::now() {
		response.status = CredentialRequestStatus::Expired;
	}
	response
}

/// POST /v1/credentials
#[tracing::instrument(
	skip(state, principal, request),
	fields(identity_id = %principal.identity_id, destination = %request.destination)
)]
pub async fn create_credential_request(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiJson(request): ApiJson<CreateCredentialRequest>,
) -> Result<impl IntoResponse> {
	let user_id = request.user_id.unwrap_or(principal.identity_id);
	principal.require_self_or_admin(user_id)?;
	destination_by_name(&state, &request.destination).await?;

	let ttl = chrono::Duration::from_std(state.config.credentials.request_ttl())
		.map_err(|e| ServerError::Internal(format!("credential request ttl: {e}")))?;
	let created = state
		.store
		.credential_requests
		.create_request(state.organization_id, user_id, &request.destination, Utc::now() + ttl)
		.await?;

	tracing::info!(
		request_id = %created.id,
		user_id = %user_id,
		update_index = created.update_index,
		"credential request created"
	);
	Ok((StatusCode::CREATED, Json(CreateCredentialResponse { id: created.id })))
}

/// GET /v1/credentials
///
/// Connector long-poll for open requests newer than `lastUpdateIndex`.
#[tracing::instrument(
	skip(state, principal, query),
	fields(
		identity_id = %principal.identity_id,
		destination = %query.destination,
		last_update_index = query.last_update_index,
	)
)]
pub async fn list_credential_requests(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiQuery(query): ApiQuery<ListCredentialRequestsRequest>,
) -> Result<Response> {
	principal.require_any(&[CONNECTOR, ADMIN])?;
	destination_by_name(&state, &query.destination).await?;

	let wait = long_poll::wait_budget(query.wait, state.config.http.request_timeout());
	let requests = &state.store.credential_requests;
	let destination = query.destination.as_str();
	let watermark = query.last_update_index;

	let result = long_poll::poll(
		&state.store.hub,
		Table::CredentialRequests,
		watermark,
		wait,
		&state.shutdown,
		move || async move {
			let items = requests
				.list_open_requests(destination, watermark, Utc::now())
				.await?;
			let max_update_index = requests.max_update_index(destination).await?;
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
				state.metrics.record_poll("credentials", PollOutcome::Changed);
			}
			Ok(Json(ListCredentialRequestsResponse {
				items: snapshot.items.iter().map(api::CredentialRequest::from).collect(),
				max_update_index: snapshot.max_update_index,
			})
			.into_response())
		}
		None => {
			state.metrics.record_poll("credentials", PollOutcome::NotModified);
			Ok(StatusCode::NOT_MODIFIED.into_response())
		}
	}
}

/// GET /v1/credentials/{id}
///
/// With `wait`, blocks while the request is still open. Answers with the
/// request's current state either way.
#[tracing::instrument(skip(state, principal, query), fields(identity_id = %principal.identity_id))]
pub async fn get_credential(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiPath(id): ApiPath<Id>,
	ApiQuery(query): ApiQuery<GetCredentialRequest>,
) -> Result<Json<api::CredentialResponse>> {
	let requests = &state.store.credential_requests;
	let current = requests
		.get_request(id)
		.await?
		.ok_or_else(|| ServerError::not_found(format!("credential request {id}")))?;
	principal.require_self_or_admin(current.user_id)?;

	let remaining = (current.expires_at - Utc::now()).to_std().unwrap_or_default();
	let wait = match current.status {
		CredentialRequestStatus::Open => long_poll::wait_budget(query.wait, state.config.http.request_timeout())
			.map(|budget| budget.min(remaining))
			.filter(|w| !w.is_zero()),
		_ => None,
	};
	let Some(wait) = wait else {
		return Ok(Json(credential_response(&current)));
	};

	let result = long_poll::poll(
		&state.store.hub,
		Table::CredentialRequests,
		current.update_index,
		Some(wait),
		&state.shutdown,
		move || async move {
			let request = requests
				.get_request(id)
				.await?
				.ok_or_else(|| ServerError::not_found(format!("credential request {id}")))?;
			Ok::<_, ServerError>(Snapshot {
				max_update_index: request.update_index,
				items: vec![request],
			})
		},
	)
	.await?;

	let latest = result.and_then(|s| s.items.into_iter().next()).unwrap_or(current);
	let outcome = if latest.status == CredentialRequestStatus::Open {
		PollOutcome::NotModified
	} else {
		PollOutcome::Changed
	};
	state.metrics.record_poll("credential", outcome);
	Ok(Json(credential_response(&latest)))
}

/// PUT /v1/credentials/{id}
///
/// Connector fulfillment. `409` when another connector already fulfilled
/// the request or it expired.
#[tracing::instrument(skip(state, principal, headers, request), fields(identity_id = %principal.identity_id))]
pub async fn update_credential_request(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiPath(id): ApiPath<Id>,
	headers: HeaderMap,
	ApiJson(request): ApiJson<UpdateCredentialRequest>,
) -> Result<StatusCode> {
	principal.require_any(&[CONNECTOR, ADMIN])?;
	if request.bearer_token.is_empty() {
		return Err(ServerError::invalid("bearerToken is required"));
	}
	if let Some(org) = request.organization_id {
		if org != state.organization_id {
			return Err(ServerError::not_found(format!("credential request {id}")));
		}
	}

	let existing = state
		.store
		.credential_requests
		.get_request(id)
		.await?
		.ok_or_else(|| ServerError::not_found(format!("credential request {id}")))?;

	// a connector may only answer for the destination it runs in
	if !principal.is_admin() {
		let unique_id = extract_destination_header(&headers).ok_or_else(|| {
			ServerError::forbidden("connectors must identify their destination")
		})?;
		let destination = destination_by_name(&state, &existing.destination).await?;
		if destination.spec.unique_id != unique_id {
			return Err(ServerError::forbidden(format!(
				"credential request {id} is for another destination"
			)));
		}
	}

	let fulfilled = state
		.store
		.credential_requests
		.fulfill_request(
			id,
			&SecretString::new(request.bearer_token),
			request.expires_at,
			Utc::now(),
		)
		.await?;

	tracing::info!(
		request_id = %id,
		update_index = fulfilled.update_index,
		"credential request fulfilled"
	);
	Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn request(status: CredentialRequestStatus, expires_in: chrono::Duration) -> CredentialRequest {
		let now = Utc::now();
		CredentialRequest {
			id: Id::generate(),
			organization_id: Id::generate(),
			user_id: Id::generate(),
			destination: "c1".into(),
			status,
			bearer_token: None,
			bearer_token_expires_at: None,
			expires_at: now + expires_in,
			update_index: 1,
			created_at: now,
			updated_at: now,
		}
	}

	#[test]
	fn open_request_past_expiry_reads_as_expired() {
		let stale = request(CredentialRequestStatus::Open, chrono::Duration::seconds(-1));
		assert_eq!(credential_response(&stale).status, CredentialRequestStatus::Expired);

		let live = request(CredentialRequestStatus::Open, chrono::Duration::seconds(60));
		assert_eq!(credential_response(&live).status, CredentialRequestStatus::Open);
	}

	#[test]
	fn fulfilled_request_keeps_its_status() {
		let done = request(CredentialRequestStatus::Fulfilled, chrono::Duration::seconds(-1));
		assert_eq!(credential_response(&done).status, CredentialRequestStatus::Fulfilled);
	}
}
