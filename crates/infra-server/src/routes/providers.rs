// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identity provider handlers. Listing is public so login pages can offer
//! the configured providers; secrets never leave the registry.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use infra_common_config::SecretString;
use infra_server_api::{self as api, CreateProviderRequest, Id, ListResponse, UpdateProviderRequest};
use infra_server_auth::permissions::ADMIN;
use infra_server_db::NewProvider;

use crate::{
	api::AppState,
	auth_middleware::RequireAuth,
	error::{Result, ServerError},
	extract::{ApiJson, ApiPath},
};

fn new_provider(request: CreateProviderRequest) -> Result<NewProvider> {
	let name = request.name.trim();
	if name.is_empty() {
		return Err(ServerError::invalid("provider name is required"));
	}
	if request.url.trim().is_empty() || request.client_id.trim().is_empty() {
		return Err(ServerError::invalid(format!(
			"provider {name:?} requires url and clientID"
		)));
	}
	if request.client_secret.is_empty() {
		return Err(ServerError::invalid(format!("provider {name:?} requires clientSecret")));
	}

	Ok(NewProvider {
		name: name.to_string(),
		url: request.url.trim().to_string(),
		client_id: request.client_id,
		client_secret: SecretString::new(request.client_secret),
		api_token: request.api_token.filter(|t| !t.is_empty()).map(SecretString::new),
		kind: request.kind,
		from_config: false,
	})
}

/// GET /v1/providers
pub async fn list_providers(State(state): State<AppState>) -> Result<Json<ListResponse<api::Provider>>> {
	let providers = state.store.providers.list_providers().await?;
	let items = providers.iter().map(api::Provider::from).collect();
	Ok(Json(ListResponse::new(items, 0)))
}

/// GET /v1/providers/{id}
pub async fn get_provider(
	State(state): State<AppState>,
	ApiPath(id): ApiPath<Id>,
) -> Result<Json<api::Provider>> {
	let provider = state
		.store
		.providers
		.get_provider(id)
		.await?
		.ok_or_else(|| ServerError::not_found(format!("provider {id}")))?;
	Ok(Json(api::Provider::from(&provider)))
}

/// POST /v1/providers
#[tracing::instrument(skip(state, principal, request), fields(identity_id = %principal.identity_id))]
pub async fn create_provider(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiJson(request): ApiJson<CreateProviderRequest>,
) -> Result<impl IntoResponse> {
	principal.require(ADMIN)?;
	let provider = state.store.providers.create_provider(&new_provider(request)?).await?;
	tracing::info!(provider_id = %provider.id, name = %provider.name, "provider created");
	Ok((StatusCode::CREATED, Json(api::Provider::from(&provider))))
}

/// PUT /v1/providers/{id}
#[tracing::instrument(skip(state, principal, request), fields(identity_id = %principal.identity_id))]
pub async fn update_provider(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiPath(id): ApiPath<Id>,
	ApiJson(request): ApiJson<UpdateProviderRequest>,
) -> Result<Json<api::Provider>> {
	principal.require(ADMIN)?;
	let existing = state
		.store
		.providers
		.get_provider(id)
		.await?
		.ok_or_else(|| ServerError::not_found(format!("provider {id}")))?;

	let mut update = new_provider(request)?;
	update.from_config = existing.from_config;
	let provider = state.store.providers.update_provider(id, &update).await?;
	Ok(Json(api::Provider::from(&provider)))
}

/// DELETE /v1/providers/{id}
///
/// Cascades to the provider's groups and to users known only through it.
#[tracing::instrument(skip(state, principal), fields(identity_id = %principal.identity_id))]
pub async fn delete_provider(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiPath(id): ApiPath<Id>,
) -> Result<StatusCode> {
	principal.require(ADMIN)?;
	state.store.providers.soft_delete_provider(id).await?;
	tracing::info!(provider_id = %id, "provider deleted");
	Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
	use super::*;
	use infra_server_api::ProviderKind;

	fn request() -> CreateProviderRequest {
		CreateProviderRequest {
			name: " okta ".into(),
			url: "example.okta.com".into(),
			client_id: "client".into(),
			client_secret: "shh".into(),
			kind: ProviderKind::Okta,
			api_token: Some(String::new()),
		}
	}

	#[test]
	fn request_is_trimmed_and_empty_token_dropped() {
		let provider = new_provider(request()).unwrap();
		assert_eq!(provider.name, "okta");
		assert!(provider.api_token.is_none());
		assert!(!provider.from_config);
	}

	#[test]
	fn missing_secret_is_invalid() {
		let mut req = request();
		req.client_secret.clear();
		let err = new_provider(req).unwrap_err();
		assert_eq!(err.kind(), api::ErrorKind::Invalid);
	}
}
