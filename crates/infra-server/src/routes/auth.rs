// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Login, logout and session token handlers.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{Duration, Utc};
use infra_common_config::SecretString;
use infra_server_api::{
	CreateTokenRequest, CreateTokenResponse, Id, LoginOidc, LoginRequest, LoginResponse,
};
use infra_server_auth::{access_key, permissions::USER, AuthError, IssueRequest};
use infra_server_db::{ProviderToken, User};

use crate::{
	api::AppState,
	auth_middleware::RequireAuth,
	error::{Result, ServerError},
	extract::ApiJson,
};

fn seconds(secs: u64) -> Result<Duration> {
	i64::try_from(secs)
		.ok()
		.and_then(Duration::try_seconds)
		.ok_or_else(|| ServerError::Internal(format!("duration of {secs}s is out of range")))
}

/// `<identityName>-<id>`
pub(crate) fn default_key_name(identity_name: &str) -> String {
	format!("{identity_name}-{}", Id::generate())
}

async fn issue_session_key(
	state: &AppState,
	user: &User,
	permissions: Vec<String>,
) -> Result<LoginResponse> {
	let issued = access_key::issue(
		&state.store.access_keys,
		IssueRequest {
			name: default_key_name(&user.name),
			issued_for: user.id,
			ttl: seconds(state.config.auth.session_duration_secs)?,
			permissions,
		},
	)
	.await?;

	Ok(LoginResponse {
		user_id: user.id,
		name: user.name.clone(),
		access_key: issued.access_key.expose().clone(),
		expires: issued.record.expires_at,
	})
}

/// Trades a valid access key for a fresh session key with the same
/// permissions.
async fn login_with_access_key(state: &AppState, raw: &str) -> Result<LoginResponse> {
	let record = access_key::lookup(&state.store.access_keys, raw).await?;
	let user = state
		.store
		.users
		.get_user(record.issued_for)
		.await?
		.ok_or(AuthError::InvalidAccessKey)?;
	issue_session_key(state, &user, record.permissions).await
}

async fn login_with_oidc(state: &AppState, login: &LoginOidc) -> Result<LoginResponse> {
	let provider = state
		.store
		.providers
		.get_provider(login.provider_id)
		.await?
		.ok_or_else(|| ServerError::invalid(format!("unknown provider {}", login.provider_id)))?;

	let exchange = state
		.providers
		.exchange_code(&provider, &login.code, &login.redirect_url)
		.await?;
	if exchange.email.trim().is_empty() {
		return Err(AuthError::InvalidRequest("identity provider returned no email".into()).into());
	}

	let user = state.store.users.find_or_create_user(&exchange.email).await?;
	state.store.users.bind_provider(user.id, provider.id).await?;
	state
		.store
		.provider_tokens
		.upsert_token(&ProviderToken {
			user_id: user.id,
			provider_id: provider.id,
			access_token: exchange.tokens.access_token.clone(),
			refresh_token: exchange
				.tokens
				.refresh_token
				.clone()
				.unwrap_or_else(|| SecretString::new(String::new())),
			expires_at: exchange.tokens.expires_at,
		})
		.await?;

	tracing::info!(user_id = %user.id, provider = %provider.name, "oidc login");
	issue_session_key(state, &user, vec![USER.to_string()]).await
}

/// POST /v1/login
#[tracing::instrument(skip(state, request))]
pub async fn login(
	State(state): State<AppState>,
	ApiJson(request): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse> {
	let response = match (&request.access_key, &request.oidc) {
		(Some(raw), None) => login_with_access_key(&state, raw).await?,
		(None, Some(oidc)) => login_with_oidc(&state, oidc).await?,
		_ => {
			return Err(ServerError::bad_request(
				"exactly one of accessKey or oidc is required",
			))
		}
	};
	Ok((StatusCode::CREATED, Json(response)))
}

/// POST /v1/logout
///
/// Revokes the access key the request was made with.
#[tracing::instrument(skip(state, principal), fields(identity_id = %principal.identity_id))]
pub async fn logout(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
) -> Result<StatusCode> {
	state
		.store
		.access_keys
		.soft_delete_access_key(principal.access_key_id)
		.await?;
	tracing::info!(access_key_id = %principal.access_key_id, "logged out");
	Ok(StatusCode::OK)
}

/// POST /v1/tokens
///
/// Mints a short-lived session JWT for the caller, scoped to a destination.
#[tracing::instrument(skip(state, principal, request), fields(identity_id = %principal.identity_id))]
pub async fn create_token(
	State(state): State<AppState>,
	RequireAuth(principal): RequireAuth,
	ApiJson(request): ApiJson<CreateTokenRequest>,
) -> Result<impl IntoResponse> {
	let destination = request.destination.unwrap_or_default();
	let ttl = seconds(state.config.auth.token_duration_secs)?;
	let (token, expires) = state
		.signer
		.issue(&principal.identity_name, &destination, ttl)?;
	tracing::debug!(destination = %destination, %expires, "session token issued");
	Ok((StatusCode::CREATED, Json(CreateTokenResponse { token, expires })))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_key_names_are_unique_per_identity() {
		let a = default_key_name("alice@example.com");
		let b = default_key_name("alice@example.com");
		assert!(a.starts_with("alice@example.com-"));
		assert_ne!(a, b);
	}

	#[test]
	fn durations_reject_overflow() {
		assert_eq!(seconds(300).unwrap(), Duration::minutes(5));
		assert!(seconds(u64::MAX).is_err());
	}
}
