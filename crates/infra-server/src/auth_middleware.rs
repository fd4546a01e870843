// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authentication middleware for Axum.
//!
//! [`auth_layer`] runs on every request. When an `Authorization: Bearer`
//! access key is present it is looked up, the identity it was issued for is
//! loaded, and the resulting [`Principal`] is stored as a request extension
//! inside an [`AuthContext`]. Requests without a key pass through
//! unauthenticated; public handlers simply never ask for a principal.
//!
//! Handlers that need a caller take [`RequireAuth`], which rejects with the
//! lookup failure (401, or 401 `expired`) when there is no principal.
//!
//! # Heartbeats
//!
//! An authenticated request carrying `Infra-Destination: <uniqueID>` refreshes
//! that destination's `last_seen_at`.

use axum::{
	body::Body,
	extract::{FromRequestParts, State},
	http::{request::Parts, Request},
	middleware::Next,
	response::Response,
};
use infra_server_api::ErrorKind;
use infra_server_auth::{
	access_key, extract_bearer_token, extract_destination_header, AuthError, Principal,
};
use tracing::instrument;

use crate::{api::AppState, error::ServerError};

/// Per-request authentication outcome.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
	pub principal: Option<Principal>,
	/// Why a presented key was refused, surfaced by [`RequireAuth`].
	pub failure: Option<(ErrorKind, String)>,
}

impl AuthContext {
	pub fn unauthenticated() -> Self {
		Self::default()
	}

	fn authenticated(principal: Principal) -> Self {
		Self {
			principal: Some(principal),
			failure: None,
		}
	}

	fn rejected(error: &AuthError) -> Self {
		Self {
			principal: None,
			failure: Some((error.kind(), error.to_string())),
		}
	}
}

#[instrument(skip_all, fields(auth_method, identity_id))]
pub async fn auth_layer(State(state): State<AppState>, mut request: Request<Body>, next: Next) -> Response {
	let bearer = extract_bearer_token(request.headers());
	let destination = extract_destination_header(request.headers());
	let span = tracing::Span::current();

	let ctx = match bearer {
		Some(token) => match authenticate_access_key(&state, token.expose()).await {
			Ok(principal) => {
				span.record("auth_method", "access_key");
				span.record("identity_id", tracing::field::display(&principal.identity_id));
				if let Some(unique_id) = destination {
					record_heartbeat(&state, &unique_id).await;
				}
				AuthContext::authenticated(principal)
			}
			Err(e) if e.is_internal() => {
				tracing::error!(error = %e, "access key lookup failed");
				AuthContext::rejected(&e)
			}
			Err(e) => {
				tracing::debug!(error = %e, "access key rejected");
				AuthContext::rejected(&e)
			}
		},
		None => AuthContext::unauthenticated(),
	};

	request.extensions_mut().insert(ctx);
	next.run(request).await
}

async fn authenticate_access_key(state: &AppState, raw: &str) -> Result<Principal, AuthError> {
	let record = access_key::lookup(&state.store.access_keys, raw).await?;
	let identity = state
		.store
		.users
		.get_user(record.issued_for)
		.await?
		.ok_or(AuthError::InvalidAccessKey)?;

	if let Err(e) = state.store.users.touch_last_seen(identity.id).await {
		tracing::warn!(error = %e, identity_id = %identity.id, "failed to record last seen");
	}

	Ok(Principal::new(
		identity.id,
		identity.name,
		record.id,
		&identity.permissions,
		&record.permissions,
	))
}

async fn record_heartbeat(state: &AppState, unique_id: &str) {
	match state.store.destinations.touch_last_seen(unique_id).await {
		Ok(true) => tracing::trace!(unique_id, "destination heartbeat"),
		Ok(false) => tracing::debug!(unique_id, "heartbeat for unknown destination"),
		Err(e) => tracing::warn!(error = %e, unique_id, "failed to record destination heartbeat"),
	}
}

/// Extractor for handlers that need an authenticated caller.
#[derive(Debug, Clone)]
pub struct RequireAuth(pub Principal);

impl<S> FromRequestParts<S> for RequireAuth
where
	S: Send + Sync,
{
	type Rejection = ServerError;

	#[instrument(name = "RequireAuth::from_request_parts", skip_all)]
	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		let ctx = parts
			.extensions
			.get::<AuthContext>()
			.cloned()
			.unwrap_or_else(AuthContext::unauthenticated);

		match (ctx.principal, ctx.failure) {
			(Some(principal), _) => Ok(RequireAuth(principal)),
			(None, Some((kind, message))) => Err(ServerError::new(kind, message)),
			(None, None) => Err(AuthError::AuthenticationRequired.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::http::StatusCode;
	use axum::response::IntoResponse;
	use infra_server_api::Id;

	fn parts_with(ctx: Option<AuthContext>) -> Parts {
		let (mut parts, _) = Request::new(()).into_parts();
		if let Some(ctx) = ctx {
			parts.extensions.insert(ctx);
		}
		parts
	}

	#[tokio::test]
	async fn missing_context_is_unauthenticated() {
		let mut parts = parts_with(None);
		let err = RequireAuth::from_request_parts(&mut parts, &()).await.unwrap_err();
		assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
	}

	#[tokio::test]
	async fn stored_failure_is_reported() {
		let mut parts = parts_with(Some(AuthContext::rejected(&AuthError::AccessKeyExpired)));
		let err = RequireAuth::from_request_parts(&mut parts, &()).await.unwrap_err();
		assert_eq!(err.kind(), ErrorKind::Expired);
	}

	#[tokio::test]
	async fn principal_is_extracted() {
		let principal = Principal::new(Id::generate(), "admin", Id::generate(), &[], &[]);
		let mut parts = parts_with(Some(AuthContext::authenticated(principal.clone())));
		let RequireAuth(got) = RequireAuth::from_request_parts(&mut parts, &()).await.unwrap();
		assert_eq!(got, principal);
	}
}
