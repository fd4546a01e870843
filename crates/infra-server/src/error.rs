// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server error type and its HTTP translation.
//!
//! Every handler returns [`ServerError`]. The response body is always
//! [`ApiError`] (`{code, message}`); internal detail goes to the log only.

use axum::{
	extract::rejection::{JsonRejection, PathRejection, QueryRejection},
	response::{IntoResponse, Response},
	Json,
};
use infra_server_api::{ApiError, ErrorKind};
use infra_server_auth::AuthError;
use infra_server_auth_oidc::OidcError;
use infra_server_db::DbError;
use infra_server_secrets::SecretsError;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
	/// A failure the handler already classified.
	#[error("{message}")]
	Api { kind: ErrorKind, message: String },

	#[error(transparent)]
	Auth(#[from] AuthError),

	#[error(transparent)]
	Db(#[from] DbError),

	#[error(transparent)]
	Secrets(#[from] SecretsError),

	#[error("identity provider: {0}")]
	Oidc(#[from] OidcError),

	#[error("internal error: {0}")]
	Internal(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		ServerError::Api {
			kind,
			message: message.into(),
		}
	}

	pub fn bad_request(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::BadRequest, message)
	}

	pub fn invalid(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Invalid, message)
	}

	pub fn not_found(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::NotFound, message)
	}

	pub fn forbidden(message: impl Into<String>) -> Self {
		Self::new(ErrorKind::Forbidden, message)
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			ServerError::Api { kind, .. } => *kind,
			ServerError::Auth(e) => e.kind(),
			ServerError::Db(DbError::NotFound(_)) => ErrorKind::NotFound,
			ServerError::Db(DbError::Duplicate(_)) => ErrorKind::Duplicate,
			ServerError::Db(DbError::Conflict(_)) => ErrorKind::Conflict,
			ServerError::Db(_) => ErrorKind::Internal,
			ServerError::Secrets(SecretsError::SecretNotFound(_))
			| ServerError::Secrets(SecretsError::UnknownStorage(_))
			| ServerError::Secrets(SecretsError::InvalidSecretName(_)) => ErrorKind::Invalid,
			ServerError::Secrets(_) => ErrorKind::Internal,
			// a code the provider refused is the caller's problem
			ServerError::Oidc(e) if e.is_client_error() => ErrorKind::Unauthenticated,
			ServerError::Oidc(_) => ErrorKind::Internal,
			ServerError::Internal(_) => ErrorKind::Internal,
		}
	}
}

impl From<JsonRejection> for ServerError {
	fn from(rejection: JsonRejection) -> Self {
		ServerError::bad_request(rejection.body_text())
	}
}

impl From<QueryRejection> for ServerError {
	fn from(rejection: QueryRejection) -> Self {
		ServerError::bad_request(rejection.body_text())
	}
}

impl From<PathRejection> for ServerError {
	fn from(rejection: PathRejection) -> Self {
		ServerError::bad_request(rejection.body_text())
	}
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response {
		let kind = self.kind();
		let message = match kind {
			ErrorKind::Internal => {
				tracing::error!(error = %self, "internal error");
				"internal server error".to_string()
			}
			ErrorKind::Unauthenticated | ErrorKind::Expired | ErrorKind::Forbidden => {
				tracing::debug!(error = %self, kind = %kind, "request rejected");
				self.to_string()
			}
			_ => self.to_string(),
		};
		(kind.status(), Json(ApiError::new(kind, message))).into_response()
	}
}
