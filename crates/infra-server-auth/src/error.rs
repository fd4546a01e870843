// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authentication and authorization error types.

use infra_server_api::ErrorKind;
use infra_server_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
	// =========================================================================
	// Authentication Errors
	// =========================================================================
	/// No `Authorization: Bearer` header on a request that needs one.
	#[error("authentication required")]
	AuthenticationRequired,

	/// The presented access key is not `<key>.<secret>`.
	#[error("invalid access key format")]
	MalformedAccessKey,

	/// No live key with this id, or the secret does not match.
	#[error("invalid access key")]
	InvalidAccessKey,

	#[error("access key expired")]
	AccessKeyExpired,

	#[error("invalid session token: {0}")]
	InvalidToken(String),

	#[error("session token expired")]
	TokenExpired,

	// =========================================================================
	// Authorization Errors
	// =========================================================================
	#[error("missing permission: {0}")]
	PermissionDenied(String),

	// =========================================================================
	// Request Errors
	// =========================================================================
	#[error("invalid request: {0}")]
	InvalidRequest(String),

	#[error("access key {0:?} is already in use")]
	KeyInUse(String),

	// =========================================================================
	// Internal Errors
	// =========================================================================
	#[error("signing key error: {0}")]
	SigningKey(String),

	#[error("database error: {0}")]
	Database(#[from] DbError),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl AuthError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			AuthError::AuthenticationRequired
			| AuthError::MalformedAccessKey
			| AuthError::InvalidAccessKey
			| AuthError::InvalidToken(_) => ErrorKind::Unauthenticated,
			AuthError::AccessKeyExpired | AuthError::TokenExpired => ErrorKind::Expired,
			AuthError::PermissionDenied(_) => ErrorKind::Forbidden,
			AuthError::InvalidRequest(_) => ErrorKind::BadRequest,
			AuthError::KeyInUse(_) => ErrorKind::Duplicate,
			AuthError::Database(DbError::NotFound(_)) => ErrorKind::NotFound,
			AuthError::Database(DbError::Duplicate(_)) => ErrorKind::Duplicate,
			AuthError::Database(DbError::Conflict(_)) => ErrorKind::Conflict,
			AuthError::SigningKey(_) | AuthError::Database(_) | AuthError::Serialization(_) => {
				ErrorKind::Internal
			}
		}
	}

	/// Internal errors are logged in full and reported with a generic message.
	pub fn is_internal(&self) -> bool {
		self.kind() == ErrorKind::Internal
	}

	pub fn status_code(&self) -> u16 {
		self.kind().status().as_u16()
	}
}

pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bad_credentials_are_401() {
		for err in [
			AuthError::AuthenticationRequired,
			AuthError::MalformedAccessKey,
			AuthError::InvalidAccessKey,
			AuthError::InvalidToken("bad signature".into()),
		] {
			assert_eq!(err.status_code(), 401, "{err}");
			assert_eq!(err.kind(), ErrorKind::Unauthenticated);
		}
	}

	#[test]
	fn expiry_is_its_own_kind_but_still_401() {
		assert_eq!(AuthError::AccessKeyExpired.kind(), ErrorKind::Expired);
		assert_eq!(AuthError::AccessKeyExpired.status_code(), 401);
		assert_eq!(AuthError::TokenExpired.status_code(), 401);
	}

	#[test]
	fn permission_denied_is_403() {
		assert_eq!(AuthError::PermissionDenied("infra.admin".into()).status_code(), 403);
	}

	#[test]
	fn database_errors_keep_their_kind() {
		assert_eq!(
			AuthError::from(DbError::NotFound("user".into())).kind(),
			ErrorKind::NotFound
		);
		assert_eq!(
			AuthError::from(DbError::Duplicate("name".into())).kind(),
			ErrorKind::Duplicate
		);
		let internal = AuthError::from(DbError::Internal("boom".into()));
		assert!(internal.is_internal());
		assert_eq!(internal.status_code(), 500);
	}
}
