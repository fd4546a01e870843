// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Closed error-kind set and its HTTP mapping.

use std::fmt;

use http::StatusCode;
use infra_common_http::RetryableError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	BadRequest,
	Unauthenticated,
	Forbidden,
	NotFound,
	Duplicate,
	Conflict,
	Expired,
	Invalid,
	Internal,
}

impl ErrorKind {
	pub const ALL: [ErrorKind; 9] = [
		ErrorKind::BadRequest,
		ErrorKind::Unauthenticated,
		ErrorKind::Forbidden,
		ErrorKind::NotFound,
		ErrorKind::Duplicate,
		ErrorKind::Conflict,
		ErrorKind::Expired,
		ErrorKind::Invalid,
		ErrorKind::Internal,
	];

	pub fn status(self) -> StatusCode {
		match self {
			ErrorKind::BadRequest | ErrorKind::Invalid => StatusCode::BAD_REQUEST,
			ErrorKind::Unauthenticated | ErrorKind::Expired => StatusCode::UNAUTHORIZED,
			ErrorKind::Forbidden => StatusCode::FORBIDDEN,
			ErrorKind::NotFound => StatusCode::NOT_FOUND,
			ErrorKind::Duplicate | ErrorKind::Conflict => StatusCode::CONFLICT,
			ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	/// Coarse inverse of [`ErrorKind::status`] for errors read off the wire.
	pub fn from_status(status: StatusCode) -> Self {
		match status {
			StatusCode::BAD_REQUEST => ErrorKind::BadRequest,
			StatusCode::UNAUTHORIZED => ErrorKind::Unauthenticated,
			StatusCode::FORBIDDEN => ErrorKind::Forbidden,
			StatusCode::NOT_FOUND => ErrorKind::NotFound,
			StatusCode::CONFLICT => ErrorKind::Conflict,
			_ => ErrorKind::Internal,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			ErrorKind::BadRequest => "bad_request",
			ErrorKind::Unauthenticated => "unauthenticated",
			ErrorKind::Forbidden => "forbidden",
			ErrorKind::NotFound => "not_found",
			ErrorKind::Duplicate => "duplicate",
			ErrorKind::Conflict => "conflict",
			ErrorKind::Expired => "expired",
			ErrorKind::Invalid => "invalid",
			ErrorKind::Internal => "internal",
		}
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// JSON error body returned by every failing `/v1` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
	pub code: u16,
	pub message: String,
}

impl ApiError {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self {
			code: kind.status().as_u16(),
			message: message.into(),
		}
	}
}

#[derive(Debug, Error)]
pub enum ClientError {
	#[error("request failed: {0}")]
	Http(#[from] reqwest::Error),

	#[error("invalid url: {0}")]
	Url(#[from] url::ParseError),

	#[error("registry returned {status}: {message}")]
	Api { status: u16, message: String },
}

impl ClientError {
	pub fn status(&self) -> Option<u16> {
		match self {
			ClientError::Api { status, .. } => Some(*status),
			ClientError::Http(err) => err.status().map(|s| s.as_u16()),
			ClientError::Url(_) => None,
		}
	}

	pub fn kind(&self) -> ErrorKind {
		match self.status().and_then(|s| StatusCode::from_u16(s).ok()) {
			Some(status) => ErrorKind::from_status(status),
			None => ErrorKind::Internal,
		}
	}

	/// Network failures, 5xx and 429 are worth another attempt.
	pub fn is_retryable(&self) -> bool {
		match self {
			ClientError::Http(err) => {
				err.is_timeout()
					|| err.is_connect()
					|| err.is_request()
					|| err.status().map(|s| s.is_server_error()).unwrap_or(false)
			}
			ClientError::Api { status, .. } => *status >= 500 || *status == 429,
			ClientError::Url(_) => false,
		}
	}

	pub fn is_unauthorized(&self) -> bool {
		self.status() == Some(401)
	}

	pub fn is_conflict(&self) -> bool {
		self.status() == Some(409)
	}

	pub fn is_not_found(&self) -> bool {
		self.status() == Some(404)
	}
}

impl RetryableError for ClientError {
	fn is_retryable(&self) -> bool {
		ClientError::is_retryable(self)
	}
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn kinds_map_to_documented_statuses() {
		assert_eq!(ErrorKind::BadRequest.status(), StatusCode::BAD_REQUEST);
		assert_eq!(ErrorKind::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
		assert_eq!(ErrorKind::Expired.status(), StatusCode::UNAUTHORIZED);
		assert_eq!(ErrorKind::Forbidden.status(), StatusCode::FORBIDDEN);
		assert_eq!(ErrorKind::NotFound.status(), StatusCode::NOT_FOUND);
		assert_eq!(ErrorKind::Duplicate.status(), StatusCode::CONFLICT);
		assert_eq!(ErrorKind::Conflict.status(), StatusCode::CONFLICT);
		assert_eq!(ErrorKind::Internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
	}

	#[test]
	fn api_error_carries_status_code() {
		let body = ApiError::new(ErrorKind::Conflict, "credential request already fulfilled");
		let json = serde_json::to_value(&body).unwrap();
		assert_eq!(json["code"], 409);
		assert_eq!(json["message"], "credential request already fulfilled");
	}

	#[test]
	fn client_error_classification() {
		let conflict = ClientError::Api {
			status: 409,
			message: "conflict".into(),
		};
		assert!(conflict.is_conflict());
		assert!(!conflict.is_retryable());

		let unauthorized = ClientError::Api {
			status: 401,
			message: "unauthenticated".into(),
		};
		assert!(unauthorized.is_unauthorized());
		assert!(!unauthorized.is_retryable());

		let unavailable = ClientError::Api {
			status: 503,
			message: "unavailable".into(),
		};
		assert!(unavailable.is_retryable());
		assert_eq!(unavailable.kind(), ErrorKind::Internal);
	}

	proptest! {
		#[test]
		fn status_round_trips_to_same_status(idx in 0usize..9) {
			let kind = ErrorKind::ALL[idx];
			let back = ErrorKind::from_status(kind.status());
			prop_assert_eq!(back.status(), kind.status());
		}
	}
}
