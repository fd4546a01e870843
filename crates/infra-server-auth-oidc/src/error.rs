// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use infra_common_http::RetryableError;

#[derive(Debug, thiserror::Error)]
pub enum OidcError {
	/// The HTTP request to the provider failed (network error, timeout, etc.).
	#[error("HTTP request failed: {0}")]
	HttpRequest(#[from] reqwest::Error),

	#[error("invalid provider url: {0}")]
	InvalidUrl(String),

	#[error("failed to parse response: {0}")]
	ParseError(String),

	/// The provider answered with an OAuth error or a non-success status.
	#[error("provider error: {0}")]
	ProviderError(String),

	#[error("invalid id token: {0}")]
	InvalidIdToken(String),

	/// The provider authenticated the user but omitted a required claim.
	#[error("provider did not return the {0} claim")]
	MissingClaim(&'static str),
}

impl OidcError {
	/// The user (or operator) supplied something the provider rejected.
	pub fn is_client_error(&self) -> bool {
		matches!(
			self,
			OidcError::ProviderError(_) | OidcError::InvalidIdToken(_) | OidcError::MissingClaim(_)
		)
	}
}

impl RetryableError for OidcError {
	fn is_retryable(&self) -> bool {
		match self {
			OidcError::HttpRequest(err) => err.is_retryable(),
			_ => false,
		}
	}
}

pub type Result<T> = std::result::Result<T, OidcError>;
