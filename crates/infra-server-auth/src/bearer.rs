// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Credential extraction from request headers.

use http::header::AUTHORIZATION;
use http::HeaderMap;
use infra_common_config::SecretString;
use infra_server_api::DESTINATION_HEADER;
use tracing::instrument;

/// Extract the bearer token from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively; an empty token is treated as
/// absent.
#[instrument(level = "trace", skip_all)]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<SecretString> {
	let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
	let (scheme, token) = value.split_once(' ')?;
	if !scheme.eq_ignore_ascii_case("bearer") {
		return None;
	}
	let token = token.trim();
	if token.is_empty() {
		return None;
	}
	Some(SecretString::from(token))
}

/// The connector heartbeat header, if present and non-empty.
pub fn extract_destination_header(headers: &HeaderMap) -> Option<String> {
	let value = headers.get(DESTINATION_HEADER)?.to_str().ok()?.trim();
	(!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use http::header::HeaderValue;

	fn headers(name: &'static str, value: &str) -> HeaderMap {
		let mut map = HeaderMap::new();
		map.insert(name, HeaderValue::from_str(value).unwrap());
		map
	}

	#[test]
	fn extracts_bearer() {
		let map = headers("authorization", "Bearer abc.def");
		assert_eq!(extract_bearer_token(&map).unwrap().expose(), "abc.def");
		let map = headers("authorization", "bearer abc.def");
		assert_eq!(extract_bearer_token(&map).unwrap().expose(), "abc.def");
	}

	#[test]
	fn ignores_other_schemes_and_empty_tokens() {
		assert!(extract_bearer_token(&HeaderMap::new()).is_none());
		assert!(extract_bearer_token(&headers("authorization", "Basic dXNlcjpwYXNz")).is_none());
		assert!(extract_bearer_token(&headers("authorization", "Bearer ")).is_none());
		assert!(extract_bearer_token(&headers("authorization", "Bearer")).is_none());
	}

	#[test]
	fn extracts_destination_header() {
		let map = headers("infra-destination", "Z9");
		assert_eq!(extract_destination_header(&map).as_deref(), Some("Z9"));
		assert!(extract_destination_header(&headers("infra-destination", "  ")).is_none());
		assert!(extract_destination_header(&HeaderMap::new()).is_none());
	}
}
