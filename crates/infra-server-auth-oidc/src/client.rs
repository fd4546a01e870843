// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authorization-code exchange against a provider's OpenID configuration.
//!
//! Endpoints are discovered from `https://{domain}/.well-known/openid-configuration`.
//! The email identifying the user is taken from the verified ID token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use infra_common_config::SecretString;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{OidcError, Result};

/// Upper bound on any single call to a provider.
pub const PROVIDER_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub const SCOPES: [&str; 4] = ["openid", "email", "groups", "offline_access"];

/// Provider base URL from a stored domain. A bare host gets `https://`.
pub fn provider_base_url(domain: &str) -> Result<Url> {
	let trimmed = domain.trim().trim_end_matches('/');
	if trimmed.is_empty() {
		return Err(OidcError::InvalidUrl("empty provider url".to_string()));
	}
	let with_scheme = if trimmed.contains("://") {
		trimmed.to_string()
	} else {
		format!("https://{trimmed}")
	};
	Url::parse(&with_scheme).map_err(|e| OidcError::InvalidUrl(format!("{with_scheme}: {e}")))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
	pub issuer: String,
	pub authorization_endpoint: String,
	pub token_endpoint: String,
	#[serde(default)]
	pub userinfo_endpoint: Option<String>,
	pub jwks_uri: String,
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	id_token: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
	error: String,
	error_description: Option<String>,
}

/// Tokens issued to a user by their provider.
#[derive(Debug, Clone)]
pub struct ProviderTokens {
	pub access_token: SecretString,
	/// Absent when the client is not allowed `offline_access`.
	pub refresh_token: Option<SecretString>,
	pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CodeExchange {
	pub tokens: ProviderTokens,
	pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
	#[serde(default)]
	pub email: String,
	#[serde(default)]
	pub name: String,
	#[serde(default)]
	pub groups: Vec<String>,
}

impl UserInfo {
	/// A user deleted upstream can still resolve with empty claims.
	pub fn validate(&self) -> Result<()> {
		if self.email.is_empty() && self.name.is_empty() {
			return Err(OidcError::MissingClaim("email"));
		}
		Ok(())
	}
}

#[derive(Deserialize)]
struct IdTokenClaims {
	#[serde(default)]
	email: Option<String>,
}

/// Verifies `token` against `jwks`, checking issuer, audience and expiry,
/// and returns the email claim.
pub fn verify_id_token(token: &str, jwks: &JwkSet, issuer: &str, client_id: &str) -> Result<String> {
	let header = decode_header(token).map_err(|e| OidcError::InvalidIdToken(e.to_string()))?;
	let jwk = match &header.kid {
		Some(kid) => jwks.find(kid),
		None => jwks.keys.first(),
	}
	.ok_or_else(|| OidcError::InvalidIdToken("signing key not found in provider jwks".to_string()))?;

	let key = DecodingKey::from_jwk(jwk).map_err(|e| OidcError::InvalidIdToken(e.to_string()))?;
	let mut validation = Validation::new(header.alg);
	validation.set_issuer(&[issuer]);
	validation.set_audience(&[client_id]);

	let data = decode::<IdTokenClaims>(token, &key, &validation)
		.map_err(|e| OidcError::InvalidIdToken(e.to_string()))?;
	match data.claims.email {
		Some(email) if !email.is_empty() => Ok(email),
		_ => Err(OidcError::MissingClaim("email")),
	}
}

async fn read_token_response(response: reqwest::Response) -> Result<TokenEndpointResponse> {
	let status = response.status();
	let body = response.text().await?;

	if let Ok(error_response) = serde_json::from_str::<OAuthErrorResponse>(&body) {
		if !error_response.error.is_empty() {
			return Err(OidcError::ProviderError(
				error_response
					.error_description
					.unwrap_or(error_response.error),
			));
		}
	}
	if !status.is_success() {
		return Err(OidcError::ProviderError(format!("token endpoint returned {status}")));
	}

	serde_json::from_str(&body)
		.map_err(|e| OidcError::ParseError(format!("failed to parse token response: {e}")))
}

fn tokens_from(response: &TokenEndpointResponse, previous_refresh: Option<&SecretString>) -> ProviderTokens {
	ProviderTokens {
		access_token: SecretString::from(response.access_token.as_str()),
		refresh_token: response
			.refresh_token
			.as_deref()
			.map(SecretString::from)
			.or_else(|| previous_refresh.cloned()),
		expires_at: Utc::now() + chrono::Duration::seconds(response.expires_in.unwrap_or(3600)),
	}
}

/// OAuth client for one provider.
#[derive(Debug, Clone)]
pub struct OidcClient {
	base_url: Url,
	client_id: String,
	client_secret: SecretString,
	http_client: reqwest::Client,
}

impl OidcClient {
	pub fn new(domain: &str, client_id: impl Into<String>, client_secret: SecretString) -> Result<Self> {
		let http_client = infra_common_http::builder("registry")
			.timeout(PROVIDER_REQUEST_TIMEOUT)
			.build()?;
		Ok(Self {
			base_url: provider_base_url(domain)?,
			client_id: client_id.into(),
			client_secret,
			http_client,
		})
	}

	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	fn discovery_url(&self) -> Url {
		let mut url = self.base_url.clone();
		let path = format!(
			"{}/.well-known/openid-configuration",
			url.path().trim_end_matches('/')
		);
		url.set_path(&path);
		url
	}

	#[tracing::instrument(skip(self), fields(provider = %self.base_url))]
	pub async fn discover(&self) -> Result<ProviderMetadata> {
		let response = self.http_client.get(self.discovery_url()).send().await?;
		if !response.status().is_success() {
			return Err(OidcError::ProviderError(format!(
				"openid configuration returned {}",
				response.status()
			)));
		}
		response
			.json()
			.await
			.map_err(|e| OidcError::ParseError(format!("failed to parse openid configuration: {e}")))
	}

	pub fn authorization_url(&self, metadata: &ProviderMetadata, redirect_url: &str, state: &str) -> Result<String> {
		let mut url = Url::parse(&metadata.authorization_endpoint)
			.map_err(|e| OidcError::InvalidUrl(e.to_string()))?;
		url
			.query_pairs_mut()
			.append_pair("client_id", &self.client_id)
			.append_pair("redirect_uri", redirect_url)
			.append_pair("response_type", "code")
			.append_pair("scope", &SCOPES.join(" "))
			.append_pair("state", state);
		Ok(url.to_string())
	}

	async fn jwks(&self, metadata: &ProviderMetadata) -> Result<JwkSet> {
		self
			.http_client
			.get(&metadata.jwks_uri)
			.send()
			.await?
			.error_for_status()?
			.json()
			.await
			.map_err(|e| OidcError::ParseError(format!("failed to parse provider jwks: {e}")))
	}

	/// Exchanges a login code for provider tokens and the user's email.
	#[tracing::instrument(skip(self, code), fields(provider = %self.base_url))]
	pub async fn exchange_code(&self, code: &str, redirect_url: &str) -> Result<CodeExchange> {
		let metadata = self.discover().await?;
		let response = self
			.http_client
			.post(&metadata.token_endpoint)
			.header("Accept", "application/json")
			.basic_auth(&self.client_id, Some(self.client_secret.expose()))
			.form(&[
				("grant_type", "authorization_code"),
				("code", code),
				("redirect_uri", redirect_url),
			])
			.send()
			.await?;
		let exchanged = read_token_response(response).await?;

		if exchanged.refresh_token.is_none() {
			tracing::warn!("no refresh token returned by provider, session lifetime will be reduced");
		}

		let id_token = exchanged
			.id_token
			.as_deref()
			.ok_or(OidcError::MissingClaim("id_token"))?;
		let jwks = self.jwks(&metadata).await?;
		let email = verify_id_token(id_token, &jwks, &metadata.issuer, &self.client_id)?;

		tracing::debug!("authorization code exchanged");
		Ok(CodeExchange {
			tokens: tokens_from(&exchanged, None),
			email,
		})
	}

	/// Returns `tokens` unchanged while the access token is still valid,
	/// otherwise refreshes them.
	#[tracing::instrument(skip(self, tokens), fields(provider = %self.base_url))]
	pub async fn refresh_if_expired(&self, tokens: &ProviderTokens) -> Result<Option<ProviderTokens>> {
		if tokens.expires_at > Utc::now() {
			return Ok(None);
		}
		let refresh_token = tokens
			.refresh_token
			.as_ref()
			.ok_or_else(|| OidcError::ProviderError("access token expired and no refresh token".to_string()))?;

		let metadata = self.discover().await?;
		let response = self
			.http_client
			.post(&metadata.token_endpoint)
			.header("Accept", "application/json")
			.basic_auth(&self.client_id, Some(self.client_secret.expose()))
			.form(&[
				("grant_type", "refresh_token"),
				("refresh_token", refresh_token.expose().as_str()),
			])
			.send()
			.await?;
		let refreshed = read_token_response(response).await?;
		tracing::debug!("provider access token refreshed");
		Ok(Some(tokens_from(&refreshed, Some(refresh_token))))
	}

	#[tracing::instrument(skip(self, access_token), fields(provider = %self.base_url))]
	pub async fn user_info(&self, access_token: &SecretString) -> Result<UserInfo> {
		let metadata = self.discover().await?;
		let endpoint = metadata
			.userinfo_endpoint
			.ok_or_else(|| OidcError::ProviderError("provider has no userinfo endpoint".to_string()))?;

		let response = self
			.http_client
			.get(endpoint)
			.header("Accept", "application/json")
			.bearer_auth(access_token.expose())
			.send()
			.await?;
		if !response.status().is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(OidcError::ProviderError(format!("failed to get user info: {body}")));
		}

		let info: UserInfo = response
			.json()
			.await
			.map_err(|e| OidcError::ParseError(format!("failed to parse user info response: {e}")))?;
		info.validate()?;
		Ok(info)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
	use proptest::prelude::*;

	// 30 bytes: standard and url-safe base64 agree and need no padding.
	const SECRET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123";
	const SECRET_B64: &str = "YWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXowMTIz";

	fn jwks() -> JwkSet {
		serde_json::from_value(serde_json::json!({
			"keys": [{"kty": "oct", "kid": "k1", "alg": "HS256", "k": SECRET_B64}]
		}))
		.unwrap()
	}

	fn id_token(iss: &str, aud: &str, exp_offset: i64, email: Option<&str>) -> String {
		let mut header = Header::new(Algorithm::HS256);
		header.kid = Some("k1".to_string());
		let mut claims = serde_json::json!({
			"iss": iss,
			"aud": aud,
			"sub": "00u1",
			"exp": Utc::now().timestamp() + exp_offset,
			"iat": Utc::now().timestamp(),
		});
		if let Some(email) = email {
			claims["email"] = serde_json::Value::from(email);
		}
		encode(&header, &claims, &EncodingKey::from_secret(SECRET)).unwrap()
	}

	#[test]
	fn bare_domain_gets_https() {
		assert_eq!(
			provider_base_url("dev-123456.okta.com").unwrap().as_str(),
			"https://dev-123456.okta.com/"
		);
		assert_eq!(
			provider_base_url("http://localhost:8080/").unwrap().as_str(),
			"http://localhost:8080/"
		);
		assert!(provider_base_url("  ").is_err());
	}

	#[test]
	fn discovery_url_keeps_issuer_path() {
		let client = OidcClient::new(
			"example.okta.com/oauth2/default",
			"client",
			SecretString::from("secret"),
		)
		.unwrap();
		assert_eq!(
			client.discovery_url().as_str(),
			"https://example.okta.com/oauth2/default/.well-known/openid-configuration"
		);
	}

	#[test]
	fn authorization_url_contains_required_params() {
		let client = OidcClient::new("example.okta.com", "client-1", SecretString::from("s")).unwrap();
		let metadata = ProviderMetadata {
			issuer: "https://example.okta.com".into(),
			authorization_endpoint: "https://example.okta.com/oauth2/v1/authorize".into(),
			token_endpoint: "https://example.okta.com/oauth2/v1/token".into(),
			userinfo_endpoint: None,
			jwks_uri: "https://example.okta.com/oauth2/v1/keys".into(),
		};
		let url = client
			.authorization_url(&metadata, "http://localhost:8301", "state-1")
			.unwrap();
		assert!(url.starts_with("https://example.okta.com/oauth2/v1/authorize?"));
		assert!(url.contains("client_id=client-1"));
		assert!(url.contains("response_type=code"));
		assert!(url.contains("scope=openid+email+groups+offline_access"));
		assert!(url.contains("state=state-1"));
	}

	#[test]
	fn valid_id_token_yields_email() {
		let token = id_token("https://idp", "client-1", 300, Some("alice@example.com"));
		let email = verify_id_token(&token, &jwks(), "https://idp", "client-1").unwrap();
		assert_eq!(email, "alice@example.com");
	}

	#[test]
	fn id_token_checks_issuer_audience_and_expiry() {
		let wrong_iss = id_token("https://other", "client-1", 300, Some("a@b.c"));
		assert!(verify_id_token(&wrong_iss, &jwks(), "https://idp", "client-1").is_err());

		let wrong_aud = id_token("https://idp", "client-2", 300, Some("a@b.c"));
		assert!(verify_id_token(&wrong_aud, &jwks(), "https://idp", "client-1").is_err());

		let expired = id_token("https://idp", "client-1", -600, Some("a@b.c"));
		assert!(verify_id_token(&expired, &jwks(), "https://idp", "client-1").is_err());
	}

	#[test]
	fn id_token_without_email_is_rejected() {
		let token = id_token("https://idp", "client-1", 300, None);
		assert!(matches!(
			verify_id_token(&token, &jwks(), "https://idp", "client-1"),
			Err(OidcError::MissingClaim("email"))
		));
	}

	#[test]
	fn user_info_requires_email_or_name() {
		let empty: UserInfo = serde_json::from_str("{}").unwrap();
		assert!(empty.validate().is_err());
		let info: UserInfo =
			serde_json::from_str(r#"{"email":"a@b.c","groups":["Everyone","Admins"]}"#).unwrap();
		info.validate().unwrap();
		assert_eq!(info.groups, vec!["Everyone", "Admins"]);
	}

	#[test]
	fn refresh_keeps_previous_refresh_token() {
		let response = TokenEndpointResponse {
			access_token: "new".into(),
			refresh_token: None,
			id_token: None,
			expires_in: Some(60),
		};
		let previous = SecretString::from("refresh-1");
		let tokens = tokens_from(&response, Some(&previous));
		assert_eq!(tokens.access_token.expose(), "new");
		assert_eq!(tokens.refresh_token.unwrap().expose(), "refresh-1");
		assert!(tokens.expires_at > Utc::now());
	}

	#[test]
	fn tokens_not_in_debug_output() {
		let tokens = ProviderTokens {
			access_token: SecretString::from("super-secret-access"),
			refresh_token: Some(SecretString::from("super-secret-refresh")),
			expires_at: Utc::now(),
		};
		let debug = format!("{tokens:?}");
		assert!(!debug.contains("super-secret"));
	}

	proptest! {
		#[test]
		fn bare_hosts_parse(host in "[a-z][a-z0-9-]{0,20}\\.(okta|example)\\.com") {
			let url = provider_base_url(&host).unwrap();
			prop_assert_eq!(url.scheme(), "https");
			prop_assert_eq!(url.host_str(), Some(host.as_str()));
		}
	}
}
