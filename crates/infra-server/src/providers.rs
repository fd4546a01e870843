// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The registry's view of an identity provider: code exchange for login,
//! token refresh and user info for token-based sync, and the directory for
//! providers with an API token.

use std::sync::Arc;

use async_trait::async_trait;
use infra_common_config::SecretString;
use infra_server_api::ProviderKind;
use infra_server_auth_oidc::{
	CodeExchange, IdentityDirectory, OidcClient, OktaDirectory, ProviderTokens, Result, UserInfo,
};
use infra_server_db::Provider;

#[async_trait]
pub trait IdentityProviders: Send + Sync {
	async fn exchange_code(
		&self,
		provider: &Provider,
		code: &str,
		redirect_url: &str,
	) -> Result<CodeExchange>;

	/// New tokens when `tokens` had expired, `None` while they are still valid.
	async fn refresh(&self, provider: &Provider, tokens: &ProviderTokens) -> Result<Option<ProviderTokens>>;

	async fn user_info(&self, provider: &Provider, access_token: &SecretString) -> Result<UserInfo>;

	/// The directory sync lists, or `None` when the provider is only used for
	/// interactive login.
	fn directory(&self, provider: &Provider) -> Result<Option<Arc<dyn IdentityDirectory>>>;
}

/// Talks to the real provider over HTTP.
#[derive(Debug, Default, Clone)]
pub struct OidcProviders;

impl OidcProviders {
	fn client(provider: &Provider) -> Result<OidcClient> {
		OidcClient::new(
			&provider.url,
			provider.client_id.clone(),
			provider.client_secret.clone(),
		)
	}
}

#[async_trait]
impl IdentityProviders for OidcProviders {
	#[tracing::instrument(skip(self, provider, code), fields(provider = %provider.name))]
	async fn exchange_code(
		&self,
		provider: &Provider,
		code: &str,
		redirect_url: &str,
	) -> Result<CodeExchange> {
		Self::client(provider)?.exchange_code(code, redirect_url).await
	}

	#[tracing::instrument(skip(self, provider, tokens), fields(provider = %provider.name))]
	async fn refresh(&self, provider: &Provider, tokens: &ProviderTokens) -> Result<Option<ProviderTokens>> {
		Self::client(provider)?.refresh_if_expired(tokens).await
	}

	#[tracing::instrument(skip(self, provider, access_token), fields(provider = %provider.name))]
	async fn user_info(&self, provider: &Provider, access_token: &SecretString) -> Result<UserInfo> {
		Self::client(provider)?.user_info(access_token).await
	}

	fn directory(&self, provider: &Provider) -> Result<Option<Arc<dyn IdentityDirectory>>> {
		match (&provider.kind, &provider.api_token) {
			(ProviderKind::Okta, Some(token)) if !token.is_empty() => {
				let directory = OktaDirectory::new(&provider.url, provider.client_id.clone(), token.clone())?;
				Ok(Some(Arc::new(directory) as Arc<dyn IdentityDirectory>))
			}
			_ => Ok(None),
		}
	}
}
