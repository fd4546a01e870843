// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identity provider integration for the infra registry.
//!
//! [`OidcClient`] performs the authorization-code login and token refresh
//! against any OpenID Connect provider. [`IdentityDirectory`] lists the users
//! and groups a provider holds so the registry can mirror them.

pub mod client;
pub mod directory;
mod error;

pub use client::{
	provider_base_url, verify_id_token, CodeExchange, OidcClient, ProviderMetadata, ProviderTokens,
	UserInfo, PROVIDER_REQUEST_TIMEOUT, SCOPES,
};
pub use directory::{next_page, DirectorySnapshot, IdentityDirectory, OktaDirectory, StaticDirectory};
pub use error::{OidcError, Result};
