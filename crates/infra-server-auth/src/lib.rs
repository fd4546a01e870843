// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authentication for the infra registry.
//!
//! - [`access_key`]: issue, look up and import `<key>.<secret>` credentials
//! - [`session`]: Ed25519-signed session JWTs and the public JWKS
//! - [`permissions`]: permission strings and the per-request [`Principal`]
//! - [`bearer`]: header extraction

pub mod access_key;
pub mod bearer;
mod error;
pub mod permissions;
pub mod session;

pub use access_key::{IssueRequest, IssuedAccessKey};
pub use bearer::{extract_bearer_token, extract_destination_header};
pub use error::{AuthError, Result};
pub use permissions::Principal;
pub use session::{load_or_create_settings, SessionClaims, SessionSigner, SessionVerifier};
