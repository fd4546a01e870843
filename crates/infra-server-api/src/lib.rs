// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The registry's `/v1` HTTP surface as Rust types.
//!
//! Shared by the registry (which serializes these from handlers) and the
//! connector (which reaches the registry through [`RegistryClient`] behind
//! the [`RegistryApi`] seam).

pub mod client;
pub mod error;
pub mod id;
pub mod types;

pub use client::{RegistryApi, RegistryClient, UnauthorizedHook};
pub use error::{ApiError, ClientError, ErrorKind, Result};
pub use id::{Id, ParseIdError};
pub use types::*;

/// Header a connector sets to its destination unique ID on every request.
pub const DESTINATION_HEADER: &str = "Infra-Destination";

/// Destination name reserved for grants on the registry itself.
pub const INFRA_DESTINATION: &str = "infra";

/// Privilege that only allows a session against a destination; never turned
/// into a cluster binding.
pub const CONNECT_PRIVILEGE: &str = "connect";
