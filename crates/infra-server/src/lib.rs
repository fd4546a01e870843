// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The infra registry.
//!
//! Holds identities, destinations and grants, hands connectors their
//! destination's grants over a long-poll, and brokers credential requests
//! between users and the connectors that mint cluster tokens.

pub mod api;
pub mod auth_middleware;
pub mod bootstrap;
pub mod error;
pub mod extract;
pub mod importer;
pub mod jobs;
pub mod long_poll;
pub mod metrics;
pub mod providers;
pub mod routes;
pub mod sync;

pub use api::{create_router, AppState};
pub use error::ServerError;
pub use importer::ConfigImporter;
pub use infra_server_config::ServerConfig;
pub use metrics::ServerMetrics;
pub use providers::{IdentityProviders, OidcProviders};
pub use sync::ProviderSync;
