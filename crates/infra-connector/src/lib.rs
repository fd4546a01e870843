// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-cluster connector.
//!
//! Registers the cluster as a destination, long-polls the registry for
//! grants and credential requests, keeps the cluster's role bindings in line
//! with the grants and answers credential requests with service-account
//! tokens.

pub mod connector;
pub mod credentials;
pub mod destination;
pub mod error;
pub mod grants;
pub mod http;
pub mod metrics;
pub mod normalize;
pub mod options;

pub use connector::Connector;
pub use credentials::{CredentialReconciler, Outcome};
pub use destination::{
	DestinationSettings, DestinationSync, DestinationWatch, EndpointSource, RegisteredDestination,
};
pub use error::{ConnectorError, Result};
pub use grants::{build_plan, GrantReconciler};
pub use metrics::ConnectorMetrics;
pub use normalize::service_account_name;
pub use options::Options;
