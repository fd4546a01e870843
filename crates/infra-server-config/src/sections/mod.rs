// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod auth;
mod database;
mod http;
mod import;
mod keys;
mod logging;
mod paths;
mod secrets;
mod sync;

pub use auth::{AuthConfig, AuthConfigLayer};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use http::{HttpConfig, HttpConfigLayer};
pub use import::{ImportConfig, ImportConfigLayer};
pub use keys::{KeysConfig, KeysConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use paths::{PathsConfig, PathsConfigLayer};
pub use secrets::SecretStorageConfig;
pub use sync::{
	CredentialsConfig, CredentialsConfigLayer, DestinationsConfig, DestinationsConfigLayer,
	SyncConfig, SyncConfigLayer,
};
