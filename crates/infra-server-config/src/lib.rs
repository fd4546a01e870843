// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the infra registry.
//!
//! This crate provides:
//! - Layered server options from defaults, a TOML file and environment
//!   variables (`INFRA_SERVER_*`)
//! - The declarative import document (providers, grants, users)
//!
//! # Usage
//!
//! ```ignore
//! use infra_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("Server listening on {}", config.socket_addr());
//! ```

pub mod document;
pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use document::{
	GrantDeclaration, GrantIdentity, ImportDocument, ProviderDeclaration, UserDeclaration,
	DEFAULT_GRANT_ROLE,
};
pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use std::collections::BTreeSet;
use std::path::PathBuf;

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub http: HttpConfig,
	pub database: DatabaseConfig,
	pub auth: AuthConfig,
	pub keys: KeysConfig,
	pub secrets: Vec<SecretStorageConfig>,
	pub sync: SyncConfig,
	pub destinations: DestinationsConfig,
	pub credentials: CredentialsConfig,
	pub import: ImportConfig,
	pub paths: PathsConfig,
	pub logging: LoggingConfig,
}

impl ServerConfig {
	/// Get the socket address string for binding.
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.http.host, self.http.port)
	}
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`INFRA_SERVER_*`)
/// 2. Config file (`/etc/infra/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(config_path: impl Into<PathBuf>) -> Result<ServerConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let config = ServerConfig {
		http: layer.http.unwrap_or_default().finalize(),
		database: layer.database.unwrap_or_default().finalize(),
		auth: layer.auth.unwrap_or_default().finalize(),
		keys: layer.keys.unwrap_or_default().finalize(),
		secrets: layer.secrets.unwrap_or_default(),
		sync: layer.sync.unwrap_or_default().finalize(),
		destinations: layer.destinations.unwrap_or_default().finalize(),
		credentials: layer.credentials.unwrap_or_default().finalize(),
		import: layer.import.unwrap_or_default().finalize(),
		paths: layer.paths.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
	};

	validate_config(&config)?;

	info!(
		host = %config.http.host,
		port = config.http.port,
		database = %config.database.url,
		key_provider = %config.keys.provider,
		secret_storages = config.secrets.len(),
		import = ?config.import.path,
		"Server configuration loaded"
	);

	Ok(config)
}

/// Validate cross-field configuration rules.
fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
	if config.database.driver != "sqlite" {
		return Err(ConfigError::Validation(format!(
			"database driver {:?} is not supported, use \"sqlite\"",
			config.database.driver
		)));
	}

	// long-polls reserve five seconds of the request budget for the response
	if config.http.request_timeout_secs <= 5 {
		return Err(ConfigError::InvalidValue {
			key: "http.request_timeout_secs".to_string(),
			message: "must be greater than 5".to_string(),
		});
	}

	let mut names = BTreeSet::new();
	for storage in &config.secrets {
		if !names.insert(storage.storage_name()) {
			return Err(ConfigError::Validation(format!(
				"duplicate secret configuration for {:?}, please provide a unique name for this secret configuration",
				storage.storage_name()
			)));
		}
	}

	Ok(())
}
