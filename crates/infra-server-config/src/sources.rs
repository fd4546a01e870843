// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use infra_common_config::load_secret_env;
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	AuthConfigLayer, CredentialsConfigLayer, DatabaseConfigLayer, DestinationsConfigLayer,
	HttpConfigLayer, ImportConfigLayer, KeysConfigLayer, LogFormat, LoggingConfigLayer,
	PathsConfigLayer, SyncConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/infra/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		parse_toml(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})
	}
}

pub(crate) fn parse_toml(content: &str) -> Result<ServerConfigLayer, toml::de::Error> {
	let layer: ServerConfigLayer = toml::from_str(content)?;
	trace!("parsed config layer from TOML");
	Ok(layer)
}

/// Environment variable source.
///
/// Convention: INFRA_SERVER_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			http: Some(load_http_from_env()?),
			database: Some(load_database_from_env()),
			auth: Some(load_auth_from_env()?),
			keys: Some(load_keys_from_env()),
			secrets: None,
			sync: Some(load_sync_from_env()?),
			destinations: Some(load_destinations_from_env()?),
			credentials: Some(load_credentials_from_env()?),
			import: Some(load_import_from_env()),
			paths: Some(load_paths_from_env()),
			logging: Some(load_logging_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_u16(name: &str) -> Result<Option<u16>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u16 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u64 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid usize value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn load_http_from_env() -> Result<HttpConfigLayer, ConfigError> {
	Ok(HttpConfigLayer {
		host: env_var("INFRA_SERVER_HOST"),
		port: env_u16("INFRA_SERVER_PORT")?,
		request_timeout_secs: env_u64("INFRA_SERVER_REQUEST_TIMEOUT_SECS")?,
		shutdown_grace_secs: env_u64("INFRA_SERVER_SHUTDOWN_GRACE_SECS")?,
	})
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		driver: env_var("INFRA_SERVER_DATABASE_DRIVER"),
		url: env_var("INFRA_SERVER_DATABASE_URL"),
	}
}

fn load_auth_from_env() -> Result<AuthConfigLayer, ConfigError> {
	Ok(AuthConfigLayer {
		root_access_key: load_secret_env("INFRA_SERVER_ROOT_ACCESS_KEY")?,
		connector_access_key: load_secret_env("INFRA_SERVER_CONNECTOR_ACCESS_KEY")?,
		session_duration_secs: env_u64("INFRA_SERVER_SESSION_DURATION_SECS")?,
		token_duration_secs: env_u64("INFRA_SERVER_TOKEN_DURATION_SECS")?,
	})
}

fn load_keys_from_env() -> KeysConfigLayer {
	KeysConfigLayer {
		provider: env_var("INFRA_SERVER_KEYS_PROVIDER"),
		storage: env_var("INFRA_SERVER_KEYS_STORAGE"),
		root_key_id: env_var("INFRA_SERVER_KEYS_ROOT_KEY_ID"),
	}
}

fn load_sync_from_env() -> Result<SyncConfigLayer, ConfigError> {
	Ok(SyncConfigLayer {
		interval_secs: env_u64("INFRA_SERVER_SYNC_INTERVAL_SECS")?,
		concurrency: env_usize("INFRA_SERVER_SYNC_CONCURRENCY")?,
	})
}

fn load_destinations_from_env() -> Result<DestinationsConfigLayer, ConfigError> {
	Ok(DestinationsConfigLayer {
		sweep_interval_secs: env_u64("INFRA_SERVER_DESTINATIONS_SWEEP_INTERVAL_SECS")?,
		max_age_secs: env_u64("INFRA_SERVER_DESTINATIONS_MAX_AGE_SECS")?,
	})
}

fn load_credentials_from_env() -> Result<CredentialsConfigLayer, ConfigError> {
	Ok(CredentialsConfigLayer {
		request_ttl_secs: env_u64("INFRA_SERVER_CREDENTIALS_REQUEST_TTL_SECS")?,
		gc_interval_secs: env_u64("INFRA_SERVER_CREDENTIALS_GC_INTERVAL_SECS")?,
	})
}

fn load_import_from_env() -> ImportConfigLayer {
	ImportConfigLayer {
		path: env_var("INFRA_SERVER_IMPORT_PATH").map(PathBuf::from),
		replace: env_bool("INFRA_SERVER_IMPORT_REPLACE"),
	}
}

fn load_paths_from_env() -> PathsConfigLayer {
	PathsConfigLayer {
		data_dir: env_var("INFRA_SERVER_DATA_DIR").map(PathBuf::from),
	}
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	let format = match env_var("INFRA_SERVER_LOG_FORMAT") {
		Some(v) => Some(LogFormat::parse(&v).ok_or_else(|| ConfigError::InvalidValue {
			key: "INFRA_SERVER_LOG_FORMAT".to_string(),
			message: format!("expected 'text' or 'json', got '{v}'"),
		})?),
		None => None,
	};
	Ok(LoggingConfigLayer {
		level: env_var("INFRA_SERVER_LOG_LEVEL"),
		format,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_precedence_ordering() {
		assert!(Precedence::Environment > Precedence::ConfigFile);
		assert!(Precedence::ConfigFile > Precedence::Defaults);
	}

	#[test]
	fn test_defaults_source_returns_empty_layer() {
		let layer = DefaultsSource.load().unwrap();
		assert!(layer.http.is_none());
		assert!(layer.database.is_none());
	}

	#[test]
	fn test_toml_source_missing_file_returns_empty() {
		let layer = TomlSource::new("/nonexistent/config.toml").load().unwrap();
		assert!(layer.http.is_none());
	}

	#[test]
	fn test_toml_sections_and_secret_storages() {
		let layer = parse_toml(
			r#"
			[http]
			port = 9090

			[auth]
			root_access_key = "env:ROOT_KEY"

			[keys]
			provider = "vault"
			storage = "prod-vault"

			[[secrets]]
			name = "prod-vault"
			kind = "vault"
			config = { address = "https://vault:8200", token = "file:vault-token" }

			[logging]
			format = "json"
			"#,
		)
		.unwrap();

		assert_eq!(layer.http.and_then(|h| h.port), Some(9090));
		let auth = layer.auth.unwrap().finalize();
		assert_eq!(auth.root_access_key.unwrap().expose(), "env:ROOT_KEY");
		let keys = layer.keys.unwrap().finalize();
		assert_eq!(keys.provider, "vault");
		let secrets = layer.secrets.unwrap();
		assert_eq!(secrets[0].storage_name(), "prod-vault");
		assert_eq!(secrets[0].config["address"], "https://vault:8200");
		assert_eq!(layer.logging.unwrap().format, Some(LogFormat::Json));
	}

	#[test]
	fn test_toml_file_errors_carry_path() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("server.toml");
		std::fs::write(&path, "[http\nport = 1").unwrap();
		let err = TomlSource::new(&path).load().unwrap_err();
		assert!(err.to_string().contains("server.toml"));
	}
}
