// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use infra_server_k8s::in_cluster::POD_LABELS_PATH;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
	Text,
	Json,
}

/// infra connector: registers this cluster as a destination, turns grants
/// into role bindings and issues service-account tokens.
#[derive(Parser, Debug, Clone)]
#[command(
	name = "infra-connector",
	about = "infra in-cluster connector",
	version,
	subcommand_negates_reqs = true
)]
pub struct Options {
	/// Registry base URL.
	#[arg(long, env = "INFRA_CONNECTOR_SERVER_URL", required = true)]
	pub server_url: Option<Url>,

	/// Access key as a secret reference, e.g. `env:INFRA_ACCESS_KEY`,
	/// `file:connector-key` or a literal key.
	#[arg(long, env = "INFRA_CONNECTOR_ACCESS_KEY", required = true, hide_env_values = true)]
	pub access_key: Option<String>,

	/// PEM file trusted in addition to the system roots.
	#[arg(long, env = "INFRA_CONNECTOR_TRUSTED_CERTIFICATE")]
	pub trusted_certificate: Option<PathBuf>,

	#[arg(long, env = "INFRA_CONNECTOR_SKIP_TLS_VERIFY")]
	pub skip_tls_verify: bool,

	/// Destination name; defaults to a prefix of the cluster CA checksum.
	#[arg(long, env = "INFRA_CONNECTOR_NAME")]
	pub name: Option<String>,

	/// `host:port` clients use to reach the cluster. Looked up from the
	/// connector's service when unset.
	#[arg(long, env = "INFRA_CONNECTOR_ENDPOINT_ADDR")]
	pub endpoint_addr: Option<String>,

	/// Namespace holding the service accounts issued to users.
	#[arg(long, env = "INFRA_CONNECTOR_SERVICE_ACCOUNT_NAMESPACE", default_value = "default")]
	pub service_account_namespace: String,

	#[arg(long, env = "INFRA_CONNECTOR_HEALTH_ADDR", default_value = "0.0.0.0:8081")]
	pub health_addr: SocketAddr,

	#[arg(long, env = "INFRA_CONNECTOR_METRICS_ADDR", default_value = "0.0.0.0:9090")]
	pub metrics_addr: SocketAddr,

	/// Kubernetes API server address; in-cluster discovery when unset.
	#[arg(long, env = "INFRA_CONNECTOR_KUBERNETES_ADDR")]
	pub kubernetes_addr: Option<String>,

	/// PEM file with the API server CA.
	#[arg(long, env = "INFRA_CONNECTOR_KUBERNETES_CA")]
	pub kubernetes_ca: Option<PathBuf>,

	/// Bearer token for the API server, as a secret reference.
	#[arg(long, env = "INFRA_CONNECTOR_KUBERNETES_AUTH_TOKEN", hide_env_values = true)]
	pub kubernetes_auth_token: Option<String>,

	/// Downward-API labels file used to find the connector's service.
	#[arg(long, env = "INFRA_CONNECTOR_POD_LABELS", default_value = POD_LABELS_PATH)]
	pub pod_labels: PathBuf,

	/// Directory for `file:` secret references.
	#[arg(long, env = "INFRA_CONNECTOR_SECRETS_DIR", default_value = "/var/lib/infra/secrets")]
	pub secrets_dir: PathBuf,

	#[arg(long, env = "INFRA_CONNECTOR_LOG_FORMAT", value_enum, default_value = "text")]
	pub log_format: LogFormat,

	/// Seconds a long-poll may be held open by the registry.
	#[arg(long, env = "INFRA_CONNECTOR_POLL_WAIT", default_value_t = 30)]
	pub poll_wait_secs: u64,

	/// Time between destination syncs.
	#[arg(long, env = "INFRA_CONNECTOR_SYNC_INTERVAL", value_parser = humantime::parse_duration, default_value = "5m")]
	pub sync_interval: Duration,

	#[command(subcommand)]
	pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
	/// Show version and build information
	Version,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_fill_in() {
		let options = Options::try_parse_from([
			"infra-connector",
			"--server-url",
			"https://infra.example.com",
			"--access-key",
			"env:KEY",
		])
		.unwrap();
		assert_eq!(options.service_account_namespace, "default");
		assert_eq!(options.health_addr.port(), 8081);
		assert_eq!(options.metrics_addr.port(), 9090);
		assert_eq!(options.sync_interval, Duration::from_secs(300));
		assert_eq!(options.poll_wait_secs, 30);
		assert_eq!(options.pod_labels, PathBuf::from(POD_LABELS_PATH));
		assert!(!options.skip_tls_verify);
	}

	#[test]
	fn version_needs_no_server() {
		let options = Options::try_parse_from(["infra-connector", "version"]).unwrap();
		assert!(matches!(options.command, Some(Command::Version)));
	}

	#[test]
	fn server_url_is_required() {
		assert!(Options::try_parse_from(["infra-connector", "--access-key", "x"]).is_err());
	}

	#[test]
	fn sync_interval_parses_human_durations() {
		let options = Options::try_parse_from([
			"infra-connector",
			"--server-url",
			"https://infra.example.com",
			"--access-key",
			"x",
			"--sync-interval",
			"90s",
		])
		.unwrap();
		assert_eq!(options.sync_interval, Duration::from_secs(90));
	}
}
