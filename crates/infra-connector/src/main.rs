// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! infra connector binary.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use infra_common_http::{builder_with_tls, TlsOptions};
use infra_common_version::BuildInfo;
use infra_connector::options::{Command, LogFormat};
use infra_connector::{Connector, ConnectorMetrics, DestinationSettings, EndpointSource, Options};
use infra_server_api::{RegistryApi, RegistryClient};
use infra_server_k8s::{in_cluster, K8sClient, KubeClient, KubeOverrides};
use infra_server_secrets::SecretRegistry;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(format: LogFormat) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| "info".into());
	let registry = tracing_subscriber::registry().with(filter);
	match format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

fn format_version_info() -> String {
	let info = BuildInfo::current();
	format!(
		"infra-connector version: {}\n\
         Git SHA:                 {}\n\
         Built at:                {}\n\
         Platform:                {}",
		info.version, info.git_sha, info.build_timestamp, info.platform,
	)
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::error!(error = %e, "failed to listen for ctrl-c");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut signal) => {
				signal.recv().await;
			}
			Err(e) => {
				tracing::error!(error = %e, "failed to listen for SIGTERM");
				std::future::pending::<()>().await;
			}
		}
	};
	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}

async fn read_pem(path: &std::path::Path) -> anyhow::Result<String> {
	tokio::fs::read_to_string(path)
		.await
		.with_context(|| format!("reading {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let options = Options::parse();

	if let Some(Command::Version) = options.command {
		println!("{}", format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();
	init_tracing(options.log_format);

	let server_url = options
		.server_url
		.clone()
		.context("--server-url is required")?;
	let access_key_ref = options
		.access_key
		.as_deref()
		.context("--access-key is required")?;

	tracing::info!(
		server = %server_url,
		version = BuildInfo::current().version,
		"starting infra-connector"
	);

	let secrets = SecretRegistry::with_defaults(&options.secrets_dir);
	let access_key = secrets
		.resolve(access_key_ref)
		.await
		.context("resolving the access key")?;
	let kubernetes_token = secrets
		.resolve_optional(options.kubernetes_auth_token.as_deref())
		.await
		.context("resolving the kubernetes auth token")?;

	let kubernetes_ca = match &options.kubernetes_ca {
		Some(path) => Some(read_pem(path).await?),
		None => None,
	};
	let overrides = KubeOverrides {
		addr: options.kubernetes_addr.clone(),
		ca: kubernetes_ca.clone(),
		token: kubernetes_token.map(|t| t.expose().clone()),
	};
	let k8s: Arc<dyn K8sClient> = Arc::new(
		KubeClient::with_overrides(&overrides)
			.await
			.context("connecting to kubernetes")?,
	);

	let ca = match kubernetes_ca {
		Some(ca) => ca,
		None => in_cluster::ca().await.context("reading the cluster CA")?,
	};
	let unique_id = in_cluster::checksum(ca.as_bytes());
	let name = options
		.name
		.clone()
		.unwrap_or_else(|| in_cluster::default_name(&unique_id));

	let endpoint = match &options.endpoint_addr {
		Some(addr) => EndpointSource::Static(addr.clone()),
		None => EndpointSource::Service {
			namespace: in_cluster::namespace()
				.await
				.context("reading the connector namespace")?,
			instance_labels: in_cluster::instance_labels(&options.pod_labels)
				.await
				.context("reading pod labels")?,
		},
	};

	let trusted_certificate = match &options.trusted_certificate {
		Some(path) => Some(read_pem(path).await?),
		None => None,
	};
	let http = builder_with_tls(
		"connector",
		&TlsOptions {
			trusted_certificate,
			skip_verify: options.skip_tls_verify,
		},
	)
	.and_then(|b| b.build())
	.context("building the http client")?;
	let registry: Arc<dyn RegistryApi> = Arc::new(
		RegistryClient::new(http, server_url, access_key)
			.with_destination(unique_id.clone())
			.with_unauthorized_hook(Arc::new(|| {
				tracing::error!("registry rejected the connector access key; check the key and its permissions")
			})),
	);

	tracing::info!(destination = %name, unique_id = %unique_id, "connector identity");

	let connector = Connector {
		registry,
		k8s,
		destination: DestinationSettings {
			name,
			unique_id,
			ca,
			endpoint,
			version: BuildInfo::current().version.to_string(),
		},
		service_account_namespace: options.service_account_namespace.clone(),
		poll_wait_secs: options.poll_wait_secs,
		sync_interval: options.sync_interval,
		health_addr: options.health_addr,
		metrics_addr: options.metrics_addr,
		metrics: Arc::new(ConnectorMetrics::new().context("registering metrics")?),
	};

	let cancel = CancellationToken::new();
	{
		let cancel = cancel.clone();
		tokio::spawn(async move {
			shutdown_signal().await;
			tracing::info!("received shutdown signal");
			cancel.cancel();
		});
	}

	connector.run(cancel).await
}
