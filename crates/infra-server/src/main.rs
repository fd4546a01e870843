// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! infra registry binary.

use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use infra_server::{
	bootstrap,
	jobs::{
		ConfigImportJob, CredentialGcJob, DestinationSweepJob, JobHistoryGcJob, ProviderSyncJob,
		CONFIG_IMPORT_JOB_ID, JOB_HISTORY_GC_INTERVAL, JOB_RUN_RETENTION, PROVIDER_SYNC_JOB_ID,
	},
	create_router, AppState, ConfigImporter, IdentityProviders, OidcProviders, ProviderSync,
	ServerMetrics,
};
use infra_server_config::{LogFormat, ServerConfig};
use infra_server_jobs::{JobScheduler, TriggerSource};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod version;

/// infra registry: identities, destinations, grants and credential requests.
#[derive(Parser, Debug)]
#[command(name = "infra-server", about = "infra access control registry", version)]
struct Args {
	/// Config file; defaults to /etc/infra/server.toml.
	#[arg(long, env = "INFRA_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show version and build information
	Version,
}

fn init_tracing(config: &ServerConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| config.logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);
	match config.logging.format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
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

/// Re-runs the import job on every SIGHUP until `shutdown` fires.
#[cfg(unix)]
fn spawn_reload_listener(scheduler: Arc<JobScheduler>, shutdown: CancellationToken) -> anyhow::Result<()> {
	use tokio::signal::unix::{signal, SignalKind};

	let mut hangup = signal(SignalKind::hangup()).context("listening for SIGHUP")?;
	tokio::spawn(async move {
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				received = hangup.recv() => {
					if received.is_none() {
						break;
					}
					tracing::info!("SIGHUP received, reloading import file");
					// failures are recorded on the job run; the process keeps serving
					if let Err(e) = scheduler.trigger_job(CONFIG_IMPORT_JOB_ID, TriggerSource::Reload).await {
						tracing::error!(error = %e, "config reload failed");
					}
				}
			}
		}
	});
	Ok(())
}

#[cfg(not(unix))]
fn spawn_reload_listener(_: Arc<JobScheduler>, _: CancellationToken) -> anyhow::Result<()> {
	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => infra_server_config::load_config_with_file(path),
		None => infra_server_config::load_config(),
	}
	.context("loading configuration")?;
	init_tracing(&config);

	tracing::info!(
		host = %config.http.host,
		port = config.http.port,
		database = %config.database.url,
		"starting infra-server"
	);

	let registry = bootstrap::open(&config).await.context("opening the registry")?;
	bootstrap::bootstrap_identities(&registry.store, &registry.secrets, &config)
		.await
		.context("importing bootstrap access keys")?;

	let importer = Arc::new(ConfigImporter::new(
		registry.store.clone(),
		Arc::clone(&registry.secrets),
		config.import.replace,
	));
	if let Some(path) = &config.import.path {
		importer
			.import_file(path)
			.await
			.with_context(|| format!("importing {}", path.display()))?;
	}

	let providers: Arc<dyn IdentityProviders> = Arc::new(OidcProviders);
	let sync = Arc::new(ProviderSync::new(
		registry.store.clone(),
		Arc::clone(&providers),
		Some(Arc::clone(&importer)),
		config.sync.concurrency,
	));

	let mut scheduler = JobScheduler::new(registry.store.jobs.clone());
	scheduler.register_periodic(Arc::new(ProviderSyncJob::new(sync)), config.sync.interval());
	scheduler.register_periodic(
		Arc::new(DestinationSweepJob::new(
			registry.store.destinations.clone(),
			config.destinations.max_age(),
		)),
		config.destinations.sweep_interval(),
	);
	scheduler.register_periodic(
		Arc::new(CredentialGcJob::new(
			registry.store.credential_requests.clone(),
			config.credentials.request_ttl(),
		)),
		config.credentials.gc_interval(),
	);
	scheduler.register_periodic(
		Arc::new(JobHistoryGcJob::new(registry.store.jobs.clone(), JOB_RUN_RETENTION)),
		JOB_HISTORY_GC_INTERVAL,
	);
	if let Some(path) = &config.import.path {
		scheduler.register_one_shot(Arc::new(ConfigImportJob::new(Arc::clone(&importer), path.clone())));
	}
	scheduler.start().await.context("starting job scheduler")?;
	let scheduler = Arc::new(scheduler);
	{
		let scheduler = Arc::clone(&scheduler);
		tokio::spawn(async move {
			if let Err(e) = scheduler.trigger_job(PROVIDER_SYNC_JOB_ID, TriggerSource::Startup).await {
				tracing::warn!(error = %e, "initial provider sync failed");
			}
		});
	}

	let shutdown = CancellationToken::new();
	if config.import.path.is_some() {
		spawn_reload_listener(Arc::clone(&scheduler), shutdown.clone())?;
	}

	let config = Arc::new(config);
	let state = AppState {
		store: registry.store,
		signer: registry.signer,
		organization_id: registry.organization_id,
		config: Arc::clone(&config),
		metrics: Arc::new(ServerMetrics::new().context("registering metrics")?),
		providers,
		scheduler: Some(Arc::clone(&scheduler)),
		shutdown: shutdown.clone(),
	};
	let app = create_router(state);

	let addr = config.socket_addr();
	let listener = tokio::net::TcpListener::bind(&addr)
		.await
		.with_context(|| format!("binding {addr}"))?;
	tracing::info!("listening on {}", addr);

	let graceful = shutdown.clone();
	let mut server = tokio::spawn(
		axum::serve(listener, app)
			.with_graceful_shutdown(async move { graceful.cancelled().await })
			.into_future(),
	);

	tokio::select! {
		result = &mut server => {
			result.context("server task")?.context("serving")?;
		}
		_ = shutdown_signal() => {
			tracing::info!("received shutdown signal");
			shutdown.cancel();
			let grace = config.http.shutdown_grace();
			match tokio::time::timeout(grace, &mut server).await {
				Ok(Ok(Err(e))) => tracing::error!(error = %e, "server error during shutdown"),
				Ok(_) => {}
				Err(_) => {
					tracing::warn!(grace_secs = grace.as_secs(), "grace deadline passed, dropping open connections");
					server.abort();
				}
			}
		}
	}

	tracing::info!("shutting down job scheduler");
	scheduler.shutdown().await;
	tracing::info!("server shutdown complete");
	Ok(())
}
