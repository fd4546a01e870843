// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Runs the connector's workers as one task group.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use infra_server_api::RegistryApi;
use infra_server_k8s::K8sClient;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::credentials::CredentialReconciler;
use crate::destination::{DestinationSettings, DestinationSync};
use crate::grants::GrantReconciler;
use crate::http;
use crate::metrics::ConnectorMetrics;

pub struct Connector {
	pub registry: Arc<dyn RegistryApi>,
	pub k8s: Arc<dyn K8sClient>,
	pub destination: DestinationSettings,
	pub service_account_namespace: String,
	pub poll_wait_secs: u64,
	pub sync_interval: Duration,
	pub health_addr: SocketAddr,
	pub metrics_addr: SocketAddr,
	pub metrics: Arc<ConnectorMetrics>,
}

impl Connector {
	/// Runs until `cancel` fires or a worker fails. The first failure
	/// cancels the others and is returned once all of them stopped.
	pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
		let (sync, watch) = DestinationSync::new(
			Arc::clone(&self.registry),
			Arc::clone(&self.k8s),
			self.destination,
			Arc::clone(&self.metrics),
		);
		let grants = GrantReconciler::new(
			Arc::clone(&self.registry),
			Arc::clone(&self.k8s),
			Arc::clone(&self.metrics),
			self.service_account_namespace.clone(),
			self.poll_wait_secs,
		);
		let credentials = CredentialReconciler::new(
			Arc::clone(&self.registry),
			Arc::clone(&self.k8s),
			Arc::clone(&self.metrics),
			self.service_account_namespace,
			self.poll_wait_secs,
		);

		let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();
		{
			let cancel = cancel.clone();
			let interval = self.sync_interval;
			tasks.spawn(async move {
				sync.run(interval, cancel).await;
				Ok(())
			});
		}
		{
			let (cancel, watch) = (cancel.clone(), watch.clone());
			tasks.spawn(async move {
				grants.run(watch, cancel).await;
				Ok(())
			});
		}
		{
			let cancel = cancel.clone();
			tasks.spawn(async move {
				credentials.run(watch, cancel).await;
				Ok(())
			});
		}
		tasks.spawn(http::serve(
			"health",
			self.health_addr,
			http::health_router(),
			cancel.clone(),
		));
		tasks.spawn(http::serve(
			"metrics",
			self.metrics_addr,
			http::metrics_router(Arc::clone(&self.metrics)),
			cancel.clone(),
		));
		info!("connector started");

		let mut first_error = None;
		while let Some(joined) = tasks.join_next().await {
			let result: anyhow::Result<()> = match joined {
				Ok(result) => result,
				Err(e) if e.is_cancelled() => continue,
				Err(e) => Err(e).context("connector task panicked"),
			};
			if let Err(e) = result {
				if first_error.is_none() {
					error!(error = %e, "connector worker failed, stopping");
					cancel.cancel();
					first_error = Some(e);
				}
			}
		}

		match first_error {
			Some(e) => Err(e),
			None => {
				info!("connector stopped");
				Ok(())
			}
		}
	}
}
