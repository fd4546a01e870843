// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Registration of this cluster as a destination.
//!
//! The first successful sync finds the destination by unique ID (or creates
//! it) and publishes its identity to the reconcilers. Later syncs push the
//! record again only when the endpoint, CA, namespaces or grantable roles
//! changed.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use infra_common_http::{Backoff, Waiter};
use infra_server_api::{
	Connection, CreateDestinationRequest, Destination, Id, ListDestinationsRequest, RegistryApi,
	UpdateDestinationRequest,
};
use infra_server_k8s::{
	connector_service, grantable_cluster_roles, service_endpoint, sorted_namespaces, K8sClient,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::metrics::ConnectorMetrics;

pub const DESTINATION_KIND: &str = "kubernetes";

/// Wait after a failed sync before trying again.
pub const SYNC_RETRY: Duration = Duration::from_secs(30);

/// Identity of the registered destination, shared with the reconcilers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredDestination {
	pub id: Id,
	pub name: String,
	pub unique_id: String,
}

pub type DestinationWatch = watch::Receiver<Option<RegisteredDestination>>;

/// Waits until the first sync has published the destination. `None` when
/// cancelled or when the sync loop has gone away.
pub async fn registered(
	watch: &mut DestinationWatch,
	cancel: &CancellationToken,
) -> Option<RegisteredDestination> {
	tokio::select! {
		_ = cancel.cancelled() => None,
		result = watch.wait_for(Option::is_some) => result.ok().and_then(|d| (*d).clone()),
	}
}

/// Where clients reach the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSource {
	/// A fixed `host:port`.
	Static(String),
	/// The connector's own service in `namespace`.
	Service {
		namespace: String,
		instance_labels: Vec<String>,
	},
}

#[derive(Debug, Clone)]
pub struct DestinationSettings {
	pub name: String,
	pub unique_id: String,
	/// PEM bundle of the cluster CA.
	pub ca: String,
	pub endpoint: EndpointSource,
	pub version: String,
}

/// What the registry should know about the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observed {
	url: String,
	ca: String,
	resources: Vec<String>,
	roles: Vec<String>,
}

impl Observed {
	fn matches(&self, destination: &Destination) -> bool {
		destination.connection.url == self.url
			&& destination.connection.ca == self.ca
			&& destination.resources == self.resources
			&& destination.roles == self.roles
	}
}

fn host_port(host: &str, port: u16) -> String {
	if host.contains(':') {
		format!("[{host}]:{port}")
	} else {
		format!("{host}:{port}")
	}
}

/// Logs a warning when `host` is a name that does not resolve. The address
/// is still registered.
async fn check_resolvable(host: &str, port: u16) {
	if host.is_empty() || host.parse::<IpAddr>().is_ok() {
		return;
	}
	match tokio::net::lookup_host((host, port))
		.await
		.map(|mut addrs| addrs.next().is_some())
	{
		Ok(true) => {}
		Ok(false) => warn!(host, "endpoint host resolved to no addresses"),
		Err(e) => warn!(host, error = %e, "endpoint host could not be resolved"),
	}
}

pub struct DestinationSync {
	registry: Arc<dyn RegistryApi>,
	k8s: Arc<dyn K8sClient>,
	settings: DestinationSettings,
	metrics: Arc<ConnectorMetrics>,
	published: watch::Sender<Option<RegisteredDestination>>,
	last: Option<(Id, Observed)>,
}

impl DestinationSync {
	pub fn new(
		registry: Arc<dyn RegistryApi>,
		k8s: Arc<dyn K8sClient>,
		settings: DestinationSettings,
		metrics: Arc<ConnectorMetrics>,
	) -> (Self, DestinationWatch) {
		let (published, watch) = watch::channel(None);
		let sync = Self {
			registry,
			k8s,
			settings,
			metrics,
			published,
			last: None,
		};
		(sync, watch)
	}

	async fn endpoint(&self) -> Result<String> {
		match &self.settings.endpoint {
			EndpointSource::Static(addr) => {
				if let Some((host, port)) = addr.rsplit_once(':') {
					if let Ok(port) = port.parse() {
						check_resolvable(host.trim_matches(|c| c == '[' || c == ']'), port).await;
					}
				}
				Ok(addr.clone())
			}
			EndpointSource::Service {
				namespace,
				instance_labels,
			} => {
				let service = connector_service(self.k8s.as_ref(), namespace, instance_labels).await?;
				let endpoint = service_endpoint(&service)?;
				if endpoint.cluster_ip && self.last.is_none() {
					warn!("registering with a ClusterIP service, the destination may not be reachable from outside the cluster");
				}
				check_resolvable(&endpoint.host, endpoint.port).await;
				Ok(host_port(&endpoint.host, endpoint.port))
			}
		}
	}

	async fn observe(&self) -> Result<Observed> {
		let url = self.endpoint().await?;
		debug!(url = %url, "connector endpoint address");
		Ok(Observed {
			url,
			ca: self.settings.ca.clone(),
			resources: sorted_namespaces(self.k8s.as_ref()).await?,
			roles: grantable_cluster_roles(self.k8s.as_ref()).await?,
		})
	}

	fn update_request(&self, observed: &Observed) -> UpdateDestinationRequest {
		UpdateDestinationRequest {
			name: self.settings.name.clone(),
			unique_id: self.settings.unique_id.clone(),
			kind: DESTINATION_KIND.to_string(),
			connection: Connection {
				url: observed.url.clone(),
				ca: observed.ca.clone(),
			},
			resources: observed.resources.clone(),
			roles: observed.roles.clone(),
			labels: Vec::new(),
			version: self.settings.version.clone(),
		}
	}

	/// Adopts the destination registered under our unique ID, or creates it.
	async fn register(&self, observed: &Observed) -> Result<Id> {
		let query = ListDestinationsRequest {
			unique_id: Some(self.settings.unique_id.clone()),
			..Default::default()
		};
		let existing = self.registry.list_destinations(&query).await?;
		if let Some(destination) = existing.items.into_iter().next() {
			info!(destination_id = %destination.id, name = %destination.name, "adopting registered destination");
			if !observed.matches(&destination) || destination.name != self.settings.name {
				self
					.registry
					.update_destination(destination.id, &self.update_request(observed))
					.await?;
			}
			return Ok(destination.id);
		}

		let request = CreateDestinationRequest {
			name: self.settings.name.clone(),
			unique_id: self.settings.unique_id.clone(),
			kind: DESTINATION_KIND.to_string(),
			connection: Connection {
				url: observed.url.clone(),
				ca: observed.ca.clone(),
			},
			resources: observed.resources.clone(),
			roles: observed.roles.clone(),
			labels: Vec::new(),
			version: self.settings.version.clone(),
		};
		let created = self.registry.create_destination(&request).await?;
		info!(destination_id = %created.id, name = %created.name, "destination registered");
		Ok(created.id)
	}

	/// One pass: observe the cluster, register or update, publish.
	#[instrument(skip(self), fields(unique_id = %self.settings.unique_id))]
	pub async fn sync_once(&mut self) -> Result<RegisteredDestination> {
		let observed = self.observe().await?;

		let known = self
			.last
			.as_ref()
			.map(|(id, previous)| (*id, *previous == observed));
		let id = match known {
			Some((id, true)) => id,
			Some((id, false)) => {
				match self.registry.update_destination(id, &self.update_request(&observed)).await {
					Ok(_) => info!(destination_id = %id, "destination updated"),
					Err(e) if e.is_not_found() => {
						// swept while we were away; register again next time
						self.last = None;
						return Err(e.into());
					}
					Err(e) => return Err(e.into()),
				}
				id
			}
			None => self.register(&observed).await?,
		};
		self.last = Some((id, observed));

		let destination = RegisteredDestination {
			id,
			name: self.settings.name.clone(),
			unique_id: self.settings.unique_id.clone(),
		};
		self.published.send_if_modified(|current| {
			if current.as_ref() == Some(&destination) {
				false
			} else {
				*current = Some(destination.clone());
				true
			}
		});
		Ok(destination)
	}

	/// Syncs every `interval`, retrying failures on a constant backoff.
	pub async fn run(mut self, interval: Duration, cancel: CancellationToken) {
		let mut tick = Waiter::new(Backoff::Constant(interval));
		let mut retry = Waiter::new(Backoff::Constant(SYNC_RETRY));

		loop {
			let result = tokio::select! {
				_ = cancel.cancelled() => break,
				result = self.sync_once() => result,
			};
			let waiter = match result {
				Ok(_) => {
					self.metrics.record_destination_sync(true);
					retry.reset();
					&mut tick
				}
				Err(e) => {
					self.metrics.record_destination_sync(false);
					warn!(error = %e, "failed to sync destination with the registry");
					&mut retry
				}
			};
			if waiter.wait(&cancel).await.is_err() {
				break;
			}
		}
		debug!("destination sync stopped");
	}
}
