// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Grants to role bindings.
//!
//! The reconciler long-polls the registry for the destination's grants and
//! turns the full list into a [`BindingPlan`]: `<destination>` resources
//! become ClusterRoleBindings for the privilege, `<destination>.<namespace>`
//! resources become RoleBindings in that namespace. The cluster is then
//! driven to exactly that plan. The watermark only moves once the plan was
//! applied.

use std::collections::HashMap;
use std::sync::Arc;

use infra_common_http::{Backoff, Waiter};
use infra_server_api::{Grant, ListGrantsRequest, RegistryApi, Subject, CONNECT_PRIVILEGE};
use infra_server_k8s::{
	apply_bindings, group_subject, service_account_subject, BindingPlan, ClusterRoleNamespace,
	K8sClient, Subject as RbacSubject,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::destination::{registered, DestinationWatch};
use crate::error::Result;
use crate::metrics::ConnectorMetrics;
use crate::normalize::service_account_name;

/// Resolves grant subjects to cluster subjects, caching lookups for the
/// length of one plan.
struct SubjectResolver<'a> {
	registry: &'a dyn RegistryApi,
	namespace: &'a str,
	cache: HashMap<Subject, Option<RbacSubject>>,
}

impl<'a> SubjectResolver<'a> {
	fn new(registry: &'a dyn RegistryApi, namespace: &'a str) -> Self {
		Self {
			registry,
			namespace,
			cache: HashMap::new(),
		}
	}

	/// `None` when the identity is gone or has no usable name.
	async fn resolve(&mut self, subject: Subject) -> Result<Option<RbacSubject>> {
		if let Some(cached) = self.cache.get(&subject) {
			return Ok(cached.clone());
		}
		let resolved = match subject {
			Subject::Group(id) => match self.registry.get_group(id).await {
				Ok(group) => Some(group_subject(&group.name)),
				Err(e) if e.is_not_found() => None,
				Err(e) => return Err(e.into()),
			},
			Subject::User(id) => match self.registry.get_user(id).await {
				Ok(user) => {
					let name = service_account_name(&user.name);
					if name.is_empty() {
						warn!(user = %user.name, "user name has no valid service account form");
						None
					} else {
						Some(service_account_subject(&name, self.namespace))
					}
				}
				Err(e) if e.is_not_found() => None,
				Err(e) => return Err(e.into()),
			},
		};
		self.cache.insert(subject, resolved.clone());
		Ok(resolved)
	}
}

/// Builds the bindings `grants` call for. Grants on the `connect`
/// privilege, with a malformed resource, or for a vanished identity are
/// dropped.
pub async fn build_plan(
	registry: &dyn RegistryApi,
	grants: &[Grant],
	service_account_namespace: &str,
) -> Result<BindingPlan> {
	let mut resolver = SubjectResolver::new(registry, service_account_namespace);
	let mut plan = BindingPlan::default();

	for grant in grants {
		if grant.privilege == CONNECT_PRIVILEGE {
			continue;
		}
		let parts: Vec<&str> = grant.resource.split('.').collect();
		if parts.len() > 2 || parts.iter().any(|p| p.is_empty()) {
			warn!(grant_id = %grant.id, resource = %grant.resource, "invalid grant resource");
			continue;
		}
		let Some(subject) = resolver.resolve(grant.identity).await? else {
			warn!(grant_id = %grant.id, identity = %grant.identity, "grant identity not found, skipping");
			continue;
		};

		match parts.as_slice() {
			[_] => plan.add_cluster(&grant.privilege, subject),
			[_, namespace] => {
				plan.add_namespaced(ClusterRoleNamespace::new(&grant.privilege, *namespace), subject)
			}
			_ => {}
		}
	}
	Ok(plan)
}

pub struct GrantReconciler {
	registry: Arc<dyn RegistryApi>,
	k8s: Arc<dyn K8sClient>,
	metrics: Arc<ConnectorMetrics>,
	service_account_namespace: String,
	wait_secs: u64,
	last_update_index: i64,
	/// Whether the cluster has been brought in line with the registry once.
	applied: bool,
}

impl GrantReconciler {
	pub fn new(
		registry: Arc<dyn RegistryApi>,
		k8s: Arc<dyn K8sClient>,
		metrics: Arc<ConnectorMetrics>,
		service_account_namespace: String,
		wait_secs: u64,
	) -> Self {
		Self {
			registry,
			k8s,
			metrics,
			service_account_namespace,
			wait_secs,
			last_update_index: 0,
			applied: false,
		}
	}

	pub fn last_update_index(&self) -> i64 {
		self.last_update_index
	}

	/// One long-poll and, when grants changed, one apply. Returns whether
	/// the cluster was reconciled.
	///
	/// The first pass does not block so bindings left over from an earlier
	/// run are cleaned up even when the destination has no grants.
	#[instrument(skip(self), fields(last_update_index = self.last_update_index))]
	pub async fn reconcile_once(&mut self, destination: &str) -> Result<bool> {
		let query = ListGrantsRequest {
			destination: Some(destination.to_string()),
			last_update_index: self.last_update_index,
			wait: self.applied.then_some(self.wait_secs),
			..Default::default()
		};
		let Some(grants) = self.registry.list_grants(&query).await? else {
			info!(update_index = self.last_update_index, "no updated grants from server");
			self.metrics.record_grant_poll("not_modified");
			return Ok(false);
		};
		self.metrics.record_grant_poll("changed");
		info!(
			update_index = grants.max_update_index,
			grants = grants.items.len(),
			"received grants from server"
		);

		let plan = build_plan(self.registry.as_ref(), &grants.items, &self.service_account_namespace).await?;
		let summary = apply_bindings(self.k8s.as_ref(), &plan).await?;
		self.metrics.record_apply(&summary, grants.max_update_index);

		self.last_update_index = grants.max_update_index;
		self.applied = true;
		Ok(true)
	}

	/// Reconciles until cancelled. Each pass is followed by a short pause so
	/// bursts of grant changes apply together; failures back off further.
	pub async fn run(mut self, mut destination: DestinationWatch, cancel: CancellationToken) {
		let Some(target) = registered(&mut destination, &cancel).await else {
			return;
		};
		let mut waiter = Waiter::new(Backoff::reconciler());

		loop {
			let result = tokio::select! {
				_ = cancel.cancelled() => break,
				result = self.reconcile_once(&target.name) => result,
			};
			match result {
				Ok(_) => waiter.reset(),
				Err(e) if e.is_unauthorized() => {
					error!(error = %e, "registry rejected the access key while syncing grants")
				}
				Err(e) => error!(error = %e, retryable = e.is_retryable(), "sync grants with kubernetes"),
			}
			if waiter.wait(&cancel).await.is_err() {
				break;
			}
		}
		debug!("grant reconciler stopped");
	}
}
