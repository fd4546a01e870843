// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Reconciliation of connector-managed role bindings.
//!
//! The cluster is driven towards a [`BindingPlan`]: every plan entry becomes
//! a binding named `infra:<role>` labelled as managed by the connector, and
//! every labelled binding absent from the plan is deleted. Bindings whose
//! subjects and role already match are left untouched, so applying the same
//! plan twice performs no writes.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, info, instrument, warn};

use crate::client::K8sClient;
use crate::error::{K8sError, K8sResult};
use crate::types::{
	ApplySummary, BindingPlan, ClusterRoleBinding, ClusterRoleNamespace, ObjectMeta, RoleBinding,
	RoleRef, Subject, INCLUDE_ROLE_SELECTOR, MANAGED_BY_LABEL, MANAGED_BY_SELECTOR,
	MANAGED_BY_VALUE, RBAC_API_GROUP, RBAC_DEFAULTS_SELECTOR,
};

pub fn binding_name(cluster_role: &str) -> String {
	format!("infra:{cluster_role}")
}

fn managed_meta(name: String, namespace: Option<String>) -> ObjectMeta {
	ObjectMeta {
		name: Some(name),
		namespace,
		labels: Some(BTreeMap::from([(
			MANAGED_BY_LABEL.to_string(),
			MANAGED_BY_VALUE.to_string(),
		)])),
		..Default::default()
	}
}

fn cluster_role_ref(cluster_role: &str) -> RoleRef {
	RoleRef {
		api_group: RBAC_API_GROUP.to_string(),
		kind: "ClusterRole".to_string(),
		name: cluster_role.to_string(),
	}
}

pub fn cluster_role_binding(cluster_role: &str, subjects: &[Subject]) -> ClusterRoleBinding {
	ClusterRoleBinding {
		metadata: managed_meta(binding_name(cluster_role), None),
		role_ref: cluster_role_ref(cluster_role),
		subjects: Some(subjects.to_vec()),
	}
}

pub fn role_binding(key: &ClusterRoleNamespace, subjects: &[Subject]) -> RoleBinding {
	RoleBinding {
		metadata: managed_meta(binding_name(&key.cluster_role), Some(key.namespace.clone())),
		role_ref: cluster_role_ref(&key.cluster_role),
		subjects: Some(subjects.to_vec()),
	}
}

fn same_subjects(existing: Option<&Vec<Subject>>, desired: &[Subject]) -> bool {
	let existing = existing.map(Vec::as_slice).unwrap_or_default();
	existing.len() == desired.len() && desired.iter().all(|s| existing.contains(s))
}

/// Cluster roles offered as privileges: the RBAC defaults plus roles labelled
/// for inclusion, without `system:` roles. Sorted and deduplicated.
pub async fn grantable_cluster_roles(client: &dyn K8sClient) -> K8sResult<Vec<String>> {
	let mut roles = BTreeSet::new();
	for selector in [RBAC_DEFAULTS_SELECTOR, INCLUDE_ROLE_SELECTOR] {
		for name in client.list_cluster_roles(Some(selector)).await? {
			if !name.starts_with("system:") {
				roles.insert(name);
			}
		}
	}
	Ok(roles.into_iter().collect())
}

/// Sorted namespace names.
pub async fn sorted_namespaces(client: &dyn K8sClient) -> K8sResult<Vec<String>> {
	let mut namespaces = client.list_namespaces().await?;
	namespaces.sort();
	Ok(namespaces)
}

/// Make the managed bindings in the cluster equal `plan`.
///
/// Entries naming a cluster role that does not exist are skipped with a
/// warning, as are role bindings targeting a namespace that does not exist.
#[instrument(skip_all, fields(cluster = plan.cluster.len(), namespaced = plan.namespaced.len()))]
pub async fn apply_bindings(client: &dyn K8sClient, plan: &BindingPlan) -> K8sResult<ApplySummary> {
	let existing_roles: HashSet<String> = client.list_cluster_roles(None).await?.into_iter().collect();
	let mut summary = ApplySummary::default();

	let existing: BTreeMap<String, ClusterRoleBinding> = client
		.list_cluster_role_bindings(MANAGED_BY_SELECTOR)
		.await?
		.into_iter()
		.filter_map(|b| b.metadata.name.clone().map(|name| (name, b)))
		.collect();
	let mut keep = HashSet::new();

	for (role, subjects) in &plan.cluster {
		if !existing_roles.contains(role) {
			warn!(cluster_role = %role, "cluster role binding skipped, it does not exist");
			summary.skipped += 1;
			continue;
		}
		let desired = cluster_role_binding(role, subjects);
		let name = binding_name(role);
		keep.insert(name.clone());
		match existing.get(&name) {
			Some(current)
				if current.role_ref == desired.role_ref
					&& same_subjects(current.subjects.as_ref(), subjects) =>
			{
				summary.unchanged += 1;
			}
			Some(_) => {
				client.upsert_cluster_role_binding(desired).await?;
				summary.updated += 1;
			}
			None => {
				client.upsert_cluster_role_binding(desired).await?;
				summary.created += 1;
			}
		}
	}

	for name in existing.keys().filter(|name| !keep.contains(*name)) {
		debug!(name = %name, "deleting stale cluster role binding");
		match client.delete_cluster_role_binding(name).await {
			Ok(()) | Err(K8sError::NotFound { .. }) => summary.deleted += 1,
			Err(e) => return Err(e),
		}
	}

	let existing: BTreeMap<(String, String), RoleBinding> = client
		.list_role_bindings(MANAGED_BY_SELECTOR)
		.await?
		.into_iter()
		.filter_map(|b| {
			let ns = b.metadata.namespace.clone()?;
			let name = b.metadata.name.clone()?;
			Some(((ns, name), b))
		})
		.collect();
	let mut keep = HashSet::new();

	for (key, subjects) in &plan.namespaced {
		if !existing_roles.contains(&key.cluster_role) {
			warn!(cluster_role = %key.cluster_role, namespace = %key.namespace, "role binding skipped, cluster role does not exist");
			summary.skipped += 1;
			continue;
		}
		let desired = role_binding(key, subjects);
		let id = (key.namespace.clone(), binding_name(&key.cluster_role));
		let current = existing.get(&id);
		if let Some(current) = current {
			if current.role_ref == desired.role_ref && same_subjects(current.subjects.as_ref(), subjects)
			{
				keep.insert(id);
				summary.unchanged += 1;
				continue;
			}
		}
		match client.upsert_role_binding(desired).await {
			Ok(()) => {
				if current.is_some() {
					summary.updated += 1;
				} else {
					summary.created += 1;
				}
				keep.insert(id);
			}
			Err(K8sError::NamespaceNotFound { name }) => {
				warn!(namespace = %name, cluster_role = %key.cluster_role, "skipping namespace that does not exist in this cluster");
				summary.skipped += 1;
			}
			Err(e) => return Err(e),
		}
	}

	for (namespace, name) in existing.keys().filter(|id| !keep.contains(*id)) {
		debug!(namespace = %namespace, name = %name, "deleting stale role binding");
		match client.delete_role_binding(namespace, name).await {
			Ok(()) | Err(K8sError::NotFound { .. }) => summary.deleted += 1,
			Err(e) => return Err(e),
		}
	}

	info!(
		created = summary.created,
		updated = summary.updated,
		deleted = summary.deleted,
		unchanged = summary.unchanged,
		skipped = summary.skipped,
		"applied role bindings"
	);
	Ok(summary)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::mock::MockK8sClient;
	use crate::types::{group_subject, service_account_subject};

	fn cluster() -> MockK8sClient {
		let mock = MockK8sClient::new();
		mock.add_namespace("default");
		mock.add_namespace("prod");
		mock.add_cluster_role("view", &[RBAC_DEFAULTS_SELECTOR]);
		mock.add_cluster_role("edit", &[RBAC_DEFAULTS_SELECTOR]);
		mock.add_cluster_role("admin", &[RBAC_DEFAULTS_SELECTOR]);
		mock.add_cluster_role("system:node", &[RBAC_DEFAULTS_SELECTOR]);
		mock.add_cluster_role("custom", &[INCLUDE_ROLE_SELECTOR]);
		mock.add_cluster_role("hidden", &[]);
		mock
	}

	#[tokio::test]
	async fn grantable_roles_exclude_system_and_unlabelled() {
		let mock = cluster();
		let roles = grantable_cluster_roles(&mock).await.unwrap();
		assert_eq!(roles, vec!["admin", "custom", "edit", "view"]);
	}

	#[tokio::test]
	async fn apply_creates_exactly_the_plan() {
		let mock = cluster();
		let mut plan = BindingPlan::default();
		plan.add_cluster("view", service_account_subject("alice", "default"));
		plan.add_namespaced(ClusterRoleNamespace::new("edit", "prod"), group_subject("devs"));

		let summary = apply_bindings(&mock, &plan).await.unwrap();
		assert_eq!(summary.created, 2);
		assert_eq!(summary.deleted, 0);

		let crbs = mock.cluster_role_bindings();
		assert_eq!(crbs.len(), 1);
		assert_eq!(crbs[0].metadata.name.as_deref(), Some("infra:view"));
		assert_eq!(crbs[0].role_ref.name, "view");
		let subjects = crbs[0].subjects.clone().unwrap();
		assert_eq!(subjects[0].name, "alice");
		assert_eq!(subjects[0].kind, "ServiceAccount");

		let rbs = mock.role_bindings();
		assert_eq!(rbs.len(), 1);
		assert_eq!(rbs[0].metadata.namespace.as_deref(), Some("prod"));
		assert_eq!(rbs[0].metadata.name.as_deref(), Some("infra:edit"));
		assert_eq!(rbs[0].subjects.clone().unwrap()[0].kind, "Group");
	}

	#[tokio::test]
	async fn reapplying_same_plan_writes_nothing() {
		let mock = cluster();
		let mut plan = BindingPlan::default();
		plan.add_cluster("view", service_account_subject("alice", "default"));
		plan.add_namespaced(ClusterRoleNamespace::new("edit", "prod"), group_subject("devs"));

		apply_bindings(&mock, &plan).await.unwrap();
		let writes = mock.write_count();

		let summary = apply_bindings(&mock, &plan).await.unwrap();
		assert_eq!(summary.writes(), 0);
		assert_eq!(summary.unchanged, 2);
		assert_eq!(mock.write_count(), writes);
	}

	#[tokio::test]
	async fn stale_managed_bindings_are_removed() {
		let mock = cluster();
		let mut plan = BindingPlan::default();
		plan.add_cluster("view", service_account_subject("alice", "default"));
		plan.add_cluster("edit", service_account_subject("bob", "default"));
		plan.add_namespaced(ClusterRoleNamespace::new("edit", "prod"), group_subject("devs"));
		apply_bindings(&mock, &plan).await.unwrap();

		let mut smaller = BindingPlan::default();
		smaller.add_cluster("view", service_account_subject("alice", "default"));
		let summary = apply_bindings(&mock, &smaller).await.unwrap();
		assert_eq!(summary.deleted, 2);
		assert_eq!(mock.cluster_role_bindings().len(), 1);
		assert!(mock.role_bindings().is_empty());
	}

	#[tokio::test]
	async fn unmanaged_bindings_are_left_alone() {
		let mock = cluster();
		let mut foreign = cluster_role_binding("admin", &[group_subject("ops")]);
		foreign.metadata.name = Some("ops-admin".into());
		foreign.metadata.labels = None;
		mock.insert_cluster_role_binding(foreign);

		apply_bindings(&mock, &BindingPlan::default()).await.unwrap();
		assert_eq!(mock.cluster_role_bindings().len(), 1);
	}

	#[tokio::test]
	async fn changed_subjects_update_binding() {
		let mock = cluster();
		let mut plan = BindingPlan::default();
		plan.add_cluster("view", service_account_subject("alice", "default"));
		apply_bindings(&mock, &plan).await.unwrap();

		plan.add_cluster("view", service_account_subject("bob", "default"));
		let summary = apply_bindings(&mock, &plan).await.unwrap();
		assert_eq!(summary.updated, 1);
		let subjects = mock.cluster_role_bindings()[0].subjects.clone().unwrap();
		assert_eq!(subjects.len(), 2);
	}

	#[tokio::test]
	async fn missing_role_and_namespace_are_skipped() {
		let mock = cluster();
		let mut plan = BindingPlan::default();
		plan.add_cluster("nonexistent", group_subject("devs"));
		plan.add_namespaced(ClusterRoleNamespace::new("view", "staging"), group_subject("devs"));
		plan.add_namespaced(ClusterRoleNamespace::new("view", "prod"), group_subject("devs"));

		let summary = apply_bindings(&mock, &plan).await.unwrap();
		assert_eq!(summary.skipped, 2);
		assert_eq!(summary.created, 1);
		assert!(mock.cluster_role_bindings().is_empty());
		assert_eq!(mock.role_bindings().len(), 1);
	}
}
