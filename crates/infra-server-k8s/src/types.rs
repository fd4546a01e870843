// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

pub use k8s_openapi::api::core::v1::{
	LoadBalancerIngress, Namespace, Secret, Service, ServiceAccount, ServicePort, ServiceSpec,
};
pub use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, RoleBinding, RoleRef, Subject};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Label key marking objects owned by the connector.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "infra";
pub const MANAGED_BY_SELECTOR: &str = "app.kubernetes.io/managed-by=infra";

/// Selectors for cluster roles offered as grantable privileges.
pub const RBAC_DEFAULTS_SELECTOR: &str = "kubernetes.io/bootstrapping=rbac-defaults";
pub const INCLUDE_ROLE_SELECTOR: &str = "app.infrahq.com/include-role=true";

pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";
pub const GROUP_KIND: &str = "Group";
pub const SERVICE_ACCOUNT_KIND: &str = "ServiceAccount";

/// A cluster role applied within a single namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClusterRoleNamespace {
	pub cluster_role: String,
	pub namespace: String,
}

impl ClusterRoleNamespace {
	pub fn new(cluster_role: impl Into<String>, namespace: impl Into<String>) -> Self {
		Self {
			cluster_role: cluster_role.into(),
			namespace: namespace.into(),
		}
	}
}

/// Desired set of connector-managed bindings.
///
/// `cluster` maps a cluster role to the subjects of its ClusterRoleBinding,
/// `namespaced` maps a (cluster role, namespace) pair to the subjects of a
/// RoleBinding in that namespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingPlan {
	pub cluster: BTreeMap<String, Vec<Subject>>,
	pub namespaced: BTreeMap<ClusterRoleNamespace, Vec<Subject>>,
}

impl BindingPlan {
	pub fn add_cluster(&mut self, cluster_role: &str, subject: Subject) {
		let subjects = self.cluster.entry(cluster_role.to_string()).or_default();
		if !subjects.contains(&subject) {
			subjects.push(subject);
		}
	}

	pub fn add_namespaced(&mut self, key: ClusterRoleNamespace, subject: Subject) {
		let subjects = self.namespaced.entry(key).or_default();
		if !subjects.contains(&subject) {
			subjects.push(subject);
		}
	}

	pub fn is_empty(&self) -> bool {
		self.cluster.is_empty() && self.namespaced.is_empty()
	}
}

/// Token minted for a service account through the TokenRequest API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAccountToken {
	pub token: String,
	/// Lifetime granted by the API server, when it reports one.
	pub expiration_seconds: Option<i64>,
}

/// Counts of writes performed by a binding apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
	pub created: usize,
	pub updated: usize,
	pub deleted: usize,
	pub unchanged: usize,
	pub skipped: usize,
}

impl ApplySummary {
	pub fn writes(&self) -> usize {
		self.created + self.updated + self.deleted
	}
}

/// Builds a group subject.
pub fn group_subject(name: &str) -> Subject {
	Subject {
		api_group: Some(RBAC_API_GROUP.to_string()),
		kind: GROUP_KIND.to_string(),
		name: name.to_string(),
		namespace: None,
	}
}

/// Builds a service account subject in `namespace`.
pub fn service_account_subject(name: &str, namespace: &str) -> Subject {
	Subject {
		api_group: None,
		kind: SERVICE_ACCOUNT_KIND.to_string(),
		name: name.to_string(),
		namespace: Some(namespace.to_string()),
	}
}
