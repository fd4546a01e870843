// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cluster client abstraction for the Infra connector.
//!
//! This crate provides:
//! - A trait-based K8s client abstraction for testability
//! - Production implementation using the kube crate, plus an in-memory mock
//! - Role binding reconciliation against a desired [`BindingPlan`]
//! - Service endpoint discovery and in-cluster identity helpers

mod bindings;
mod client;
mod endpoint;
mod error;
pub mod in_cluster;
mod kube_client;
mod mock;
mod types;

pub use bindings::{
	apply_bindings, binding_name, cluster_role_binding, grantable_cluster_roles, role_binding,
	sorted_namespaces,
};
pub use client::K8sClient;
pub use endpoint::{connector_service, service_endpoint, ServiceEndpoint};
pub use error::{K8sError, K8sResult};
pub use kube_client::{KubeClient, KubeOverrides};
pub use mock::MockK8sClient;
pub use types::{
	group_subject, service_account_subject, ApplySummary, BindingPlan, ClusterRoleBinding,
	ClusterRoleNamespace, RoleBinding, RoleRef, Service, ServiceAccountToken, Subject,
	GROUP_KIND, INCLUDE_ROLE_SELECTOR, MANAGED_BY_LABEL, MANAGED_BY_SELECTOR, MANAGED_BY_VALUE,
	RBAC_API_GROUP, RBAC_DEFAULTS_SELECTOR, SERVICE_ACCOUNT_KIND,
};
