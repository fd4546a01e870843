// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::K8sError;
use crate::types::{ClusterRoleBinding, RoleBinding, Service, ServiceAccountToken};

/// Trait for K8s client operations.
///
/// This abstraction allows for easy mocking in tests while providing
/// a clean interface for the cluster operations needed by the connector
/// and by the kubernetes secret storage.
#[async_trait]
pub trait K8sClient: Send + Sync {
	/// List the names of all namespaces.
	async fn list_namespaces(&self) -> Result<Vec<String>, K8sError>;

	/// List cluster role names, optionally filtered by a label selector.
	async fn list_cluster_roles(&self, label_selector: Option<&str>)
		-> Result<Vec<String>, K8sError>;

	/// List cluster role bindings matching the label selector.
	async fn list_cluster_role_bindings(
		&self,
		label_selector: &str,
	) -> Result<Vec<ClusterRoleBinding>, K8sError>;

	/// Replace a cluster role binding, creating it when absent.
	async fn upsert_cluster_role_binding(&self, binding: ClusterRoleBinding)
		-> Result<(), K8sError>;

	/// Delete a cluster role binding by name.
	async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), K8sError>;

	/// List role bindings across all namespaces matching the label selector.
	async fn list_role_bindings(&self, label_selector: &str) -> Result<Vec<RoleBinding>, K8sError>;

	/// Replace a role binding, creating it when absent.
	///
	/// Fails with [`K8sError::NamespaceNotFound`] when the binding's namespace
	/// does not exist.
	async fn upsert_role_binding(&self, binding: RoleBinding) -> Result<(), K8sError>;

	/// Delete a role binding.
	async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), K8sError>;

	/// Create a service account unless it already exists.
	async fn ensure_service_account(&self, namespace: &str, name: &str) -> Result<(), K8sError>;

	/// Mint a bound token for a service account.
	async fn create_service_account_token(
		&self,
		namespace: &str,
		name: &str,
		expiration_seconds: i64,
	) -> Result<ServiceAccountToken, K8sError>;

	/// Find the first service in `namespace` matching the label selector.
	async fn find_service(
		&self,
		namespace: &str,
		label_selector: &str,
	) -> Result<Option<Service>, K8sError>;

	/// Read the decoded data of a secret; `None` when the secret is absent.
	async fn get_secret(
		&self,
		namespace: &str,
		name: &str,
	) -> Result<Option<BTreeMap<String, Vec<u8>>>, K8sError>;

	/// Set one key of a secret, creating the secret when absent.
	async fn set_secret_key(
		&self,
		namespace: &str,
		name: &str,
		key: &str,
		value: &[u8],
	) -> Result<(), K8sError>;
}
