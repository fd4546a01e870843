// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory cluster used by tests of the connector and secret storage.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::K8sClient;
use crate::error::K8sError;
use crate::types::{ClusterRoleBinding, RoleBinding, Service, ServiceAccountToken};

#[derive(Default)]
struct State {
	namespaces: BTreeSet<String>,
	cluster_roles: BTreeMap<String, Vec<String>>,
	cluster_role_bindings: BTreeMap<String, ClusterRoleBinding>,
	role_bindings: BTreeMap<(String, String), RoleBinding>,
	service_accounts: BTreeSet<(String, String)>,
	services: Vec<(String, String, Service)>,
	secrets: BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>,
	issued_tokens: Vec<(String, String, i64)>,
	writes: usize,
	token_expiration: Option<Option<i64>>,
	fail_tokens: bool,
}

/// Mock cluster holding namespaces, cluster roles, bindings, service accounts
/// and secrets in memory.
///
/// Labels are stored as `key=value` strings and label selectors match by
/// exact string containment of every comma-separated term.
#[derive(Default)]
pub struct MockK8sClient {
	state: Mutex<State>,
}

fn matches(labels: &[String], selector: &str) -> bool {
	selector
		.split(',')
		.filter(|term| !term.is_empty())
		.all(|term| labels.iter().any(|l| l == term))
}

fn object_labels(labels: Option<&BTreeMap<String, String>>) -> Vec<String> {
	labels
		.map(|labels| labels.iter().map(|(k, v)| format!("{k}={v}")).collect())
		.unwrap_or_default()
}

impl MockK8sClient {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn add_namespace(&self, name: &str) {
		self.lock().namespaces.insert(name.to_string());
	}

	pub fn remove_namespace(&self, name: &str) {
		self.lock().namespaces.remove(name);
	}

	pub fn add_cluster_role(&self, name: &str, labels: &[&str]) {
		self
			.lock()
			.cluster_roles
			.insert(name.to_string(), labels.iter().map(|l| l.to_string()).collect());
	}

	pub fn add_service(&self, namespace: &str, labels: &str, service: Service) {
		self
			.lock()
			.services
			.push((namespace.to_string(), labels.to_string(), service));
	}

	pub fn insert_cluster_role_binding(&self, binding: ClusterRoleBinding) {
		let name = binding.metadata.name.clone().unwrap_or_default();
		self.lock().cluster_role_bindings.insert(name, binding);
	}

	/// Override the lifetime reported for minted tokens; `None` omits it.
	pub fn set_token_expiration(&self, expiration_seconds: Option<i64>) {
		self.lock().token_expiration = Some(expiration_seconds);
	}

	pub fn fail_token_requests(&self, fail: bool) {
		self.lock().fail_tokens = fail;
	}

	pub fn cluster_role_bindings(&self) -> Vec<ClusterRoleBinding> {
		self.lock().cluster_role_bindings.values().cloned().collect()
	}

	pub fn role_bindings(&self) -> Vec<RoleBinding> {
		self.lock().role_bindings.values().cloned().collect()
	}

	pub fn service_accounts(&self) -> Vec<(String, String)> {
		self.lock().service_accounts.iter().cloned().collect()
	}

	/// Tokens minted so far as `(namespace, name, requested_seconds)`.
	pub fn issued_tokens(&self) -> Vec<(String, String, i64)> {
		self.lock().issued_tokens.clone()
	}

	/// Number of mutating calls made against bindings.
	pub fn write_count(&self) -> usize {
		self.lock().writes
	}
}

#[async_trait]
impl K8sClient for MockK8sClient {
	async fn list_namespaces(&self) -> Result<Vec<String>, K8sError> {
		Ok(self.lock().namespaces.iter().cloned().collect())
	}

	async fn list_cluster_roles(
		&self,
		label_selector: Option<&str>,
	) -> Result<Vec<String>, K8sError> {
		let state = self.lock();
		Ok(state
			.cluster_roles
			.iter()
			.filter(|(_, labels)| label_selector.map_or(true, |s| matches(labels, s)))
			.map(|(name, _)| name.clone())
			.collect())
	}

	async fn list_cluster_role_bindings(
		&self,
		label_selector: &str,
	) -> Result<Vec<ClusterRoleBinding>, K8sError> {
		let state = self.lock();
		Ok(state
			.cluster_role_bindings
			.values()
			.filter(|b| matches(&object_labels(b.metadata.labels.as_ref()), label_selector))
			.cloned()
			.collect())
	}

	async fn upsert_cluster_role_binding(
		&self,
		binding: ClusterRoleBinding,
	) -> Result<(), K8sError> {
		let mut state = self.lock();
		state.writes += 1;
		let name = binding.metadata.name.clone().unwrap_or_default();
		state.cluster_role_bindings.insert(name, binding);
		Ok(())
	}

	async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), K8sError> {
		let mut state = self.lock();
		state.writes += 1;
		state
			.cluster_role_bindings
			.remove(name)
			.map(|_| ())
			.ok_or_else(|| K8sError::NotFound {
				kind: "ClusterRoleBinding",
				name: name.into(),
			})
	}

	async fn list_role_bindings(&self, label_selector: &str) -> Result<Vec<RoleBinding>, K8sError> {
		let state = self.lock();
		Ok(state
			.role_bindings
			.values()
			.filter(|b| matches(&object_labels(b.metadata.labels.as_ref()), label_selector))
			.cloned()
			.collect())
	}

	async fn upsert_role_binding(&self, binding: RoleBinding) -> Result<(), K8sError> {
		let mut state = self.lock();
		let namespace = binding.metadata.namespace.clone().unwrap_or_default();
		if !state.namespaces.contains(&namespace) {
			return Err(K8sError::NamespaceNotFound { name: namespace });
		}
		state.writes += 1;
		let name = binding.metadata.name.clone().unwrap_or_default();
		state.role_bindings.insert((namespace, name), binding);
		Ok(())
	}

	async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), K8sError> {
		let mut state = self.lock();
		state.writes += 1;
		state
			.role_bindings
			.remove(&(namespace.to_string(), name.to_string()))
			.map(|_| ())
			.ok_or_else(|| K8sError::NotFound {
				kind: "RoleBinding",
				name: format!("{namespace}/{name}"),
			})
	}

	async fn ensure_service_account(&self, namespace: &str, name: &str) -> Result<(), K8sError> {
		let mut state = self.lock();
		if !state.namespaces.contains(namespace) {
			return Err(K8sError::NamespaceNotFound {
				name: namespace.into(),
			});
		}
		state
			.service_accounts
			.insert((namespace.to_string(), name.to_string()));
		Ok(())
	}

	async fn create_service_account_token(
		&self,
		namespace: &str,
		name: &str,
		expiration_seconds: i64,
	) -> Result<ServiceAccountToken, K8sError> {
		let mut state = self.lock();
		if state.fail_tokens {
			return Err(K8sError::ApiError {
				message: "token request rejected".into(),
			});
		}
		let key = (namespace.to_string(), name.to_string());
		if !state.service_accounts.contains(&key) {
			return Err(K8sError::NotFound {
				kind: "ServiceAccount",
				name: format!("{namespace}/{name}"),
			});
		}
		state
			.issued_tokens
			.push((namespace.to_string(), name.to_string(), expiration_seconds));
		let reported = state
			.token_expiration
			.unwrap_or(Some(expiration_seconds));
		Ok(ServiceAccountToken {
			token: format!("token-{name}-{}", state.issued_tokens.len()),
			expiration_seconds: reported,
		})
	}

	async fn find_service(
		&self,
		namespace: &str,
		label_selector: &str,
	) -> Result<Option<Service>, K8sError> {
		let state = self.lock();
		Ok(state
			.services
			.iter()
			.find(|(ns, labels, _)| {
				let labels: Vec<String> = labels.split(',').map(str::to_string).collect();
				ns == namespace && matches(&labels, label_selector)
			})
			.map(|(_, _, service)| service.clone()))
	}

	async fn get_secret(
		&self,
		namespace: &str,
		name: &str,
	) -> Result<Option<BTreeMap<String, Vec<u8>>>, K8sError> {
		Ok(self
			.lock()
			.secrets
			.get(&(namespace.to_string(), name.to_string()))
			.cloned())
	}

	async fn set_secret_key(
		&self,
		namespace: &str,
		name: &str,
		key: &str,
		value: &[u8],
	) -> Result<(), K8sError> {
		self
			.lock()
			.secrets
			.entry((namespace.to_string(), name.to_string()))
			.or_default()
			.insert(key.to_string(), value.to_vec());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn token_requires_service_account() {
		let mock = MockK8sClient::new();
		mock.add_namespace("default");
		let err = mock
			.create_service_account_token("default", "alice", 3600)
			.await
			.unwrap_err();
		assert!(err.is_not_found());

		mock.ensure_service_account("default", "alice").await.unwrap();
		mock.ensure_service_account("default", "alice").await.unwrap();
		let token = mock
			.create_service_account_token("default", "alice", 3600)
			.await
			.unwrap();
		assert_eq!(token.expiration_seconds, Some(3600));
		assert_eq!(mock.service_accounts().len(), 1);
	}

	#[tokio::test]
	async fn secrets_merge_keys() {
		let mock = MockK8sClient::new();
		assert!(mock.get_secret("infra", "keys").await.unwrap().is_none());
		mock.set_secret_key("infra", "keys", "a", b"1").await.unwrap();
		mock.set_secret_key("infra", "keys", "b", b"2").await.unwrap();
		let data = mock.get_secret("infra", "keys").await.unwrap().unwrap();
		assert_eq!(data.get("a").map(Vec::as_slice), Some(&b"1"[..]));
		assert_eq!(data.len(), 2);
	}
}
