// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::ByteString;
use kube::{
	api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
	config::{KubeConfigOptions, Kubeconfig},
	Client, Config, ResourceExt,
};
use serde_json::json;
use tracing::{debug, instrument};

use crate::client::K8sClient;
use crate::error::{is_api_conflict, is_api_not_found, K8sError};
use crate::in_cluster;
use crate::types::{
	ClusterRole, ClusterRoleBinding, Namespace, ObjectMeta, RoleBinding, Secret, Service,
	ServiceAccount, ServiceAccountToken,
};

/// Explicit connection settings that take precedence over in-cluster discovery.
#[derive(Debug, Clone, Default)]
pub struct KubeOverrides {
	/// API server address, `host:port` or a full URL.
	pub addr: Option<String>,
	/// PEM bundle of the API server CA.
	pub ca: Option<String>,
	/// Bearer token used instead of the pod's service account.
	pub token: Option<String>,
}

impl KubeOverrides {
	pub fn is_empty(&self) -> bool {
		self.addr.is_none() && self.ca.is_none() && self.token.is_none()
	}
}

/// Production K8s client implementation using the kube crate.
pub struct KubeClient {
	client: Client,
}

impl KubeClient {
	/// Create a new KubeClient that auto-discovers cluster configuration.
	///
	/// This will attempt to load config from:
	/// 1. In-cluster service account (when running in K8s)
	/// 2. KUBECONFIG environment variable
	/// 3. ~/.kube/config
	pub async fn new() -> Result<Self, K8sError> {
		let client = Client::try_default().await?;
		debug!("K8s client initialized");
		Ok(Self { client })
	}

	/// Create a client from overrides, filling unset values from the pod's
	/// service account.
	pub async fn with_overrides(overrides: &KubeOverrides) -> Result<Self, K8sError> {
		if overrides.is_empty() {
			return Self::new().await;
		}

		let server = match &overrides.addr {
			Some(addr) if addr.contains("://") => addr.clone(),
			Some(addr) => format!("https://{addr}"),
			None => {
				let host = std::env::var("KUBERNETES_SERVICE_HOST").map_err(|_| K8sError::Config {
					message: "KUBERNETES_SERVICE_HOST is not set and no address was given".into(),
				})?;
				let port =
					std::env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
				format!("https://{host}:{port}")
			}
		};
		let ca = match &overrides.ca {
			Some(ca) => ca.clone(),
			None => in_cluster::ca().await?,
		};
		let token = match &overrides.token {
			Some(token) => token.clone(),
			None => in_cluster::token().await?,
		};

		let kubeconfig: Kubeconfig = serde_json::from_value(json!({
			"apiVersion": "v1",
			"kind": "Config",
			"clusters": [{
				"name": "infra",
				"cluster": {
					"server": server,
					"certificate-authority-data": STANDARD.encode(ca.as_bytes()),
				},
			}],
			"users": [{ "name": "infra", "user": { "token": token } }],
			"contexts": [{ "name": "infra", "context": { "cluster": "infra", "user": "infra" } }],
			"current-context": "infra",
		}))
		.map_err(|e| K8sError::Config {
			message: e.to_string(),
		})?;

		let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
		let client = Client::try_from(config)?;
		debug!(server = %server, "K8s client initialized from overrides");
		Ok(Self { client })
	}
}

#[async_trait]
impl K8sClient for KubeClient {
	async fn list_namespaces(&self) -> Result<Vec<String>, K8sError> {
		let namespaces: Api<Namespace> = Api::all(self.client.clone());
		let list = namespaces.list(&ListParams::default()).await?;
		Ok(list.items.iter().map(|ns| ns.name_any()).collect())
	}

	async fn list_cluster_roles(
		&self,
		label_selector: Option<&str>,
	) -> Result<Vec<String>, K8sError> {
		let roles: Api<ClusterRole> = Api::all(self.client.clone());
		let mut lp = ListParams::default();
		if let Some(selector) = label_selector {
			lp = lp.labels(selector);
		}
		let list = roles.list(&lp).await?;
		Ok(list.items.iter().map(|role| role.name_any()).collect())
	}

	async fn list_cluster_role_bindings(
		&self,
		label_selector: &str,
	) -> Result<Vec<ClusterRoleBinding>, K8sError> {
		let bindings: Api<ClusterRoleBinding> = Api::all(self.client.clone());
		let list = bindings.list(&ListParams::default().labels(label_selector)).await?;
		Ok(list.items)
	}

	#[instrument(skip(self, binding), fields(name = ?binding.metadata.name))]
	async fn upsert_cluster_role_binding(
		&self,
		binding: ClusterRoleBinding,
	) -> Result<(), K8sError> {
		let bindings: Api<ClusterRoleBinding> = Api::all(self.client.clone());
		let name = binding.name_any();
		match bindings.replace(&name, &PostParams::default(), &binding).await {
			Ok(_) => Ok(()),
			Err(e) if is_api_not_found(&e) => {
				bindings.create(&PostParams::default(), &binding).await?;
				Ok(())
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), K8sError> {
		let bindings: Api<ClusterRoleBinding> = Api::all(self.client.clone());
		match bindings.delete(name, &DeleteParams::default()).await {
			Ok(_) => Ok(()),
			Err(e) if is_api_not_found(&e) => Err(K8sError::NotFound {
				kind: "ClusterRoleBinding",
				name: name.into(),
			}),
			Err(e) => Err(e.into()),
		}
	}

	async fn list_role_bindings(&self, label_selector: &str) -> Result<Vec<RoleBinding>, K8sError> {
		let bindings: Api<RoleBinding> = Api::all(self.client.clone());
		let list = bindings.list(&ListParams::default().labels(label_selector)).await?;
		Ok(list.items)
	}

	#[instrument(skip(self, binding), fields(name = ?binding.metadata.name, namespace = ?binding.metadata.namespace))]
	async fn upsert_role_binding(&self, binding: RoleBinding) -> Result<(), K8sError> {
		let namespace = binding.namespace().unwrap_or_default();
		let bindings: Api<RoleBinding> = Api::namespaced(self.client.clone(), &namespace);
		let name = binding.name_any();
		match bindings.replace(&name, &PostParams::default(), &binding).await {
			Ok(_) => Ok(()),
			Err(e) if is_api_not_found(&e) => {
				match bindings.create(&PostParams::default(), &binding).await {
					Ok(_) => Ok(()),
					Err(e) if is_api_not_found(&e) => Err(K8sError::NamespaceNotFound { name: namespace }),
					Err(e) => Err(e.into()),
				}
			}
			Err(e) => Err(e.into()),
		}
	}

	async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<(), K8sError> {
		let bindings: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
		match bindings.delete(name, &DeleteParams::default()).await {
			Ok(_) => Ok(()),
			Err(e) if is_api_not_found(&e) => Err(K8sError::NotFound {
				kind: "RoleBinding",
				name: format!("{namespace}/{name}"),
			}),
			Err(e) => Err(e.into()),
		}
	}

	#[instrument(skip(self))]
	async fn ensure_service_account(&self, namespace: &str, name: &str) -> Result<(), K8sError> {
		let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
		let account = ServiceAccount {
			metadata: ObjectMeta {
				name: Some(name.to_string()),
				namespace: Some(namespace.to_string()),
				..Default::default()
			},
			..Default::default()
		};
		match accounts.create(&PostParams::default(), &account).await {
			Ok(_) => Ok(()),
			Err(e) if is_api_conflict(&e) => Ok(()),
			Err(e) if is_api_not_found(&e) => Err(K8sError::NamespaceNotFound {
				name: namespace.into(),
			}),
			Err(e) => Err(e.into()),
		}
	}

	#[instrument(skip(self))]
	async fn create_service_account_token(
		&self,
		namespace: &str,
		name: &str,
		expiration_seconds: i64,
	) -> Result<ServiceAccountToken, K8sError> {
		let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
		let request = TokenRequest {
			metadata: ObjectMeta::default(),
			spec: TokenRequestSpec {
				audiences: Vec::new(),
				bound_object_ref: None,
				expiration_seconds: Some(expiration_seconds),
			},
			status: None,
		};
		let response = match accounts
			.create_token_request(name, &PostParams::default(), &request)
			.await
		{
			Ok(response) => response,
			Err(e) if is_api_not_found(&e) => {
				return Err(K8sError::NotFound {
					kind: "ServiceAccount",
					name: format!("{namespace}/{name}"),
				})
			}
			Err(e) => return Err(e.into()),
		};

		let token = response
			.status
			.map(|status| status.token)
			.filter(|token| !token.is_empty())
			.ok_or_else(|| K8sError::ApiError {
				message: "token request returned no token".into(),
			})?;

		Ok(ServiceAccountToken {
			token,
			expiration_seconds: response.spec.expiration_seconds,
		})
	}

	async fn find_service(
		&self,
		namespace: &str,
		label_selector: &str,
	) -> Result<Option<Service>, K8sError> {
		let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
		let list = services.list(&ListParams::default().labels(label_selector)).await?;
		Ok(list.items.into_iter().next())
	}

	async fn get_secret(
		&self,
		namespace: &str,
		name: &str,
	) -> Result<Option<BTreeMap<String, Vec<u8>>>, K8sError> {
		let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
		match secrets.get_opt(name).await? {
			Some(secret) => Ok(Some(
				secret
					.data
					.unwrap_or_default()
					.into_iter()
					.map(|(k, v)| (k, v.0))
					.collect(),
			)),
			None => Ok(None),
		}
	}

	#[instrument(skip(self, value))]
	async fn set_secret_key(
		&self,
		namespace: &str,
		name: &str,
		key: &str,
		value: &[u8],
	) -> Result<(), K8sError> {
		let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
		let patch = json!({ "data": { key: STANDARD.encode(value) } });
		match secrets
			.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
			.await
		{
			Ok(_) => Ok(()),
			Err(e) if is_api_not_found(&e) => {
				let secret = Secret {
					metadata: ObjectMeta {
						name: Some(name.to_string()),
						namespace: Some(namespace.to_string()),
						..Default::default()
					},
					data: Some(BTreeMap::from([(
						key.to_string(),
						ByteString(value.to_vec()),
					)])),
					..Default::default()
				};
				secrets.create(&PostParams::default(), &secret).await?;
				Ok(())
			}
			Err(e) => Err(e.into()),
		}
	}
}
