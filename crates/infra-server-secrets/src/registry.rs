// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Named secret storages and the `kind:name` reference resolver.
//!
//! A reference without a `:` is a plaintext secret. Otherwise the part
//! before the first `:` names a storage, either one of the built-in kinds or
//! a storage declared in configuration under its own name.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use infra_common_config::{Secret, SecretString};
use infra_server_k8s::{in_cluster, K8sClient, KubeClient};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{SecretsError, SecretsResult};
use crate::key_provider::{NativeKeyProvider, RootKeyProvider, VaultKeyProvider};
use crate::storage::{
	Encoding, EnvStorage, FileStorage, KubernetesStorage, PlaintextStorage, SecretStorage,
	VaultClient, VaultConfig,
};

/// Storage kinds that may appear in a declaration.
pub const STORAGE_KINDS: &[&str] = &[
	"vault",
	"awsssm",
	"awssecretsmanager",
	"kubernetes",
	"env",
	"file",
	"plaintext",
];

/// Kinds that can be configured without resolving other secrets.
const BASE_KINDS: &[&str] = &["env", "file", "plaintext", "kubernetes"];

/// Root key provider kinds.
pub const KEY_PROVIDER_KINDS: &[&str] = &["native", "vault", "awskms"];

/// A secret storage declared in configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct StorageDeclaration {
	/// Name used as the reference prefix; defaults to the kind.
	#[serde(default)]
	pub name: Option<String>,
	pub kind: String,
	#[serde(default)]
	pub config: BTreeMap<String, String>,
}

impl StorageDeclaration {
	pub fn storage_name(&self) -> &str {
		self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.kind)
	}

	fn option(&self, key: &str) -> Option<&str> {
		self.config.get(key).map(String::as_str).filter(|v| !v.is_empty())
	}
}

#[derive(Clone, Default)]
pub struct RegistryOptions {
	/// Directory for relative names of the default `file` storage.
	pub file_dir: PathBuf,
	/// Cluster client for `kubernetes` storages; discovered when absent.
	pub kube_client: Option<Arc<dyn K8sClient>>,
}

/// Split a reference into `(kind, name)`.
pub fn parse_reference(reference: &str) -> (&str, &str) {
	match reference.split_once(':') {
		Some((kind, name)) => (kind, name),
		None => ("plaintext", reference),
	}
}

#[derive(Default)]
pub struct SecretRegistry {
	storages: HashMap<String, Arc<dyn SecretStorage>>,
	vaults: HashMap<String, Arc<VaultClient>>,
}

impl SecretRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// `env`, `file` and `plaintext` with default settings.
	pub fn with_defaults(file_dir: impl Into<PathBuf>) -> Self {
		let mut registry = Self::new();
		registry.insert_defaults(file_dir.into());
		registry
	}

	fn insert_defaults(&mut self, file_dir: PathBuf) {
		self
			.storages
			.entry("env".into())
			.or_insert_with(|| Arc::new(EnvStorage::default()));
		self
			.storages
			.entry("file".into())
			.or_insert_with(|| Arc::new(FileStorage::new(file_dir, Encoding::None)));
		self
			.storages
			.entry("plaintext".into())
			.or_insert_with(|| Arc::new(PlaintextStorage::default()));
	}

	pub fn insert(&mut self, name: impl Into<String>, storage: Arc<dyn SecretStorage>) {
		self.storages.insert(name.into(), storage);
	}

	pub fn contains(&self, name: &str) -> bool {
		self.storages.contains_key(name)
	}

	pub fn storage(&self, name: &str) -> SecretsResult<Arc<dyn SecretStorage>> {
		self
			.storages
			.get(name)
			.cloned()
			.ok_or_else(|| SecretsError::UnknownStorage(name.to_string()))
	}

	/// Build storages from declarations. Base kinds are configured first, then
	/// the defaults for any kind not declared, then kinds whose settings are
	/// themselves secret references.
	pub async fn from_declarations(
		declarations: &[StorageDeclaration],
		options: RegistryOptions,
	) -> SecretsResult<Self> {
		let mut registry = Self::new();
		let mut kube_client = options.kube_client.clone();

		for decl in declarations.iter().filter(|d| is_base_kind(&d.kind)) {
			registry.declare(decl, &mut kube_client).await?;
		}

		registry.insert_defaults(options.file_dir.clone());
		if !registry.contains("kubernetes") && std::env::var_os("KUBERNETES_SERVICE_HOST").is_some() {
			let client = kube(&mut kube_client).await?;
			let namespace = default_namespace().await;
			registry.insert("kubernetes", Arc::new(KubernetesStorage::new(client, namespace)));
		}

		for decl in declarations.iter().filter(|d| !is_base_kind(&d.kind)) {
			registry.declare(decl, &mut kube_client).await?;
		}

		Ok(registry)
	}

	async fn declare(
		&mut self,
		decl: &StorageDeclaration,
		kube_client: &mut Option<Arc<dyn K8sClient>>,
	) -> SecretsResult<()> {
		let name = decl.storage_name().to_string();
		if self.storages.contains_key(&name) {
			return Err(SecretsError::Configuration(format!(
				"duplicate secret configuration for {name:?}, please provide a unique name for this secret configuration"
			)));
		}

		let storage: Arc<dyn SecretStorage> = match decl.kind.as_str() {
			"plaintext" | "" => Arc::new(PlaintextStorage::new(Encoding::parse(decl.option("encoding"))?)),
			"env" => Arc::new(EnvStorage::new(Encoding::parse(decl.option("encoding"))?)),
			"file" => Arc::new(FileStorage::new(
				decl.option("path").unwrap_or("/"),
				Encoding::parse(decl.option("encoding"))?,
			)),
			"kubernetes" => {
				let client = kube(kube_client).await?;
				let namespace = match decl.option("namespace") {
					Some(ns) => ns.to_string(),
					None => default_namespace().await,
				};
				Arc::new(KubernetesStorage::new(client, namespace))
			}
			"vault" => {
				let token_ref = decl.option("token").ok_or_else(|| {
					SecretsError::Configuration(format!("vault storage {name:?} requires a token"))
				})?;
				let token = self.resolve(token_ref).await?;
				let mut config = VaultConfig::new(
					decl.option("address").unwrap_or("http://127.0.0.1:8200"),
					token,
				);
				config.namespace = decl.option("namespace").map(str::to_string);
				if let Some(mount) = decl.option("secret_mount") {
					config.secret_mount = mount.to_string();
				}
				if let Some(mount) = decl.option("transit_mount") {
					config.transit_mount = mount.to_string();
				}
				let vault = Arc::new(VaultClient::new(config)?);
				self.vaults.insert(name.clone(), Arc::clone(&vault));
				vault as Arc<dyn SecretStorage>
			}
			"awsssm" | "awssecretsmanager" => {
				return Err(SecretsError::Configuration(format!(
					"secret storage kind {:?} is not supported by this build",
					decl.kind
				)))
			}
			other => {
				return Err(SecretsError::Configuration(format!(
					"unknown secret provider type {other:?}"
				)))
			}
		};

		info!(name = %name, kind = %decl.kind, "configured secret storage");
		self.storages.insert(name, storage);
		Ok(())
	}

	/// Resolve a `kind:name` reference to its secret value.
	///
	/// Trailing newlines are dropped, so files written by editors resolve to
	/// the same value as their env counterparts.
	pub async fn resolve(&self, reference: &str) -> SecretsResult<SecretString> {
		let (kind, name) = parse_reference(reference);
		let storage = self.storage(kind)?;
		debug!(kind = %kind, "resolving secret reference");
		let value = storage
			.get(name)
			.await?
			.ok_or_else(|| SecretsError::SecretNotFound(format!("{kind}:{name}")))?;
		let mut text = String::from_utf8(value)
			.map_err(|_| SecretsError::CorruptedData(format!("{kind}:{name} is not utf-8")))?;
		while text.ends_with('\n') || text.ends_with('\r') {
			text.pop();
		}
		Ok(Secret::new(text))
	}

	/// Resolve an optional reference; empty references resolve to `None`.
	pub async fn resolve_optional(&self, reference: Option<&str>) -> SecretsResult<Option<SecretString>> {
		match reference.map(str::trim).filter(|r| !r.is_empty()) {
			Some(reference) => self.resolve(reference).await.map(Some),
			None => Ok(None),
		}
	}

	/// Build the root key provider `kind`, backed by the storage `storage`.
	///
	/// `native` keeps its root key in the named storage (default `file`);
	/// `vault` uses the transit engine of the named vault storage.
	pub fn key_provider(
		&self,
		kind: &str,
		storage: Option<&str>,
	) -> SecretsResult<Arc<dyn RootKeyProvider>> {
		match kind {
			"native" => {
				let storage = self.storage(storage.unwrap_or("file"))?;
				Ok(Arc::new(NativeKeyProvider::new(storage)))
			}
			"vault" => {
				let name = storage.unwrap_or("vault");
				let vault = self.vaults.get(name).cloned().ok_or_else(|| {
					SecretsError::Configuration(format!("vault key provider needs a vault storage named {name:?}"))
				})?;
				Ok(Arc::new(VaultKeyProvider::new(vault)))
			}
			"awskms" => Err(SecretsError::Configuration(
				"key provider awskms is not supported by this build".into(),
			)),
			other => Err(SecretsError::UnknownKeyProvider(other.to_string())),
		}
	}
}

fn is_base_kind(kind: &str) -> bool {
	kind.is_empty() || BASE_KINDS.contains(&kind)
}

async fn kube(slot: &mut Option<Arc<dyn K8sClient>>) -> SecretsResult<Arc<dyn K8sClient>> {
	if let Some(client) = slot {
		return Ok(Arc::clone(client));
	}
	let client: Arc<dyn K8sClient> = Arc::new(KubeClient::new().await?);
	*slot = Some(Arc::clone(&client));
	Ok(client)
}

async fn default_namespace() -> String {
	in_cluster::namespace()
		.await
		.unwrap_or_else(|_| "default".to_string())
}
