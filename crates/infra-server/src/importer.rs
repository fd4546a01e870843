// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Applies the declarative import document to the store.
//!
//! Providers and grants written here are marked `from_config`. With
//! `replace`, config-owned rows missing from the document are removed;
//! rows created through the API are never touched.

use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use infra_server_api::{Id, ProviderKind, Subject};
use infra_server_config::{
	ConfigError, GrantDeclaration, GrantIdentity, ImportDocument, ProviderDeclaration,
	UserDeclaration,
};
use infra_server_db::{DbError, NewGrant, NewProvider, Provider, Store};
use infra_server_secrets::{SecretRegistry, SecretsError};
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Db(#[from] DbError),

	#[error("provider {provider:?}: {source}")]
	Secret {
		provider: String,
		#[source]
		source: SecretsError,
	},

	#[error("invalid import: {0}")]
	Invalid(String),
}

pub type Result<T> = std::result::Result<T, ImportError>;

/// Counts of what one import wrote and removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
	pub providers: usize,
	pub grants: usize,
	pub users: usize,
	pub removed_providers: usize,
	pub removed_grants: usize,
}

pub struct ConfigImporter {
	store: Store,
	secrets: Arc<SecretRegistry>,
	replace: bool,
	/// Grants of the last applied document, re-applied after provider sync.
	grants: RwLock<Vec<GrantDeclaration>>,
	/// Serializes imports; a reload never interleaves with another.
	running: Mutex<()>,
}

impl ConfigImporter {
	pub fn new(store: Store, secrets: Arc<SecretRegistry>, replace: bool) -> Self {
		Self {
			store,
			secrets,
			replace,
			grants: RwLock::new(Vec::new()),
			running: Mutex::new(()),
		}
	}

	pub async fn import_file(&self, path: &Path) -> Result<ImportSummary> {
		let document = ImportDocument::load(path)?;
		self.import(&document).await
	}

	#[tracing::instrument(skip_all, fields(replace = self.replace))]
	pub async fn import(&self, document: &ImportDocument) -> Result<ImportSummary> {
		let _guard = self.running.lock().await;
		document.validate()?;

		let mut summary = ImportSummary::default();
		if let Some(providers) = &document.providers {
			self.import_providers(providers, &mut summary).await?;
		}
		if let Some(grants) = &document.grants {
			let keep = self.apply_grants(grants).await?;
			summary.grants = keep.len();
			if self.replace {
				summary.removed_grants = self.remove_config_grants(&keep).await?;
			}
			*self.grants.write().await = grants.clone();
		}
		summary.users = self.import_users(&document.users).await?;

		tracing::info!(
			providers = summary.providers,
			grants = summary.grants,
			users = summary.users,
			removed_providers = summary.removed_providers,
			removed_grants = summary.removed_grants,
			"config imported"
		);
		Ok(summary)
	}

	/// Re-applies the last imported grants. Identities a provider sync
	/// removed are recreated, so declared grants always hold.
	pub async fn reapply_grants(&self) -> Result<usize> {
		let grants = self.grants.read().await.clone();
		if grants.is_empty() {
			return Ok(0);
		}
		Ok(self.apply_grants(&grants).await?.len())
	}

	async fn import_providers(
		&self,
		declarations: &[ProviderDeclaration],
		summary: &mut ImportSummary,
	) -> Result<()> {
		let mut keep = BTreeSet::new();
		for declaration in declarations {
			let provider = self.upsert_provider(declaration).await?;
			keep.insert(provider.id);
		}
		summary.providers = keep.len();

		if self.replace {
			for provider in self.store.providers.list_providers().await? {
				if provider.from_config && !keep.contains(&provider.id) {
					self.store.providers.soft_delete_provider(provider.id).await?;
					tracing::info!(provider = %provider.name, "removed provider no longer in config");
					summary.removed_providers += 1;
				}
			}
		}
		Ok(())
	}

	async fn upsert_provider(&self, declaration: &ProviderDeclaration) -> Result<Provider> {
		let secret_error = |source| ImportError::Secret {
			provider: declaration.name.clone(),
			source,
		};
		let client_secret = self
			.secrets
			.resolve(declaration.client_secret.expose())
			.await
			.map_err(secret_error)?;
		let api_token = self
			.secrets
			.resolve_optional(declaration.api_token.as_ref().map(|t| t.expose().as_str()))
			.await
			.map_err(secret_error)?;
		let kind = match declaration.kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
			Some(kind) => ProviderKind::from_str(kind).map_err(ImportError::Invalid)?,
			None => ProviderKind::Oidc,
		};

		let provider = NewProvider {
			name: declaration.name.trim().to_string(),
			url: declaration.url.trim().to_string(),
			client_id: declaration.client_id.trim().to_string(),
			client_secret,
			api_token,
			kind,
			from_config: true,
		};
		match self.store.providers.get_provider_by_name(&provider.name).await? {
			Some(existing) => Ok(self.store.providers.update_provider(existing.id, &provider).await?),
			None => Ok(self.store.providers.create_provider(&provider).await?),
		}
	}

	/// The provider a grant's identity belongs to. With a single provider the
	/// grant may omit it.
	async fn grant_provider(
		&self,
		grant: &GrantDeclaration,
		providers: &[Provider],
	) -> Result<Provider> {
		match (grant.provider(), providers) {
			(_, []) => Err(ImportError::Invalid(format!(
				"grant {}: no identity providers are configured",
				grant.describe()
			))),
			(Some(name), _) => providers
				.iter()
				.find(|p| p.name == name)
				.cloned()
				.ok_or_else(|| {
					ImportError::Invalid(format!("grant {}: unknown provider {name:?}", grant.describe()))
				}),
			(None, [only]) => Ok(only.clone()),
			(None, _) => Err(ImportError::Invalid(format!(
				"grant {}: provider is required when more than one is configured",
				grant.describe()
			))),
		}
	}

	/// Upserts each declared grant and its identity; returns the ids of the
	/// grants the declarations map to.
	pub async fn apply_grants(&self, grants: &[GrantDeclaration]) -> Result<BTreeSet<Id>> {
		let providers = self.store.providers.list_providers().await?;
		let mut keep = BTreeSet::new();

		for grant in grants {
			let provider = self.grant_provider(grant, &providers).await?;
			let subject = match grant.identity() {
				Some(GrantIdentity::User(name)) => {
					let user = self.store.users.find_or_create_user(name).await?;
					self.store.users.bind_provider(user.id, provider.id).await?;
					Subject::User(user.id)
				}
				Some(GrantIdentity::Group(name)) => {
					let group = self.store.groups.find_or_create_group(name, Some(provider.id)).await?;
					Subject::Group(group.id)
				}
				None => {
					return Err(ImportError::Invalid(format!(
						"grant {}: exactly one of user or group is required",
						grant.describe()
					)))
				}
			};

			let (stored, created) = self
				.store
				.grants
				.upsert_grant(&NewGrant {
					subject,
					resource: grant.resource.trim().to_string(),
					privilege: grant.role().to_string(),
					created_by: None,
					from_config: true,
					expires_at: None,
				})
				.await?;
			if created {
				tracing::debug!(grant = %grant.describe(), grant_id = %stored.id, "config grant created");
			}
			keep.insert(stored.id);
		}
		Ok(keep)
	}

	async fn remove_config_grants(&self, keep: &BTreeSet<Id>) -> Result<usize> {
		let mut removed = 0;
		for grant in self.store.grants.list_config_grants().await? {
			if !keep.contains(&grant.id) {
				self.store.grants.soft_delete_grant(grant.id).await?;
				removed += 1;
			}
		}
		if removed > 0 {
			tracing::info!(removed, "removed grants no longer in config");
		}
		Ok(removed)
	}

	async fn import_users(&self, users: &[UserDeclaration]) -> Result<usize> {
		for declaration in users {
			let user = self.store.users.find_or_create_user(declaration.name.trim()).await?;
			for name in &declaration.groups {
				let group = self.store.groups.find_or_create_group(name.trim(), None).await?;
				self.store.groups.add_member(group.id, user.id).await?;
			}
		}
		Ok(users.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use infra_server_db::{testing, GrantFilter};

	fn secrets() -> Arc<SecretRegistry> {
		Arc::new(SecretRegistry::with_defaults(std::env::temp_dir()))
	}

	fn document(yaml: &str) -> ImportDocument {
		ImportDocument::from_yaml(yaml).unwrap()
	}

	const ONE_PROVIDER: &str = r#"
providers:
  - name: okta
    url: example.okta.com
    clientID: 0oa1
    clientSecret: plaintext:shh
grants:
  - user: alice@example.com
    role: admin
    resource: c1
  - group: engineering
    role: edit
    resource: c1.prod
users:
  - name: bob@example.com
    groups: [engineering]
"#;

	#[tokio::test]
	async fn imports_providers_grants_and_users() {
		let store = testing::create_test_store().await;
		let importer = ConfigImporter::new(store.clone(), secrets(), true);

		let summary = importer.import(&document(ONE_PROVIDER)).await.unwrap();
		assert_eq!(summary.providers, 1);
		assert_eq!(summary.grants, 2);
		assert_eq!(summary.users, 1);

		let provider = store.providers.get_provider_by_name("okta").await.unwrap().unwrap();
		assert!(provider.from_config);
		assert_eq!(provider.client_secret.expose(), "shh");

		let grants = store.grants.list_grants(&GrantFilter::default()).await.unwrap();
		assert_eq!(grants.len(), 2);
		assert!(grants.iter().all(|g| g.from_config));

		let engineering = store.groups.get_group_by_name("engineering").await.unwrap().unwrap();
		let bob = store.users.get_user_by_name("bob@example.com").await.unwrap().unwrap();
		assert!(store.groups.list_member_ids(engineering.id).await.unwrap().contains(&bob.id));
	}

	#[tokio::test]
	async fn import_is_idempotent() {
		let store = testing::create_test_store().await;
		let importer = ConfigImporter::new(store.clone(), secrets(), true);

		importer.import(&document(ONE_PROVIDER)).await.unwrap();
		let before = store.grants.list_grants(&GrantFilter::default()).await.unwrap();
		importer.import(&document(ONE_PROVIDER)).await.unwrap();
		let after = store.grants.list_grants(&GrantFilter::default()).await.unwrap();

		assert_eq!(before.len(), after.len());
		assert_eq!(store.providers.count_providers().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn replace_removes_only_config_rows() {
		let store = testing::create_test_store().await;
		let importer = ConfigImporter::new(store.clone(), secrets(), true);
		importer.import(&document(ONE_PROVIDER)).await.unwrap();

		let carol = store.users.create_user("carol@example.com", &[]).await.unwrap();
		store
			.grants
			.create_grant(&NewGrant {
				subject: Subject::User(carol.id),
				resource: "c1".into(),
				privilege: "view".into(),
				created_by: None,
				from_config: false,
				expires_at: None,
			})
			.await
			.unwrap();

		let trimmed = r#"
providers:
  - name: okta
    url: example.okta.com
    clientID: 0oa1
    clientSecret: plaintext:shh
grants:
  - user: alice@example.com
    role: admin
    resource: c1
"#;
		let summary = importer.import(&document(trimmed)).await.unwrap();
		assert_eq!(summary.removed_grants, 1);

		let remaining = store.grants.list_grants(&GrantFilter::default()).await.unwrap();
		assert_eq!(remaining.len(), 2);
		assert!(remaining.iter().any(|g| g.subject == Subject::User(carol.id)));
	}

	#[tokio::test]
	async fn without_replace_nothing_is_removed() {
		let store = testing::create_test_store().await;
		ConfigImporter::new(store.clone(), secrets(), true)
			.import(&document(ONE_PROVIDER))
			.await
			.unwrap();

		let summary = ConfigImporter::new(store.clone(), secrets(), false)
			.import(&document("grants: []\nproviders: []\n"))
			.await
			.unwrap();
		assert_eq!(summary.removed_grants, 0);
		assert_eq!(summary.removed_providers, 0);
		assert_eq!(store.providers.count_providers().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn grants_need_a_provider() {
		let store = testing::create_test_store().await;
		let importer = ConfigImporter::new(store.clone(), secrets(), true);

		let err = importer
			.import(&document("grants:\n  - user: alice@example.com\n    resource: c1\n"))
			.await
			.unwrap_err();
		assert!(matches!(err, ImportError::Invalid(_)), "{err}");
	}

	#[tokio::test]
	async fn grants_must_name_provider_when_ambiguous() {
		let store = testing::create_test_store().await;
		let importer = ConfigImporter::new(store.clone(), secrets(), true);
		let yaml = r#"
providers:
  - name: okta
    url: example.okta.com
    clientID: a
    clientSecret: plaintext:x
  - name: google
    url: accounts.google.com
    clientID: b
    clientSecret: plaintext:y
grants:
  - user: alice@example.com
    resource: c1
"#;
		let err = importer.import(&document(yaml)).await.unwrap_err();
		assert!(matches!(err, ImportError::Invalid(_)), "{err}");
	}

	#[tokio::test]
	async fn unresolvable_client_secret_fails() {
		let store = testing::create_test_store().await;
		let importer = ConfigImporter::new(store, secrets(), true);
		let yaml = r#"
providers:
  - name: okta
    url: example.okta.com
    clientID: a
    clientSecret: env:INFRA_IMPORTER_TEST_UNSET_SECRET
"#;
		let err = importer.import(&document(yaml)).await.unwrap_err();
		assert!(matches!(err, ImportError::Secret { .. }), "{err}");
	}

	#[tokio::test]
	async fn reapply_recreates_removed_identities() {
		let store = testing::create_test_store().await;
		let importer = ConfigImporter::new(store.clone(), secrets(), true);
		importer.import(&document(ONE_PROVIDER)).await.unwrap();

		let alice = store.users.get_user_by_name("alice@example.com").await.unwrap().unwrap();
		store.users.soft_delete_user(alice.id).await.unwrap();

		assert_eq!(importer.reapply_grants().await.unwrap(), 2);
		assert!(store.users.get_user_by_name("alice@example.com").await.unwrap().is_some());
	}
}
