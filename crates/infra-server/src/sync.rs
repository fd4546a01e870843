// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provider sync: mirrors each identity provider's users and groups into the
//! store.
//!
//! Providers with a directory (an API token) are synced from a full
//! snapshot. Login-only providers are synced per user from the tokens kept
//! at login: refresh, read the user info, reconcile group memberships.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use infra_common_config::SecretString;
use infra_server_api::Id;
use infra_server_auth_oidc::{DirectorySnapshot, ProviderTokens};
use infra_server_db::{Provider, ProviderToken, Store, User};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ServerError};
use crate::importer::ConfigImporter;
use crate::providers::IdentityProviders;

/// Outcome of one pass over every provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
	pub synced: usize,
	pub failed: Vec<String>,
}

/// What one provider's sync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderSyncSummary {
	pub users: usize,
	pub groups: usize,
	pub removed_users: usize,
	pub removed_groups: usize,
}

pub struct ProviderSync {
	store: Store,
	providers: Arc<dyn IdentityProviders>,
	importer: Option<Arc<ConfigImporter>>,
	concurrency: usize,
}

impl ProviderSync {
	pub fn new(
		store: Store,
		providers: Arc<dyn IdentityProviders>,
		importer: Option<Arc<ConfigImporter>>,
		concurrency: usize,
	) -> Self {
		Self {
			store,
			providers,
			importer,
			concurrency: concurrency.max(1),
		}
	}

	/// Syncs every provider, at most `concurrency` at a time. One provider's
	/// failure is logged and does not stop the others.
	#[tracing::instrument(skip_all)]
	pub async fn sync_all(&self, cancel: &CancellationToken) -> Result<SyncReport> {
		let providers = self.store.providers.list_providers().await?;

		let results: Vec<(String, Result<ProviderSyncSummary>)> = stream::iter(providers)
			.map(|provider| async move {
				let outcome = tokio::select! {
					_ = cancel.cancelled() => Err(ServerError::Internal("sync cancelled".into())),
					outcome = self.sync_provider(&provider) => outcome,
				};
				(provider.name, outcome)
			})
			.buffer_unordered(self.concurrency)
			.collect()
			.await;

		let mut report = SyncReport::default();
		for (name, outcome) in results {
			match outcome {
				Ok(summary) => {
					tracing::debug!(
						provider = %name,
						users = summary.users,
						groups = summary.groups,
						removed_users = summary.removed_users,
						removed_groups = summary.removed_groups,
						"provider synced"
					);
					report.synced += 1;
				}
				Err(e) => {
					tracing::warn!(provider = %name, error = %e, "provider sync failed");
					report.failed.push(name);
				}
			}
		}

		if let Some(importer) = &self.importer {
			if !cancel.is_cancelled() {
				if let Err(e) = importer.reapply_grants().await {
					tracing::warn!(error = %e, "re-applying config grants failed");
				}
			}
		}
		Ok(report)
	}

	#[tracing::instrument(skip(self, provider), fields(provider = %provider.name))]
	pub async fn sync_provider(&self, provider: &Provider) -> Result<ProviderSyncSummary> {
		match self.providers.directory(provider)? {
			Some(directory) => {
				let snapshot = directory.snapshot().await?;
				self.apply_snapshot(provider, &snapshot).await
			}
			None => self.sync_login_users(provider).await,
		}
	}

	/// Makes the provider's users and groups match `snapshot`.
	pub async fn apply_snapshot(
		&self,
		provider: &Provider,
		snapshot: &DirectorySnapshot,
	) -> Result<ProviderSyncSummary> {
		let mut summary = ProviderSyncSummary::default();
		let mut ids: BTreeMap<&str, Id> = BTreeMap::new();

		for email in &snapshot.users {
			let user = self.store.users.find_or_create_user(email).await?;
			self.store.users.bind_provider(user.id, provider.id).await?;
			ids.insert(email.as_str(), user.id);
		}
		summary.users = ids.len();

		for user in self.store.users.list_provider_users(provider.id).await? {
			if !snapshot.users.contains(&user.name) {
				// the user goes away only when no other provider claims it
				if self.store.users.unbind_provider(user.id, provider.id).await? {
					summary.removed_users += 1;
				}
			}
		}

		for (name, members) in &snapshot.groups {
			let group = self.store.groups.find_or_create_group(name, Some(provider.id)).await?;
			let mut member_ids = Vec::with_capacity(members.len());
			for email in members {
				match ids.get(email.as_str()) {
					Some(id) => member_ids.push(*id),
					None => {
						if let Some(user) = self.store.users.get_user_by_name(email).await? {
							member_ids.push(user.id);
						}
					}
				}
			}
			self.store.groups.set_group_members(group.id, &member_ids).await?;
		}
		summary.groups = snapshot.groups.len();

		for group in self.store.groups.list_groups(Some(provider.id)).await? {
			if !snapshot.groups.contains_key(&group.name) {
				self.store.groups.soft_delete_group(group.id).await?;
				summary.removed_groups += 1;
			}
		}
		Ok(summary)
	}

	async fn sync_login_users(&self, provider: &Provider) -> Result<ProviderSyncSummary> {
		let mut summary = ProviderSyncSummary::default();
		for user in self.store.users.list_provider_users(provider.id).await? {
			let Some(stored) = self.store.provider_tokens.get_token(user.id, provider.id).await? else {
				continue;
			};
			match self.sync_login_user(provider, &user, stored).await {
				Ok(groups) => {
					summary.users += 1;
					summary.groups += groups;
				}
				Err(ServerError::Oidc(e)) if e.is_client_error() => {
					// the provider no longer honors this user's tokens
					tracing::info!(user_id = %user.id, error = %e, "provider revoked user");
					if self.store.users.unbind_provider(user.id, provider.id).await? {
						summary.removed_users += 1;
					}
				}
				Err(e) => return Err(e),
			}
		}
		Ok(summary)
	}

	/// Returns the number of provider groups the user is now in.
	async fn sync_login_user(&self, provider: &Provider, user: &User, stored: ProviderToken) -> Result<usize> {
		let mut tokens = ProviderTokens {
			access_token: stored.access_token,
			refresh_token: Some(stored.refresh_token).filter(|t| !t.is_empty()),
			expires_at: stored.expires_at,
		};
		if let Some(refreshed) = self.providers.refresh(provider, &tokens).await? {
			self
				.store
				.provider_tokens
				.upsert_token(&ProviderToken {
					user_id: user.id,
					provider_id: provider.id,
					access_token: refreshed.access_token.clone(),
					refresh_token: refreshed
						.refresh_token
						.clone()
						.or_else(|| tokens.refresh_token.clone())
						.unwrap_or_else(|| SecretString::from("")),
					expires_at: refreshed.expires_at,
				})
				.await?;
			tokens = refreshed;
		}

		let info = self.providers.user_info(provider, &tokens.access_token).await?;
		info.validate()?;

		let wanted: BTreeSet<&str> = info.groups.iter().map(String::as_str).collect();
		for group in self.store.groups.list_groups(Some(provider.id)).await? {
			let mut members = self.store.groups.list_member_ids(group.id).await?;
			let changed = if wanted.contains(group.name.as_str()) {
				members.insert(user.id)
			} else {
				members.remove(&user.id)
			};
			if changed {
				let members: Vec<Id> = members.into_iter().collect();
				self.store.groups.set_group_members(group.id, &members).await?;
			}
		}
		for name in &wanted {
			let group = self.store.groups.find_or_create_group(name, Some(provider.id)).await?;
			self.store.groups.add_member(group.id, user.id).await?;
		}
		Ok(wanted.len())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::providers::testing::StaticProviders;
	use infra_server_auth_oidc::StaticDirectory;
	use infra_server_db::testing;

	fn snapshot(users: &[&str], groups: &[(&str, &[&str])]) -> DirectorySnapshot {
		DirectorySnapshot {
			users: users.iter().map(|u| u.to_string()).collect(),
			groups: groups
				.iter()
				.map(|(name, members)| (name.to_string(), members.iter().map(|m| m.to_string()).collect()))
				.collect(),
		}
	}

	async fn setup(directory: Option<Arc<StaticDirectory>>) -> (Store, ProviderSync, Provider) {
		let store = testing::create_test_store().await;
		let provider = store.providers.create_provider(&testing::provider("okta")).await.unwrap();
		let providers: Arc<dyn IdentityProviders> = Arc::new(StaticProviders {
			directory,
			email: "alice@example.com".into(),
			groups: vec!["eng".into()],
			revoked: false,
		});
		let sync = ProviderSync::new(store.clone(), providers, None, 2);
		(store, sync, provider)
	}

	#[tokio::test]
	async fn snapshot_creates_users_and_groups() {
		let (store, sync, provider) = setup(None).await;
		let summary = sync
			.apply_snapshot(
				&provider,
				&snapshot(&["alice@example.com", "bob@example.com"], &[("eng", &["alice@example.com"])]),
			)
			.await
			.unwrap();
		assert_eq!(summary.users, 2);
		assert_eq!(summary.groups, 1);

		let eng = store.groups.get_group_by_name("eng").await.unwrap().unwrap();
		assert_eq!(eng.provider_id, Some(provider.id));
		assert_eq!(store.groups.count_members(eng.id).await.unwrap(), 1);
	}

	#[tokio::test]
	async fn users_and_groups_gone_upstream_are_removed() {
		let (store, sync, provider) = setup(None).await;
		sync.apply_snapshot(
			&provider,
			&snapshot(&["alice@example.com", "bob@example.com"], &[("eng", &["bob@example.com"])]),
		)
		.await
		.unwrap();

		let summary = sync
			.apply_snapshot(&provider, &snapshot(&["alice@example.com"], &[]))
			.await
			.unwrap();
		assert_eq!(summary.removed_users, 1);
		assert_eq!(summary.removed_groups, 1);
		assert!(store.users.get_user_by_name("bob@example.com").await.unwrap().is_none());
		assert!(store.groups.get_group_by_name("eng").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn users_claimed_by_another_provider_survive() {
		let (store, sync, provider) = setup(None).await;
		let other = store.providers.create_provider(&testing::provider("google")).await.unwrap();
		sync.apply_snapshot(&provider, &snapshot(&["bob@example.com"], &[])).await.unwrap();
		let bob = store.users.get_user_by_name("bob@example.com").await.unwrap().unwrap();
		store.users.bind_provider(bob.id, other.id).await.unwrap();

		let summary = sync.apply_snapshot(&provider, &snapshot(&[], &[])).await.unwrap();
		assert_eq!(summary.removed_users, 0);
		assert_eq!(
			store.users.provider_names_for_user(bob.id).await.unwrap(),
			vec!["google".to_string()]
		);
	}

	#[tokio::test]
	async fn sync_all_uses_the_directory() {
		let directory = Arc::new(StaticDirectory::new(snapshot(&["carol@example.com"], &[])));
		let (store, sync, _) = setup(Some(directory)).await;

		let report = sync.sync_all(&CancellationToken::new()).await.unwrap();
		assert_eq!(report.synced, 1);
		assert!(report.failed.is_empty());
		assert!(store.users.get_user_by_name("carol@example.com").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn login_users_follow_user_info_groups() {
		let (store, sync, provider) = setup(None).await;
		let alice = store.users.find_or_create_user("alice@example.com").await.unwrap();
		store.users.bind_provider(alice.id, provider.id).await.unwrap();
		store
			.provider_tokens
			.upsert_token(&ProviderToken {
				user_id: alice.id,
				provider_id: provider.id,
				access_token: "old".into(),
				refresh_token: "refresh".into(),
				expires_at: chrono::Utc::now() - chrono::Duration::minutes(1),
			})
			.await
			.unwrap();
		let stale = store.groups.find_or_create_group("ops", Some(provider.id)).await.unwrap();
		store.groups.add_member(stale.id, alice.id).await.unwrap();

		let summary = sync.sync_provider(&provider).await.unwrap();
		assert_eq!(summary.users, 1);

		let eng = store.groups.get_group_by_name("eng").await.unwrap().unwrap();
		assert!(store.groups.list_member_ids(eng.id).await.unwrap().contains(&alice.id));
		assert!(!store.groups.list_member_ids(stale.id).await.unwrap().contains(&alice.id));

		let token = store.provider_tokens.get_token(alice.id, provider.id).await.unwrap().unwrap();
		assert_eq!(token.access_token.expose(), "access");
	}

	#[tokio::test]
	async fn revoked_login_users_are_removed() {
		let store = testing::create_test_store().await;
		let provider = store.providers.create_provider(&testing::provider("okta")).await.unwrap();
		let providers: Arc<dyn IdentityProviders> = Arc::new(StaticProviders {
			revoked: true,
			..Default::default()
		});
		let sync = ProviderSync::new(store.clone(), providers, None, 1);

		let alice = store.users.find_or_create_user("alice@example.com").await.unwrap();
		store.users.bind_provider(alice.id, provider.id).await.unwrap();
		store
			.provider_tokens
			.upsert_token(&ProviderToken {
				user_id: alice.id,
				provider_id: provider.id,
				access_token: "old".into(),
				refresh_token: "refresh".into(),
				expires_at: chrono::Utc::now(),
			})
			.await
			.unwrap();

		let summary = sync.sync_provider(&provider).await.unwrap();
		assert_eq!(summary.removed_users, 1);
		assert!(store.users.get_user(alice.id).await.unwrap().is_none());
	}
}
