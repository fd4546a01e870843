// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! # infra-server-db
//!
//! Persistence for the registry: SQLite via sqlx, one repository per entity.
//!
//! ## Repository Pattern
//!
//! Each `*Repository` owns a cloned `SqlitePool` and, where it stores
//! sensitive columns, an `Arc<dyn ColumnCipher>`. Repositories whose rows
//! feed long-polls also hold the shared [`ChangeHub`].
//!
//! ## Soft Deletion
//!
//! Entity rows carry `deleted_at`. Every read path filters on
//! `deleted_at IS NULL`; uniqueness is enforced by partial indexes over live
//! rows, so a name can be reused after its holder is deleted.
//!
//! ## Update Indexes
//!
//! Grants, destinations and credential requests carry an `update_index`
//! drawn from the `update_counters` row for their table inside the writing
//! transaction. Readers compare against the last index they saw. Indexes
//! are published to the hub only after commit.
//!
//! ## Error Handling
//!
//! | Variant | When |
//! |---------|------|
//! | `NotFound` | The caller named an id that should exist |
//! | `Duplicate` | A live row already holds the unique key |
//! | `Conflict` | A compare-and-set lost |
//! | `Cipher` | A sealed column failed to seal or open |
//! | `Internal` | Stored data is unparseable |
//!
//! Lookups where absence is normal return `Result<Option<T>>`.

pub mod access_key;
pub mod cipher;
pub mod credential_request;
pub mod destination;
pub mod encryption_key;
mod error;
pub mod grant;
pub mod group;
pub mod job;
pub mod notify;
pub mod pool;
pub mod provider;
pub mod provider_token;
pub mod settings;
pub mod types;
pub mod user;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use std::sync::Arc;

use sqlx::SqlitePool;

pub use access_key::{AccessKeyRepository, AccessKeyStore};
pub use cipher::{ColumnCipher, SealError};
pub use credential_request::CredentialRequestRepository;
pub use destination::{DestinationFilter, DestinationRepository};
pub use encryption_key::EncryptionKeyRepository;
pub use error::{DbError, Result};
pub use grant::{GrantFilter, GrantRepository};
pub use group::GroupRepository;
pub use job::{JobDefinition, JobRepository, JobRun, JobStatus, TriggerSource};
pub use notify::{ChangeHub, Subscription, Table};
pub use pool::{create_pool, run_migrations};
pub use provider::ProviderRepository;
pub use provider_token::ProviderTokenRepository;
pub use settings::SettingsRepository;
pub use types::{
	destination_of, AccessKeyRecord, CredentialRequest, Destination, DestinationSpec,
	EncryptionKey, Grant, Group, NewGrant, NewProvider, Provider, ProviderToken, Settings, User,
};
pub use user::UserRepository;

/// Every repository over one pool, sharing one cipher and one change hub.
#[derive(Clone)]
pub struct Store {
	pub pool: SqlitePool,
	pub hub: Arc<ChangeHub>,
	pub providers: ProviderRepository,
	pub users: UserRepository,
	pub groups: GroupRepository,
	pub destinations: DestinationRepository,
	pub grants: GrantRepository,
	pub access_keys: AccessKeyRepository,
	pub credential_requests: CredentialRequestRepository,
	pub encryption_keys: EncryptionKeyRepository,
	pub settings: SettingsRepository,
	pub provider_tokens: ProviderTokenRepository,
	pub jobs: JobRepository,
}

impl Store {
	pub fn new(pool: SqlitePool, cipher: Arc<dyn ColumnCipher>, hub: Arc<ChangeHub>) -> Self {
		Self {
			providers: ProviderRepository::new(pool.clone(), Arc::clone(&cipher)),
			users: UserRepository::new(pool.clone()),
			groups: GroupRepository::new(pool.clone()),
			destinations: DestinationRepository::new(pool.clone(), Arc::clone(&hub)),
			grants: GrantRepository::new(pool.clone(), Arc::clone(&hub)),
			access_keys: AccessKeyRepository::new(pool.clone()),
			credential_requests: CredentialRequestRepository::new(
				pool.clone(),
				Arc::clone(&cipher),
				Arc::clone(&hub),
			),
			encryption_keys: EncryptionKeyRepository::new(pool.clone()),
			settings: SettingsRepository::new(pool.clone(), Arc::clone(&cipher)),
			provider_tokens: ProviderTokenRepository::new(pool.clone(), cipher),
			jobs: JobRepository::new(pool.clone()),
			hub,
			pool,
		}
	}
}
