// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Secret handling for the infra registry.
//!
//! Three layers live here:
//!
//! - [`storage`]: named backends that hold raw secret bytes (env, file,
//!   plaintext, kubernetes, vault).
//! - [`RootKeyProvider`]: wraps and unwraps the database data key with a
//!   root key that never touches the database.
//! - [`DataKey`]: the unwrapped data key, used as the column cipher for
//!   sealed database fields.
//!
//! [`SecretRegistry`] resolves `kind:name` references from configuration
//! against the configured storages.

mod data_key;
pub mod encryption;
mod error;
mod key_provider;
mod registry;
pub mod storage;

pub use data_key::{load_or_create_db_key, DataKey, DB_KEY_NAME};
pub use error::{SecretsError, SecretsResult};
pub use key_provider::{NativeKeyProvider, RootKeyProvider, VaultKeyProvider, NATIVE_ALGORITHM};
pub use registry::{
	parse_reference, RegistryOptions, SecretRegistry, StorageDeclaration, KEY_PROVIDER_KINDS,
	STORAGE_KINDS,
};
pub use storage::{
	Encoding, EnvStorage, FileStorage, KubernetesStorage, PlaintextStorage, SecretStorage,
	VaultClient, VaultConfig,
};
