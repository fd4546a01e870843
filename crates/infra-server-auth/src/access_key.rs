// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Two-part bearer credentials of the form `<key>.<secret>`.
//!
//! The key half is a public lookup id. Only the SHA-256 checksum of the
//! secret half is persisted, and it is compared in constant time.

use chrono::{DateTime, Duration, Utc};
use infra_common_config::SecretString;
use infra_server_api::Id;
use infra_server_db::{AccessKeyRecord, AccessKeyStore};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{AuthError, Result};

pub const KEY_LENGTH: usize = 10;
pub const SECRET_LENGTH: usize = 24;

/// Lifetime of a key issued without an explicit ttl.
pub const DEFAULT_TTL_SECS: i64 = 12 * 60 * 60;

/// Lifetime of keys imported from configuration.
pub const IMPORTED_TTL_DAYS: i64 = 3650;

/// Random alphanumeric string drawn from the thread-local CSPRNG.
pub fn generate_token(len: usize) -> String {
	rand::thread_rng()
		.sample_iter(&Alphanumeric)
		.take(len)
		.map(char::from)
		.collect()
}

pub fn secret_checksum(secret: &str) -> Vec<u8> {
	Sha256::digest(secret.as_bytes()).to_vec()
}

/// Splits `<key>.<secret>`; both halves must be non-empty.
pub fn split_access_key(raw: &str) -> Result<(&str, &str)> {
	match raw.split_once('.') {
		Some((key, secret)) if !key.is_empty() && !secret.is_empty() => Ok((key, secret)),
		_ => Err(AuthError::MalformedAccessKey),
	}
}

/// Whether `raw` has the exact shape of a key this registry generates.
pub fn is_valid_access_key_format(raw: &str) -> bool {
	let Ok((key, secret)) = split_access_key(raw) else {
		return false;
	};
	key.len() == KEY_LENGTH
		&& secret.len() == SECRET_LENGTH
		&& key.chars().all(|c| c.is_ascii_alphanumeric())
		&& secret.chars().all(|c| c.is_ascii_alphanumeric())
}

#[derive(Debug, Clone)]
pub struct IssueRequest {
	pub name: String,
	pub issued_for: Id,
	pub ttl: Duration,
	pub permissions: Vec<String>,
}

/// A freshly minted key. `access_key` is the only copy of the secret.
#[derive(Debug, Clone)]
pub struct IssuedAccessKey {
	pub access_key: SecretString,
	pub record: AccessKeyRecord,
}

#[tracing::instrument(skip(store, req), fields(name = %req.name, issued_for = %req.issued_for))]
pub async fn issue(store: &dyn AccessKeyStore, req: IssueRequest) -> Result<IssuedAccessKey> {
	if req.ttl <= Duration::zero() {
		return Err(AuthError::InvalidRequest("ttl must be positive".to_string()));
	}

	let key = generate_token(KEY_LENGTH);
	let secret = SecretString::new(generate_token(SECRET_LENGTH));
	let now = Utc::now();
	let record = AccessKeyRecord {
		id: Id::generate(),
		name: req.name,
		issued_for: req.issued_for,
		key_id: key.clone(),
		secret_checksum: secret_checksum(secret.expose()),
		permissions: req.permissions,
		expires_at: now + req.ttl,
		created_at: now,
	};
	store.create_access_key(&record).await?;

	tracing::info!(access_key_id = %record.id, expires_at = %record.expires_at, "access key issued");
	Ok(IssuedAccessKey {
		access_key: SecretString::new(format!("{key}.{}", secret.expose())),
		record,
	})
}

pub async fn lookup(store: &dyn AccessKeyStore, raw: &str) -> Result<AccessKeyRecord> {
	lookup_at(store, raw, Utc::now()).await
}

/// Validates `raw` as of `now`. A key is still valid at its exact expiry
/// instant.
#[tracing::instrument(skip_all)]
pub async fn lookup_at(
	store: &dyn AccessKeyStore,
	raw: &str,
	now: DateTime<Utc>,
) -> Result<AccessKeyRecord> {
	let (key, secret) = split_access_key(raw)?;

	let record = store
		.get_access_key_by_key_id(key)
		.await?
		.ok_or(AuthError::InvalidAccessKey)?;

	let presented = secret_checksum(secret);
	if !bool::from(presented.ct_eq(&record.secret_checksum)) {
		tracing::debug!(access_key_id = %record.id, "access key secret mismatch");
		return Err(AuthError::InvalidAccessKey);
	}

	if now > record.expires_at {
		return Err(AuthError::AccessKeyExpired);
	}

	Ok(record)
}

/// Registers an operator-supplied key (bootstrap keys from configuration).
///
/// Re-importing the same key is a no-op. A different key under the same name
/// replaces the previous one.
#[tracing::instrument(skip(store, raw, permissions), fields(name = %name, issued_for = %issued_for))]
pub async fn import(
	store: &dyn AccessKeyStore,
	raw: &SecretString,
	name: &str,
	issued_for: Id,
	permissions: Vec<String>,
) -> Result<AccessKeyRecord> {
	let (key, secret) = split_access_key(raw.expose())?;
	let checksum = secret_checksum(secret);

	if let Some(existing) = store.get_access_key_by_key_id(key).await? {
		let same_secret = bool::from(checksum.ct_eq(&existing.secret_checksum));
		if same_secret && existing.issued_for == issued_for {
			tracing::debug!(access_key_id = %existing.id, "access key already imported");
			return Ok(existing);
		}
		return Err(AuthError::KeyInUse(key.to_string()));
	}

	if let Some(previous) = store.get_access_key_by_name(name).await? {
		store.soft_delete_access_key(previous.id).await?;
		tracing::info!(access_key_id = %previous.id, "replaced imported access key");
	}

	let now = Utc::now();
	let record = AccessKeyRecord {
		id: Id::generate(),
		name: name.to_string(),
		issued_for,
		key_id: key.to_string(),
		secret_checksum: checksum,
		permissions,
		expires_at: now + Duration::days(IMPORTED_TTL_DAYS),
		created_at: now,
	};
	store.create_access_key(&record).await?;
	tracing::info!(access_key_id = %record.id, "access key imported");
	Ok(record)
}

#[cfg(test)]
mod tests {
	use super::*;
	use infra_server_db::testing::create_test_store;
	use proptest::prelude::*;

	fn request(issued_for: Id) -> IssueRequest {
		IssueRequest {
			name: "alice-key".into(),
			issued_for,
			ttl: Duration::seconds(DEFAULT_TTL_SECS),
			permissions: vec!["infra.user".into()],
		}
	}

	#[tokio::test]
	async fn issued_key_looks_up() {
		let store = create_test_store().await;
		let user = Id::generate();
		let issued = issue(&store.access_keys, request(user)).await.unwrap();

		assert!(is_valid_access_key_format(issued.access_key.expose()));
		let found = lookup(&store.access_keys, issued.access_key.expose()).await.unwrap();
		assert_eq!(found.id, issued.record.id);
		assert_eq!(found.issued_for, user);
		assert_eq!(found.permissions, vec!["infra.user"]);
	}

	#[tokio::test]
	async fn only_checksum_is_stored() {
		let store = create_test_store().await;
		let issued = issue(&store.access_keys, request(Id::generate())).await.unwrap();
		let (_, secret) = split_access_key(issued.access_key.expose()).unwrap();
		assert_eq!(issued.record.secret_checksum, secret_checksum(secret));
		assert_ne!(issued.record.secret_checksum, secret.as_bytes());
	}

	#[tokio::test]
	async fn malformed_and_wrong_keys_are_unauthenticated() {
		let store = create_test_store().await;
		let issued = issue(&store.access_keys, request(Id::generate())).await.unwrap();
		let (key, _) = split_access_key(issued.access_key.expose()).unwrap();
		let wrong = format!("{key}.wrong");

		for raw in ["", "nodot", ".secret", "key.", wrong.as_str()] {
			let err = lookup(&store.access_keys, raw).await.unwrap_err();
			assert_eq!(err.status_code(), 401, "{raw:?} -> {err}");
		}
		assert!(matches!(
			lookup(&store.access_keys, "unknownkey.abcdefghijklmnopqrstuvwx").await,
			Err(AuthError::InvalidAccessKey)
		));
	}

	#[tokio::test]
	async fn expiry_is_inclusive() {
		let store = create_test_store().await;
		let issued = issue(&store.access_keys, request(Id::generate())).await.unwrap();
		let raw = issued.access_key.expose();
		let expires = issued.record.expires_at;

		lookup_at(&store.access_keys, raw, expires).await.unwrap();
		assert!(matches!(
			lookup_at(&store.access_keys, raw, expires + Duration::nanoseconds(1)).await,
			Err(AuthError::AccessKeyExpired)
		));
	}

	#[tokio::test]
	async fn revoked_key_fails_lookup() {
		let store = create_test_store().await;
		let issued = issue(&store.access_keys, request(Id::generate())).await.unwrap();
		store
			.access_keys
			.soft_delete_access_key(issued.record.id)
			.await
			.unwrap();
		assert!(matches!(
			lookup(&store.access_keys, issued.access_key.expose()).await,
			Err(AuthError::InvalidAccessKey)
		));
	}

	#[tokio::test]
	async fn non_positive_ttl_is_rejected() {
		let store = create_test_store().await;
		let mut req = request(Id::generate());
		req.ttl = Duration::zero();
		assert!(matches!(
			issue(&store.access_keys, req).await,
			Err(AuthError::InvalidRequest(_))
		));
	}

	#[tokio::test]
	async fn import_is_idempotent() {
		let store = create_test_store().await;
		let admin = Id::generate();
		let raw = SecretString::from("abc.defghijklmnopqrstuvwx");

		let perms = vec!["infra.admin".to_string()];

		let first = import(&store.access_keys, &raw, "admin", admin, perms.clone())
			.await
			.unwrap();
		let second = import(&store.access_keys, &raw, "admin", admin, perms)
			.await
			.unwrap();

		assert_eq!(first.id, second.id);
		assert!(first.expires_at > Utc::now() + Duration::days(3000));
		let found = lookup(&store.access_keys, raw.expose()).await.unwrap();
		assert_eq!(found.issued_for, admin);
	}

	#[tokio::test]
	async fn import_replaces_rotated_key() {
		let store = create_test_store().await;
		let admin = Id::generate();
		let old = SecretString::from("abc.defghijklmnopqrstuvwx");
		let new = SecretString::from("xyz.defghijklmnopqrstuvwx");

		import(&store.access_keys, &old, "root", admin, vec![]).await.unwrap();
		import(&store.access_keys, &new, "root", admin, vec![]).await.unwrap();

		assert!(lookup(&store.access_keys, old.expose()).await.is_err());
		lookup(&store.access_keys, new.expose()).await.unwrap();
	}

	#[tokio::test]
	async fn import_rejects_key_id_held_by_another_secret() {
		let store = create_test_store().await;
		let admin = Id::generate();
		import(
			&store.access_keys,
			&SecretString::from("abc.defghijklmnopqrstuvwx"),
			"root",
			admin,
			vec![],
		)
		.await
		.unwrap();

		let err = import(
			&store.access_keys,
			&SecretString::from("abc.somethingelseentirely"),
			"other",
			admin,
			vec![],
		)
		.await
		.unwrap_err();
		assert!(matches!(err, AuthError::KeyInUse(_)));
	}

	#[test]
	fn generated_tokens_are_alphanumeric() {
		let token = generate_token(SECRET_LENGTH);
		assert_eq!(token.len(), SECRET_LENGTH);
		assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
		assert_ne!(generate_token(SECRET_LENGTH), token);
	}

	proptest! {
		#[test]
		fn checksum_matches_only_its_secret(a in "[a-zA-Z0-9]{24}", b in "[a-zA-Z0-9]{24}") {
			prop_assert_eq!(secret_checksum(&a).len(), 32);
			prop_assert_eq!(secret_checksum(&a) == secret_checksum(&b), a == b);
		}

		#[test]
		fn generated_format_is_valid(_seed in any::<u8>()) {
			let raw = format!("{}.{}", generate_token(KEY_LENGTH), generate_token(SECRET_LENGTH));
			prop_assert!(is_valid_access_key_format(&raw));
		}

		#[test]
		fn split_rejects_inputs_without_both_halves(s in "[a-z]{0,12}") {
			prop_assert!(split_access_key(&s).is_err());
			let trailing = format!("{s}.");
			let leading = format!(".{s}");
			prop_assert!(split_access_key(&trailing).is_err());
			prop_assert!(split_access_key(&leading).is_err());
		}
	}
}
