// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Seam between the store and the envelope crypto that protects sensitive
//! columns. Encrypted values are never used in `WHERE` clauses.

use infra_common_config::{Secret, SecretString};
use thiserror::Error;

use crate::error::DbError;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SealError(pub String);

pub trait ColumnCipher: Send + Sync {
	fn seal(&self, plaintext: &[u8]) -> Result<String, SealError>;
	fn open(&self, sealed: &str) -> Result<Vec<u8>, SealError>;
}

pub(crate) fn seal_secret(cipher: &dyn ColumnCipher, value: &SecretString) -> Result<String, DbError> {
	cipher
		.seal(value.expose().as_bytes())
		.map_err(|e| DbError::Cipher(e.0))
}

pub(crate) fn open_secret(cipher: &dyn ColumnCipher, sealed: &str) -> Result<SecretString, DbError> {
	let bytes = cipher.open(sealed).map_err(|e| DbError::Cipher(e.0))?;
	String::from_utf8(bytes)
		.map(Secret::new)
		.map_err(|_| DbError::Cipher("decrypted column is not utf-8".to_string()))
}
