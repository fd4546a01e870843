// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for envelope encryption and secret storage.

use thiserror::Error;

/// Result type alias for secrets operations.
pub type SecretsResult<T> = Result<T, SecretsError>;

/// Errors that can occur during secrets operations.
#[derive(Debug, Error)]
pub enum SecretsError {
	// =========================================================================
	// Configuration Errors
	// =========================================================================
	#[error("configuration error: {0}")]
	Configuration(String),

	#[error("unknown secret storage {0:?}")]
	UnknownStorage(String),

	#[error("unknown key provider {0:?}")]
	UnknownKeyProvider(String),

	// =========================================================================
	// Encryption Errors
	// =========================================================================
	#[error("encryption failed: {0}")]
	Encryption(String),

	#[error("decryption failed: {0}")]
	Decryption(String),

	#[error("invalid key size: expected {expected}, got {actual}")]
	InvalidKeySize { expected: usize, actual: usize },

	#[error("supplied key cannot decrypt this value; wrong key was used")]
	WrongKey,

	#[error("corrupted data: {0}")]
	CorruptedData(String),

	// =========================================================================
	// Secret Access Errors
	// =========================================================================
	#[error("secret not found: {0}")]
	SecretNotFound(String),

	#[error("invalid secret name: {0}")]
	InvalidSecretName(String),

	#[error("secret storage {0} is read-only")]
	ReadOnly(&'static str),

	// =========================================================================
	// Infrastructure Errors
	// =========================================================================
	#[error("database error: {0}")]
	Database(#[from] infra_server_db::DbError),

	#[error("kubernetes error: {0}")]
	Kubernetes(#[from] infra_server_k8s::K8sError),

	#[error("http error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("vault error: {status} {message}")]
	Vault { status: u16, message: String },

	#[error("i/o error on {path}: {source}")]
	Io {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("internal error: {0}")]
	Internal(String),
}

impl SecretsError {
	/// Returns true if this error should be logged at error level.
	pub fn is_internal(&self) -> bool {
		matches!(
			self,
			SecretsError::Database(_)
				| SecretsError::Internal(_)
				| SecretsError::Kubernetes(_)
				| SecretsError::Http(_)
				| SecretsError::Vault { .. }
				| SecretsError::Io { .. }
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wrong_key_message_is_explicit() {
		assert!(SecretsError::WrongKey.to_string().contains("wrong key"));
	}

	#[test]
	fn internal_errors_are_flagged() {
		assert!(SecretsError::Internal("test".into()).is_internal());
		assert!(!SecretsError::Configuration("bad".into()).is_internal());
		assert!(!SecretsError::WrongKey.is_internal());
	}
}
