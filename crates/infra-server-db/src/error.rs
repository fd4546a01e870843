// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(sqlx::Error),

	#[error("Migration error: {0}")]
	Migrate(#[from] sqlx::migrate::MigrateError),

	#[error("Not found: {0}")]
	NotFound(String),

	/// A live row already holds the unique key.
	#[error("Duplicate: {0}")]
	Duplicate(String),

	/// The row changed underneath a compare-and-set.
	#[error("Conflict: {0}")]
	Conflict(String),

	#[error("Encrypted column: {0}")]
	Cipher(String),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for DbError {
	fn from(err: sqlx::Error) -> Self {
		if let sqlx::Error::Database(db_err) = &err {
			if db_err.is_unique_violation() {
				return DbError::Duplicate(db_err.message().to_string());
			}
		}
		DbError::Sqlx(err)
	}
}

pub type Result<T> = std::result::Result<T, DbError>;
