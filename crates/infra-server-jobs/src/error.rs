// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use infra_server_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
	#[error("job failed: {message}")]
	Failed { message: String, retryable: bool },

	#[error("job cancelled")]
	Cancelled,

	#[error("repository error: {0}")]
	Repository(#[from] DbError),

	#[error("job not found: {0}")]
	NotFound(String),
}

impl JobError {
	pub fn retryable(message: impl Into<String>) -> Self {
		JobError::Failed {
			message: message.into(),
			retryable: true,
		}
	}

	pub fn fatal(message: impl Into<String>) -> Self {
		JobError::Failed {
			message: message.into(),
			retryable: false,
		}
	}
}

pub type Result<T> = std::result::Result<T, JobError>;
