// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Result type alias for K8s operations.
pub type K8sResult<T> = Result<T, K8sError>;

/// Errors that can occur during K8s operations.
#[derive(Error, Debug)]
pub enum K8sError {
	#[error("K8s API error: {message}")]
	ApiError { message: String },

	#[error("{kind} not found: {name}")]
	NotFound { kind: &'static str, name: String },

	#[error("Namespace not found: {name}")]
	NamespaceNotFound { name: String },

	#[error("Operation timed out")]
	Timeout,

	#[error("Cluster configuration error: {message}")]
	Config { message: String },

	#[error("Service endpoint unavailable: {message}")]
	Endpoint { message: String },

	#[error("I/O error reading {path}: {source}")]
	Io {
		path: String,
		#[source]
		source: std::io::Error,
	},
}

impl K8sError {
	pub fn is_not_found(&self) -> bool {
		matches!(
			self,
			K8sError::NotFound { .. } | K8sError::NamespaceNotFound { .. }
		)
	}
}

impl From<kube::Error> for K8sError {
	fn from(err: kube::Error) -> Self {
		K8sError::ApiError {
			message: err.to_string(),
		}
	}
}

impl From<kube::config::KubeconfigError> for K8sError {
	fn from(err: kube::config::KubeconfigError) -> Self {
		K8sError::Config {
			message: err.to_string(),
		}
	}
}

/// Returns true when the kube error is an API 404.
pub(crate) fn is_api_not_found(err: &kube::Error) -> bool {
	matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// Returns true when the kube error is an API 409.
pub(crate) fn is_api_conflict(err: &kube::Error) -> bool {
	matches!(err, kube::Error::Api(resp) if resp.code == 409)
}
