// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use infra_server_api::ClientError;
use infra_server_k8s::K8sError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectorError {
	#[error("registry: {0}")]
	Registry(#[from] ClientError),

	#[error("cluster: {0}")]
	Cluster(#[from] K8sError),

	#[error("configuration: {0}")]
	Config(String),
}

impl ConnectorError {
	/// Network failures, registry 5xx and cluster API errors are worth
	/// retrying; anything else fails the current item only.
	pub fn is_retryable(&self) -> bool {
		match self {
			ConnectorError::Registry(e) => e.is_retryable(),
			ConnectorError::Cluster(e) => matches!(e, K8sError::ApiError { .. } | K8sError::Timeout),
			ConnectorError::Config(_) => false,
		}
	}

	pub fn is_unauthorized(&self) -> bool {
		matches!(self, ConnectorError::Registry(e) if e.is_unauthorized())
	}
}

pub type Result<T> = std::result::Result<T, ConnectorError>;

#[cfg(test)]
mod tests {
	use super::*;

	fn api(status: u16) -> ConnectorError {
		ConnectorError::Registry(ClientError::Api {
			status,
			message: "x".into(),
		})
	}

	#[test]
	fn server_errors_retry_client_errors_do_not() {
		assert!(api(503).is_retryable());
		assert!(!api(404).is_retryable());
		assert!(!api(409).is_retryable());
		assert!(api(401).is_unauthorized());
		assert!(!api(403).is_unauthorized());
	}

	#[test]
	fn cluster_api_errors_retry() {
		let transient = ConnectorError::Cluster(K8sError::ApiError {
			message: "connection reset".into(),
		});
		assert!(transient.is_retryable());
		let missing = ConnectorError::Cluster(K8sError::NamespaceNotFound { name: "x".into() });
		assert!(!missing.is_retryable());
	}
}
