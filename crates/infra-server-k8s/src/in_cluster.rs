// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Facts the connector reads from its own pod: service-account files,
//! downward-API labels and the identity derived from the cluster CA.

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{K8sError, K8sResult};

pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
pub const POD_LABELS_PATH: &str = "/etc/podinfo/labels";

const INSTANCE_LABEL_PREFIX: &str = "app.kubernetes.io/instance";

async fn read(path: &Path) -> K8sResult<String> {
	tokio::fs::read_to_string(path)
		.await
		.map_err(|source| K8sError::Io {
			path: path.display().to_string(),
			source,
		})
}

/// Namespace the pod runs in.
pub async fn namespace() -> K8sResult<String> {
	let ns = read(&Path::new(SERVICE_ACCOUNT_DIR).join("namespace")).await?;
	Ok(ns.trim().to_string())
}

/// PEM bundle of the cluster certificate authority.
pub async fn ca() -> K8sResult<String> {
	read(&Path::new(SERVICE_ACCOUNT_DIR).join("ca.crt")).await
}

pub async fn token() -> K8sResult<String> {
	let token = read(&Path::new(SERVICE_ACCOUNT_DIR).join("token")).await?;
	Ok(token.trim().to_string())
}

/// Instance label selectors from the downward-API labels file.
pub async fn instance_labels(path: &Path) -> K8sResult<Vec<String>> {
	let contents = read(path).await?;
	Ok(parse_instance_labels(&contents))
}

pub(crate) fn parse_instance_labels(contents: &str) -> Vec<String> {
	contents
		.lines()
		.find(|line| line.starts_with(INSTANCE_LABEL_PREFIX))
		.map(|line| vec![line.replace('"', "")])
		.unwrap_or_default()
}

/// Stable cluster identity: hex SHA-256 of the CA bundle.
pub fn checksum(ca: &[u8]) -> String {
	hex::encode(Sha256::digest(ca))
}

/// Name used for a destination when none is configured.
pub fn default_name(checksum: &str) -> String {
	checksum.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn checksum_is_hex_sha256() {
		let sum = checksum(b"-----BEGIN CERTIFICATE-----");
		assert_eq!(sum.len(), 64);
		assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
		assert_eq!(sum, checksum(b"-----BEGIN CERTIFICATE-----"));
		assert_ne!(sum, checksum(b"other"));
	}

	#[test]
	fn default_name_is_checksum_prefix() {
		let sum = checksum(b"ca");
		assert_eq!(default_name(&sum), &sum[..12]);
	}

	#[test]
	fn instance_label_is_unquoted() {
		let labels = "app=\"connector\"\napp.kubernetes.io/instance=\"infra\"\nother=\"x\"\n";
		assert_eq!(
			parse_instance_labels(labels),
			vec!["app.kubernetes.io/instance=infra".to_string()]
		);
		assert!(parse_instance_labels("app=\"x\"").is_empty());
	}

	#[tokio::test]
	async fn instance_labels_reads_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("labels");
		std::fs::write(&path, "app.kubernetes.io/instance=\"c1\"\n").unwrap();
		let labels = instance_labels(&path).await.unwrap();
		assert_eq!(labels, vec!["app.kubernetes.io/instance=c1".to_string()]);

		let missing = instance_labels(&dir.path().join("nope")).await;
		assert!(matches!(missing, Err(K8sError::Io { .. })));
	}
}
