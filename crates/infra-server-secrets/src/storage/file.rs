// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Encoding, SecretStorage};
use crate::error::{SecretsError, SecretsResult};

/// Secrets kept one per file. Relative names resolve under `dir`.
#[derive(Debug, Clone)]
pub struct FileStorage {
	dir: PathBuf,
	encoding: Encoding,
}

impl FileStorage {
	pub fn new(dir: impl Into<PathBuf>, encoding: Encoding) -> Self {
		Self {
			dir: dir.into(),
			encoding,
		}
	}

	fn path(&self, name: &str) -> PathBuf {
		let candidate = Path::new(name);
		if candidate.is_absolute() {
			candidate.to_path_buf()
		} else {
			self.dir.join(candidate)
		}
	}
}

fn io_error(path: &Path, source: std::io::Error) -> SecretsError {
	SecretsError::Io {
		path: path.display().to_string(),
		source,
	}
}

#[async_trait]
impl SecretStorage for FileStorage {
	fn kind(&self) -> &'static str {
		"file"
	}

	async fn get(&self, name: &str) -> SecretsResult<Option<Vec<u8>>> {
		let path = self.path(name);
		match tokio::fs::read(&path).await {
			Ok(raw) => self.encoding.decode(&raw).map(Some),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(io_error(&path, e)),
		}
	}

	#[tracing::instrument(skip(self, value))]
	async fn set(&self, name: &str, value: &[u8]) -> SecretsResult<()> {
		let path = self.path(name);
		if let Some(parent) = path.parent() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| io_error(parent, e))?;
		}
		tokio::fs::write(&path, self.encoding.encode(value))
			.await
			.map_err(|e| io_error(&path, e))?;

		#[cfg(unix)]
		{
			use std::os::unix::fs::PermissionsExt;
			tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
				.await
				.map_err(|e| io_error(&path, e))?;
		}
		Ok(())
	}
}
