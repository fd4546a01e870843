// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `VAR` / `VAR_FILE` secret loading.

use std::path::PathBuf;
use std::{env, fs};

use thiserror::Error;

use crate::secret::SecretString;

#[derive(Debug, Error)]
pub enum SecretEnvError {
	#[error("failed to read secret file at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("secret file path in {var} is empty")]
	EmptyPath { var: String },
}

/// Loads `var` from the environment.
///
/// `{var}_FILE` wins over `{var}`; file contents lose a single trailing
/// newline. Returns `Ok(None)` when neither is set.
pub fn load_secret_env(var: &str) -> Result<Option<SecretString>, SecretEnvError> {
	let file_var = format!("{var}_FILE");

	if let Ok(path) = env::var(&file_var) {
		if path.is_empty() {
			return Err(SecretEnvError::EmptyPath { var: file_var });
		}
		let path = PathBuf::from(path);
		let content = fs::read_to_string(&path).map_err(|source| SecretEnvError::Io {
			path: path.clone(),
			source,
		})?;
		let value = content.strip_suffix('\n').unwrap_or(&content).to_string();
		return Ok(Some(SecretString::new(value)));
	}

	Ok(env::var(var).ok().map(SecretString::new))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;
	use tempfile::NamedTempFile;

	#[test]
	fn unset_returns_none() {
		let var = "INFRA_TEST_UNSET_SECRET";
		env::remove_var(var);
		env::remove_var(format!("{var}_FILE"));
		assert!(load_secret_env(var).unwrap().is_none());
	}

	#[test]
	fn direct_value() {
		let var = "INFRA_TEST_DIRECT_SECRET";
		env::remove_var(format!("{var}_FILE"));
		env::set_var(var, "abc.defghijklmnopqrstuvwx");
		let value = load_secret_env(var).unwrap().unwrap();
		assert_eq!(value.expose(), "abc.defghijklmnopqrstuvwx");
		env::remove_var(var);
	}

	#[test]
	fn file_wins_and_trailing_newline_dropped() {
		let var = "INFRA_TEST_FILE_SECRET";
		let mut file = NamedTempFile::new().unwrap();
		writeln!(file, "from-file").unwrap();
		env::set_var(var, "from-env");
		env::set_var(format!("{var}_FILE"), file.path());

		let value = load_secret_env(var).unwrap().unwrap();
		assert_eq!(value.expose(), "from-file");

		env::remove_var(var);
		env::remove_var(format!("{var}_FILE"));
	}

	#[test]
	fn empty_file_path_is_error() {
		let var = "INFRA_TEST_EMPTY_FILE_SECRET";
		env::set_var(format!("{var}_FILE"), "");
		assert!(matches!(
			load_secret_env(var),
			Err(SecretEnvError::EmptyPath { .. })
		));
		env::remove_var(format!("{var}_FILE"));
	}

	#[test]
	fn missing_file_is_error() {
		let var = "INFRA_TEST_MISSING_FILE_SECRET";
		env::set_var(format!("{var}_FILE"), "/nonexistent/infra/secret");
		assert!(matches!(load_secret_env(var), Err(SecretEnvError::Io { .. })));
		env::remove_var(format!("{var}_FILE"));
	}
}
