// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server paths configuration section.

use std::path::PathBuf;

use serde::Deserialize;

fn default_data_dir() -> PathBuf {
	PathBuf::from("./data")
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PathsConfigLayer {
	#[serde(default)]
	pub data_dir: Option<PathBuf>,
}

impl PathsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.data_dir.is_some() {
			self.data_dir = other.data_dir;
		}
	}

	pub fn finalize(self) -> PathsConfig {
		PathsConfig {
			data_dir: self.data_dir.unwrap_or_else(default_data_dir),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsConfig {
	/// Relative names of the `file` secret storage resolve here.
	pub data_dir: PathBuf,
}

impl Default for PathsConfig {
	fn default() -> Self {
		PathsConfigLayer::default().finalize()
	}
}
