// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Location of the declarative import document.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ImportConfigLayer {
	#[serde(default)]
	pub path: Option<PathBuf>,
	#[serde(default)]
	pub replace: Option<bool>,
}

impl ImportConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.path.is_some() {
			self.path = other.path;
		}
		if other.replace.is_some() {
			self.replace = other.replace;
		}
	}

	pub fn finalize(self) -> ImportConfig {
		ImportConfig {
			path: self.path,
			replace: self.replace.unwrap_or(true),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
	pub path: Option<PathBuf>,
	/// Remove config-created entities missing from the document.
	pub replace: bool,
}

impl Default for ImportConfig {
	fn default() -> Self {
		ImportConfigLayer::default().finalize()
	}
}
