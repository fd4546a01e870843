// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Build metadata shared by `infra-server` and `infra-connector`.
//!
//! The registry serves [`VersionInfo`] at `/v1/version`; the connector
//! reports [`BuildInfo::version`] as its destination version and both put
//! [`user_agent`] on outbound HTTP requests.

shadow_rs::shadow!(build);

#[cfg(feature = "serde")]
use serde::Serialize;

/// `{os}-{arch}`, e.g. "linux-x86_64".
pub const PLATFORM: &str = env!("INFRA_PLATFORM");

#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
	pub version: &'static str,
	pub git_sha: &'static str,
	pub build_timestamp: &'static str,
	pub platform: &'static str,
}

impl BuildInfo {
	#[allow(clippy::const_is_empty)]
	pub const fn current() -> Self {
		Self {
			version: build::PKG_VERSION,
			git_sha: if build::SHORT_COMMIT.is_empty() {
				"unknown"
			} else {
				build::SHORT_COMMIT
			},
			build_timestamp: build::BUILD_TIME,
			platform: PLATFORM,
		}
	}
}

/// Body of `GET /v1/version`.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
	pub version: &'static str,
	pub git_sha: &'static str,
	pub build_timestamp: &'static str,
	pub platform: &'static str,
}

impl VersionInfo {
	pub const fn current() -> Self {
		let info = BuildInfo::current();
		Self {
			version: info.version,
			git_sha: info.git_sha,
			build_timestamp: info.build_timestamp,
			platform: info.platform,
		}
	}
}

/// `infra/{component}/{version} ({platform}; {git_sha})`
pub fn user_agent(component: &str) -> String {
	let info = BuildInfo::current();
	format!(
		"infra/{component}/{} ({}; {})",
		info.version, info.platform, info.git_sha
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn build_info_has_version() {
		assert!(!BuildInfo::current().version.is_empty());
	}

	#[test]
	fn platform_is_os_dash_arch() {
		assert!(PLATFORM.contains('-'));
	}

	#[test]
	fn version_info_mirrors_build_info() {
		let info = VersionInfo::current();
		assert_eq!(info.version, BuildInfo::current().version);
		assert_eq!(info.git_sha, BuildInfo::current().git_sha);
	}

	#[test]
	fn user_agent_names_component() {
		let ua = user_agent("connector");
		assert!(ua.starts_with("infra/connector/"));
		assert!(ua.contains(PLATFORM));
	}
}
