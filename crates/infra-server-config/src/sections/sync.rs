// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Intervals for the registry's periodic work: provider sync, destination
//! sweeping and credential request expiry.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct SyncConfigLayer {
	#[serde(default)]
	pub interval_secs: Option<u64>,
	#[serde(default)]
	pub concurrency: Option<usize>,
}

impl SyncConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.interval_secs.is_some() {
			self.interval_secs = other.interval_secs;
		}
		if other.concurrency.is_some() {
			self.concurrency = other.concurrency;
		}
	}

	pub fn finalize(self) -> SyncConfig {
		SyncConfig {
			interval_secs: self.interval_secs.unwrap_or(30),
			concurrency: self.concurrency.unwrap_or(4).max(1),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
	pub interval_secs: u64,
	/// Providers synced at once.
	pub concurrency: usize,
}

impl SyncConfig {
	pub fn interval(&self) -> Duration {
		Duration::from_secs(self.interval_secs)
	}
}

impl Default for SyncConfig {
	fn default() -> Self {
		SyncConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct DestinationsConfigLayer {
	#[serde(default)]
	pub sweep_interval_secs: Option<u64>,
	#[serde(default)]
	pub max_age_secs: Option<u64>,
}

impl DestinationsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.sweep_interval_secs.is_some() {
			self.sweep_interval_secs = other.sweep_interval_secs;
		}
		if other.max_age_secs.is_some() {
			self.max_age_secs = other.max_age_secs;
		}
	}

	pub fn finalize(self) -> DestinationsConfig {
		DestinationsConfig {
			sweep_interval_secs: self.sweep_interval_secs.unwrap_or(30),
			// three missed destination heartbeats
			max_age_secs: self.max_age_secs.unwrap_or(900),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationsConfig {
	pub sweep_interval_secs: u64,
	pub max_age_secs: u64,
}

impl DestinationsConfig {
	pub fn sweep_interval(&self) -> Duration {
		Duration::from_secs(self.sweep_interval_secs)
	}

	pub fn max_age(&self) -> Duration {
		Duration::from_secs(self.max_age_secs)
	}
}

impl Default for DestinationsConfig {
	fn default() -> Self {
		DestinationsConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CredentialsConfigLayer {
	#[serde(default)]
	pub request_ttl_secs: Option<u64>,
	#[serde(default)]
	pub gc_interval_secs: Option<u64>,
}

impl CredentialsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.request_ttl_secs.is_some() {
			self.request_ttl_secs = other.request_ttl_secs;
		}
		if other.gc_interval_secs.is_some() {
			self.gc_interval_secs = other.gc_interval_secs;
		}
	}

	pub fn finalize(self) -> CredentialsConfig {
		CredentialsConfig {
			request_ttl_secs: self.request_ttl_secs.unwrap_or(120),
			gc_interval_secs: self.gc_interval_secs.unwrap_or(60),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialsConfig {
	pub request_ttl_secs: u64,
	pub gc_interval_secs: u64,
}

impl CredentialsConfig {
	pub fn request_ttl(&self) -> Duration {
		Duration::from_secs(self.request_ttl_secs)
	}

	pub fn gc_interval(&self) -> Duration {
		Duration::from_secs(self.gc_interval_secs)
	}
}

impl Default for CredentialsConfig {
	fn default() -> Self {
		CredentialsConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_intervals() {
		assert_eq!(SyncConfig::default().interval(), Duration::from_secs(30));
		assert_eq!(SyncConfig::default().concurrency, 4);
		assert_eq!(DestinationsConfig::default().max_age(), Duration::from_secs(900));
		assert_eq!(CredentialsConfig::default().request_ttl(), Duration::from_secs(120));
	}

	#[test]
	fn test_zero_concurrency_is_clamped() {
		let config = SyncConfigLayer {
			concurrency: Some(0),
			..Default::default()
		}
		.finalize();
		assert_eq!(config.concurrency, 1);
	}
}
