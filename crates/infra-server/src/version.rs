// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use infra_common_version::BuildInfo;

/// Format version info for display.
pub fn format_version_info() -> String {
	use chrono::{DateTime, Utc};

	let info = BuildInfo::current();
	let mut output = format!(
		"infra-server version: {}\n\
         Git SHA:              {}\n\
         Built at:             {}\n\
         Platform:             {}",
		info.version, info.git_sha, info.build_timestamp, info.platform,
	);

	if let Ok(built_at) = DateTime::parse_from_rfc3339(info.build_timestamp)
		.or_else(|_| DateTime::parse_from_str(info.build_timestamp, "%Y-%m-%d %H:%M:%S %:z"))
	{
		let age = Utc::now().signed_duration_since(DateTime::<Utc>::from(built_at));
		if let Ok(age) = age.to_std() {
			output.push_str(&format!(
				"\nBuild age:            {}",
				humantime::format_duration(std::time::Duration::from_secs(age.as_secs()))
			));
		}
	}
	output
}
