// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Mapping user names onto service-account names.

/// Turns a user name (usually an email) into a valid service-account name:
/// lowercase `[a-z0-9.-]`, with no repeated `.` or `-` and every
/// dot-separated segment starting and ending alphanumeric.
///
/// `Alice.Smith@Example.COM` becomes `alice.smith.example.com`.
pub fn service_account_name(user: &str) -> String {
	let mut collapsed = String::with_capacity(user.len());
	let mut previous = None;
	for c in user.chars().flat_map(char::to_lowercase) {
		let c = if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
			c
		} else {
			'.'
		};
		if (c == '.' || c == '-') && previous == Some(c) {
			continue;
		}
		collapsed.push(c);
		previous = Some(c);
	}

	collapsed
		.split('.')
		.map(|segment| segment.trim_matches(|c: char| !c.is_ascii_alphanumeric()))
		.filter(|segment| !segment.is_empty())
		.collect::<Vec<_>>()
		.join(".")
}
