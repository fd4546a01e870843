// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Time-ordered 128-bit identifiers rendered as base58.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const ALPHABET: &[u8; 58] = b"123456789abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty id")]
	Empty,
	#[error("invalid character {0:?} in id")]
	InvalidChar(char),
	#[error("id out of range")]
	Overflow,
}

/// Entity identifier. Ordering follows creation time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(u128);

impl Id {
	pub fn generate() -> Self {
		Self(u128::from_be_bytes(*uuid7::uuid7().as_bytes()))
	}

	pub const fn from_u128(value: u128) -> Self {
		Self(value)
	}

	pub const fn as_u128(&self) -> u128 {
		self.0
	}
}

fn digit(c: char) -> Option<u128> {
	ALPHABET
		.iter()
		.position(|&b| b as char == c)
		.map(|p| p as u128)
}

impl fmt::Display for Id {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut value = self.0;
		let mut buf = Vec::with_capacity(22);
		loop {
			buf.push(ALPHABET[(value % 58) as usize]);
			value /= 58;
			if value == 0 {
				break;
			}
		}
		buf.reverse();
		f.write_str(&String::from_utf8_lossy(&buf))
	}
}

impl fmt::Debug for Id {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Id({self})")
	}
}

impl FromStr for Id {
	type Err = ParseIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Err(ParseIdError::Empty);
		}
		let mut value: u128 = 0;
		for c in s.chars() {
			let d = digit(c).ok_or(ParseIdError::InvalidChar(c))?;
			value = value
				.checked_mul(58)
				.and_then(|v| v.checked_add(d))
				.ok_or(ParseIdError::Overflow)?;
		}
		Ok(Self(value))
	}
}

impl Serialize for Id {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for Id {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}
