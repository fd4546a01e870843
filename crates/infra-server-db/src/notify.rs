// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-table update-index counters and change notification.
//!
//! Writers take the next index inside their transaction and publish it only
//! after commit. Readers subscribe *before* querying; any publish after the
//! subscription marks the receiver changed, so a write that lands between the
//! query and the wait is never missed.

use std::time::Duration;

use sqlx::{Sqlite, Transaction};
use tokio::sync::watch;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
	Grants,
	Destinations,
	CredentialRequests,
}

impl Table {
	pub fn as_str(&self) -> &'static str {
		match self {
			Table::Grants => "grants",
			Table::Destinations => "destinations",
			Table::CredentialRequests => "credential_requests",
		}
	}
}

/// Bumps and returns the table's counter within `tx`.
pub(crate) async fn next_update_index(
	tx: &mut Transaction<'_, Sqlite>,
	table: Table,
) -> Result<i64> {
	let value: i64 = sqlx::query_scalar(
		"UPDATE update_counters SET value = value + 1 WHERE table_name = ? RETURNING value",
	)
	.bind(table.as_str())
	.fetch_one(&mut **tx)
	.await?;
	Ok(value)
}

#[derive(Debug)]
pub struct ChangeHub {
	grants: watch::Sender<i64>,
	destinations: watch::Sender<i64>,
	credential_requests: watch::Sender<i64>,
}

impl Default for ChangeHub {
	fn default() -> Self {
		Self::new()
	}
}

impl ChangeHub {
	pub fn new() -> Self {
		Self {
			grants: watch::Sender::new(0),
			destinations: watch::Sender::new(0),
			credential_requests: watch::Sender::new(0),
		}
	}

	fn sender(&self, table: Table) -> &watch::Sender<i64> {
		match table {
			Table::Grants => &self.grants,
			Table::Destinations => &self.destinations,
			Table::CredentialRequests => &self.credential_requests,
		}
	}

	pub fn subscribe(&self, table: Table) -> Subscription {
		Subscription {
			rx: self.sender(table).subscribe(),
		}
	}

	/// Publishes a committed index. Wakes every subscriber.
	pub fn publish(&self, table: Table, index: i64) {
		self.sender(table).send_modify(|current| {
			if index > *current {
				*current = index;
			}
		});
		tracing::trace!(table = table.as_str(), index, "update index published");
	}

	pub fn latest(&self, table: Table) -> i64 {
		*self.sender(table).borrow()
	}
}

pub struct Subscription {
	rx: watch::Receiver<i64>,
}

impl Subscription {
	/// Waits for a publish after subscription, up to `timeout`. Returns
	/// whether one arrived.
	pub async fn changed_within(&mut self, timeout: Duration) -> bool {
		matches!(
			tokio::time::timeout(timeout, self.rx.changed()).await,
			Ok(Ok(()))
		)
	}
}
