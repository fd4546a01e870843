// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Blocking list reads keyed on a table's update index.
//!
//! A poll is ready as soon as the table's max index for the queried scope is
//! above the caller's watermark, or immediately when the caller did not ask
//! to wait. Otherwise it sleeps on the [`ChangeHub`] until a write lands or
//! the wait runs out. The subscription is taken before every query, so a
//! write committed between the query and the sleep still wakes the poll.
//! Server shutdown ends every pending wait as if it had run out.

use std::future::Future;
use std::time::Duration;

use infra_server_db::{ChangeHub, Table};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Part of the request timeout kept back for building the response.
pub const RESPONSE_MARGIN: Duration = Duration::from_secs(5);

/// How long a poll may block: the requested wait capped to the request
/// timeout minus [`RESPONSE_MARGIN`]. `None` (or zero) means answer now.
pub fn wait_budget(requested_secs: Option<u64>, request_timeout: Duration) -> Option<Duration> {
	let requested = Duration::from_secs(requested_secs.filter(|s| *s > 0)?);
	let cap = request_timeout.saturating_sub(RESPONSE_MARGIN);
	Some(requested.min(cap)).filter(|d| !d.is_zero())
}

/// One query result: the items to return and the scope's max update index.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
	pub items: Vec<T>,
	pub max_update_index: i64,
}

/// Runs `query` until its max index passes `watermark`, `wait` elapses or
/// `shutdown` fires. `Ok(None)` means nothing changed (`304`).
pub async fn poll<T, E, F, Fut>(
	hub: &ChangeHub,
	table: Table,
	watermark: i64,
	wait: Option<Duration>,
	shutdown: &CancellationToken,
	mut query: F,
) -> Result<Option<Snapshot<T>>, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<Snapshot<T>, E>>,
{
	let deadline = wait.map(|w| Instant::now() + w);

	loop {
		let mut subscription = hub.subscribe(table);
		let snapshot = query().await?;

		let Some(deadline) = deadline else {
			return Ok(Some(snapshot));
		};
		if snapshot.max_update_index > watermark {
			return Ok(Some(snapshot));
		}

		let remaining = deadline.saturating_duration_since(Instant::now());
		let changed = !remaining.is_zero()
			&& tokio::select! {
				_ = shutdown.cancelled() => false,
				changed = subscription.changed_within(remaining) => changed,
			};
		if !changed {
			tracing::trace!(
				table = table.as_str(),
				watermark,
				shutdown = shutdown.is_cancelled(),
				"long-poll ended without changes"
			);
			return Ok(None);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::convert::Infallible;
	use std::sync::atomic::{AtomicI64, Ordering};
	use std::sync::Arc;

	async fn at(index: &AtomicI64) -> Result<Snapshot<i64>, Infallible> {
		let max = index.load(Ordering::SeqCst);
		Ok(Snapshot {
			items: (1..=max).collect(),
			max_update_index: max,
		})
	}

	#[test]
	fn budget_is_capped_below_request_timeout() {
		let timeout = Duration::from_secs(60);
		assert_eq!(wait_budget(None, timeout), None);
		assert_eq!(wait_budget(Some(0), timeout), None);
		assert_eq!(wait_budget(Some(30), timeout), Some(Duration::from_secs(30)));
		assert_eq!(wait_budget(Some(600), timeout), Some(Duration::from_secs(55)));
		assert_eq!(wait_budget(Some(30), Duration::from_secs(5)), None);
	}

	#[tokio::test]
	async fn no_wait_answers_immediately() {
		let hub = ChangeHub::new();
		let running = CancellationToken::new();
		let index = AtomicI64::new(3);
		let result = poll(&hub, Table::Grants, 3, None, &running, || at(&index)).await.unwrap();
		assert_eq!(result.unwrap().max_update_index, 3);
	}

	#[tokio::test]
	async fn newer_index_answers_without_blocking() {
		let hub = ChangeHub::new();
		let running = CancellationToken::new();
		let index = AtomicI64::new(5);
		let started = Instant::now();
		let result = poll(&hub, Table::Grants, 2, Some(Duration::from_secs(30)), &running, || at(&index))
			.await
			.unwrap();
		assert_eq!(result.unwrap().items.len(), 5);
		assert!(started.elapsed() < Duration::from_secs(1));
	}

	#[tokio::test]
	async fn unchanged_scope_times_out() {
		let hub = ChangeHub::new();
		let running = CancellationToken::new();
		let index = AtomicI64::new(4);
		let result = poll(&hub, Table::Grants, 4, Some(Duration::from_millis(50)), &running, || at(&index))
			.await
			.unwrap();
		assert!(result.is_none());
	}

	#[tokio::test]
	async fn write_during_wait_wakes_the_poll() {
		let hub = Arc::new(ChangeHub::new());
		let running = CancellationToken::new();
		let index = Arc::new(AtomicI64::new(0));

		let writer_hub = Arc::clone(&hub);
		let writer_index = Arc::clone(&index);
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(30)).await;
			writer_index.store(1, Ordering::SeqCst);
			writer_hub.publish(Table::Grants, 1);
		});

		let started = Instant::now();
		let result = poll(&hub, Table::Grants, 0, Some(Duration::from_secs(10)), &running, || at(&index))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(result.max_update_index, 1);
		assert!(started.elapsed() < Duration::from_secs(5));
	}

	#[tokio::test]
	async fn writes_to_other_scopes_keep_waiting() {
		let hub = Arc::new(ChangeHub::new());
		let running = CancellationToken::new();
		let index = Arc::new(AtomicI64::new(2));

		let writer_hub = Arc::clone(&hub);
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(10)).await;
			// another destination's grant: the table moves, this scope does not
			writer_hub.publish(Table::Grants, 9);
		});

		let result = poll(&hub, Table::Grants, 2, Some(Duration::from_millis(100)), &running, || at(&index))
			.await
			.unwrap();
		assert!(result.is_none());
	}

	#[tokio::test]
	async fn shutdown_ends_a_pending_wait() {
		let hub = ChangeHub::new();
		let index = AtomicI64::new(4);
		let shutdown = CancellationToken::new();

		let trigger = shutdown.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(20)).await;
			trigger.cancel();
		});

		let started = Instant::now();
		let result = poll(&hub, Table::Grants, 4, Some(Duration::from_secs(30)), &shutdown, || at(&index))
			.await
			.unwrap();
		assert!(result.is_none());
		assert!(started.elapsed() < Duration::from_secs(5));
	}

	#[tokio::test]
	async fn shutdown_still_answers_ready_scopes() {
		let hub = ChangeHub::new();
		let index = AtomicI64::new(6);
		let shutdown = CancellationToken::new();
		shutdown.cancel();

		let result = poll(&hub, Table::Grants, 2, Some(Duration::from_secs(30)), &shutdown, || at(&index))
			.await
			.unwrap();
		assert_eq!(result.unwrap().max_update_index, 6);
	}
}
