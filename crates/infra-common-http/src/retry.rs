// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded retry for idempotent requests.

use reqwest::StatusCode;
use std::time::Duration;
use tracing::warn;

const RETRYABLE_STATUSES: [StatusCode; 6] = [
	StatusCode::TOO_MANY_REQUESTS,
	StatusCode::REQUEST_TIMEOUT,
	StatusCode::INTERNAL_SERVER_ERROR,
	StatusCode::BAD_GATEWAY,
	StatusCode::SERVICE_UNAVAILABLE,
	StatusCode::GATEWAY_TIMEOUT,
];

#[derive(Debug, Clone)]
pub struct RetryConfig {
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
	pub backoff_factor: f64,
	pub jitter: bool,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_millis(200),
			max_delay: Duration::from_secs(5),
			backoff_factor: 2.0,
			jitter: true,
		}
	}
}

pub trait RetryableError {
	fn is_retryable(&self) -> bool;
}

impl RetryableError for reqwest::Error {
	fn is_retryable(&self) -> bool {
		if self.is_timeout() || self.is_connect() {
			return true;
		}
		self
			.status()
			.map(|status| RETRYABLE_STATUSES.contains(&status))
			.unwrap_or(false)
	}
}

fn calculate_delay(cfg: &RetryConfig, attempt: u32) -> Duration {
	let exponential = cfg.base_delay.as_secs_f64() * cfg.backoff_factor.powi(attempt as i32);
	let capped = exponential.min(cfg.max_delay.as_secs_f64());
	if cfg.jitter {
		Duration::from_secs_f64(capped * (0.5 + fastrand::f64()))
	} else {
		Duration::from_secs_f64(capped)
	}
}

pub async fn retry<F, Fut, T, E>(cfg: &RetryConfig, mut f: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, E>>,
	E: RetryableError + std::fmt::Debug,
{
	let mut attempt = 0;
	loop {
		match f().await {
			Ok(result) => return Ok(result),
			Err(err) => {
				attempt += 1;
				if !err.is_retryable() {
					return Err(err);
				}
				if attempt >= cfg.max_attempts {
					warn!(error = ?err, attempt, "retry attempts exhausted");
					return Err(err);
				}
				let delay = calculate_delay(cfg, attempt - 1);
				warn!(
					error = ?err,
					attempt,
					delay_ms = delay.as_millis() as u64,
					"retrying after error"
				);
				tokio::time::sleep(delay).await;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;

	#[derive(Debug)]
	struct FlakyError {
		retryable: bool,
	}

	impl RetryableError for FlakyError {
		fn is_retryable(&self) -> bool {
			self.retryable
		}
	}

	fn fast() -> RetryConfig {
		RetryConfig {
			max_attempts: 4,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(5),
			backoff_factor: 2.0,
			jitter: false,
		}
	}

	#[tokio::test]
	async fn terminal_error_is_not_retried() {
		let calls = Arc::new(AtomicU32::new(0));
		let counter = Arc::clone(&calls);
		let result: Result<(), FlakyError> = retry(&fast(), || {
			let counter = Arc::clone(&counter);
			async move {
				counter.fetch_add(1, Ordering::SeqCst);
				Err(FlakyError { retryable: false })
			}
		})
		.await;
		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn transient_error_stops_at_max_attempts() {
		let calls = Arc::new(AtomicU32::new(0));
		let counter = Arc::clone(&calls);
		let result: Result<(), FlakyError> = retry(&fast(), || {
			let counter = Arc::clone(&counter);
			async move {
				counter.fetch_add(1, Ordering::SeqCst);
				Err(FlakyError { retryable: true })
			}
		})
		.await;
		assert!(result.is_err());
		assert_eq!(calls.load(Ordering::SeqCst), 4);
	}

	#[tokio::test]
	async fn recovers_after_transient_errors() {
		let calls = Arc::new(AtomicU32::new(0));
		let counter = Arc::clone(&calls);
		let result: Result<u32, FlakyError> = retry(&fast(), || {
			let counter = Arc::clone(&counter);
			async move {
				let n = counter.fetch_add(1, Ordering::SeqCst);
				if n < 2 {
					Err(FlakyError { retryable: true })
				} else {
					Ok(n)
				}
			}
		})
		.await;
		assert_eq!(result.unwrap(), 2);
	}

	#[test]
	fn delay_is_capped() {
		let cfg = RetryConfig {
			backoff_factor: 10.0,
			..fast()
		};
		for attempt in 0..8 {
			assert!(calculate_delay(&cfg, attempt) <= cfg.max_delay);
		}
	}
}
