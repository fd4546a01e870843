// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cancelable backoff for reconciler loops.
//!
//! A [`Waiter`] is owned by a single loop. Call [`Waiter::wait`] after a
//! failure (or between periodic ticks) and [`Waiter::reset`] after a success.
//! `wait` returns [`Cancelled`] as soon as the token fires.

use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("wait cancelled")]
pub struct Cancelled;

#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
	Exponential {
		initial: Duration,
		max: Duration,
		multiplier: f64,
		/// Fraction of the delay randomly added or removed, `0.0..=1.0`.
		jitter: f64,
	},
	Constant(Duration),
}

impl Backoff {
	/// 2s doubling by 1.5 up to 60s with 20% jitter.
	pub fn reconciler() -> Self {
		Backoff::Exponential {
			initial: Duration::from_secs(2),
			max: Duration::from_secs(60),
			multiplier: 1.5,
			jitter: 0.2,
		}
	}

	fn delay(&self, attempt: u32) -> Duration {
		match self {
			Backoff::Constant(delay) => *delay,
			Backoff::Exponential {
				initial,
				max,
				multiplier,
				jitter,
			} => {
				let base = initial.as_secs_f64() * multiplier.powi(attempt.min(64) as i32);
				let capped = base.min(max.as_secs_f64());
				let spread = jitter.clamp(0.0, 1.0);
				let factor = 1.0 + spread * (2.0 * fastrand::f64() - 1.0);
				Duration::from_secs_f64((capped * factor).max(0.0))
			}
		}
	}
}

#[derive(Debug)]
pub struct Waiter {
	backoff: Backoff,
	attempt: u32,
}

impl Waiter {
	pub fn new(backoff: Backoff) -> Self {
		Self {
			backoff,
			attempt: 0,
		}
	}

	/// Consecutive waits since the last reset.
	pub fn attempt(&self) -> u32 {
		self.attempt
	}

	pub fn reset(&mut self) {
		self.attempt = 0;
	}

	pub async fn wait(&mut self, cancel: &CancellationToken) -> Result<(), Cancelled> {
		let delay = self.backoff.delay(self.attempt);
		self.attempt = self.attempt.saturating_add(1);
		tokio::select! {
			_ = cancel.cancelled() => Err(Cancelled),
			_ = tokio::time::sleep(delay) => Ok(()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn constant_backoff_never_grows() {
		let backoff = Backoff::Constant(Duration::from_secs(30));
		assert_eq!(backoff.delay(0), Duration::from_secs(30));
		assert_eq!(backoff.delay(10), Duration::from_secs(30));
	}

	#[test]
	fn exponential_without_jitter_grows_then_caps() {
		let backoff = Backoff::Exponential {
			initial: Duration::from_secs(2),
			max: Duration::from_secs(60),
			multiplier: 1.5,
			jitter: 0.0,
		};
		assert_eq!(backoff.delay(0), Duration::from_secs(2));
		assert_eq!(backoff.delay(1), Duration::from_secs(3));
		assert_eq!(backoff.delay(50), Duration::from_secs(60));
	}

	#[tokio::test]
	async fn wait_advances_attempt_and_reset_clears_it() {
		let cancel = CancellationToken::new();
		let mut waiter = Waiter::new(Backoff::Constant(Duration::from_millis(1)));
		waiter.wait(&cancel).await.unwrap();
		waiter.wait(&cancel).await.unwrap();
		assert_eq!(waiter.attempt(), 2);
		waiter.reset();
		assert_eq!(waiter.attempt(), 0);
	}

	#[tokio::test]
	async fn wait_returns_promptly_on_cancel() {
		let cancel = CancellationToken::new();
		let mut waiter = Waiter::new(Backoff::Constant(Duration::from_secs(3600)));
		let child = cancel.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(10)).await;
			child.cancel();
		});
		let result = tokio::time::timeout(Duration::from_secs(5), waiter.wait(&cancel)).await;
		assert_eq!(result.unwrap(), Err(Cancelled));
	}

	proptest! {
		#[test]
		fn jittered_delay_stays_in_band(attempt in 0u32..40) {
			let backoff = Backoff::reconciler();
			let delay = backoff.delay(attempt).as_secs_f64();
			prop_assert!(delay >= 2.0 * 0.8 - 1e-9);
			prop_assert!(delay <= 60.0 * 1.2 + 1e-9);
		}
	}
}
