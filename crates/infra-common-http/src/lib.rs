// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared HTTP plumbing for the registry and the connector.
//!
//! - A reqwest builder carrying the infra User-Agent and optional trust roots
//! - Retry with exponential backoff for idempotent calls
//! - [`Waiter`]: cancelable exponential or constant backoff used by every
//!   reconciler loop

mod client;
mod retry;
mod waiter;

pub use client::{builder, builder_with_tls, TlsOptions};
pub use retry::{retry, RetryConfig, RetryableError};
pub use waiter::{Backoff, Cancelled, Waiter};
