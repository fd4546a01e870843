// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub use tokio_util::sync::CancellationToken;

use crate::types::TriggerSource;

pub struct JobContext {
	pub run_id: String,
	pub triggered_by: TriggerSource,
	pub cancellation_token: CancellationToken,
}

impl JobContext {
	pub fn is_cancelled(&self) -> bool {
		self.cancellation_token.is_cancelled()
	}
}
