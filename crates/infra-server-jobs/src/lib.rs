// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background job scheduler for the infra registry.
//!
//! Runs periodic and one-shot jobs (provider sync, destination sweep,
//! credential request GC, config import) with retry, cooperative
//! cancellation, and run history persisted through
//! [`infra_server_db::JobRepository`].

pub mod context;
mod error;
pub mod health;
pub mod job;
pub mod scheduler;
pub mod types;

pub use context::{CancellationToken, JobContext};
pub use error::{JobError, Result};
pub use health::{HealthState, JobHealthStatus, JobsHealthStatus, LastRunInfo};
pub use infra_server_db::JobRepository;
pub use job::Job;
pub use scheduler::{JobScheduler, RetryPolicy};
pub use types::{JobDefinition, JobOutput, JobRun, JobStatus, JobType, TriggerSource};
