// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background jobs run by the registry's scheduler.

pub mod config_import;
pub mod credential_gc;
pub mod destination_sweep;
pub mod job_history_gc;
pub mod provider_sync;

pub use config_import::{ConfigImportJob, CONFIG_IMPORT_JOB_ID};
pub use credential_gc::CredentialGcJob;
pub use destination_sweep::DestinationSweepJob;
pub use job_history_gc::{JobHistoryGcJob, JOB_HISTORY_GC_INTERVAL, JOB_RUN_RETENTION};
pub use provider_sync::{ProviderSyncJob, PROVIDER_SYNC_JOB_ID};
