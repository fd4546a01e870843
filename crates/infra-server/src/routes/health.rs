// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Health, version, key set and metrics handlers. None require auth.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use infra_common_version::VersionInfo;
use infra_server_jobs::{HealthState, JobsHealthStatus};
use serde::Serialize;

use crate::{api::AppState, error::ServerError};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
	pub status: HealthState,
	pub database: HealthState,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub jobs: Option<JobsHealthStatus>,
	pub version: VersionInfo,
}

/// The worst of the component states.
fn aggregate(database: HealthState, jobs: Option<&JobsHealthStatus>) -> HealthState {
	database.max(jobs.map(|j| j.status).unwrap_or(HealthState::Healthy))
}

/// GET /healthz
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
	let database = match state.store.providers.count_providers().await {
		Ok(_) => HealthState::Healthy,
		Err(e) => {
			tracing::warn!(error = %e, "healthz: database check failed");
			HealthState::Unhealthy
		}
	};
	let jobs = match &state.scheduler {
		Some(scheduler) => Some(scheduler.health_status().await),
		None => None,
	};

	let status = aggregate(database, jobs.as_ref());
	let http_status = match status {
		HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
		HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
	};
	(
		http_status,
		Json(HealthResponse {
			status,
			database,
			jobs,
			version: VersionInfo::current(),
		}),
	)
}

/// GET /v1/version
pub async fn version() -> Json<VersionInfo> {
	Json(VersionInfo::current())
}

/// GET /.well-known/jwks.json
///
/// Public half of the session signing key, for destinations verifying
/// session tokens.
pub async fn jwks(State(state): State<AppState>) -> impl IntoResponse {
	Json(state.signer.jwks())
}

/// GET /metrics
pub async fn prometheus_metrics(
	State(state): State<AppState>,
) -> Result<impl IntoResponse, ServerError> {
	match state.metrics.gather() {
		Ok(metrics) => Ok((
			StatusCode::OK,
			[(
				axum::http::header::CONTENT_TYPE,
				"text/plain; version=0.0.4; charset=utf-8",
			)],
			metrics,
		)),
		Err(e) => {
			tracing::error!(error = %e, "prometheus_metrics: failed to gather metrics");
			Err(ServerError::Internal(format!("failed to gather metrics: {e}")))
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn jobs(status: HealthState) -> JobsHealthStatus {
		JobsHealthStatus { status, jobs: vec![] }
	}

	#[test]
	fn worst_component_wins() {
		assert_eq!(aggregate(HealthState::Healthy, None), HealthState::Healthy);
		assert_eq!(
			aggregate(HealthState::Healthy, Some(&jobs(HealthState::Degraded))),
			HealthState::Degraded
		);
		assert_eq!(
			aggregate(HealthState::Unhealthy, Some(&jobs(HealthState::Degraded))),
			HealthState::Unhealthy
		);
	}
}
