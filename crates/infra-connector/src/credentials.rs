// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Issues service-account tokens for pending credential requests.
//!
//! For each request the user's service account is created if needed, a
//! token is minted, and the token is posted back to the registry. Only one
//! answer per request is accepted; a 409 means another connector replica
//! answered first and the minted token is thrown away.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use infra_common_http::{Backoff, Waiter};
use infra_server_api::{
	CredentialRequest, ListCredentialRequestsRequest, RegistryApi, UpdateCredentialRequest,
};
use infra_server_k8s::K8sClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::destination::{registered, DestinationWatch};
use crate::error::{ConnectorError, Result};
use crate::metrics::ConnectorMetrics;
use crate::normalize::service_account_name;

/// Lifetime asked of the cluster for each minted token.
pub const TOKEN_LIFETIME_SECS: i64 = 3600;

/// Used when the cluster does not report the lifetime it granted.
const FALLBACK_LIFETIME_HOURS: i64 = 24;

/// Pause after a failed poll or a failed request.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What happened to one credential request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Issued,
	/// Another replica answered first.
	Discarded,
	/// The request could not be answered and will not be retried.
	Skipped,
}

impl Outcome {
	fn label(self) -> &'static str {
		match self {
			Outcome::Issued => "issued",
			Outcome::Discarded => "discarded",
			Outcome::Skipped => "skipped",
		}
	}
}

pub struct CredentialReconciler {
	registry: Arc<dyn RegistryApi>,
	k8s: Arc<dyn K8sClient>,
	metrics: Arc<ConnectorMetrics>,
	service_account_namespace: String,
	wait_secs: u64,
	last_update_index: i64,
}

impl CredentialReconciler {
	pub fn new(
		registry: Arc<dyn RegistryApi>,
		k8s: Arc<dyn K8sClient>,
		metrics: Arc<ConnectorMetrics>,
		service_account_namespace: String,
		wait_secs: u64,
	) -> Self {
		Self {
			registry,
			k8s,
			metrics,
			service_account_namespace,
			wait_secs,
			last_update_index: 0,
		}
	}

	pub fn last_update_index(&self) -> i64 {
		self.last_update_index
	}

	/// Answers one request. Errors returned here happened before a token was
	/// minted and are safe to retry.
	#[instrument(skip(self, request), fields(request_id = %request.id, user_id = %request.user_id))]
	pub async fn issue(&self, request: &CredentialRequest) -> Result<Outcome> {
		let user = match self.registry.get_user(request.user_id).await {
			Ok(user) => user,
			Err(e) if !e.is_retryable() && !e.is_unauthorized() => {
				warn!(error = %e, "cannot look up the requesting user");
				return Ok(Outcome::Skipped);
			}
			Err(e) => return Err(e.into()),
		};
		let name = service_account_name(&user.name);
		if name.is_empty() {
			warn!(user = %user.name, "user name has no valid service account form");
			return Ok(Outcome::Skipped);
		}

		let namespace = &self.service_account_namespace;
		self.k8s.ensure_service_account(namespace, &name).await?;
		let token = self
			.k8s
			.create_service_account_token(namespace, &name, TOKEN_LIFETIME_SECS)
			.await?;

		let lifetime = token
			.expiration_seconds
			.map(chrono::Duration::seconds)
			.unwrap_or_else(|| chrono::Duration::hours(FALLBACK_LIFETIME_HOURS));
		let update = UpdateCredentialRequest {
			organization_id: Some(request.organization_id),
			bearer_token: token.token,
			expires_at: Utc::now() + lifetime,
		};

		match self.registry.update_credential_request(request.id, &update).await {
			Ok(()) => {
				info!(service_account = %name, "issued credential");
				Ok(Outcome::Issued)
			}
			Err(e) if e.is_conflict() => {
				info!("credential request already answered, discarding token");
				Ok(Outcome::Discarded)
			}
			Err(e) => {
				// the token is already minted; answering again would mint another
				warn!(error = %e, "failed to post credential, discarding token");
				Ok(Outcome::Skipped)
			}
		}
	}

	/// One poll and the requests it returned. The watermark moves past every
	/// request that got a final outcome, so a retryable failure leaves the
	/// rest for the next poll.
	pub async fn reconcile_once(&mut self, destination: &str) -> Result<usize> {
		let query = ListCredentialRequestsRequest {
			destination: destination.to_string(),
			last_update_index: self.last_update_index,
			wait: Some(self.wait_secs),
		};
		let Some(response) = self.registry.list_credential_requests(&query).await? else {
			debug!(update_index = self.last_update_index, "no new credential requests");
			return Ok(0);
		};

		let mut requests = response.items;
		requests.sort_by_key(|r| r.update_index);
		let mut handled = 0;
		for request in &requests {
			if request.update_index <= self.last_update_index {
				continue;
			}
			let outcome = self.issue(request).await.inspect_err(|e| {
				self.metrics.record_credential("error");
				warn!(request_id = %request.id, error = %e, "failed to issue credential");
			})?;
			self.metrics.record_credential(outcome.label());
			self.last_update_index = request.update_index;
			handled += 1;
		}
		self.last_update_index = self.last_update_index.max(response.max_update_index);
		Ok(handled)
	}

	pub async fn run(mut self, mut destination: DestinationWatch, cancel: CancellationToken) {
		let Some(target) = registered(&mut destination, &cancel).await else {
			return;
		};
		let mut backoff = Waiter::new(Backoff::Constant(ERROR_BACKOFF));

		loop {
			let result = tokio::select! {
				_ = cancel.cancelled() => break,
				result = self.reconcile_once(&target.name) => result,
			};
			match result {
				Ok(_) => continue,
				Err(ConnectorError::Registry(e)) if e.is_unauthorized() => {
					error!(error = %e, "registry rejected the access key while polling credential requests")
				}
				Err(e) => warn!(error = %e, "poll credential requests"),
			}
			if backoff.wait(&cancel).await.is_err() {
				break;
			}
		}
		debug!("credential reconciler stopped");
	}
}
