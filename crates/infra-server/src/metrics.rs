// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Prometheus metrics for the registry's HTTP surface.

use std::sync::Arc;

use axum::{
	body::Body,
	extract::{MatchedPath, State},
	http::Request,
	middleware::Next,
	response::Response,
};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::api::AppState;

/// Outcome label of a long-poll request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
	/// Something newer than the watermark was returned.
	Changed,
	/// The wait elapsed with nothing new (`304`).
	NotModified,
}

impl PollOutcome {
	fn as_str(self) -> &'static str {
		match self {
			PollOutcome::Changed => "changed",
			PollOutcome::NotModified => "not_modified",
		}
	}
}

pub struct ServerMetrics {
	http_requests_total: IntCounterVec,
	long_poll_total: IntCounterVec,
	registry: Arc<Registry>,
}

impl ServerMetrics {
	pub fn new() -> Result<Self, prometheus::Error> {
		let registry = Arc::new(Registry::new());

		let http_requests_total = IntCounterVec::new(
			Opts::new("http_requests_total", "HTTP requests served, by route and status")
				.namespace("infra")
				.subsystem("server"),
			&["method", "path", "status"],
		)?;
		registry.register(Box::new(http_requests_total.clone()))?;

		let long_poll_total = IntCounterVec::new(
			Opts::new("long_poll_total", "Completed long-poll requests, by endpoint and outcome")
				.namespace("infra")
				.subsystem("server"),
			&["endpoint", "outcome"],
		)?;
		registry.register(Box::new(long_poll_total.clone()))?;

		Ok(Self {
			http_requests_total,
			long_poll_total,
			registry,
		})
	}

	pub fn record_request(&self, method: &str, path: &str, status: u16) {
		self
			.http_requests_total
			.with_label_values(&[method, path, &status.to_string()])
			.inc();
	}

	pub fn record_poll(&self, endpoint: &str, outcome: PollOutcome) {
		self
			.long_poll_total
			.with_label_values(&[endpoint, outcome.as_str()])
			.inc();
	}

	/// Text exposition format.
	pub fn gather(&self) -> Result<String, prometheus::Error> {
		let families = self.registry.gather();
		let mut buf = Vec::new();
		TextEncoder::new().encode(&families, &mut buf)?;
		String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(format!("metrics are not utf-8: {e}")))
	}
}

/// Counts every response by its route template, never the raw path.
pub async fn track_requests(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
	let method = request.method().to_string();
	let path = request
		.extensions()
		.get::<MatchedPath>()
		.map(|p| p.as_str().to_string())
		.unwrap_or_else(|| "unmatched".to_string());

	let response = next.run(request).await;
	state
		.metrics
		.record_request(&method, &path, response.status().as_u16());
	response
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn counters_appear_in_exposition() {
		let metrics = ServerMetrics::new().unwrap();
		metrics.record_request("GET", "/v1/grants", 304);
		metrics.record_poll("grants", PollOutcome::NotModified);
		metrics.record_poll("grants", PollOutcome::NotModified);

		let text = metrics.gather().unwrap();
		assert!(text.contains(
			r#"infra_server_http_requests_total{method="GET",path="/v1/grants",status="304"} 1"#
		));
		assert!(text.contains(r#"infra_server_long_poll_total{endpoint="grants",outcome="not_modified"} 2"#));
	}
}
