// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Prometheus metrics for the connector's reconcilers.

use infra_server_k8s::ApplySummary;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct ConnectorMetrics {
	destination_syncs_total: IntCounterVec,
	grant_polls_total: IntCounterVec,
	binding_writes_total: IntCounterVec,
	credentials_total: IntCounterVec,
	grants_update_index: IntGauge,
	registry: Registry,
}

fn opts(name: &str, help: &str) -> Opts {
	Opts::new(name, help).namespace("infra").subsystem("connector")
}

impl ConnectorMetrics {
	pub fn new() -> Result<Self, prometheus::Error> {
		let registry = Registry::new();

		let destination_syncs_total = IntCounterVec::new(
			opts("destination_syncs_total", "Destination sync attempts, by outcome"),
			&["outcome"],
		)?;
		registry.register(Box::new(destination_syncs_total.clone()))?;

		let grant_polls_total = IntCounterVec::new(
			opts("grant_polls_total", "Grant long-poll responses, by outcome"),
			&["outcome"],
		)?;
		registry.register(Box::new(grant_polls_total.clone()))?;

		let binding_writes_total = IntCounterVec::new(
			opts("binding_writes_total", "Role binding writes, by operation"),
			&["operation"],
		)?;
		registry.register(Box::new(binding_writes_total.clone()))?;

		let credentials_total = IntCounterVec::new(
			opts("credentials_total", "Credential requests handled, by outcome"),
			&["outcome"],
		)?;
		registry.register(Box::new(credentials_total.clone()))?;

		let grants_update_index = IntGauge::with_opts(opts(
			"grants_update_index",
			"Highest grant update index applied to the cluster",
		))?;
		registry.register(Box::new(grants_update_index.clone()))?;

		Ok(Self {
			destination_syncs_total,
			grant_polls_total,
			binding_writes_total,
			credentials_total,
			grants_update_index,
			registry,
		})
	}

	pub fn record_destination_sync(&self, ok: bool) {
		let outcome = if ok { "ok" } else { "error" };
		self.destination_syncs_total.with_label_values(&[outcome]).inc();
	}

	pub fn record_grant_poll(&self, outcome: &str) {
		self.grant_polls_total.with_label_values(&[outcome]).inc();
	}

	pub fn record_apply(&self, summary: &ApplySummary, update_index: i64) {
		for (operation, count) in [
			("create", summary.created),
			("update", summary.updated),
			("delete", summary.deleted),
		] {
			self
				.binding_writes_total
				.with_label_values(&[operation])
				.inc_by(count as u64);
		}
		self.grants_update_index.set(update_index);
	}

	pub fn record_credential(&self, outcome: &str) {
		self.credentials_total.with_label_values(&[outcome]).inc();
	}

	/// Text exposition format.
	pub fn gather(&self) -> Result<String, prometheus::Error> {
		let families = self.registry.gather();
		let mut buf = Vec::new();
		TextEncoder::new().encode(&families, &mut buf)?;
		String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(format!("metrics are not utf-8: {e}")))
	}
}
