// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Health and metrics listeners.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::metrics::ConnectorMetrics;

/// GET /healthz
async fn healthz() -> impl IntoResponse {
	(StatusCode::OK, "ok")
}

/// GET /metrics
async fn prometheus_metrics(State(metrics): State<Arc<ConnectorMetrics>>) -> impl IntoResponse {
	match metrics.gather() {
		Ok(body) => (
			StatusCode::OK,
			[(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
			body,
		)
			.into_response(),
		Err(e) => {
			tracing::error!(error = %e, "failed to gather metrics");
			(StatusCode::INTERNAL_SERVER_ERROR, "failed to gather metrics").into_response()
		}
	}
}

pub fn health_router() -> Router {
	Router::new()
		.route("/healthz", get(healthz))
		.layer(TraceLayer::new_for_http())
}

pub fn metrics_router(metrics: Arc<ConnectorMetrics>) -> Router {
	Router::new()
		.route("/metrics", get(prometheus_metrics))
		.layer(TraceLayer::new_for_http())
		.with_state(metrics)
}

/// Serves `app` on `addr` until `cancel` fires.
pub async fn serve(
	name: &'static str,
	addr: SocketAddr,
	app: Router,
	cancel: CancellationToken,
) -> anyhow::Result<()> {
	let listener = tokio::net::TcpListener::bind(addr)
		.await
		.map_err(|e| anyhow::anyhow!("binding {name} listener on {addr}: {e}"))?;
	tracing::info!(listener = name, %addr, "listening");
	axum::serve(listener, app)
		.with_graceful_shutdown(async move { cancel.cancelled().await })
		.into_future()
		.await
		.map_err(|e| anyhow::anyhow!("{name} listener: {e}"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::body::Body;
	use axum::http::Request;
	use tower::ServiceExt;

	#[tokio::test]
	async fn healthz_answers_ok() {
		let response = health_router()
			.oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
	}

	#[tokio::test]
	async fn health_listener_does_not_serve_metrics() {
		let response = health_router()
			.oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn metrics_are_prometheus_text() {
		let metrics = Arc::new(ConnectorMetrics::new().unwrap());
		metrics.record_grant_poll("changed");
		let response = metrics_router(metrics)
			.oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
			.await
			.unwrap();
		assert_eq!(response.status(), StatusCode::OK);
		let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
		assert!(content_type.starts_with("text/plain"));
		let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
		let text = String::from_utf8(body.to_vec()).unwrap();
		assert!(text.contains("infra_connector_grant_polls_total{outcome=\"changed\"} 1"));
	}
}
