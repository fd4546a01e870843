// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP routes and shared handler state for the registry.

use std::sync::Arc;

use axum::{
	middleware::from_fn_with_state,
	routing::{delete, get, post},
	Router,
};
use infra_server_api::Id;
use infra_server_auth::SessionSigner;
use infra_server_config::ServerConfig;
use infra_server_db::Store;
use infra_server_jobs::JobScheduler;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::{
	auth_middleware::auth_layer,
	metrics::{track_requests, ServerMetrics},
	providers::IdentityProviders,
	routes,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
	pub store: Store,
	pub signer: Arc<SessionSigner>,
	pub organization_id: Id,
	pub config: Arc<ServerConfig>,
	pub metrics: Arc<ServerMetrics>,
	pub providers: Arc<dyn IdentityProviders>,
	/// Absent in tests that do not run background jobs.
	pub scheduler: Option<Arc<JobScheduler>>,
	/// Fires when the server begins shutting down; pending long-polls end.
	pub shutdown: CancellationToken,
}

/// Everything under `/v1`.
fn v1_routes() -> Router<AppState> {
	Router::new()
		.route(
			"/providers",
			get(routes::providers::list_providers).post(routes::providers::create_provider),
		)
		.route(
			"/providers/{id}",
			get(routes::providers::get_provider)
				.put(routes::providers::update_provider)
				.delete(routes::providers::delete_provider),
		)
		.route(
			"/destinations",
			get(routes::destinations::list_destinations)
				.post(routes::destinations::create_destination),
		)
		.route(
			"/destinations/{id}",
			get(routes::destinations::get_destination)
				.put(routes::destinations::update_destination)
				.delete(routes::destinations::delete_destination),
		)
		.route(
			"/grants",
			get(routes::grants::list_grants).post(routes::grants::create_grant),
		)
		.route(
			"/grants/{id}",
			get(routes::grants::get_grant).delete(routes::grants::delete_grant),
		)
		.route("/users", get(routes::users::list_users))
		.route("/users/{id}", get(routes::users::get_user))
		.route("/groups", get(routes::users::list_groups))
		.route("/groups/{id}", get(routes::users::get_group))
		.route(
			"/credentials",
			get(routes::credentials::list_credential_requests)
				.post(routes::credentials::create_credential_request),
		)
		.route(
			"/credentials/{id}",
			get(routes::credentials::get_credential)
				.put(routes::credentials::update_credential_request),
		)
		.route("/login", post(routes::auth::login))
		.route("/logout", post(routes::auth::logout))
		.route("/tokens", post(routes::auth::create_token))
		.route(
			"/access-keys",
			get(routes::access_keys::list_access_keys).post(routes::access_keys::create_access_key),
		)
		.route("/access-keys/{id}", delete(routes::access_keys::delete_access_key))
		.route("/version", get(routes::health::version))
		.route("/.well-known/jwks.json", get(routes::health::jwks))
}

pub fn create_router(state: AppState) -> Router {
	let request_timeout = state.config.http.request_timeout();

	Router::new()
		.nest("/v1", v1_routes())
		.route("/.well-known/jwks.json", get(routes::health::jwks))
		.route("/healthz", get(routes::health::healthz))
		.route("/metrics", get(routes::health::prometheus_metrics))
		.layer(from_fn_with_state(state.clone(), auth_layer))
		.layer(from_fn_with_state(state.clone(), track_requests))
		.layer(TimeoutLayer::new(request_timeout))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}
