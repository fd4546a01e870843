// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed reqwest client for the registry.

use std::sync::Arc;

use async_trait::async_trait;
use infra_common_config::SecretString;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;
use url::Url;

use crate::error::{ApiError, ClientError, Result};
use crate::id::Id;
use crate::types::*;
use crate::DESTINATION_HEADER;

/// Called whenever the registry answers 401.
pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

/// The registry calls a connector depends on.
#[async_trait]
pub trait RegistryApi: Send + Sync {
	async fn list_destinations(
		&self,
		query: &ListDestinationsRequest,
	) -> Result<ListResponse<Destination>>;

	async fn create_destination(&self, request: &CreateDestinationRequest) -> Result<Destination>;

	async fn update_destination(
		&self,
		id: Id,
		request: &UpdateDestinationRequest,
	) -> Result<Destination>;

	/// `Ok(None)` means 304: nothing newer than the watermark within the wait.
	async fn list_grants(&self, query: &ListGrantsRequest) -> Result<Option<ListResponse<Grant>>>;

	async fn get_user(&self, id: Id) -> Result<User>;

	async fn get_group(&self, id: Id) -> Result<Group>;

	/// `Ok(None)` means 304.
	async fn list_credential_requests(
		&self,
		query: &ListCredentialRequestsRequest,
	) -> Result<Option<ListCredentialRequestsResponse>>;

	async fn update_credential_request(
		&self,
		id: Id,
		request: &UpdateCredentialRequest,
	) -> Result<()>;
}

#[derive(Clone)]
pub struct RegistryClient {
	http: Client,
	base_url: Url,
	access_key: SecretString,
	destination: Option<String>,
	on_unauthorized: Option<UnauthorizedHook>,
}

impl std::fmt::Debug for RegistryClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("RegistryClient")
			.field("base_url", &self.base_url.as_str())
			.field("access_key", &self.access_key)
			.field("destination", &self.destination)
			.finish()
	}
}

impl RegistryClient {
	pub fn new(http: Client, base_url: Url, access_key: SecretString) -> Self {
		Self {
			http,
			base_url,
			access_key,
			destination: None,
			on_unauthorized: None,
		}
	}

	/// Tags every request with the connector's destination unique ID.
	pub fn with_destination(mut self, unique_id: impl Into<String>) -> Self {
		self.destination = Some(unique_id.into());
		self
	}

	pub fn with_unauthorized_hook(mut self, hook: UnauthorizedHook) -> Self {
		self.on_unauthorized = Some(hook);
		self
	}

	fn url(&self, path: &str) -> Result<Url> {
		Ok(self.base_url.join(path)?)
	}

	fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
		let builder = builder.bearer_auth(self.access_key.expose());
		match &self.destination {
			Some(unique_id) => builder.header(DESTINATION_HEADER, unique_id),
			None => builder,
		}
	}

	async fn check(&self, response: Response) -> Result<Response> {
		let status = response.status();
		if status.is_success() || status == StatusCode::NOT_MODIFIED {
			return Ok(response);
		}
		if status == StatusCode::UNAUTHORIZED {
			if let Some(hook) = &self.on_unauthorized {
				hook();
			}
		}
		let body = response.text().await.unwrap_or_default();
		let message = serde_json::from_str::<ApiError>(&body)
			.map(|e| e.message)
			.unwrap_or(body);
		Err(ClientError::Api {
			status: status.as_u16(),
			message,
		})
	}

	async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
		let response = self.check(self.authed(builder).send().await?).await?;
		Ok(response.json().await?)
	}

	async fn send_empty(&self, builder: RequestBuilder) -> Result<()> {
		self.check(self.authed(builder).send().await?).await?;
		Ok(())
	}

	async fn send_long_poll<T: DeserializeOwned>(
		&self,
		builder: RequestBuilder,
	) -> Result<Option<T>> {
		let response = self.check(self.authed(builder).send().await?).await?;
		if response.status() == StatusCode::NOT_MODIFIED {
			return Ok(None);
		}
		Ok(Some(response.json().await?))
	}

	fn get(&self, path: &str) -> Result<RequestBuilder> {
		Ok(self.http.get(self.url(path)?))
	}

	fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<RequestBuilder> {
		Ok(self.http.post(self.url(path)?).json(body))
	}

	fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<RequestBuilder> {
		Ok(self.http.put(self.url(path)?).json(body))
	}

	fn delete(&self, path: &str) -> Result<RequestBuilder> {
		Ok(self.http.delete(self.url(path)?))
	}

	#[instrument(skip(self))]
	pub async fn list_providers(&self) -> Result<ListResponse<Provider>> {
		self.send(self.get("/v1/providers")?).await
	}

	#[instrument(skip(self, request), fields(name = %request.name))]
	pub async fn create_provider(&self, request: &CreateProviderRequest) -> Result<Provider> {
		self.send(self.post("/v1/providers", request)?).await
	}

	#[instrument(skip(self))]
	pub async fn delete_provider(&self, id: Id) -> Result<()> {
		self.send_empty(self.delete(&format!("/v1/providers/{id}"))?).await
	}

	#[instrument(skip(self))]
	pub async fn delete_destination(&self, id: Id) -> Result<()> {
		self.send_empty(self.delete(&format!("/v1/destinations/{id}"))?).await
	}

	#[instrument(skip(self, request), fields(identity = %request.identity, resource = %request.resource))]
	pub async fn create_grant(&self, request: &CreateGrantRequest) -> Result<Grant> {
		self.send(self.post("/v1/grants", request)?).await
	}

	#[instrument(skip(self))]
	pub async fn delete_grant(&self, id: Id) -> Result<()> {
		self.send_empty(self.delete(&format!("/v1/grants/{id}"))?).await
	}

	#[instrument(skip(self))]
	pub async fn list_users(&self, query: &ListUsersRequest) -> Result<ListResponse<User>> {
		self.send(self.get("/v1/users")?.query(query)).await
	}

	#[instrument(skip(self, request), fields(destination = %request.destination))]
	pub async fn create_credential_request(
		&self,
		request: &CreateCredentialRequest,
	) -> Result<CreateCredentialResponse> {
		self.send(self.post("/v1/credentials", request)?).await
	}

	/// Blocks up to `wait` seconds for the request to be fulfilled.
	#[instrument(skip(self))]
	pub async fn get_credential(&self, id: Id, wait: Option<u64>) -> Result<CredentialResponse> {
		let query = GetCredentialRequest { wait };
		self
			.send(self.get(&format!("/v1/credentials/{id}"))?.query(&query))
			.await
	}

	#[instrument(skip(self, request))]
	pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
		let builder = self.http.post(self.url("/v1/login")?).json(request);
		let response = self.check(builder.send().await?).await?;
		Ok(response.json().await?)
	}

	#[instrument(skip(self))]
	pub async fn logout(&self) -> Result<()> {
		self.send_empty(self.post("/v1/logout", &serde_json::json!({}))?).await
	}

	#[instrument(skip(self))]
	pub async fn create_token(&self, request: &CreateTokenRequest) -> Result<CreateTokenResponse> {
		self.send(self.post("/v1/tokens", request)?).await
	}

	#[instrument(skip(self))]
	pub async fn create_access_key(
		&self,
		request: &CreateAccessKeyRequest,
	) -> Result<CreateAccessKeyResponse> {
		self.send(self.post("/v1/access-keys", request)?).await
	}
}

#[async_trait]
impl RegistryApi for RegistryClient {
	#[instrument(skip(self))]
	async fn list_destinations(
		&self,
		query: &ListDestinationsRequest,
	) -> Result<ListResponse<Destination>> {
		self.send(self.get("/v1/destinations")?.query(query)).await
	}

	#[instrument(skip(self, request), fields(name = %request.name, unique_id = %request.unique_id))]
	async fn create_destination(&self, request: &CreateDestinationRequest) -> Result<Destination> {
		self.send(self.post("/v1/destinations", request)?).await
	}

	#[instrument(skip(self, request), fields(name = %request.name))]
	async fn update_destination(
		&self,
		id: Id,
		request: &UpdateDestinationRequest,
	) -> Result<Destination> {
		self
			.send(self.put(&format!("/v1/destinations/{id}"), request)?)
			.await
	}

	#[instrument(skip(self))]
	async fn list_grants(&self, query: &ListGrantsRequest) -> Result<Option<ListResponse<Grant>>> {
		self
			.send_long_poll(self.get("/v1/grants")?.query(query))
			.await
	}

	#[instrument(skip(self))]
	async fn get_user(&self, id: Id) -> Result<User> {
		self.send(self.get(&format!("/v1/users/{id}"))?).await
	}

	#[instrument(skip(self))]
	async fn get_group(&self, id: Id) -> Result<Group> {
		self.send(self.get(&format!("/v1/groups/{id}"))?).await
	}

	#[instrument(skip(self))]
	async fn list_credential_requests(
		&self,
		query: &ListCredentialRequestsRequest,
	) -> Result<Option<ListCredentialRequestsResponse>> {
		self
			.send_long_poll(self.get("/v1/credentials")?.query(query))
			.await
	}

	#[instrument(skip(self, request))]
	async fn update_credential_request(
		&self,
		id: Id,
		request: &UpdateCredentialRequest,
	) -> Result<()> {
		self
			.send_empty(self.put(&format!("/v1/credentials/{id}"), request)?)
			.await
	}
}
