// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Credential request queue.
//!
//! A request is `open` until exactly one connector fulfills it. Fulfilment
//! is a compare-and-set on `status = 'open'`; every loser gets
//! [`DbError::Conflict`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use infra_common_config::SecretString;
use infra_server_api::{CredentialRequestStatus, Id};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::cipher::{open_secret, seal_secret, ColumnCipher};
use crate::error::{DbError, Result};
use crate::notify::{next_update_index, ChangeHub, Table};
use crate::types::{db_time, parse_id, parse_opt_time, parse_time, CredentialRequest};

const REQUEST_COLUMNS: &str = "id, organization_id, user_id, destination, status, bearer_token, bearer_token_expires_at, expires_at, update_index, created_at, updated_at";

#[derive(Clone)]
pub struct CredentialRequestRepository {
	pool: SqlitePool,
	cipher: Arc<dyn ColumnCipher>,
	hub: Arc<ChangeHub>,
}

impl CredentialRequestRepository {
	pub fn new(pool: SqlitePool, cipher: Arc<dyn ColumnCipher>, hub: Arc<ChangeHub>) -> Self {
		Self { pool, cipher, hub }
	}

	#[tracing::instrument(skip(self))]
	pub async fn create_request(
		&self,
		organization_id: Id,
		user_id: Id,
		destination: &str,
		expires_at: DateTime<Utc>,
	) -> Result<CredentialRequest> {
		let id = Id::generate();
		let now = db_time(&Utc::now());
		let mut tx = self.pool.begin().await?;
		let index = next_update_index(&mut tx, Table::CredentialRequests).await?;
		sqlx::query(
			r#"
			INSERT INTO credential_requests (id, organization_id, user_id, destination, status, expires_at, update_index, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(id.to_string())
		.bind(organization_id.to_string())
		.bind(user_id.to_string())
		.bind(destination)
		.bind(CredentialRequestStatus::Open.as_str())
		.bind(db_time(&expires_at))
		.bind(index)
		.bind(&now)
		.bind(&now)
		.execute(&mut *tx)
		.await?;
		tx.commit().await?;

		self.hub.publish(Table::CredentialRequests, index);
		tracing::debug!(request_id = %id, update_index = index, "credential request created");
		self
			.get_request(id)
			.await?
			.ok_or_else(|| DbError::Internal("credential request vanished after insert".to_string()))
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_request(&self, id: Id) -> Result<Option<CredentialRequest>> {
		let row = sqlx::query(&format!(
			"SELECT {REQUEST_COLUMNS} FROM credential_requests WHERE id = ?"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;
		row.map(|r| self.parse_request_row(&r)).transpose()
	}

	/// Open, unexpired requests for `destination` newer than `after_index`.
	#[tracing::instrument(skip(self))]
	pub async fn list_open_requests(
		&self,
		destination: &str,
		after_index: i64,
		now: DateTime<Utc>,
	) -> Result<Vec<CredentialRequest>> {
		let rows = sqlx::query(&format!(
			r#"
			SELECT {REQUEST_COLUMNS} FROM credential_requests
			WHERE destination = ? AND status = 'open' AND update_index > ? AND expires_at >= ?
			ORDER BY update_index
			"#
		))
		.bind(destination)
		.bind(after_index)
		.bind(db_time(&now))
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(|r| self.parse_request_row(r)).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn max_update_index(&self, destination: &str) -> Result<i64> {
		let max: Option<i64> = sqlx::query_scalar(
			"SELECT MAX(update_index) FROM credential_requests WHERE destination = ?",
		)
		.bind(destination)
		.fetch_one(&self.pool)
		.await?;
		Ok(max.unwrap_or(0))
	}

	/// `open -> fulfilled`, at most once.
	#[tracing::instrument(skip(self, bearer_token))]
	pub async fn fulfill_request(
		&self,
		id: Id,
		bearer_token: &SecretString,
		token_expires_at: DateTime<Utc>,
		now: DateTime<Utc>,
	) -> Result<CredentialRequest> {
		let sealed = seal_secret(self.cipher.as_ref(), bearer_token)?;
		let mut tx = self.pool.begin().await?;
		let index = next_update_index(&mut tx, Table::CredentialRequests).await?;
		let result = sqlx::query(
			r#"
			UPDATE credential_requests
			SET status = 'fulfilled', bearer_token = ?, bearer_token_expires_at = ?, update_index = ?, updated_at = ?
			WHERE id = ? AND status = 'open' AND expires_at >= ?
			"#,
		)
		.bind(sealed)
		.bind(db_time(&token_expires_at))
		.bind(index)
		.bind(db_time(&now))
		.bind(id.to_string())
		.bind(db_time(&now))
		.execute(&mut *tx)
		.await?;

		if result.rows_affected() == 0 {
			tx.rollback().await?;
			return match self.get_request(id).await? {
				None => Err(DbError::NotFound(format!("credential request {id}"))),
				Some(existing) => Err(DbError::Conflict(format!(
					"credential request {id} is {}",
					match existing.status {
						CredentialRequestStatus::Open => "expired",
						other => other.as_str(),
					}
				))),
			};
		}
		tx.commit().await?;

		self.hub.publish(Table::CredentialRequests, index);
		tracing::debug!(request_id = %id, update_index = index, "credential request fulfilled");
		self
			.get_request(id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("credential request {id}")))
	}

	/// Marks open requests past their expiry as expired. Returns how many.
	#[tracing::instrument(skip(self))]
	pub async fn expire_open_requests(&self, now: DateTime<Utc>) -> Result<u64> {
		let ids: Vec<String> = sqlx::query_scalar(
			"SELECT id FROM credential_requests WHERE status = 'open' AND expires_at < ?",
		)
		.bind(db_time(&now))
		.fetch_all(&self.pool)
		.await?;
		if ids.is_empty() {
			return Ok(0);
		}

		let mut tx = self.pool.begin().await?;
		let mut last = 0;
		for id in &ids {
			last = next_update_index(&mut tx, Table::CredentialRequests).await?;
			sqlx::query(
				"UPDATE credential_requests SET status = 'expired', update_index = ?, updated_at = ? WHERE id = ? AND status = 'open'",
			)
			.bind(last)
			.bind(db_time(&now))
			.bind(id)
			.execute(&mut *tx)
			.await?;
		}
		tx.commit().await?;
		self.hub.publish(Table::CredentialRequests, last);
		Ok(ids.len() as u64)
	}

	/// Deletes closed requests whose expiry is before `before`.
	#[tracing::instrument(skip(self))]
	pub async fn delete_expired_requests(&self, before: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query(
			"DELETE FROM credential_requests WHERE status != 'open' AND expires_at < ?",
		)
		.bind(db_time(&before))
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected())
	}

	fn parse_request_row(&self, row: &SqliteRow) -> Result<CredentialRequest> {
		let status: String = row.get("status");
		let bearer_token: Option<String> = row.get("bearer_token");
		Ok(CredentialRequest {
			id: parse_id(row.get("id"))?,
			organization_id: parse_id(row.get("organization_id"))?,
			user_id: parse_id(row.get("user_id"))?,
			destination: row.get("destination"),
			status: status.parse().map_err(DbError::Internal)?,
			bearer_token: bearer_token
				.as_deref()
				.map(|t| open_secret(self.cipher.as_ref(), t))
				.transpose()?,
			bearer_token_expires_at: parse_opt_time(row.get("bearer_token_expires_at"))?,
			expires_at: parse_time(row.get("expires_at"))?,
			update_index: row.get("update_index"),
			created_at: parse_time(row.get("created_at"))?,
			updated_at: parse_time(row.get("updated_at"))?,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_store;
	use chrono::Duration;

	async fn open_request(store: &crate::Store) -> CredentialRequest {
		store
			.credential_requests
			.create_request(
				Id::generate(),
				Id::generate(),
				"c1",
				Utc::now() + Duration::minutes(2),
			)
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn fulfil_is_at_most_once() {
		let store = create_test_store().await;
		let req = open_request(&store).await;
		let token = SecretString::from("tok");
		let expires = Utc::now() + Duration::hours(1);

		let done = store
			.credential_requests
			.fulfill_request(req.id, &token, expires, Utc::now())
			.await
			.unwrap();
		assert_eq!(done.status, CredentialRequestStatus::Fulfilled);
		assert_eq!(done.bearer_token.unwrap().expose(), "tok");
		assert!(done.update_index > req.update_index);

		let second = store
			.credential_requests
			.fulfill_request(req.id, &SecretString::from("tok2"), expires, Utc::now())
			.await;
		assert!(matches!(second, Err(DbError::Conflict(_))));
	}

	#[tokio::test]
	async fn fulfil_unknown_is_not_found() {
		let store = create_test_store().await;
		let result = store
			.credential_requests
			.fulfill_request(Id::generate(), &SecretString::from("tok"), Utc::now(), Utc::now())
			.await;
		assert!(matches!(result, Err(DbError::NotFound(_))));
	}

	#[tokio::test]
	async fn open_list_respects_watermark_and_status() {
		let store = create_test_store().await;
		let a = open_request(&store).await;
		let b = open_request(&store).await;
		let repo = &store.credential_requests;

		let all = repo.list_open_requests("c1", 0, Utc::now()).await.unwrap();
		assert_eq!(all.len(), 2);
		let after_a = repo.list_open_requests("c1", a.update_index, Utc::now()).await.unwrap();
		assert_eq!(after_a.len(), 1);
		assert_eq!(after_a[0].id, b.id);

		repo.fulfill_request(b.id, &SecretString::from("t"), Utc::now(), Utc::now())
			.await
			.unwrap();
		assert!(repo
			.list_open_requests("c1", a.update_index, Utc::now())
			.await
			.unwrap()
			.is_empty());
		assert!(repo.list_open_requests("c2", 0, Utc::now()).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn expired_requests_cannot_be_fulfilled_and_are_collected() {
		let store = create_test_store().await;
		let req = open_request(&store).await;
		let repo = &store.credential_requests;
		let later = Utc::now() + Duration::minutes(5);

		let late = repo
			.fulfill_request(req.id, &SecretString::from("t"), later, later)
			.await;
		assert!(matches!(late, Err(DbError::Conflict(_))));

		assert_eq!(repo.expire_open_requests(later).await.unwrap(), 1);
		let expired = repo.get_request(req.id).await.unwrap().unwrap();
		assert_eq!(expired.status, CredentialRequestStatus::Expired);
		assert_eq!(repo.delete_expired_requests(later).await.unwrap(), 1);
		assert!(repo.get_request(req.id).await.unwrap().is_none());
	}
}
