// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Destinations registered by connectors.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use infra_server_api::Id;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};

use crate::error::{DbError, Result};
use crate::notify::{next_update_index, ChangeHub, Table};
use crate::types::{db_time, parse_id, parse_opt_time, parse_time, Destination, DestinationSpec};

const DESTINATION_COLUMNS: &str = "id, name, unique_id, kind, connection_url, connection_ca, resources, roles, version, last_seen_at, update_index, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct DestinationFilter {
	pub unique_id: Option<String>,
	pub name: Option<String>,
	pub kind: Option<String>,
}

#[derive(Clone)]
pub struct DestinationRepository {
	pool: SqlitePool,
	hub: Arc<ChangeHub>,
}

impl DestinationRepository {
	pub fn new(pool: SqlitePool, hub: Arc<ChangeHub>) -> Self {
		Self { pool, hub }
	}

	#[tracing::instrument(skip(self, spec), fields(name = %spec.name, unique_id = %spec.unique_id))]
	pub async fn create_destination(&self, spec: &DestinationSpec) -> Result<Destination> {
		let id = Id::generate();
		let now = db_time(&Utc::now());
		let mut tx = self.pool.begin().await?;
		let index = next_update_index(&mut tx, Table::Destinations).await?;

		sqlx::query(
			r#"
			INSERT INTO destinations (id, name, unique_id, kind, connection_url, connection_ca, resources, roles, version, update_index, created_at, updated_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(id.to_string())
		.bind(&spec.name)
		.bind(&spec.unique_id)
		.bind(&spec.kind)
		.bind(&spec.connection_url)
		.bind(&spec.connection_ca)
		.bind(serde_json::to_string(&spec.resources)?)
		.bind(serde_json::to_string(&spec.roles)?)
		.bind(&spec.version)
		.bind(index)
		.bind(&now)
		.bind(&now)
		.execute(&mut *tx)
		.await?;
		write_labels(&mut tx, id, &spec.labels).await?;
		tx.commit().await?;

		self.hub.publish(Table::Destinations, index);
		tracing::debug!(destination_id = %id, "destination created");
		self
			.get_destination(id)
			.await?
			.ok_or_else(|| DbError::Internal("destination vanished after insert".to_string()))
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_destination(&self, id: Id) -> Result<Option<Destination>> {
		let row = sqlx::query(&format!(
			"SELECT {DESTINATION_COLUMNS} FROM destinations WHERE id = ? AND deleted_at IS NULL"
		))
		.bind(id.to_string())
		.fetch_optional(&self.pool)
		.await?;
		match row {
			Some(row) => Ok(Some(self.parse_destination_row(&row).await?)),
			None => Ok(None),
		}
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_destination_by_name(&self, name: &str) -> Result<Option<Destination>> {
		let row = sqlx::query(&format!(
			"SELECT {DESTINATION_COLUMNS} FROM destinations WHERE name = ? AND deleted_at IS NULL ORDER BY updated_at DESC LIMIT 1"
		))
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;
		match row {
			Some(row) => Ok(Some(self.parse_destination_row(&row).await?)),
			None => Ok(None),
		}
	}

	#[tracing::instrument(skip(self))]
	pub async fn list_destinations(&self, filter: &DestinationFilter) -> Result<Vec<Destination>> {
		let rows = sqlx::query(&format!(
			r#"
			SELECT {DESTINATION_COLUMNS} FROM destinations
			WHERE deleted_at IS NULL
			AND (?1 IS NULL OR unique_id = ?1)
			AND (?2 IS NULL OR name = ?2)
			AND (?3 IS NULL OR kind = ?3)
			ORDER BY name
			"#
		))
		.bind(filter.unique_id.as_deref())
		.bind(filter.name.as_deref())
		.bind(filter.kind.as_deref())
		.fetch_all(&self.pool)
		.await?;

		let mut destinations = Vec::with_capacity(rows.len());
		for row in &rows {
			destinations.push(self.parse_destination_row(row).await?);
		}
		Ok(destinations)
	}

	/// Replaces the destination's fields. An identical spec writes nothing.
	#[tracing::instrument(skip(self, spec), fields(name = %spec.name))]
	pub async fn update_destination(&self, id: Id, spec: &DestinationSpec) -> Result<Destination> {
		let current = self
			.get_destination(id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("destination {id}")))?;
		if current.spec == *spec {
			return Ok(current);
		}

		let mut tx = self.pool.begin().await?;
		let index = next_update_index(&mut tx, Table::Destinations).await?;
		sqlx::query(
			r#"
			UPDATE destinations
			SET name = ?, unique_id = ?, kind = ?, connection_url = ?, connection_ca = ?, resources = ?, roles = ?, version = ?, update_index = ?, updated_at = ?
			WHERE id = ? AND deleted_at IS NULL
			"#,
		)
		.bind(&spec.name)
		.bind(&spec.unique_id)
		.bind(&spec.kind)
		.bind(&spec.connection_url)
		.bind(&spec.connection_ca)
		.bind(serde_json::to_string(&spec.resources)?)
		.bind(serde_json::to_string(&spec.roles)?)
		.bind(&spec.version)
		.bind(index)
		.bind(db_time(&Utc::now()))
		.bind(id.to_string())
		.execute(&mut *tx)
		.await?;
		write_labels(&mut tx, id, &spec.labels).await?;
		tx.commit().await?;

		self.hub.publish(Table::Destinations, index);
		self
			.get_destination(id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("destination {id}")))
	}

	#[tracing::instrument(skip(self))]
	pub async fn soft_delete_destination(&self, id: Id) -> Result<()> {
		let now = db_time(&Utc::now());
		let mut tx = self.pool.begin().await?;
		let index = next_update_index(&mut tx, Table::Destinations).await?;
		let result = sqlx::query(
			"UPDATE destinations SET deleted_at = ?, updated_at = ?, update_index = ? WHERE id = ? AND deleted_at IS NULL",
		)
		.bind(&now)
		.bind(&now)
		.bind(index)
		.bind(id.to_string())
		.execute(&mut *tx)
		.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("destination {id}")));
		}
		tx.commit().await?;
		self.hub.publish(Table::Destinations, index);
		tracing::debug!(destination_id = %id, "destination soft-deleted");
		Ok(())
	}

	/// Heartbeat from a connector identified by its unique ID.
	#[tracing::instrument(skip(self))]
	pub async fn touch_last_seen(&self, unique_id: &str) -> Result<bool> {
		let result = sqlx::query(
			"UPDATE destinations SET last_seen_at = ? WHERE unique_id = ? AND deleted_at IS NULL",
		)
		.bind(db_time(&Utc::now()))
		.bind(unique_id)
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected() > 0)
	}

	/// Live destinations with no update or heartbeat since `cutoff`.
	#[tracing::instrument(skip(self))]
	pub async fn list_stale_destinations(&self, cutoff: DateTime<Utc>) -> Result<Vec<Destination>> {
		let all = self.list_destinations(&DestinationFilter::default()).await?;
		Ok(all.into_iter().filter(|d| d.last_activity() < cutoff).collect())
	}

	async fn parse_destination_row(&self, row: &SqliteRow) -> Result<Destination> {
		let id = parse_id(row.get("id"))?;
		let labels: Vec<String> = sqlx::query_scalar(
			"SELECT label FROM destination_labels WHERE destination_id = ? ORDER BY label",
		)
		.bind(id.to_string())
		.fetch_all(&self.pool)
		.await?;

		Ok(Destination {
			id,
			spec: DestinationSpec {
				name: row.get("name"),
				unique_id: row.get("unique_id"),
				kind: row.get("kind"),
				connection_url: row.get("connection_url"),
				connection_ca: row.get("connection_ca"),
				resources: serde_json::from_str(row.get("resources"))?,
				roles: serde_json::from_str(row.get("roles"))?,
				labels,
				version: row.get("version"),
			},
			last_seen_at: parse_opt_time(row.get("last_seen_at"))?,
			update_index: row.get("update_index"),
			created_at: parse_time(row.get("created_at"))?,
			updated_at: parse_time(row.get("updated_at"))?,
		})
	}
}

async fn write_labels(tx: &mut Transaction<'_, Sqlite>, id: Id, labels: &[String]) -> Result<()> {
	sqlx::query("DELETE FROM destination_labels WHERE destination_id = ?")
		.bind(id.to_string())
		.execute(&mut **tx)
		.await?;
	for label in labels {
		sqlx::query("INSERT OR IGNORE INTO destination_labels (destination_id, label) VALUES (?, ?)")
			.bind(id.to_string())
			.bind(label)
			.execute(&mut **tx)
			.await?;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_store;

	fn spec(name: &str, unique_id: &str) -> DestinationSpec {
		DestinationSpec {
			name: name.into(),
			unique_id: unique_id.into(),
			kind: "kubernetes".into(),
			connection_url: "10.0.0.5:6443".into(),
			connection_ca: "-----BEGIN CERTIFICATE-----".into(),
			resources: vec!["default".into(), "prod".into()],
			roles: vec!["edit".into(), "view".into()],
			labels: vec!["env=prod".into()],
			version: "0.1.0".into(),
		}
	}

	#[tokio::test]
	async fn create_then_find_by_unique_id() {
		let store = create_test_store().await;
		let created = store.destinations.create_destination(&spec("c1", "Z9")).await.unwrap();
		let found = store
			.destinations
			.list_destinations(&DestinationFilter {
				unique_id: Some("Z9".into()),
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].id, created.id);
		assert_eq!(found[0].spec, spec("c1", "Z9"));
	}

	#[tokio::test]
	async fn unique_id_is_unique_while_live() {
		let store = create_test_store().await;
		let first = store.destinations.create_destination(&spec("c1", "Z9")).await.unwrap();
		assert!(matches!(
			store.destinations.create_destination(&spec("c2", "Z9")).await,
			Err(DbError::Duplicate(_))
		));
		store.destinations.soft_delete_destination(first.id).await.unwrap();
		store.destinations.create_destination(&spec("c2", "Z9")).await.unwrap();
	}

	#[tokio::test]
	async fn update_bumps_index_only_on_change() {
		let store = create_test_store().await;
		let created = store.destinations.create_destination(&spec("c1", "Z9")).await.unwrap();
		let same = store
			.destinations
			.update_destination(created.id, &spec("c1", "Z9"))
			.await
			.unwrap();
		assert_eq!(same.update_index, created.update_index);

		let mut changed = spec("c1", "Z9");
		changed.roles.push("admin".into());
		let updated = store.destinations.update_destination(created.id, &changed).await.unwrap();
		assert!(updated.update_index > created.update_index);
		assert_eq!(updated.spec.roles.len(), 3);
	}

	#[tokio::test]
	async fn heartbeat_keeps_destination_fresh() {
		let store = create_test_store().await;
		store.destinations.create_destination(&spec("c1", "Z9")).await.unwrap();
		let future = Utc::now() + chrono::Duration::minutes(1);
		assert_eq!(store.destinations.list_stale_destinations(future).await.unwrap().len(), 1);
		assert!(store.destinations.touch_last_seen("Z9").await.unwrap());
		assert!(!store.destinations.touch_last_seen("nope").await.unwrap());
		let past = Utc::now() - chrono::Duration::minutes(1);
		assert!(store.destinations.list_stale_destinations(past).await.unwrap().is_empty());
	}
}
