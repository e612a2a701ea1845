//! A `sqlx` implementation of the `eventvault` store traits.
//!
//! This module provides `sqlx`-based implementations of the `EventStore` and
//! `SnapshotStore` traits, designed for PostgreSQL. Compile it with the
//! `postgres-storage` cargo feature.
#![allow(clippy::missing_errors_doc)]

use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use crate::{
    Aggregate, Error, EventStore, Result, StoredEvent,
    snapshot::{Snapshot, SnapshotStore},
    store::validate_batch,
};

/// Maps `sqlx::Error` into this crate's `Error`.
fn to_store_error(e: sqlx::Error) -> Error {
    Error::Store(e.to_string())
}

type EventRow = (String, String, i16, i64, DateTime<Utc>, Vec<u8>);

fn from_row(aggregate_id: &str, row: EventRow) -> StoredEvent {
    let (aggregate_type, event_type, event_version, version, timestamp, payload) = row;
    StoredEvent::new(
        aggregate_id.to_string(),
        aggregate_type,
        event_type,
        event_version as u16,
        version,
        timestamp,
        payload,
    )
}

/// A `sqlx`-backed event store for PostgreSQL.
#[derive(Debug, Clone)]
pub struct SqlxEventStore<A: Aggregate> {
    pool: PgPool,
    _phantom: PhantomData<A>,
}

impl<A: Aggregate> SqlxEventStore<A> {
    /// Creates a new `SqlxEventStore`.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _phantom: PhantomData,
        }
    }

    /// Ensures the `events` table exists.
    ///
    /// The primary key on `(aggregate_id, version)` is what makes two
    /// racing appends with the same expected version collide.
    #[instrument(skip(self))]
    pub async fn setup(&self) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS events (
                    aggregate_id TEXT NOT NULL,
                    aggregate_type TEXT NOT NULL,
                    event_type TEXT NOT NULL,
                    event_version SMALLINT NOT NULL,
                    version BIGINT NOT NULL,
                    occurred_at TIMESTAMPTZ NOT NULL,
                    payload BYTEA NOT NULL,
                    PRIMARY KEY (aggregate_id, version)
                );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<A> EventStore<A> for SqlxEventStore<A>
where
    A: Aggregate,
{
    #[instrument(skip(self), fields(id = %id))]
    async fn current_version(&self, id: &A::Id) -> Result<i64> {
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM events WHERE aggregate_id = $1")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(to_store_error)
    }

    #[instrument(skip(self, events), fields(id = %id))]
    async fn append(
        &self,
        id: &A::Id,
        expected_version: i64,
        events: Vec<StoredEvent>,
        final_version: i64,
    ) -> Result<()> {
        let aggregate_id = id.to_string();
        validate_batch(&aggregate_id, expected_version, &events, final_version)?;

        let conflict = |actual: i64| Error::ConcurrencyConflict {
            id: aggregate_id.clone(),
            expected: expected_version,
            actual,
        };

        let mut tx = self.pool.begin().await.map_err(to_store_error)?;

        // Optimistic concurrency check.
        let current_version: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM events WHERE aggregate_id = $1",
        )
        .bind(&aggregate_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(to_store_error)?;

        if current_version != expected_version {
            return Err(conflict(current_version));
        }
        if events.is_empty() {
            return Ok(());
        }

        let aggregate_types: Vec<&str> = events.iter().map(StoredEvent::aggregate_type).collect();
        let event_types: Vec<&str> = events.iter().map(StoredEvent::event_type).collect();
        let event_versions: Vec<i16> = events.iter().map(|e| e.event_version() as i16).collect();
        let versions: Vec<i64> = events.iter().map(StoredEvent::version).collect();
        let timestamps: Vec<DateTime<Utc>> = events.iter().map(StoredEvent::timestamp).collect();
        let payloads: Vec<Vec<u8>> = events.iter().map(|e| e.payload().to_vec()).collect();

        // Bulk insert. A concurrent writer that passed the same check makes
        // one of the two inserts violate the primary key.
        let inserted = sqlx::query(
            r#"
            INSERT INTO events (aggregate_id, aggregate_type, event_type, event_version, version, occurred_at, payload)
            SELECT $1, at, et, ev, v, ts, p
            FROM UNNEST($2::TEXT[], $3::TEXT[], $4::SMALLINT[], $5::BIGINT[], $6::TIMESTAMPTZ[], $7::BYTEA[])
                AS x(at, et, ev, v, ts, p)
            "#,
        )
        .bind(&aggregate_id)
        .bind(&aggregate_types)
        .bind(&event_types)
        .bind(&event_versions)
        .bind(&versions)
        .bind(&timestamps)
        .bind(&payloads)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(conflict(expected_version + 1));
            }
            Err(e) => return Err(to_store_error(e)),
        }

        tx.commit().await.map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => conflict(expected_version + 1),
            e => to_store_error(e),
        })
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn load_since(&self, id: &A::Id, since_version: i64) -> Result<Vec<StoredEvent>> {
        let aggregate_id = id.to_string();
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT aggregate_type, event_type, event_version, version, occurred_at, payload \
             FROM events WHERE aggregate_id = $1 AND version > $2 ORDER BY version",
        )
        .bind(&aggregate_id)
        .bind(since_version)
        .fetch_all(&self.pool)
        .await
        .map_err(to_store_error)?;

        Ok(rows
            .into_iter()
            .map(|row| from_row(&aggregate_id, row))
            .collect())
    }

    #[instrument(skip(self), fields(id = %id))]
    async fn remove(&self, id: &A::Id) -> Result<()> {
        sqlx::query("DELETE FROM events WHERE aggregate_id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }
}

/// A `sqlx`-backed snapshot store for PostgreSQL.
#[derive(Debug, Clone)]
pub struct SqlxSnapshotStore<A: Aggregate> {
    pool: PgPool,
    _phantom: PhantomData<A>,
}

impl<A: Aggregate> SqlxSnapshotStore<A> {
    /// Creates a new `SqlxSnapshotStore`.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _phantom: PhantomData,
        }
    }

    /// Ensures the `snapshots` table exists.
    #[instrument(skip(self))]
    pub async fn setup(&self) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                CREATE TABLE IF NOT EXISTS snapshots (
                    aggregate_id TEXT PRIMARY KEY,
                    version BIGINT NOT NULL,
                    taken_at TIMESTAMPTZ NOT NULL,
                    memento BYTEA NOT NULL
                );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<A> SnapshotStore<A> for SqlxSnapshotStore<A>
where
    A: Aggregate,
{
    #[instrument(skip(self), fields(id = %aggregate_id))]
    async fn find_latest(&self, aggregate_id: &A::Id) -> Result<Option<Snapshot>> {
        let aggregate_id = aggregate_id.to_string();
        let row: Option<(i64, DateTime<Utc>, Vec<u8>)> = sqlx::query_as(
            "SELECT version, taken_at, memento FROM snapshots WHERE aggregate_id = $1",
        )
        .bind(&aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(to_store_error)?;

        Ok(row.map(|(version, taken_at, memento)| {
            Snapshot::new(aggregate_id, version, taken_at, memento)
        }))
    }

    #[instrument(skip(self, snapshot), fields(id = snapshot.aggregate_id(), version = snapshot.version()))]
    async fn store(&self, snapshot: Snapshot) -> Result<()> {
        // The conditional upsert compares and writes in one statement.
        let written = sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, version, taken_at, memento)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (aggregate_id) DO UPDATE
            SET version = EXCLUDED.version,
                taken_at = EXCLUDED.taken_at,
                memento = EXCLUDED.memento
            WHERE snapshots.version < EXCLUDED.version;
            "#,
        )
        .bind(snapshot.aggregate_id())
        .bind(snapshot.version())
        .bind(snapshot.timestamp())
        .bind(snapshot.memento())
        .execute(&self.pool)
        .await
        .map_err(to_store_error)?;

        if written.rows_affected() == 0 {
            let actual: i64 =
                sqlx::query_scalar("SELECT version FROM snapshots WHERE aggregate_id = $1")
                    .bind(snapshot.aggregate_id())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(to_store_error)?;
            return Err(Error::ConcurrencyConflict {
                id: snapshot.aggregate_id().to_string(),
                expected: snapshot.version(),
                actual,
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(id = %aggregate_id))]
    async fn remove(&self, aggregate_id: &A::Id) -> Result<()> {
        sqlx::query("DELETE FROM snapshots WHERE aggregate_id = $1")
            .bind(aggregate_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(to_store_error)?;
        Ok(())
    }
}
