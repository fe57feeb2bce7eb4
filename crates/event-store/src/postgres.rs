use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgPoolOptions, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EventBatch, EventStoreError, Identity, LoadBound, LoadedStream, RecordedEvent, Result,
    Snapshot, SnapshotStore, StreamHeader, Timestamp, Version,
    store::{EventStore, check_append, validate_batch},
};

/// PostgreSQL-backed event store implementation.
///
/// Layout: one `streams` header row per identity and append-only `events`
/// rows keyed by `(stream_id, sequence)`. Appends are guarded by a
/// conditional `UPDATE` of the header row whose affected-row count decides
/// the winner among concurrent writers.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a new pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_header(row: PgRow) -> Result<StreamHeader> {
        Ok(StreamHeader {
            stream_id: Identity::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            timestamp: Timestamp::from_millis(row.try_get("timestamp")?),
            next_sequence: row.try_get("next_sequence")?,
        })
    }

    fn row_to_event(row: PgRow) -> Result<RecordedEvent> {
        Ok(RecordedEvent {
            sequence: row.try_get("sequence")?,
            version: Version::new(row.try_get("version")?),
            timestamp: Timestamp::from_millis(row.try_get("timestamp")?),
            payload: row.try_get("payload")?,
        })
    }

    async fn fetch_header<'e, E>(executor: E, stream_id: Identity) -> Result<Option<StreamHeader>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query(
            r#"
            SELECT id, aggregate_type, version, timestamp, next_sequence
            FROM streams
            WHERE id = $1
            "#,
        )
        .bind(stream_id.as_uuid())
        .fetch_optional(executor)
        .await?;

        row.map(Self::row_to_header).transpose()
    }

    async fn insert_events(
        tx: &mut Transaction<'_, Postgres>,
        stream_id: Identity,
        first_sequence: i64,
        batch: &EventBatch,
    ) -> Result<()> {
        for (offset, payload) in batch.events.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO events (stream_id, sequence, version, timestamp, payload)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(stream_id.as_uuid())
            .bind(first_sequence + offset as i64)
            .bind(batch.version.as_i64())
            .bind(batch.timestamp.as_millis())
            .bind(payload.as_slice())
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, batch), fields(version = %batch.version, events = batch.len()))]
    async fn create_stream(&self, stream_id: Identity, batch: EventBatch) -> Result<()> {
        validate_batch(stream_id, &batch)?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO streams (id, aggregate_type, version, timestamp, next_sequence)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(stream_id.as_uuid())
        .bind(&batch.aggregate_type)
        .bind(batch.version.as_i64())
        .bind(batch.timestamp.as_millis())
        .bind(batch.len() as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(EventStoreError::StreamAlreadyExists(stream_id));
        }

        Self::insert_events(&mut tx, stream_id, 0, &batch).await?;
        tx.commit().await?;

        metrics::counter!("event_store_streams_created_total").increment(1);
        metrics::counter!("event_store_events_appended_total").increment(batch.len() as u64);
        tracing::debug!(%stream_id, "stream created");
        Ok(())
    }

    #[tracing::instrument(skip(self, batch), fields(version = %batch.version, events = batch.len()))]
    async fn store_events(
        &self,
        stream_id: Identity,
        expected_version: Version,
        batch: EventBatch,
    ) -> Result<()> {
        validate_batch(stream_id, &batch)?;

        let current = Self::fetch_header(&self.pool, stream_id)
            .await?
            .ok_or(EventStoreError::EmptyResult {
                stream_id,
                bound: LoadBound::Latest,
            })?;

        if let Err(e) = check_append(&current, expected_version, &batch) {
            if e.is_conflict() {
                metrics::counter!("event_store_conflicts_total").increment(1);
                tracing::warn!(%stream_id, %expected_version, actual = %current.version, "append rejected");
            }
            return Err(e);
        }

        let mut tx = self.pool.begin().await?;

        // Compare-and-swap on the header row. A writer that lost the race
        // matches zero rows once the winner has committed.
        let updated = sqlx::query(
            r#"
            UPDATE streams
            SET version = $1, timestamp = $2, next_sequence = $3
            WHERE id = $4 AND version = $5 AND next_sequence = $6
            "#,
        )
        .bind(batch.version.as_i64())
        .bind(batch.timestamp.as_millis())
        .bind(current.next_sequence + batch.len() as i64)
        .bind(stream_id.as_uuid())
        .bind(current.version.as_i64())
        .bind(current.next_sequence)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated != 1 {
            tx.rollback().await?;
            let actual = Self::fetch_header(&self.pool, stream_id)
                .await?
                .map(|h| h.version)
                .unwrap_or(current.version);
            metrics::counter!("event_store_conflicts_total").increment(1);
            tracing::warn!(%stream_id, expected = %current.version, %actual, "lost append race");
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id,
                expected: if expected_version.is_latest() {
                    current.version
                } else {
                    expected_version
                },
                actual,
            });
        }

        Self::insert_events(&mut tx, stream_id, current.next_sequence, &batch).await?;
        tx.commit().await?;

        metrics::counter!("event_store_events_appended_total").increment(batch.len() as u64);
        tracing::debug!(%stream_id, version = %batch.version, "batch appended");
        Ok(())
    }

    async fn load(&self, stream_id: Identity, bound: LoadBound) -> Result<LoadedStream> {
        let header = Self::fetch_header(&self.pool, stream_id)
            .await?
            .ok_or(EventStoreError::EmptyResult { stream_id, bound })?;

        bound.check_header(&header)?;

        // Read only rows that existed when the header was read, so a
        // concurrent append cannot make the result disagree with it.
        let rows = sqlx::query(
            r#"
            SELECT sequence, version, timestamp, payload
            FROM events
            WHERE stream_id = $1 AND sequence < $2 AND version <= $3 AND timestamp <= $4
            ORDER BY sequence ASC
            "#,
        )
        .bind(stream_id.as_uuid())
        .bind(header.next_sequence)
        .bind(bound.max_version().as_i64())
        .bind(bound.max_timestamp().as_millis())
        .fetch_all(&self.pool)
        .await?;

        let events = rows
            .into_iter()
            .map(Self::row_to_event)
            .collect::<Result<Vec<_>>>()?;

        LoadedStream::assemble(&header, events, bound)
    }

    async fn stream_header(&self, stream_id: Identity) -> Result<Option<StreamHeader>> {
        Self::fetch_header(&self.pool, stream_id).await
    }
}

#[async_trait]
impl SnapshotStore for PostgresEventStore {
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (aggregate_id, aggregate_type, version, timestamp, state)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (aggregate_id) DO UPDATE SET
                aggregate_type = EXCLUDED.aggregate_type,
                version = EXCLUDED.version,
                timestamp = EXCLUDED.timestamp,
                state = EXCLUDED.state
            "#,
        )
        .bind(snapshot.aggregate_id.as_uuid())
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version.as_i64())
        .bind(snapshot.timestamp.as_millis())
        .bind(&snapshot.state)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_latest(&self, aggregate_id: Identity) -> Result<Option<Snapshot>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT aggregate_id, aggregate_type, version, timestamp, state
            FROM snapshots
            WHERE aggregate_id = $1
            "#,
        )
        .bind(aggregate_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(Snapshot {
                aggregate_id: Identity::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
                aggregate_type: row.try_get("aggregate_type")?,
                version: Version::new(row.try_get("version")?),
                timestamp: Timestamp::from_millis(row.try_get("timestamp")?),
                state: row.try_get("state")?,
            })),
            None => Ok(None),
        }
    }
}
