use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    EventBatch, EventStoreError, Identity, LoadBound, LoadedStream, RecordedEvent, Result,
    Snapshot, SnapshotStore, StreamHeader, Version,
    store::{EventStore, check_append, validate_batch},
};

#[derive(Debug, Clone)]
struct StreamRecord {
    header: StreamHeader,
    events: Vec<RecordedEvent>,
}

impl StreamRecord {
    fn push_batch(&mut self, batch: EventBatch) {
        for payload in batch.events {
            self.events.push(RecordedEvent {
                sequence: self.header.next_sequence,
                version: batch.version,
                timestamp: batch.timestamp,
                payload,
            });
            self.header.next_sequence += 1;
        }
        self.header.version = batch.version;
        self.header.timestamp = batch.timestamp;
    }
}

/// In-memory event store implementation for testing.
///
/// This implementation keeps all streams in memory and provides the same
/// contract as the PostgreSQL implementation. The write lock plays the role
/// of the conditional row update: expectation check and append happen
/// under one acquisition.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<Identity, StreamRecord>>>,
    snapshots: Arc<RwLock<HashMap<Identity, Snapshot>>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored across all streams.
    pub async fn event_count(&self) -> usize {
        self.streams
            .read()
            .await
            .values()
            .map(|s| s.events.len())
            .sum()
    }

    /// Returns the number of streams.
    pub async fn stream_count(&self) -> usize {
        self.streams.read().await.len()
    }

    /// Clears all streams and snapshots.
    pub async fn clear(&self) {
        self.streams.write().await.clear();
        self.snapshots.write().await.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self, batch), fields(version = %batch.version, events = batch.len()))]
    async fn create_stream(&self, stream_id: Identity, batch: EventBatch) -> Result<()> {
        validate_batch(stream_id, &batch)?;

        let mut streams = self.streams.write().await;
        if streams.contains_key(&stream_id) {
            return Err(EventStoreError::StreamAlreadyExists(stream_id));
        }

        let appended = batch.len() as u64;
        let mut record = StreamRecord {
            header: StreamHeader {
                stream_id,
                aggregate_type: batch.aggregate_type.clone(),
                version: batch.version,
                timestamp: batch.timestamp,
                next_sequence: 0,
            },
            events: Vec::with_capacity(batch.len()),
        };
        record.push_batch(batch);
        streams.insert(stream_id, record);

        metrics::counter!("event_store_streams_created_total").increment(1);
        metrics::counter!("event_store_events_appended_total").increment(appended);
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

        let mut streams = self.streams.write().await;
        let record = streams
            .get_mut(&stream_id)
            .ok_or(EventStoreError::EmptyResult {
                stream_id,
                bound: LoadBound::Latest,
            })?;

        if let Err(e) = check_append(&record.header, expected_version, &batch) {
            if e.is_conflict() {
                metrics::counter!("event_store_conflicts_total").increment(1);
                tracing::warn!(%stream_id, %expected_version, actual = %record.header.version, "append rejected");
            }
            return Err(e);
        }

        let appended = batch.len() as u64;
        record.push_batch(batch);

        metrics::counter!("event_store_events_appended_total").increment(appended);
        tracing::debug!(%stream_id, version = %record.header.version, "batch appended");
        Ok(())
    }

    async fn load(&self, stream_id: Identity, bound: LoadBound) -> Result<LoadedStream> {
        let streams = self.streams.read().await;
        let record = streams
            .get(&stream_id)
            .ok_or(EventStoreError::EmptyResult { stream_id, bound })?;

        bound.check_header(&record.header)?;

        let events: Vec<_> = record
            .events
            .iter()
            .filter(|e| bound.admits(e))
            .cloned()
            .collect();

        LoadedStream::assemble(&record.header, events, bound)
    }

    async fn stream_header(&self, stream_id: Identity) -> Result<Option<StreamHeader>> {
        let streams = self.streams.read().await;
        Ok(streams.get(&stream_id).map(|s| s.header.clone()))
    }
}

#[async_trait]
impl SnapshotStore for InMemoryEventStore {
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.aggregate_id, snapshot);
        Ok(())
    }

    async fn find_latest(&self, aggregate_id: Identity) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(&aggregate_id).cloned())
    }
}
