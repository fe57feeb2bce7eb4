use async_trait::async_trait;

use crate::{
    EventBatch, EventStoreError, Identity, LoadBound, LoadedStream, Result, StreamHeader,
    Timestamp, Version,
};

/// Core trait for event store implementations.
///
/// All implementations must be thread-safe (Send + Sync). Writes are the
/// only operations with side effects; a write that returns an error has not
/// persisted anything.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Creates a stream with its initial batch (sequences `0..n`).
    ///
    /// Fails with `StreamAlreadyExists` if the identity is taken.
    async fn create_stream(&self, stream_id: Identity, batch: EventBatch) -> Result<()>;

    /// Appends a batch to an existing stream.
    ///
    /// Fails with `ConcurrencyConflict` unless the stream is at
    /// `expected_version` (`Version::LATEST` accepts any current version),
    /// and with `InvalidArgument` if the batch version or timestamp is
    /// lower than the stream's. The expectation is enforced by a single
    /// conditional write, so of several writers racing from the same
    /// version exactly one succeeds.
    async fn store_events(
        &self,
        stream_id: Identity,
        expected_version: Version,
        batch: EventBatch,
    ) -> Result<()>;

    /// Loads the events selected by `bound`.
    ///
    /// Fails with `EmptyResult` if the stream is absent or the bound
    /// selects no batch.
    async fn load(&self, stream_id: Identity, bound: LoadBound) -> Result<LoadedStream>;

    /// Returns the stream header, or None if the stream doesn't exist.
    async fn stream_header(&self, stream_id: Identity) -> Result<Option<StreamHeader>>;
}

/// Extension trait providing the named load operations.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Loads the whole stream.
    async fn load_latest(&self, stream_id: Identity) -> Result<LoadedStream> {
        self.load(stream_id, LoadBound::Latest).await
    }

    /// Loads the whole stream, failing with `ConcurrencyConflict` if it
    /// is not at `expected_version`.
    async fn load_at_expected_version(
        &self,
        stream_id: Identity,
        expected_version: Version,
    ) -> Result<LoadedStream> {
        self.load(stream_id, LoadBound::ExpectedVersion(expected_version))
            .await
    }

    /// Loads batches with version `<= version`.
    async fn load_up_to_version(
        &self,
        stream_id: Identity,
        version: Version,
    ) -> Result<LoadedStream> {
        self.load(stream_id, LoadBound::UpToVersion(version)).await
    }

    /// Loads batches with timestamp `<= timestamp`.
    async fn load_up_to_timestamp(
        &self,
        stream_id: Identity,
        timestamp: Timestamp,
    ) -> Result<LoadedStream> {
        self.load(stream_id, LoadBound::UpToTimestamp(timestamp))
            .await
    }

    /// Checks if a stream has been created.
    async fn stream_exists(&self, stream_id: Identity) -> Result<bool> {
        Ok(self.stream_header(stream_id).await?.is_some())
    }

    /// Returns the current version of a stream, if it exists.
    async fn stream_version(&self, stream_id: Identity) -> Result<Option<Version>> {
        Ok(self.stream_header(stream_id).await?.map(|h| h.version))
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Validates a batch before any write.
pub(crate) fn validate_batch(stream_id: Identity, batch: &EventBatch) -> Result<()> {
    if batch.is_empty() {
        return Err(EventStoreError::invalid(
            stream_id,
            "cannot write an empty event batch",
        ));
    }
    if !batch.version.is_concrete() {
        return Err(EventStoreError::invalid(
            stream_id,
            format!("batch version {} is not a concrete version", batch.version),
        ));
    }
    Ok(())
}

/// Checks an append against the current header: the expected version must
/// match (unless `LATEST`), and neither version nor timestamp may move
/// backwards.
pub(crate) fn check_append(
    header: &StreamHeader,
    expected_version: Version,
    batch: &EventBatch,
) -> Result<()> {
    if !expected_version.is_latest() && header.version != expected_version {
        return Err(EventStoreError::ConcurrencyConflict {
            stream_id: header.stream_id,
            expected: expected_version,
            actual: header.version,
        });
    }
    if batch.version < header.version {
        return Err(EventStoreError::invalid(
            header.stream_id,
            format!(
                "version would move backwards from {} to {}",
                header.version, batch.version
            ),
        ));
    }
    if batch.timestamp < header.timestamp {
        return Err(EventStoreError::invalid(
            header.stream_id,
            format!(
                "timestamp would move backwards from {} to {}",
                header.timestamp, batch.timestamp
            ),
        ));
    }
    Ok(())
}
