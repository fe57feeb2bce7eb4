use serde::{Deserialize, Serialize};

use crate::{EventStoreError, Identity, LoadBound, Result, Timestamp, Version};

/// A batch of serialized events written to a stream in one operation.
///
/// The batch carries the aggregate type name, the version the stream moves
/// to, and the batch timestamp. Payloads are opaque to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    pub aggregate_type: String,
    pub version: Version,
    pub timestamp: Timestamp,
    pub events: Vec<Vec<u8>>,
}

impl EventBatch {
    /// Creates an empty batch stamped with the current time.
    pub fn new(aggregate_type: impl Into<String>, version: Version) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            version,
            timestamp: Timestamp::now(),
            events: Vec::new(),
        }
    }

    /// Overrides the batch timestamp.
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Appends one serialized event.
    pub fn event(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.events.push(payload.into());
        self
    }

    /// Appends serialized events in order.
    pub fn events<I, P>(mut self, payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        self.events.extend(payloads.into_iter().map(Into::into));
        self
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Stream header row: one per aggregate identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHeader {
    pub stream_id: Identity,
    pub aggregate_type: String,
    pub version: Version,
    pub timestamp: Timestamp,
    /// Sequence number the next appended event will receive.
    pub next_sequence: i64,
}

/// One persisted event row. Rows are never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub sequence: i64,
    /// Version of the batch this event was written in.
    pub version: Version,
    /// Timestamp of the batch this event was written in.
    pub timestamp: Timestamp,
    pub payload: Vec<u8>,
}

/// Result of a load: the stream type, the resolved version and timestamp,
/// and the selected events in append order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedStream {
    pub stream_id: Identity,
    pub aggregate_type: String,
    pub version: Version,
    pub timestamp: Timestamp,
    pub events: Vec<RecordedEvent>,
}

impl LoadedStream {
    /// Builds the load result from the header and the events admitted by
    /// `bound`. Resolved version/timestamp are those of the last admitted
    /// batch; no admitted events is an `EmptyResult`.
    pub(crate) fn assemble(
        header: &StreamHeader,
        events: Vec<RecordedEvent>,
        bound: LoadBound,
    ) -> Result<Self> {
        let Some(last) = events.last() else {
            return Err(EventStoreError::EmptyResult {
                stream_id: header.stream_id,
                bound,
            });
        };

        Ok(Self {
            stream_id: header.stream_id,
            aggregate_type: header.aggregate_type.clone(),
            version: last.version,
            timestamp: last.timestamp,
            events,
        })
    }

    /// Iterates the raw payloads in append order.
    pub fn payloads(&self) -> impl Iterator<Item = &[u8]> {
        self.events.iter().map(|e| e.payload.as_slice())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
