use thiserror::Error;

use crate::{Identity, LoadBound, Version};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// A stream for this identity has already been created.
    #[error("Stream already exists: {0}")]
    StreamAlreadyExists(Identity),

    /// The stream does not exist, or no batch satisfies the requested bound.
    #[error("No events for stream {stream_id} ({bound})")]
    EmptyResult { stream_id: Identity, bound: LoadBound },

    /// The stream is not at the version the caller expected.
    #[error(
        "Concurrency conflict for stream {stream_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        stream_id: Identity,
        expected: Version,
        actual: Version,
    },

    /// The batch is malformed or would move version/timestamp backwards.
    #[error("Invalid argument for stream {stream_id}: {message}")]
    InvalidArgument { stream_id: Identity, message: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }

    pub fn is_empty_result(&self) -> bool {
        matches!(self, EventStoreError::EmptyResult { .. })
    }

    pub(crate) fn invalid(stream_id: Identity, message: impl Into<String>) -> Self {
        EventStoreError::InvalidArgument {
            stream_id,
            message: message.into(),
        }
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
