//! Append-only, per-stream event storage.
//!
//! A stream is created once with an initial batch and afterwards only
//! appended to. Every append names the version the writer expects the
//! stream to be at; the backends turn that expectation into a single
//! conditional write so racing writers are serialized without locks.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod snapshot;
pub mod store;

pub use common::{Identity, Timestamp, Version};
pub use error::{EventStoreError, Result};
pub use event::{EventBatch, LoadedStream, RecordedEvent, StreamHeader};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use query::LoadBound;
pub use snapshot::{Snapshot, SnapshotStore};
pub use store::{EventStore, EventStoreExt};
