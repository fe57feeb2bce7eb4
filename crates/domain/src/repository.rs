//! Loading and committing aggregates against an event store.

use std::sync::Arc;

use common::{Identity, Timestamp, Version};
use event_store::{
    EventBatch, EventStore, EventStoreError, LoadBound, LoadedStream, RecordedEvent, SnapshotStore,
};
use tracing::{debug, info, warn};

use crate::aggregate::Aggregate;
use crate::codec::EventSerializer;
use crate::entity::{Entity, EntityFactory};
use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::processor::EventProcessorProvider;
use crate::session::Session;

/// Outcome of committing one aggregate.
#[derive(Debug, Clone)]
pub struct CommitReceipt {
    pub aggregate_id: Identity,
    /// The stream version the batch was written at.
    pub version: Version,
    /// The committed events, with their assigned ordinals.
    pub events: Vec<DomainEvent>,
}

/// Mediates between sessions and the event store.
///
/// `find` loads and replays streams into aggregates tracked by a session;
/// `commit_changes` writes every tracked aggregate's pending events with an
/// optimistic-concurrency check. Store errors are translated to
/// [`DomainError`] here.
pub struct Repository<S> {
    store: S,
    processors: Arc<EventProcessorProvider>,
    serializer: Arc<dyn EventSerializer>,
}

impl<S: EventStore> Repository<S> {
    pub fn new(
        store: S,
        processors: Arc<EventProcessorProvider>,
        serializer: Arc<dyn EventSerializer>,
    ) -> Self {
        Self {
            store,
            processors,
            serializer,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn processors(&self) -> &Arc<EventProcessorProvider> {
        &self.processors
    }

    /// Wraps a freshly constructed root in a new aggregate.
    pub fn create<T: Entity>(&self, root: T) -> Result<Aggregate, DomainError> {
        Aggregate::with_root(self.processors.clone(), root)
    }

    /// Tracks a new or modified aggregate in `session`.
    pub fn add(&self, session: &mut Session, aggregate: Aggregate) -> Result<Identity, DomainError> {
        session.add(aggregate)
    }

    /// Returns the aggregate rooted at `id`, loading it into the session on
    /// first access.
    #[tracing::instrument(skip(self, session), fields(aggregate_id = %id))]
    pub async fn find<'s, T: EntityFactory>(
        &self,
        session: &'s mut Session,
        id: Identity,
    ) -> Result<&'s mut Aggregate, DomainError> {
        if session.contains(id) {
            return self.tracked::<T>(session, id);
        }

        let aggregate = self.load::<T>(id, LoadBound::Latest).await?;
        session.track(aggregate)
    }

    /// Rebuilds the aggregate as it was at `bound`.
    ///
    /// The result is not tracked by any session; committing it would
    /// conflict with newer history.
    #[tracing::instrument(skip(self), fields(aggregate_id = %id))]
    pub async fn load_as_of<T: EntityFactory>(
        &self,
        id: Identity,
        bound: LoadBound,
    ) -> Result<Aggregate, DomainError> {
        self.load::<T>(id, bound).await
    }

    /// Writes every tracked aggregate with pending events, in the order they
    /// entered the session, then clears the session.
    ///
    /// Aggregates are committed independently. The first failure is
    /// returned at once; aggregates committed before it stay committed and
    /// the session is left as it is.
    #[tracing::instrument(skip_all, fields(tracked = session.len()))]
    pub async fn commit_changes(
        &self,
        session: &mut Session,
    ) -> Result<Vec<CommitReceipt>, DomainError> {
        let ids = session.ids().to_vec();
        let mut receipts = Vec::new();

        for id in ids {
            let Some(aggregate) = session.get_mut(id) else {
                continue;
            };
            if !aggregate.has_uncommitted_changes() {
                continue;
            }
            receipts.push(self.commit_aggregate(id, aggregate).await?);
        }

        session.clear();
        info!(committed = receipts.len(), "session committed");
        Ok(receipts)
    }

    async fn commit_aggregate(
        &self,
        id: Identity,
        aggregate: &mut Aggregate,
    ) -> Result<CommitReceipt, DomainError> {
        let current = aggregate.version();
        let next = current.next();

        let payloads = aggregate
            .uncommitted_changes()
            .iter()
            .map(|event| self.serializer.serialize(event))
            .collect::<Result<Vec<_>, _>>()?;
        // The stream's timestamp may be ahead of the local clock.
        let stamp = Timestamp::now().max(aggregate.timestamp());
        let batch = EventBatch::new(aggregate.aggregate_type()?, next)
            .at(stamp)
            .events(payloads);

        if current.is_initial() {
            self.store.create_stream(id, batch).await?;
        } else {
            self.store.store_events(id, current, batch).await?;
        }

        let events = aggregate.mark_changes_committed(next);
        aggregate.observe_timestamp(stamp);
        metrics::counter!("repository_commits_total").increment(1);
        debug!(aggregate_id = %id, version = %next, events = events.len(), "aggregate committed");

        Ok(CommitReceipt {
            aggregate_id: id,
            version: next,
            events,
        })
    }

    async fn load<T: EntityFactory>(
        &self,
        id: Identity,
        bound: LoadBound,
    ) -> Result<Aggregate, DomainError> {
        let expected = self.entity_type_of::<T>(id)?;
        let stream = self
            .store
            .load(id, bound)
            .await
            .map_err(|e| not_found(id, e))?;
        check_type(&stream, expected)?;

        let events = self.decode(&stream.events)?;
        let replayed = events.len();

        let mut aggregate = self.create(T::empty(id))?;
        aggregate.load_from_history(events, stream.version)?;
        aggregate.observe_timestamp(stream.timestamp);

        metrics::counter!("repository_aggregates_loaded_total").increment(1);
        metrics::histogram!("repository_replayed_events").record(replayed as f64);
        debug!(aggregate_id = %id, version = %stream.version, replayed, "aggregate loaded");
        Ok(aggregate)
    }

    fn decode<'a, I>(&self, events: I) -> Result<Vec<DomainEvent>, DomainError>
    where
        I: IntoIterator<Item = &'a RecordedEvent>,
    {
        events
            .into_iter()
            .map(|recorded| self.serializer.deserialize(&recorded.payload))
            .collect()
    }

    /// The aggregate already tracked for `id`, if its root is a `T`.
    fn tracked<'s, T: Entity>(
        &self,
        session: &'s mut Session,
        id: Identity,
    ) -> Result<&'s mut Aggregate, DomainError> {
        let expected = self.entity_type_of::<T>(id)?;
        let aggregate = session.get_mut(id).ok_or(DomainError::EntityNotFound(id))?;
        let found = aggregate.aggregate_type()?;
        if found != expected {
            return Err(DomainError::AggregateTypeMismatch {
                aggregate_id: id,
                expected,
                found: found.to_string(),
            });
        }
        Ok(aggregate)
    }

    fn entity_type_of<T: Entity>(&self, id: Identity) -> Result<&'static str, DomainError> {
        self.processors
            .for_type::<T>()
            .map(|processor| processor.entity_type())
            .ok_or(DomainError::ProcessorNotRegistered(id))
    }
}

impl<S: EventStore + SnapshotStore> Repository<S> {
    /// Stores a snapshot of a committed aggregate and returns its version.
    #[tracing::instrument(skip_all, fields(aggregate_id = ?aggregate.id()))]
    pub async fn save_snapshot(&self, aggregate: &Aggregate) -> Result<Version, DomainError> {
        let snapshot = aggregate.to_snapshot()?;
        let version = snapshot.version;
        SnapshotStore::save_snapshot(&self.store, snapshot).await?;
        debug!(version = %version, "snapshot saved");
        Ok(version)
    }

    /// Like [`find`](Self::find), but starts from the latest snapshot and
    /// replays only newer batches. Falls back to a full replay when there is
    /// no usable snapshot.
    #[tracing::instrument(skip(self, session), fields(aggregate_id = %id))]
    pub async fn find_from_snapshot<'s, T: EntityFactory>(
        &self,
        session: &'s mut Session,
        id: Identity,
    ) -> Result<&'s mut Aggregate, DomainError> {
        if session.contains(id) {
            return self.tracked::<T>(session, id);
        }

        let aggregate = match self.restore::<T>(id).await? {
            Some(aggregate) => aggregate,
            None => self.load::<T>(id, LoadBound::Latest).await?,
        };
        session.track(aggregate)
    }

    async fn restore<T: EntityFactory>(&self, id: Identity) -> Result<Option<Aggregate>, DomainError> {
        let Some(snapshot) = self.store.find_latest(id).await? else {
            return Ok(None);
        };

        let expected = self.entity_type_of::<T>(id)?;
        if snapshot.aggregate_type != expected {
            warn!(found = %snapshot.aggregate_type, expected, "snapshot type mismatch, replaying");
            return Ok(None);
        }

        let snapshot_version = snapshot.version;
        let mut aggregate = match Aggregate::from_snapshot(self.processors.clone(), snapshot) {
            Ok(aggregate) if aggregate.root::<T>().is_some() => aggregate,
            Ok(_) => {
                warn!("snapshot root has the wrong type, replaying");
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "snapshot unusable, replaying");
                return Ok(None);
            }
        };

        let stream = self
            .store
            .load(id, LoadBound::Latest)
            .await
            .map_err(|e| not_found(id, e))?;
        check_type(&stream, expected)?;
        if stream.version < snapshot_version {
            warn!(
                snapshot = %snapshot_version,
                stream = %stream.version,
                "snapshot is ahead of its stream, replaying"
            );
            return Ok(None);
        }

        let newer = self.decode(
            stream
                .events
                .iter()
                .filter(|recorded| recorded.version > snapshot_version),
        )?;
        let replayed = newer.len();
        aggregate.catch_up(newer, stream.version)?;
        aggregate.observe_timestamp(stream.timestamp);

        metrics::counter!("repository_aggregates_loaded_total").increment(1);
        metrics::histogram!("repository_replayed_events").record(replayed as f64);
        debug!(
            snapshot = %snapshot_version,
            version = %stream.version,
            replayed,
            "aggregate restored from snapshot"
        );
        Ok(Some(aggregate))
    }
}

fn not_found(id: Identity, error: EventStoreError) -> DomainError {
    if error.is_empty_result() {
        DomainError::EntityNotFound(id)
    } else {
        error.into()
    }
}

fn check_type(stream: &LoadedStream, expected: &'static str) -> Result<(), DomainError> {
    if stream.aggregate_type == expected {
        Ok(())
    } else {
        Err(DomainError::AggregateTypeMismatch {
            aggregate_id: stream.stream_id,
            expected,
            found: stream.aggregate_type.clone(),
        })
    }
}
