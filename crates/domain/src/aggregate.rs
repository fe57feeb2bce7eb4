//! The aggregate: one root entity plus the child entities it owns.
//!
//! Entities live in a single map keyed by identity and the root is referenced
//! by its key. All mutation goes through [`Invoker::apply`] (new facts) or
//! [`Aggregate::load_from_history`] (replay), both of which dispatch through
//! the shared [`EventProcessorProvider`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::{Identity, Timestamp, Version};
use event_store::Snapshot;
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, downcast_ref};
use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::processor::EventProcessorProvider;

/// Lifecycle position of an aggregate instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateState {
    /// No root registered.
    Empty,
    /// Root registered, nothing applied or loaded.
    Fresh,
    /// Has uncommitted events.
    Dirty,
    /// Reflects persisted history with nothing pending.
    Loaded,
}

#[derive(Debug)]
pub struct Aggregate {
    processors: Arc<EventProcessorProvider>,
    root: Option<Identity>,
    entities: HashMap<Identity, Box<dyn Entity>>,
    version: Version,
    event_ordinal: i64,
    /// Ordinal of the newest persisted event, carried into snapshots.
    committed_ordinal: i64,
    /// Timestamp of the newest persisted batch.
    timestamp: Timestamp,
    uncommitted: Vec<DomainEvent>,
    loaded: bool,
}

impl Aggregate {
    /// Creates an empty aggregate, ready for a root.
    pub fn new(processors: Arc<EventProcessorProvider>) -> Self {
        Self {
            processors,
            root: None,
            entities: HashMap::new(),
            version: Version::INITIAL,
            event_ordinal: 0,
            committed_ordinal: 0,
            timestamp: Timestamp::default(),
            uncommitted: Vec::new(),
            loaded: false,
        }
    }

    /// Creates an aggregate around a freshly constructed root.
    pub fn with_root<T: Entity>(
        processors: Arc<EventProcessorProvider>,
        root: T,
    ) -> Result<Self, DomainError> {
        let mut aggregate = Self::new(processors);
        aggregate.register_root(root)?;
        Ok(aggregate)
    }

    /// Sets the root entity. The root's type must have a registered
    /// processor; its name becomes the aggregate type.
    pub fn register_root<T: Entity>(&mut self, root: T) -> Result<(), DomainError> {
        if let Some(existing) = self.root {
            return Err(DomainError::RootAlreadyRegistered(existing));
        }
        self.processors.get(&root)?;

        let id = root.id();
        self.insert_entity(Box::new(root))?;
        self.root = Some(id);
        Ok(())
    }

    /// Adds a child entity so it can receive events.
    pub fn register<T: Entity>(&mut self, entity: T) -> Result<(), DomainError> {
        self.insert_entity(Box::new(entity))
    }

    /// Returns an invoker bound to the registered entity `id`.
    pub fn invoker(&mut self, id: Identity) -> Result<Invoker<'_>, DomainError> {
        if !self.entities.contains_key(&id) {
            return Err(DomainError::EntityNotRegistered(id));
        }
        Ok(Invoker {
            aggregate: self,
            entity_id: id,
        })
    }

    /// Applies a new event to the entity it names.
    pub fn apply(&mut self, event: DomainEvent) -> Result<i64, DomainError> {
        self.invoker(event.entity_id())?.apply(event)
    }

    /// Replays persisted events in order without recording them as changes.
    ///
    /// Only a fresh aggregate accepts history. Ordinals are taken as given.
    /// Afterwards the event ordinal is that of the last event and the
    /// version is `version`.
    pub fn load_from_history<I>(&mut self, events: I, version: Version) -> Result<(), DomainError>
    where
        I: IntoIterator<Item = DomainEvent>,
    {
        let root = self.root.ok_or(DomainError::MissingRoot)?;
        if self.state() != AggregateState::Fresh {
            return Err(DomainError::AlreadyLoaded(root));
        }
        self.replay(events, version)
    }

    /// Replays batches persisted after the snapshot this aggregate was
    /// restored from.
    pub(crate) fn catch_up<I>(&mut self, events: I, version: Version) -> Result<(), DomainError>
    where
        I: IntoIterator<Item = DomainEvent>,
    {
        let root = self.root.ok_or(DomainError::MissingRoot)?;
        if self.state() != AggregateState::Loaded {
            return Err(DomainError::IllegalArgument(format!(
                "aggregate {root} must be restored and unmodified to catch up"
            )));
        }
        if version < self.version {
            return Err(DomainError::IllegalArgument(format!(
                "aggregate {root} is at {}, cannot catch up to {version}",
                self.version
            )));
        }
        self.replay(events, version)
    }

    fn replay<I>(&mut self, events: I, version: Version) -> Result<(), DomainError>
    where
        I: IntoIterator<Item = DomainEvent>,
    {
        let mut last_ordinal = None;
        for event in events {
            self.dispatch(&event)?;
            last_ordinal = Some(event.ordinal());
        }

        if let Some(ordinal) = last_ordinal {
            self.event_ordinal = ordinal;
            self.committed_ordinal = ordinal;
        }
        self.version = version;
        self.loaded = true;
        Ok(())
    }

    /// Records a successful commit at `version` and returns the events that
    /// were committed.
    pub fn mark_changes_committed(&mut self, version: Version) -> Vec<DomainEvent> {
        if let Some(last) = self.uncommitted.last() {
            self.committed_ordinal = last.ordinal();
        }
        self.version = version;
        self.event_ordinal = 0;
        self.loaded = true;
        std::mem::take(&mut self.uncommitted)
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    pub fn uncommitted_changes(&self) -> &[DomainEvent] {
        &self.uncommitted
    }

    pub fn state(&self) -> AggregateState {
        if self.root.is_none() {
            AggregateState::Empty
        } else if self.has_uncommitted_changes() {
            AggregateState::Dirty
        } else if self.loaded {
            AggregateState::Loaded
        } else {
            AggregateState::Fresh
        }
    }

    /// The root identity, which is also the stream identity.
    pub fn id(&self) -> Option<Identity> {
        self.root
    }

    /// The registered type name of the root entity.
    pub fn aggregate_type(&self) -> Result<&'static str, DomainError> {
        let root = self
            .root
            .and_then(|id| self.entities.get(&id))
            .ok_or(DomainError::MissingRoot)?;
        Ok(self.processors.get(root.as_ref())?.entity_type())
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn event_ordinal(&self) -> i64 {
        self.event_ordinal
    }

    /// Timestamp of the newest batch known to be persisted. The next batch
    /// must not be stamped earlier.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub(crate) fn observe_timestamp(&mut self, timestamp: Timestamp) {
        self.timestamp = self.timestamp.max(timestamp);
    }

    pub fn processors(&self) -> &Arc<EventProcessorProvider> {
        &self.processors
    }

    /// The root entity, if it is a `T`.
    pub fn root<T: Entity>(&self) -> Option<&T> {
        self.root.and_then(|id| self.entity::<T>(id))
    }

    /// A member entity, if it exists and is a `T`.
    pub fn entity<T: Entity>(&self, id: Identity) -> Option<&T> {
        self.entities
            .get(&id)
            .and_then(|entity| downcast_ref::<T>(entity.as_ref()))
    }

    /// All members of type `T`, in no particular order.
    pub fn entities_of<T: Entity>(&self) -> impl Iterator<Item = &T> {
        self.entities
            .values()
            .filter_map(|entity| downcast_ref::<T>(entity.as_ref()))
    }

    pub fn contains(&self, id: Identity) -> bool {
        self.entities.contains_key(&id)
    }

    /// Number of member entities, root included.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Captures the aggregate as a snapshot at its current version.
    ///
    /// Only committed state can be captured, and every member's type must
    /// have been registered with snapshot support.
    pub fn to_snapshot(&self) -> Result<Snapshot, DomainError> {
        let root = self.root.ok_or(DomainError::MissingRoot)?;
        if self.has_uncommitted_changes() {
            return Err(DomainError::IllegalArgument(format!(
                "aggregate {root} has uncommitted changes"
            )));
        }
        if !self.version.is_concrete() || self.version.is_initial() {
            return Err(DomainError::IllegalArgument(format!(
                "aggregate {root} has never been persisted"
            )));
        }

        let mut ids: Vec<_> = self.entities.keys().copied().collect();
        ids.sort_unstable();

        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(entity) = self.entities.get(&id) else {
                continue;
            };
            let processor = self.processors.get(entity.as_ref())?;
            entities.push(EntityImage {
                entity_type: processor.entity_type().to_string(),
                state: processor.encode(entity.as_ref())?,
            });
        }

        let image = AggregateImage {
            root,
            event_ordinal: self.committed_ordinal,
            entities,
        };
        Ok(Snapshot::from_state(
            root,
            self.aggregate_type()?,
            self.version,
            &image,
        )?)
    }

    /// Rebuilds a loaded aggregate from a snapshot.
    pub fn from_snapshot(
        processors: Arc<EventProcessorProvider>,
        snapshot: Snapshot,
    ) -> Result<Self, DomainError> {
        let version = snapshot.version;
        let image: AggregateImage = snapshot.into_state()?;

        let mut aggregate = Self::new(processors);
        for entity in image.entities {
            let processor = aggregate
                .processors
                .by_name(&entity.entity_type)
                .ok_or_else(|| DomainError::SnapshotUnsupported(entity.entity_type.clone()))?;
            let restored = processor.decode(entity.state)?;
            aggregate.insert_entity(restored)?;
        }

        if !aggregate.contains(image.root) {
            return Err(DomainError::MissingRoot);
        }
        aggregate.root = Some(image.root);
        aggregate.version = version;
        aggregate.event_ordinal = image.event_ordinal;
        aggregate.committed_ordinal = image.event_ordinal;
        aggregate.loaded = true;
        Ok(aggregate)
    }

    fn insert_entity(&mut self, entity: Box<dyn Entity>) -> Result<(), DomainError> {
        let id = entity.id();
        if self.entities.contains_key(&id) {
            return Err(DomainError::EntityAlreadyRegistered(id));
        }
        self.entities.insert(id, entity);
        Ok(())
    }

    /// Routes `event` to its entity and applies any child changes it
    /// requested. The arena is only touched once every change is known to
    /// be valid, so a rejected event leaves the aggregate as it was.
    fn dispatch(&mut self, event: &DomainEvent) -> Result<(), DomainError> {
        let target = event.entity_id();
        let entity = self
            .entities
            .get(&target)
            .ok_or(DomainError::EntityNotRegistered(target))?;
        let processor = self.processors.get(entity.as_ref())?;
        let (next, context) = processor.apply(entity.as_ref(), event)?.into_parts();
        let (registered, retired) = context.into_parts();

        self.check_membership(&registered, &retired)?;

        self.entities.insert(target, next);
        for child in registered {
            self.entities.insert(child.id(), child);
        }
        for id in retired {
            self.entities.remove(&id);
        }
        Ok(())
    }

    /// Validates child changes as if registrations ran before retirements.
    fn check_membership(
        &self,
        registered: &[Box<dyn Entity>],
        retired: &[Identity],
    ) -> Result<(), DomainError> {
        let mut added = HashSet::with_capacity(registered.len());
        for child in registered {
            let id = child.id();
            if self.entities.contains_key(&id) || !added.insert(id) {
                return Err(DomainError::EntityAlreadyRegistered(id));
            }
        }

        let mut removed = HashSet::with_capacity(retired.len());
        for &id in retired {
            if self.root == Some(id) {
                return Err(DomainError::IllegalArgument(format!(
                    "cannot retire aggregate root {id}"
                )));
            }
            let present = self.entities.contains_key(&id) || added.contains(&id);
            if !present || !removed.insert(id) {
                return Err(DomainError::EntityNotRegistered(id));
            }
        }
        Ok(())
    }
}

/// Capability to apply new events to one member entity.
pub struct Invoker<'a> {
    aggregate: &'a mut Aggregate,
    entity_id: Identity,
}

impl Invoker<'_> {
    pub fn entity_id(&self) -> Identity {
        self.entity_id
    }

    /// Current state of the bound entity, if it is a `T`.
    pub fn entity<T: Entity>(&self) -> Option<&T> {
        self.aggregate.entity::<T>(self.entity_id)
    }

    /// Assigns the next ordinal, applies the event to the bound entity and
    /// records it as uncommitted. Returns the assigned ordinal.
    ///
    /// Nothing is recorded if dispatch fails.
    pub fn apply(&mut self, mut event: DomainEvent) -> Result<i64, DomainError> {
        if event.entity_id() != self.entity_id {
            return Err(DomainError::InvokerMismatch {
                bound_entity: self.entity_id,
                event_entity: event.entity_id(),
            });
        }

        let ordinal = self.aggregate.event_ordinal + 1;
        event.assign_ordinal(ordinal);
        self.aggregate.dispatch(&event)?;

        self.aggregate.event_ordinal = ordinal;
        self.aggregate.uncommitted.push(event);
        Ok(ordinal)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AggregateImage {
    root: Identity,
    event_ordinal: i64,
    entities: Vec<EntityImage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntityImage {
    entity_type: String,
    state: serde_json::Value,
}
