//! Event dispatch: binds each entity type to the handlers that apply events to it.
//!
//! Handlers are registered explicitly, once per entity type, and looked up by
//! the runtime type of the event payload. An [`EventProcessorProvider`] holds
//! one [`EventProcessor`] per entity type and is shared by every aggregate.

use std::any::TypeId;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::marker::PhantomData;

use common::Identity;
use serde::{Serialize, de::DeserializeOwned};

use crate::entity::{Entity, downcast_ref, type_id_of};
use crate::error::DomainError;
use crate::event::{DomainEvent, Event};

type Handler = Box<
    dyn Fn(&dyn Entity, &DomainEvent, &mut ApplyContext) -> Result<Box<dyn Entity>, DomainError>
        + Send
        + Sync,
>;

/// Child-entity changes requested by a handler.
///
/// The aggregate applies them after the handler returns, so replaying the
/// same events recreates the same set of members.
#[derive(Debug, Default)]
pub struct ApplyContext {
    registered: Vec<Box<dyn Entity>>,
    retired: Vec<Identity>,
}

impl ApplyContext {
    /// Adds a new child entity to the aggregate.
    pub fn register<T: Entity>(&mut self, entity: T) {
        self.registered.push(Box::new(entity));
    }

    /// Removes a child entity from the aggregate.
    pub fn retire(&mut self, id: Identity) {
        self.retired.push(id);
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty() && self.retired.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<Box<dyn Entity>>, Vec<Identity>) {
        (self.registered, self.retired)
    }
}

/// Result of applying one event: the entity's next state and the child
/// changes it requested. The entity the event was applied to is untouched
/// until the aggregate accepts both.
#[derive(Debug)]
pub struct Applied {
    entity: Box<dyn Entity>,
    context: ApplyContext,
}

impl Applied {
    /// The entity's next state, if it is a `T`.
    pub fn entity<T: Entity>(&self) -> Option<&T> {
        downcast_ref::<T>(self.entity.as_ref())
    }

    pub fn context(&self) -> &ApplyContext {
        &self.context
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Entity>, ApplyContext) {
        (self.entity, self.context)
    }
}

enum Slot {
    Unique(Handler),
    Ambiguous,
}

struct Registration {
    event_type: &'static str,
    slot: Slot,
}

#[derive(Clone, Copy)]
struct SnapshotCodec {
    encode: fn(&dyn Entity) -> Result<serde_json::Value, DomainError>,
    decode: fn(serde_json::Value) -> Result<Box<dyn Entity>, DomainError>,
}

/// Applies events to one concrete entity type.
pub struct EventProcessor {
    entity_type: &'static str,
    entity_type_id: TypeId,
    handlers: HashMap<TypeId, Registration>,
    snapshots: Option<SnapshotCodec>,
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("entity_type", &self.entity_type)
            .field("events", &self.handled_event_types())
            .field("snapshots", &self.snapshots.is_some())
            .finish()
    }
}

impl EventProcessor {
    /// Starts building the processor for entity type `T`.
    ///
    /// `entity_type` names the type in storage: it becomes the aggregate
    /// type of streams rooted at `T` and tags `T` in snapshots.
    pub fn for_entity<T: Entity>(entity_type: &'static str) -> EventProcessorBuilder<T> {
        EventProcessorBuilder {
            entity_type,
            handlers: HashMap::new(),
            snapshots: None,
            _entity: PhantomData,
        }
    }

    pub fn entity_type(&self) -> &'static str {
        self.entity_type
    }

    /// Returns true if exactly one handler is registered for `E`.
    pub fn handles<E: Event>(&self) -> bool {
        matches!(
            self.handlers.get(&TypeId::of::<E>()),
            Some(Registration {
                slot: Slot::Unique(_),
                ..
            })
        )
    }

    pub fn handled_event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.handlers.values().map(|r| r.event_type).collect();
        types.sort_unstable();
        types
    }

    pub fn supports_snapshots(&self) -> bool {
        self.snapshots.is_some()
    }

    /// Applies `event` to a copy of `entity` through the single matching
    /// handler and returns the new state with the child-entity changes it
    /// requested.
    pub fn apply(&self, entity: &dyn Entity, event: &DomainEvent) -> Result<Applied, DomainError> {
        if type_id_of(entity) != self.entity_type_id {
            return Err(self.no_handler(event, "processor is bound to another entity type"));
        }

        let handler = match self.handlers.get(&event.payload_type_id()) {
            Some(Registration {
                slot: Slot::Unique(handler),
                ..
            }) => handler,
            Some(Registration {
                slot: Slot::Ambiguous,
                ..
            }) => return Err(self.no_handler(event, "more than one handler registered")),
            None => return Err(self.no_handler(event, "no handler registered")),
        };

        let mut context = ApplyContext::default();
        let next = handler(entity, event, &mut context)?;
        if next.id() != entity.id() {
            return Err(self.no_handler(event, "handler changed the entity identity"));
        }
        Ok(Applied {
            entity: next,
            context,
        })
    }

    pub(crate) fn encode(&self, entity: &dyn Entity) -> Result<serde_json::Value, DomainError> {
        let codec = self
            .snapshots
            .ok_or_else(|| DomainError::SnapshotUnsupported(self.entity_type.to_string()))?;
        (codec.encode)(entity)
    }

    pub(crate) fn decode(&self, state: serde_json::Value) -> Result<Box<dyn Entity>, DomainError> {
        let codec = self
            .snapshots
            .ok_or_else(|| DomainError::SnapshotUnsupported(self.entity_type.to_string()))?;
        (codec.decode)(state)
    }

    fn no_handler(&self, event: &DomainEvent, reason: &'static str) -> DomainError {
        DomainError::NoHandlerFound {
            entity_type: self.entity_type,
            event_type: event.event_type(),
            reason,
        }
    }
}

/// Builder returned by [`EventProcessor::for_entity`].
pub struct EventProcessorBuilder<T> {
    entity_type: &'static str,
    handlers: HashMap<TypeId, Registration>,
    snapshots: Option<SnapshotCodec>,
    _entity: PhantomData<fn(T)>,
}

impl<T: Entity + Clone> EventProcessorBuilder<T> {
    /// Registers the handler for event type `E`.
    ///
    /// Registering a second handler for the same event type makes dispatch
    /// of that type fail with `NoHandlerFound`.
    pub fn on<E, F>(self, handler: F) -> Self
    where
        E: Event,
        F: Fn(&mut T, &E) + Send + Sync + 'static,
    {
        self.on_with_context::<E, _>(move |entity, event, _| handler(entity, event))
    }

    /// Registers a handler that may add or retire child entities.
    pub fn on_with_context<E, F>(mut self, handler: F) -> Self
    where
        E: Event,
        F: Fn(&mut T, &E, &mut ApplyContext) + Send + Sync + 'static,
    {
        let entity_type = self.entity_type;
        let erased: Handler = Box::new(
            move |entity: &dyn Entity, event: &DomainEvent, ctx: &mut ApplyContext| {
                let mismatch = |reason| DomainError::NoHandlerFound {
                    entity_type,
                    event_type: event.event_type(),
                    reason,
                };
                let current =
                    downcast_ref::<T>(entity).ok_or_else(|| mismatch("entity type mismatch"))?;
                let payload = event
                    .payload_as::<E>()
                    .ok_or_else(|| mismatch("event payload type mismatch"))?;
                let mut next = current.clone();
                handler(&mut next, payload, ctx);
                let next: Box<dyn Entity> = Box::new(next);
                Ok(next)
            },
        );

        match self.handlers.entry(TypeId::of::<E>()) {
            Entry::Occupied(mut existing) => {
                tracing::warn!(
                    entity_type,
                    event_type = E::EVENT_TYPE,
                    "duplicate event handler registered"
                );
                existing.get_mut().slot = Slot::Ambiguous;
            }
            Entry::Vacant(slot) => {
                slot.insert(Registration {
                    event_type: E::EVENT_TYPE,
                    slot: Slot::Unique(erased),
                });
            }
        }
        self
    }
}

impl<T: Entity> EventProcessorBuilder<T> {
    pub fn build(self) -> EventProcessor {
        EventProcessor {
            entity_type: self.entity_type,
            entity_type_id: TypeId::of::<T>(),
            handlers: self.handlers,
            snapshots: self.snapshots,
        }
    }
}

impl<T: Entity + Serialize + DeserializeOwned> EventProcessorBuilder<T> {
    /// Allows entities of this type to be captured in aggregate snapshots.
    pub fn with_snapshots(mut self) -> Self {
        self.snapshots = Some(SnapshotCodec {
            encode: encode_entity::<T>,
            decode: decode_entity::<T>,
        });
        self
    }
}

fn encode_entity<T: Entity + Serialize>(
    entity: &dyn Entity,
) -> Result<serde_json::Value, DomainError> {
    let entity = downcast_ref::<T>(entity).ok_or_else(|| {
        DomainError::SnapshotUnsupported(format!("{entity:?} is not a {}", std::any::type_name::<T>()))
    })?;
    Ok(serde_json::to_value(entity)?)
}

fn decode_entity<T: Entity + DeserializeOwned>(
    state: serde_json::Value,
) -> Result<Box<dyn Entity>, DomainError> {
    let entity: T = serde_json::from_value(state)?;
    Ok(Box::new(entity))
}

/// Registry of event processors, one per entity type.
#[derive(Debug, Default)]
pub struct EventProcessorProvider {
    by_type: HashMap<TypeId, EventProcessor>,
    by_name: HashMap<&'static str, TypeId>,
}

impl EventProcessorProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a processor. Each entity type and each type name may be
    /// registered once.
    pub fn register(&mut self, processor: EventProcessor) -> Result<(), DomainError> {
        if self.by_type.contains_key(&processor.entity_type_id)
            || self.by_name.contains_key(processor.entity_type)
        {
            return Err(DomainError::DuplicateProcessor(processor.entity_type));
        }

        self.by_name
            .insert(processor.entity_type, processor.entity_type_id);
        self.by_type.insert(processor.entity_type_id, processor);
        Ok(())
    }

    /// Chaining form of [`register`](Self::register).
    pub fn with(mut self, processor: EventProcessor) -> Result<Self, DomainError> {
        self.register(processor)?;
        Ok(self)
    }

    /// Resolves the processor for the runtime type of `entity`.
    pub fn get(&self, entity: &dyn Entity) -> Result<&EventProcessor, DomainError> {
        self.by_type
            .get(&type_id_of(entity))
            .ok_or(DomainError::ProcessorNotRegistered(entity.id()))
    }

    pub fn for_type<T: Entity>(&self) -> Option<&EventProcessor> {
        self.by_type.get(&TypeId::of::<T>())
    }

    pub fn by_name(&self, entity_type: &str) -> Option<&EventProcessor> {
        self.by_name
            .get(entity_type)
            .and_then(|type_id| self.by_type.get(type_id))
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        id: Identity,
        value: i64,
    }

    impl Entity for Counter {
        fn id(&self) -> Identity {
            self.id
        }
    }

    #[derive(Debug)]
    struct Other(Identity);

    impl Entity for Other {
        fn id(&self) -> Identity {
            self.0
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Incremented(i64);

    impl Event for Incremented {
        const EVENT_TYPE: &'static str = "Incremented";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Reset;

    impl Event for Reset {
        const EVENT_TYPE: &'static str = "Reset";
    }

    fn counter_processor() -> EventProcessor {
        EventProcessor::for_entity::<Counter>("Counter")
            .on(|c: &mut Counter, e: &Incremented| c.value += e.0)
            .with_snapshots()
            .build()
    }

    #[test]
    fn applies_matching_handler() {
        let processor = counter_processor();
        let counter = Counter::default();
        let event = DomainEvent::new(counter.id, Incremented(3));

        let applied = processor.apply(&counter, &event).unwrap();

        assert_eq!(applied.entity::<Counter>().map(|c| c.value), Some(3));
        assert_eq!(counter.value, 0);
        assert!(applied.context().is_empty());
        assert!(processor.handles::<Incremented>());
        assert!(!processor.handles::<Reset>());
    }

    #[test]
    fn missing_handler_is_no_handler_found() {
        let processor = counter_processor();
        let counter = Counter::default();
        let event = DomainEvent::new(counter.id, Reset);

        let err = processor.apply(&counter, &event).unwrap_err();

        assert!(matches!(
            err,
            DomainError::NoHandlerFound {
                entity_type: "Counter",
                event_type: "Reset",
                reason: "no handler registered",
            }
        ));
        assert!(err.is_illegal_state());
    }

    #[test]
    fn duplicate_handlers_are_ambiguous() {
        let processor = EventProcessor::for_entity::<Counter>("Counter")
            .on(|c: &mut Counter, e: &Incremented| c.value += e.0)
            .on(|c: &mut Counter, e: &Incremented| c.value -= e.0)
            .build();
        let counter = Counter::default();
        let event = DomainEvent::new(counter.id, Incremented(1));

        let err = processor.apply(&counter, &event).unwrap_err();

        assert!(matches!(
            err,
            DomainError::NoHandlerFound {
                reason: "more than one handler registered",
                ..
            }
        ));
        assert_eq!(counter.value, 0);
        assert!(!processor.handles::<Incremented>());
    }

    #[test]
    fn wrong_entity_type_is_rejected() {
        let processor = counter_processor();
        let other = Other(Identity::new());
        let event = DomainEvent::new(other.0, Incremented(1));

        assert!(matches!(
            processor.apply(&other, &event),
            Err(DomainError::NoHandlerFound { .. })
        ));
    }

    #[test]
    fn context_collects_child_changes() {
        let processor = EventProcessor::for_entity::<Counter>("Counter")
            .on_with_context(|c: &mut Counter, e: &Incremented, ctx: &mut ApplyContext| {
                c.value += e.0;
                ctx.register(Other(Identity::new()));
                ctx.retire(Identity::new());
            })
            .build();
        let counter = Counter::default();

        let applied = processor
            .apply(&counter, &DomainEvent::new(counter.id, Incremented(2)))
            .unwrap();
        let (_, ctx) = applied.into_parts();
        let (registered, retired) = ctx.into_parts();

        assert_eq!(registered.len(), 1);
        assert_eq!(retired.len(), 1);
    }

    #[test]
    fn snapshot_codec_round_trips_entity() {
        let processor = counter_processor();
        let counter = Counter {
            id: Identity::new(),
            value: 9,
        };

        let state = processor.encode(&counter).unwrap();
        let restored = processor.decode(state).unwrap();

        assert_eq!(downcast_ref::<Counter>(restored.as_ref()), Some(&counter));
    }

    #[test]
    fn snapshots_require_opt_in() {
        let processor = EventProcessor::for_entity::<Other>("Other").build();

        assert!(!processor.supports_snapshots());
        assert!(matches!(
            processor.encode(&Other(Identity::new())),
            Err(DomainError::SnapshotUnsupported(_))
        ));
    }

    #[test]
    fn provider_resolves_by_runtime_type_and_name() {
        let provider = EventProcessorProvider::new()
            .with(counter_processor())
            .unwrap();
        let counter = Counter::default();
        let other = Other(Identity::new());

        assert_eq!(provider.get(&counter).unwrap().entity_type(), "Counter");
        assert!(provider.for_type::<Counter>().is_some());
        assert!(provider.by_name("Counter").is_some());
        assert!(matches!(
            provider.get(&other),
            Err(DomainError::ProcessorNotRegistered(id)) if id == other.0
        ));
    }

    #[test]
    fn provider_rejects_duplicate_registration() {
        let mut provider = EventProcessorProvider::new();
        provider.register(counter_processor()).unwrap();

        assert!(matches!(
            provider.register(counter_processor()),
            Err(DomainError::DuplicateProcessor("Counter"))
        ));
        assert_eq!(provider.len(), 1);
    }
}
