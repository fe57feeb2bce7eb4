//! Domain events.

use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use common::{CommandId, EventId, Identity};
use serde::{Serialize, de::DeserializeOwned};

/// A fact type that can be carried by a [`DomainEvent`].
///
/// `EVENT_TYPE` is the stable name written to storage; renaming it breaks
/// existing streams.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + Debug + 'static {
    const EVENT_TYPE: &'static str;
}

/// Object-safe view of an [`Event`], implemented for every event type.
pub trait EventPayload: Any + Send + Sync + Debug + 'static {
    fn event_type(&self) -> &'static str;

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error>;
}

impl<E: Event> EventPayload for E {
    fn event_type(&self) -> &'static str {
        E::EVENT_TYPE
    }

    fn to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// An immutable fact about one entity.
///
/// The ordinal is zero until the owning aggregate applies the event.
/// Equality and hashing use the event id only; order events with
/// [`DomainEvent::ordinal`].
#[derive(Debug, Clone)]
pub struct DomainEvent {
    event_id: EventId,
    entity_id: Identity,
    ordinal: i64,
    command_id: Option<CommandId>,
    payload: Arc<dyn EventPayload>,
}

impl DomainEvent {
    /// Creates a new event about `entity_id` with a fresh event id.
    pub fn new<E: Event>(entity_id: Identity, payload: E) -> Self {
        Self {
            event_id: EventId::new(),
            entity_id,
            ordinal: 0,
            command_id: None,
            payload: Arc::new(payload),
        }
    }

    /// Records the command that caused this event.
    pub fn caused_by(mut self, command_id: CommandId) -> Self {
        self.command_id = Some(command_id);
        self
    }

    /// Reassembles a persisted event.
    pub fn from_parts(
        event_id: EventId,
        entity_id: Identity,
        ordinal: i64,
        command_id: Option<CommandId>,
        payload: Arc<dyn EventPayload>,
    ) -> Self {
        Self {
            event_id,
            entity_id,
            ordinal,
            command_id,
            payload,
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn entity_id(&self) -> Identity {
        self.entity_id
    }

    pub fn ordinal(&self) -> i64 {
        self.ordinal
    }

    pub fn command_id(&self) -> Option<CommandId> {
        self.command_id
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    pub fn payload(&self) -> &dyn EventPayload {
        self.payload.as_ref()
    }

    /// Returns the payload if it is an `E`.
    pub fn payload_as<E: Event>(&self) -> Option<&E> {
        let any: &dyn Any = &*self.payload;
        any.downcast_ref::<E>()
    }

    pub(crate) fn payload_type_id(&self) -> TypeId {
        let any: &dyn Any = &*self.payload;
        any.type_id()
    }

    pub(crate) fn assign_ordinal(&mut self, ordinal: i64) {
        self.ordinal = ordinal;
    }
}

impl PartialEq for DomainEvent {
    fn eq(&self, other: &Self) -> bool {
        self.event_id == other.event_id
    }
}

impl Eq for DomainEvent {}

impl Hash for DomainEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.event_id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Renamed {
        name: String,
    }

    impl Event for Renamed {
        const EVENT_TYPE: &'static str = "Renamed";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Deleted;

    impl Event for Deleted {
        const EVENT_TYPE: &'static str = "Deleted";
    }

    #[test]
    fn new_event_has_no_ordinal_or_cause() {
        let id = Identity::new();
        let event = DomainEvent::new(id, Renamed { name: "a".into() });

        assert_eq!(event.entity_id(), id);
        assert_eq!(event.ordinal(), 0);
        assert_eq!(event.command_id(), None);
        assert_eq!(event.event_type(), "Renamed");
    }

    #[test]
    fn equality_is_by_event_id_only() {
        let id = Identity::new();
        let a = DomainEvent::new(id, Renamed { name: "a".into() });
        let mut same = a.clone();
        same.assign_ordinal(7);
        let other = DomainEvent::new(id, Renamed { name: "a".into() });

        assert_eq!(a, same);
        assert_ne!(a, other);
    }

    #[test]
    fn payload_downcast() {
        let command = CommandId::new();
        let event = DomainEvent::new(Identity::new(), Renamed { name: "b".into() }).caused_by(command);

        assert_eq!(event.command_id(), Some(command));
        assert_eq!(event.payload_as::<Renamed>().map(|r| r.name.as_str()), Some("b"));
        assert!(event.payload_as::<Deleted>().is_none());
        assert_eq!(event.payload_type_id(), TypeId::of::<Renamed>());
        assert_eq!(
            event.payload().to_json().ok(),
            Some(serde_json::json!({ "name": "b" }))
        );
    }
}
