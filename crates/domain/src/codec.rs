//! Event serialization.
//!
//! The store persists opaque bytes; a serializer turns a [`DomainEvent`]
//! (envelope and payload) into bytes and back.

use std::collections::HashMap;
use std::sync::Arc;

use common::{CommandId, EventId, Identity};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::event::{DomainEvent, Event, EventPayload};

/// Converts domain events to and from their stored form.
pub trait EventSerializer: Send + Sync {
    fn serialize(&self, event: &DomainEvent) -> Result<Vec<u8>, DomainError>;

    fn deserialize(&self, bytes: &[u8]) -> Result<DomainEvent, DomainError>;
}

type Decoder = fn(serde_json::Value) -> Result<Arc<dyn EventPayload>, serde_json::Error>;

/// JSON envelope written for every event.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEvent {
    event_id: EventId,
    entity_id: Identity,
    ordinal: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command_id: Option<CommandId>,
    event_type: String,
    data: serde_json::Value,
}

/// JSON serializer with an explicit registry of event types.
///
/// ```ignore
/// let serializer = JsonEventSerializer::new()
///     .register::<OrderPlaced>()
///     .register::<LineAdded>();
/// ```
#[derive(Debug, Clone, Default)]
pub struct JsonEventSerializer {
    decoders: HashMap<&'static str, Decoder>,
}

impl JsonEventSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes events of type `E` readable.
    pub fn register<E: Event>(mut self) -> Self {
        self.decoders.insert(E::EVENT_TYPE, decode_payload::<E>);
        self
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }
}

fn decode_payload<E: Event>(
    data: serde_json::Value,
) -> Result<Arc<dyn EventPayload>, serde_json::Error> {
    let payload: E = serde_json::from_value(data)?;
    Ok(Arc::new(payload))
}

impl EventSerializer for JsonEventSerializer {
    fn serialize(&self, event: &DomainEvent) -> Result<Vec<u8>, DomainError> {
        // Refuse to write what could not be read back.
        if !self.is_registered(event.event_type()) {
            return Err(DomainError::UnknownEventType(event.event_type().to_string()));
        }

        let stored = StoredEvent {
            event_id: event.event_id(),
            entity_id: event.entity_id(),
            ordinal: event.ordinal(),
            command_id: event.command_id(),
            event_type: event.event_type().to_string(),
            data: event.payload().to_json()?,
        };
        Ok(serde_json::to_vec(&stored)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<DomainEvent, DomainError> {
        let stored: StoredEvent = serde_json::from_slice(bytes)?;
        let decode = self
            .decoders
            .get(stored.event_type.as_str())
            .ok_or_else(|| DomainError::UnknownEventType(stored.event_type.clone()))?;

        Ok(DomainEvent::from_parts(
            stored.event_id,
            stored.entity_id,
            stored.ordinal,
            stored.command_id,
            decode(stored.data)?,
        ))
    }
}
