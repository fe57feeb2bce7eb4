//! Domain error types.

use common::{Identity, Version};
use event_store::EventStoreError;
use thiserror::Error;

use crate::order::OrderError;

/// Why a write or registration was refused as a concurrency conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    /// The stream moved past the version the aggregate was loaded at.
    VersionMismatch { expected: Version, actual: Version },
    /// Another writer created the stream first.
    StreamAlreadyExists,
    /// The session already tracks a different instance for this identity.
    DuplicateInstance,
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictReason::VersionMismatch { expected, actual } => {
                write!(f, "expected version {expected}, found {actual}")
            }
            ConflictReason::StreamAlreadyExists => f.write_str("stream already exists"),
            ConflictReason::DuplicateInstance => {
                f.write_str("another instance is already tracked in this session")
            }
        }
    }
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The aggregate already has a root entity.
    #[error("Aggregate root already registered: {0}")]
    RootAlreadyRegistered(Identity),

    /// The aggregate has no root entity yet.
    #[error("Aggregate has no root entity")]
    MissingRoot,

    /// An event or invoker referred to an entity outside the aggregate.
    #[error("No entity for {0}")]
    EntityNotRegistered(Identity),

    /// An entity with this identity is already a member of the aggregate.
    #[error("Entity already registered: {0}")]
    EntityAlreadyRegistered(Identity),

    /// History was offered to an aggregate that is no longer fresh.
    #[error("Aggregate {0} already has state; history loads only into a fresh aggregate")]
    AlreadyLoaded(Identity),

    /// An event was applied through an invoker bound to a different entity.
    #[error("Event for entity {event_entity} applied through invoker bound to {bound_entity}")]
    InvokerMismatch {
        bound_entity: Identity,
        event_entity: Identity,
    },

    /// No event processor was registered for the entity's type.
    #[error("No event processor registered for entity {0}")]
    ProcessorNotRegistered(Identity),

    /// An event processor for this entity type was already registered.
    #[error("Event processor already registered for entity type {0}")]
    DuplicateProcessor(&'static str),

    /// The entity type has no unique handler for the event type.
    #[error("No handler found for {event_type} on {entity_type}: {reason}")]
    NoHandlerFound {
        entity_type: &'static str,
        event_type: &'static str,
        reason: &'static str,
    },

    /// An argument was not acceptable for the operation.
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// No stream exists for the requested aggregate.
    #[error("Entity not found: {0}")]
    EntityNotFound(Identity),

    /// The aggregate could not be committed or tracked without conflicting.
    #[error("Concurrency conflict for aggregate {aggregate_id}: {reason}")]
    ConcurrencyConflict {
        aggregate_id: Identity,
        reason: ConflictReason,
    },

    /// The stored stream belongs to a different aggregate type.
    #[error("Aggregate {aggregate_id} is a {found}, not a {expected}")]
    AggregateTypeMismatch {
        aggregate_id: Identity,
        expected: &'static str,
        found: String,
    },

    /// The serializer has no registration for a persisted event type.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The entity type was not registered with snapshot support.
    #[error("Snapshots are not supported for entity type {0}")]
    SnapshotUnsupported(String),

    /// An error occurred in the order domain.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Aggregate invariant violations: programming errors, never retried.
    pub fn is_illegal_state(&self) -> bool {
        matches!(
            self,
            DomainError::RootAlreadyRegistered(_)
                | DomainError::MissingRoot
                | DomainError::EntityNotRegistered(_)
                | DomainError::EntityAlreadyRegistered(_)
                | DomainError::AlreadyLoaded(_)
                | DomainError::InvokerMismatch { .. }
                | DomainError::ProcessorNotRegistered(_)
                | DomainError::DuplicateProcessor(_)
                | DomainError::NoHandlerFound { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, DomainError::ConcurrencyConflict { .. })
    }
}

impl From<EventStoreError> for DomainError {
    fn from(e: EventStoreError) -> Self {
        match e {
            EventStoreError::ConcurrencyConflict {
                stream_id,
                expected,
                actual,
            } => DomainError::ConcurrencyConflict {
                aggregate_id: stream_id,
                reason: ConflictReason::VersionMismatch { expected, actual },
            },
            EventStoreError::StreamAlreadyExists(stream_id) => DomainError::ConcurrencyConflict {
                aggregate_id: stream_id,
                reason: ConflictReason::StreamAlreadyExists,
            },
            other => DomainError::EventStore(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflicts_become_domain_conflicts() {
        let id = Identity::new();
        let err: DomainError = EventStoreError::ConcurrencyConflict {
            stream_id: id,
            expected: Version::new(1),
            actual: Version::new(2),
        }
        .into();

        assert!(matches!(
            err,
            DomainError::ConcurrencyConflict {
                aggregate_id,
                reason: ConflictReason::VersionMismatch { .. },
            } if aggregate_id == id
        ));

        let err: DomainError = EventStoreError::StreamAlreadyExists(id).into();
        assert!(err.is_conflict());
    }

    #[test]
    fn other_store_errors_pass_through() {
        let err: DomainError = EventStoreError::InvalidArgument {
            stream_id: Identity::new(),
            message: "nope".to_string(),
        }
        .into();
        assert!(matches!(err, DomainError::EventStore(_)));
        assert!(!err.is_illegal_state());
    }
}
