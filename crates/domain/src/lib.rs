//! Domain layer for the event-sourcing system.
//!
//! This crate provides:
//! - `Entity` and `Aggregate`: a root entity plus owned children, mutated only by events
//! - `EventProcessor`: explicit per-entity-type event dispatch
//! - `Repository` and `Session`: the unit of work that loads and commits aggregates
//! - `JsonEventSerializer`: the stored form of events
//! - A reference `order` domain

pub mod aggregate;
pub mod codec;
pub mod entity;
pub mod error;
pub mod event;
pub mod order;
pub mod processor;
pub mod repository;
pub mod session;

pub use aggregate::{Aggregate, AggregateState, Invoker};
pub use codec::{EventSerializer, JsonEventSerializer};
pub use entity::{Entity, EntityFactory};
pub use error::{ConflictReason, DomainError};
pub use event::{DomainEvent, Event, EventPayload};
pub use order::{
    LineAdded, LineQuantityChanged, LineRemoved, Money, Order, OrderCancelled, OrderError,
    OrderLine, OrderPlaced, OrderService, OrderStatus, OrderSubmitted, OrderSummary, Sku,
};
pub use processor::{
    ApplyContext, Applied, EventProcessor, EventProcessorBuilder, EventProcessorProvider,
};
pub use repository::{CommitReceipt, Repository};
pub use session::Session;
