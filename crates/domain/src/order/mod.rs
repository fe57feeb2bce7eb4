//! Reference order domain: an `Order` root owning `OrderLine` children.

mod aggregate;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::{Order, OrderLine, OrderSummary};
pub use events::{
    LineAdded, LineQuantityChanged, LineRemoved, OrderCancelled, OrderPlaced, OrderSubmitted,
};
pub use service::OrderService;
pub use state::OrderStatus;
pub use value_objects::{Money, Sku};

use common::Identity;
use thiserror::Error;

use crate::codec::JsonEventSerializer;
use crate::error::DomainError;
use crate::processor::EventProcessorProvider;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// A customer name is required.
    #[error("Customer is required")]
    CustomerRequired,

    #[error("Order already placed")]
    AlreadyPlaced,

    #[error("Order has not been placed")]
    NotPlaced,

    /// Order is not in a status that allows the action.
    #[error("Invalid state transition: cannot {action} from {current_state} state")]
    InvalidStateTransition {
        current_state: OrderStatus,
        action: &'static str,
    },

    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    #[error("Invalid price: {cents} cents (must be greater than 0)")]
    InvalidPrice { cents: i64 },

    #[error("Line not found: {line_id}")]
    LineNotFound { line_id: Identity },

    /// Submitting requires at least one line.
    #[error("Order has no lines")]
    NoLines,
}

/// Event processors for the order entities.
pub fn processors() -> Result<EventProcessorProvider, DomainError> {
    EventProcessorProvider::new()
        .with(Order::processor())?
        .with(OrderLine::processor())
}

/// Serializer that can read and write every order event.
pub fn serializer() -> JsonEventSerializer {
    JsonEventSerializer::new()
        .register::<OrderPlaced>()
        .register::<LineAdded>()
        .register::<LineQuantityChanged>()
        .register::<LineRemoved>()
        .register::<OrderSubmitted>()
        .register::<OrderCancelled>()
}
