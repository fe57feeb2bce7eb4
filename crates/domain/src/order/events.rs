//! Order domain events.
//!
//! `LineQuantityChanged` is applied to the `OrderLine` child entity; every
//! other event is applied to the `Order` root.

use common::Identity;
use serde::{Deserialize, Serialize};

use crate::event::Event;

use super::{Money, Sku};

/// An order was opened for a customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub customer: String,
}

impl Event for OrderPlaced {
    const EVENT_TYPE: &'static str = "OrderPlaced";
}

/// A line was added; the line becomes a child entity of the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineAdded {
    pub line_id: Identity,
    pub sku: Sku,
    pub quantity: u32,
    pub unit_price: Money,
}

impl Event for LineAdded {
    const EVENT_TYPE: &'static str = "LineAdded";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineQuantityChanged {
    pub quantity: u32,
}

impl Event for LineQuantityChanged {
    const EVENT_TYPE: &'static str = "LineQuantityChanged";
}

/// A line was removed; its child entity is retired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRemoved {
    pub line_id: Identity,
}

impl Event for LineRemoved {
    const EVENT_TYPE: &'static str = "LineRemoved";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSubmitted {
    /// Order total at submission.
    pub total: Money,
}

impl Event for OrderSubmitted {
    const EVENT_TYPE: &'static str = "OrderSubmitted";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub reason: String,
}

impl Event for OrderCancelled {
    const EVENT_TYPE: &'static str = "OrderCancelled";
}
