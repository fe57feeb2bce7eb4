//! Order entities: the `Order` root and its `OrderLine` children.

use common::{Identity, Version};
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::entity::{Entity, EntityFactory};
use crate::error::DomainError;
use crate::processor::{ApplyContext, EventProcessor};

use super::{
    LineAdded, LineQuantityChanged, LineRemoved, Money, OrderCancelled, OrderError, OrderPlaced,
    OrderStatus, OrderSubmitted, Sku,
};

/// Order aggregate root.
///
/// Line details live in [`OrderLine`] child entities; the root only keeps
/// their identities, in the order they were added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: Identity,
    customer: Option<String>,
    status: OrderStatus,
    lines: Vec<Identity>,
}

impl Entity for Order {
    fn id(&self) -> Identity {
        self.id
    }
}

impl EntityFactory for Order {
    fn empty(id: Identity) -> Self {
        Self {
            id,
            customer: None,
            status: OrderStatus::Draft,
            lines: Vec::new(),
        }
    }
}

// Query methods
impl Order {
    pub fn customer(&self) -> Option<&str> {
        self.customer.as_deref()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn is_placed(&self) -> bool {
        self.customer.is_some()
    }

    pub fn line_ids(&self) -> &[Identity] {
        &self.lines
    }

    pub fn has_line(&self, line_id: Identity) -> bool {
        self.lines.contains(&line_id)
    }
}

// Decision methods: validate against current state and return the event to apply.
impl Order {
    pub fn place(&self, customer: &str) -> Result<OrderPlaced, OrderError> {
        if self.is_placed() {
            return Err(OrderError::AlreadyPlaced);
        }
        let customer = customer.trim();
        if customer.is_empty() {
            return Err(OrderError::CustomerRequired);
        }
        Ok(OrderPlaced {
            customer: customer.to_string(),
        })
    }

    pub fn add_line(
        &self,
        sku: Sku,
        quantity: u32,
        unit_price: Money,
    ) -> Result<LineAdded, OrderError> {
        self.ensure(self.status.can_modify_lines(), "add line")?;
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity { quantity });
        }
        if !unit_price.is_positive() {
            return Err(OrderError::InvalidPrice {
                cents: unit_price.cents(),
            });
        }
        Ok(LineAdded {
            line_id: Identity::new(),
            sku,
            quantity,
            unit_price,
        })
    }

    pub fn remove_line(&self, line_id: Identity) -> Result<LineRemoved, OrderError> {
        self.ensure(self.status.can_modify_lines(), "remove line")?;
        if !self.has_line(line_id) {
            return Err(OrderError::LineNotFound { line_id });
        }
        Ok(LineRemoved { line_id })
    }

    /// `total` is the sum of the order's line totals.
    pub fn submit(&self, total: Money) -> Result<OrderSubmitted, OrderError> {
        self.ensure(self.status.can_submit(), "submit")?;
        if self.lines.is_empty() {
            return Err(OrderError::NoLines);
        }
        Ok(OrderSubmitted { total })
    }

    pub fn cancel(&self, reason: impl Into<String>) -> Result<OrderCancelled, OrderError> {
        self.ensure(self.status.can_cancel(), "cancel")?;
        Ok(OrderCancelled {
            reason: reason.into(),
        })
    }

    fn ensure(&self, allowed: bool, action: &'static str) -> Result<(), OrderError> {
        if !self.is_placed() {
            return Err(OrderError::NotPlaced);
        }
        if !allowed {
            return Err(OrderError::InvalidStateTransition {
                current_state: self.status,
                action,
            });
        }
        Ok(())
    }
}

// Event handlers
impl Order {
    pub(crate) fn processor() -> EventProcessor {
        EventProcessor::for_entity::<Order>("Order")
            .on(Order::on_placed)
            .on_with_context(Order::on_line_added)
            .on_with_context(Order::on_line_removed)
            .on(Order::on_submitted)
            .on(Order::on_cancelled)
            .with_snapshots()
            .build()
    }

    fn on_placed(&mut self, event: &OrderPlaced) {
        self.customer = Some(event.customer.clone());
        self.status = OrderStatus::Draft;
    }

    fn on_line_added(&mut self, event: &LineAdded, ctx: &mut ApplyContext) {
        self.lines.push(event.line_id);
        ctx.register(OrderLine {
            id: event.line_id,
            order_id: self.id,
            sku: event.sku.clone(),
            quantity: event.quantity,
            unit_price: event.unit_price,
        });
    }

    fn on_line_removed(&mut self, event: &LineRemoved, ctx: &mut ApplyContext) {
        self.lines.retain(|id| *id != event.line_id);
        ctx.retire(event.line_id);
    }

    fn on_submitted(&mut self, _event: &OrderSubmitted) {
        self.status = OrderStatus::Submitted;
    }

    fn on_cancelled(&mut self, _event: &OrderCancelled) {
        self.status = OrderStatus::Cancelled;
    }
}

/// One line of an order, owned by the order's aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    id: Identity,
    order_id: Identity,
    sku: Sku,
    quantity: u32,
    unit_price: Money,
}

impl Entity for OrderLine {
    fn id(&self) -> Identity {
        self.id
    }
}

impl OrderLine {
    pub(crate) fn processor() -> EventProcessor {
        EventProcessor::for_entity::<OrderLine>("OrderLine")
            .on(OrderLine::on_quantity_changed)
            .with_snapshots()
            .build()
    }

    pub fn order_id(&self) -> Identity {
        self.order_id
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn unit_price(&self) -> Money {
        self.unit_price
    }

    pub fn total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }

    pub fn change_quantity(
        &self,
        order: &Order,
        quantity: u32,
    ) -> Result<LineQuantityChanged, OrderError> {
        order.ensure(order.status.can_modify_lines(), "change quantity")?;
        if quantity == 0 {
            return Err(OrderError::InvalidQuantity { quantity });
        }
        Ok(LineQuantityChanged { quantity })
    }

    fn on_quantity_changed(&mut self, event: &LineQuantityChanged) {
        self.quantity = event.quantity;
    }
}

/// Read view of an order aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSummary {
    pub id: Identity,
    pub customer: String,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    pub total: Money,
    pub version: Version,
}

impl OrderSummary {
    pub fn from_aggregate(aggregate: &Aggregate) -> Result<Self, DomainError> {
        let order = aggregate
            .root::<Order>()
            .ok_or(DomainError::MissingRoot)?;
        let customer = order
            .customer()
            .ok_or(DomainError::Order(OrderError::NotPlaced))?;

        let lines = order
            .lines
            .iter()
            .map(|id| {
                aggregate
                    .entity::<OrderLine>(*id)
                    .cloned()
                    .ok_or(DomainError::EntityNotRegistered(*id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let total = lines.iter().map(OrderLine::total).sum();

        Ok(Self {
            id: order.id,
            customer: customer.to_string(),
            status: order.status,
            lines,
            total,
            version: aggregate.version(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::event::DomainEvent;
    use crate::order::processors;

    fn placed_order() -> (Identity, Aggregate) {
        let id = Identity::new();
        let mut aggregate =
            Aggregate::with_root(Arc::new(processors().unwrap()), Order::empty(id)).unwrap();
        let placed = aggregate.root::<Order>().unwrap().place("ada").unwrap();
        aggregate.apply(DomainEvent::new(id, placed)).unwrap();
        (id, aggregate)
    }

    fn add_line(aggregate: &mut Aggregate, id: Identity, sku: &str, qty: u32, cents: i64) -> Identity {
        let added = aggregate
            .root::<Order>()
            .unwrap()
            .add_line(Sku::from(sku), qty, Money::from_cents(cents))
            .unwrap();
        let line_id = added.line_id;
        aggregate.apply(DomainEvent::new(id, added)).unwrap();
        line_id
    }

    #[test]
    fn place_requires_customer_once() {
        let order = Order::empty(Identity::new());
        assert!(matches!(order.place("  "), Err(OrderError::CustomerRequired)));

        let (_, aggregate) = placed_order();
        let order = aggregate.root::<Order>().unwrap();
        assert_eq!(order.customer(), Some("ada"));
        assert!(matches!(order.place("bob"), Err(OrderError::AlreadyPlaced)));
    }

    #[test]
    fn unplaced_orders_reject_changes() {
        let order = Order::empty(Identity::new());

        assert!(matches!(
            order.add_line(Sku::from("A"), 1, Money::from_cents(1)),
            Err(OrderError::NotPlaced)
        ));
        assert!(matches!(order.cancel("x"), Err(OrderError::NotPlaced)));
    }

    #[test]
    fn lines_become_child_entities() {
        let (id, mut aggregate) = placed_order();
        let a = add_line(&mut aggregate, id, "A", 2, 150);
        let b = add_line(&mut aggregate, id, "B", 1, 1000);

        let line = aggregate.entity::<OrderLine>(a).unwrap();
        assert_eq!(line.order_id(), id);
        assert_eq!(line.total(), Money::from_cents(300));

        let summary = OrderSummary::from_aggregate(&aggregate).unwrap();
        assert_eq!(summary.lines.len(), 2);
        assert_eq!(summary.lines[1].sku().as_str(), "B");
        assert_eq!(summary.total, Money::from_cents(1300));

        let removed = aggregate.root::<Order>().unwrap().remove_line(b).unwrap();
        aggregate.apply(DomainEvent::new(id, removed)).unwrap();
        assert!(!aggregate.contains(b));
        assert_eq!(aggregate.root::<Order>().unwrap().line_ids(), &[a]);
    }

    #[test]
    fn quantity_changes_apply_to_the_line() {
        let (id, mut aggregate) = placed_order();
        let line_id = add_line(&mut aggregate, id, "A", 1, 100);

        let order = aggregate.root::<Order>().unwrap();
        let line = aggregate.entity::<OrderLine>(line_id).unwrap();
        assert!(matches!(
            line.change_quantity(order, 0),
            Err(OrderError::InvalidQuantity { quantity: 0 })
        ));
        let changed = line.change_quantity(order, 4).unwrap();
        aggregate
            .invoker(line_id)
            .unwrap()
            .apply(DomainEvent::new(line_id, changed))
            .unwrap();

        assert_eq!(aggregate.entity::<OrderLine>(line_id).unwrap().quantity(), 4);
    }

    #[test]
    fn submit_freezes_lines() {
        let (id, mut aggregate) = placed_order();
        assert!(matches!(
            aggregate.root::<Order>().unwrap().submit(Money::ZERO),
            Err(OrderError::NoLines)
        ));

        add_line(&mut aggregate, id, "A", 1, 100);
        let submitted = aggregate
            .root::<Order>()
            .unwrap()
            .submit(Money::from_cents(100))
            .unwrap();
        aggregate.apply(DomainEvent::new(id, submitted)).unwrap();

        let order = aggregate.root::<Order>().unwrap();
        assert_eq!(order.status(), OrderStatus::Submitted);
        assert!(matches!(
            order.add_line(Sku::from("B"), 1, Money::from_cents(1)),
            Err(OrderError::InvalidStateTransition { action: "add line", .. })
        ));
        assert!(order.cancel("changed mind").is_ok());
    }

    #[test]
    fn invalid_line_values() {
        let (_, aggregate) = placed_order();
        let order = aggregate.root::<Order>().unwrap();

        assert!(matches!(
            order.add_line(Sku::from("A"), 0, Money::from_cents(1)),
            Err(OrderError::InvalidQuantity { .. })
        ));
        assert!(matches!(
            order.add_line(Sku::from("A"), 1, Money::ZERO),
            Err(OrderError::InvalidPrice { cents: 0 })
        ));
        assert!(matches!(
            order.remove_line(Identity::new()),
            Err(OrderError::LineNotFound { .. })
        ));
    }
}
