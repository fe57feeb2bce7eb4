//! Order service: one unit of work per call.

use std::sync::Arc;

use common::{CommandId, Identity};
use event_store::{EventStore, LoadBound};

use crate::aggregate::Aggregate;
use crate::entity::EntityFactory;
use crate::error::DomainError;
use crate::event::DomainEvent;
use crate::repository::Repository;
use crate::session::Session;

use super::{Money, Order, OrderError, OrderLine, OrderSummary, Sku};

/// Service for managing orders.
///
/// Every call opens its own [`Session`], applies at most one event, and
/// commits. The events it emits carry a fresh [`CommandId`] as causation.
/// Concurrent calls against the same order may fail with
/// `DomainError::ConcurrencyConflict`; retrying is up to the caller.
pub struct OrderService<S: EventStore> {
    repository: Repository<S>,
}

impl<S: EventStore> OrderService<S> {
    /// Creates a service with the order processors and serializer.
    pub fn new(store: S) -> Result<Self, DomainError> {
        let repository = Repository::new(
            store,
            Arc::new(super::processors()?),
            Arc::new(super::serializer()),
        );
        Ok(Self { repository })
    }

    pub fn with_repository(repository: Repository<S>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Repository<S> {
        &self.repository
    }

    /// Places a new order and returns its identity.
    #[tracing::instrument(skip(self))]
    pub async fn place_order(&self, customer: &str) -> Result<Identity, DomainError> {
        let id = Identity::new();
        let command = CommandId::new();

        let mut aggregate = self.repository.create(Order::empty(id))?;
        let placed = root(&aggregate)?.place(customer)?;
        aggregate.apply(DomainEvent::new(id, placed).caused_by(command))?;

        let mut session = Session::new();
        self.repository.add(&mut session, aggregate)?;
        self.repository.commit_changes(&mut session).await?;
        tracing::info!(order_id = %id, "order placed");
        Ok(id)
    }

    /// Adds a line and returns the new line's identity.
    #[tracing::instrument(skip(self))]
    pub async fn add_line(
        &self,
        order_id: Identity,
        sku: &str,
        quantity: u32,
        unit_price: Money,
    ) -> Result<Identity, DomainError> {
        self.execute(order_id, |aggregate| {
            let added = root(aggregate)?.add_line(Sku::from(sku), quantity, unit_price)?;
            let line_id = added.line_id;
            Ok((DomainEvent::new(order_id, added), line_id))
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn change_quantity(
        &self,
        order_id: Identity,
        line_id: Identity,
        quantity: u32,
    ) -> Result<(), DomainError> {
        self.execute(order_id, |aggregate| {
            let order = root(aggregate)?;
            let line = aggregate
                .entity::<OrderLine>(line_id)
                .ok_or(OrderError::LineNotFound { line_id })?;
            let changed = line.change_quantity(order, quantity)?;
            Ok((DomainEvent::new(line_id, changed), ()))
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_line(&self, order_id: Identity, line_id: Identity) -> Result<(), DomainError> {
        self.execute(order_id, |aggregate| {
            let removed = root(aggregate)?.remove_line(line_id)?;
            Ok((DomainEvent::new(order_id, removed), ()))
        })
        .await
    }

    /// Submits the order and returns its total.
    #[tracing::instrument(skip(self))]
    pub async fn submit(&self, order_id: Identity) -> Result<Money, DomainError> {
        self.execute(order_id, |aggregate| {
            let total = OrderSummary::from_aggregate(aggregate)?.total;
            let submitted = root(aggregate)?.submit(total)?;
            Ok((DomainEvent::new(order_id, submitted), total))
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, order_id: Identity, reason: &str) -> Result<(), DomainError> {
        self.execute(order_id, |aggregate| {
            let cancelled = root(aggregate)?.cancel(reason)?;
            Ok((DomainEvent::new(order_id, cancelled), ()))
        })
        .await
    }

    /// Returns the current state of an order.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: Identity) -> Result<OrderSummary, DomainError> {
        let mut session = Session::new();
        let aggregate = self.repository.find::<Order>(&mut session, order_id).await?;
        OrderSummary::from_aggregate(aggregate)
    }

    /// Returns the order as it was at `bound`.
    #[tracing::instrument(skip(self))]
    pub async fn get_order_as_of(
        &self,
        order_id: Identity,
        bound: LoadBound,
    ) -> Result<OrderSummary, DomainError> {
        let aggregate = self.repository.load_as_of::<Order>(order_id, bound).await?;
        OrderSummary::from_aggregate(&aggregate)
    }

    /// Loads the order, applies the event `decide` returns, and commits.
    async fn execute<F, R>(&self, order_id: Identity, decide: F) -> Result<R, DomainError>
    where
        F: FnOnce(&Aggregate) -> Result<(DomainEvent, R), DomainError> + Send,
        R: Send,
    {
        let command = CommandId::new();
        let mut session = Session::new();

        let aggregate = self.repository.find::<Order>(&mut session, order_id).await?;
        let (event, output) = decide(&*aggregate)?;
        aggregate.apply(event.caused_by(command))?;

        self.repository.commit_changes(&mut session).await?;
        Ok(output)
    }
}

fn root(aggregate: &Aggregate) -> Result<&Order, DomainError> {
    aggregate.root::<Order>().ok_or(DomainError::MissingRoot)
}

#[cfg(test)]
mod tests {
    use event_store::{EventStoreExt, InMemoryEventStore};

    use super::*;
    use crate::order::{OrderCancelled, OrderStatus};

    fn service() -> OrderService<InMemoryEventStore> {
        OrderService::new(InMemoryEventStore::new()).unwrap()
    }

    #[tokio::test]
    async fn test_place_order() {
        let service = service();

        let order_id = service.place_order("ada").await.unwrap();
        let order = service.get_order(order_id).await.unwrap();

        assert_eq!(order.id, order_id);
        assert_eq!(order.customer, "ada");
        assert_eq!(order.status, OrderStatus::Draft);
        assert_eq!(order.version.as_i64(), 1);
    }

    #[tokio::test]
    async fn test_place_order_requires_customer() {
        let service = service();

        let err = service.place_order("").await.unwrap_err();

        assert!(matches!(err, DomainError::Order(OrderError::CustomerRequired)));
        assert_eq!(service.repository().store().stream_count().await, 0);
    }

    #[tokio::test]
    async fn test_line_lifecycle() {
        let service = service();
        let order_id = service.place_order("ada").await.unwrap();

        let widget = service
            .add_line(order_id, "SKU-001", 2, Money::from_cents(1000))
            .await
            .unwrap();
        let gadget = service
            .add_line(order_id, "SKU-002", 1, Money::from_cents(500))
            .await
            .unwrap();
        service.change_quantity(order_id, widget, 5).await.unwrap();
        service.remove_line(order_id, gadget).await.unwrap();

        let order = service.get_order(order_id).await.unwrap();
        assert_eq!(order.lines.len(), 1);
        assert_eq!(order.lines[0].quantity(), 5);
        assert_eq!(order.total, Money::from_cents(5000));
        assert_eq!(order.version.as_i64(), 5);
    }

    #[tokio::test]
    async fn test_submit_and_cancel() {
        let service = service();
        let order_id = service.place_order("ada").await.unwrap();
        service
            .add_line(order_id, "SKU-001", 3, Money::from_cents(200))
            .await
            .unwrap();

        assert_eq!(service.submit(order_id).await.unwrap(), Money::from_cents(600));
        assert!(matches!(
            service.submit(order_id).await,
            Err(DomainError::Order(OrderError::InvalidStateTransition { .. }))
        ));

        service.cancel(order_id, "changed mind").await.unwrap();
        let order = service.get_order(order_id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_events_carry_command_causation() {
        let service = service();
        let order_id = service.place_order("ada").await.unwrap();
        service.cancel(order_id, "dup").await.unwrap();

        let stream = service
            .repository()
            .store()
            .load_latest(order_id)
            .await
            .unwrap();
        let serializer = crate::order::serializer();
        let events: Vec<_> = stream
            .payloads()
            .map(|bytes| crate::codec::EventSerializer::deserialize(&serializer, bytes).unwrap())
            .collect();

        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.command_id().is_some()));
        assert_ne!(events[0].command_id(), events[1].command_id());
        assert!(events[1].payload_as::<OrderCancelled>().is_some());
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let service = service();
        let missing = Identity::new();

        assert!(matches!(
            service.get_order(missing).await,
            Err(DomainError::EntityNotFound(id)) if id == missing
        ));
        assert!(matches!(
            service.cancel(missing, "x").await,
            Err(DomainError::EntityNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_order_as_of() {
        let service = service();
        let order_id = service.place_order("ada").await.unwrap();
        service
            .add_line(order_id, "SKU-001", 1, Money::from_cents(100))
            .await
            .unwrap();

        let before = service
            .get_order_as_of(order_id, LoadBound::UpToVersion(event_store::Version::new(1)))
            .await
            .unwrap();

        assert!(before.lines.is_empty());
        assert_eq!(before.version.as_i64(), 1);
    }
}
