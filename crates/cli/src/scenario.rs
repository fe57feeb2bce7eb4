//! End-to-end order scenario run by the binary.

use std::fmt;

use common::{Identity, Version};
use domain::{
    DomainError, DomainEvent, Money, Order, OrderService, OrderStatus, OrderSummary, Session,
};
use event_store::{EventStore, LoadBound, SnapshotStore};
use tracing::{info, warn};

/// What the scenario observed.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub order_id: Identity,
    pub status: OrderStatus,
    pub lines: usize,
    pub total: Money,
    pub version: Version,
    pub snapshot_version: Version,
    pub conflict_detected: bool,
    pub snapshot_consistent: bool,
    pub lines_at_version_2: usize,
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "order {}", self.order_id)?;
        writeln!(f, "  status:              {}", self.status)?;
        writeln!(f, "  lines:               {}", self.lines)?;
        writeln!(f, "  total:               {}", self.total)?;
        writeln!(f, "  version:             {}", self.version)?;
        writeln!(f, "  snapshot at:         {}", self.snapshot_version)?;
        writeln!(f, "  conflict detected:   {}", self.conflict_detected)?;
        writeln!(f, "  snapshot consistent: {}", self.snapshot_consistent)?;
        write!(f, "  lines at version 2:  {}", self.lines_at_version_2)
    }
}

/// Places an order, edits it, snapshots it, races two sessions against it,
/// submits it, and reads it back at an earlier version.
#[tracing::instrument(skip_all)]
pub async fn run<S>(service: &OrderService<S>) -> Result<ScenarioReport, DomainError>
where
    S: EventStore + SnapshotStore,
{
    let repo = service.repository();

    let order_id = service.place_order("Ada Lovelace").await?;
    let gears = service
        .add_line(order_id, "SKU-GEAR", 2, Money::from_cents(1250))
        .await?;
    service
        .add_line(order_id, "SKU-CRANK", 1, Money::from_cents(499))
        .await?;
    service.change_quantity(order_id, gears, 3).await?;
    info!(%order_id, "order drafted");

    let snapshot_version = {
        let mut session = Session::new();
        let aggregate = repo.find::<Order>(&mut session, order_id).await?;
        repo.save_snapshot(aggregate).await?
    };

    let conflict_detected = race_two_sessions(service, order_id).await?;

    let total = service.submit(order_id).await?;
    info!(%order_id, %total, "order submitted");

    let current = service.get_order(order_id).await?;
    let restored = {
        let mut session = Session::new();
        let aggregate = repo.find_from_snapshot::<Order>(&mut session, order_id).await?;
        OrderSummary::from_aggregate(aggregate)?
    };
    let snapshot_consistent = restored == current;
    if !snapshot_consistent {
        warn!(%order_id, "snapshot replay diverged from full replay");
    }

    let earlier = service
        .get_order_as_of(order_id, LoadBound::UpToVersion(Version::new(2)))
        .await?;

    Ok(ScenarioReport {
        order_id,
        status: current.status,
        lines: current.lines.len(),
        total: current.total,
        version: current.version,
        snapshot_version,
        conflict_detected,
        snapshot_consistent,
        lines_at_version_2: earlier.lines.len(),
    })
}

/// Loads the order into two sessions, commits one, and reports whether the
/// other was refused.
async fn race_two_sessions<S>(
    service: &OrderService<S>,
    order_id: Identity,
) -> Result<bool, DomainError>
where
    S: EventStore,
{
    let repo = service.repository();
    let mut first = Session::new();
    let mut second = Session::new();

    let winner = repo.find::<Order>(&mut first, order_id).await?;
    let loser = repo.find::<Order>(&mut second, order_id).await?;

    let added = root(winner)?.add_line("SKU-LEVER".into(), 1, Money::from_cents(2000))?;
    winner.apply(DomainEvent::new(order_id, added))?;
    let cancelled = root(loser)?.cancel("duplicate order")?;
    loser.apply(DomainEvent::new(order_id, cancelled))?;

    repo.commit_changes(&mut first).await?;
    match repo.commit_changes(&mut second).await {
        Ok(_) => Ok(false),
        Err(e) if e.is_conflict() => {
            info!(%order_id, error = %e, "stale session refused");
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

fn root(aggregate: &domain::Aggregate) -> Result<&Order, DomainError> {
    aggregate.root::<Order>().ok_or(DomainError::MissingRoot)
}
