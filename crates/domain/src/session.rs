//! The unit of work.

use std::collections::HashMap;

use common::Identity;

use crate::aggregate::Aggregate;
use crate::error::{ConflictReason, DomainError};

/// Aggregates loaded or created within one logical unit of work.
///
/// A session is an explicit value passed to repository calls and is not
/// meant to be shared between tasks. It tracks at most one aggregate per
/// identity and owns what it tracks, so an aggregate cannot be added twice.
#[derive(Debug, Default)]
pub struct Session {
    aggregates: HashMap<Identity, Aggregate>,
    order: Vec<Identity>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a new or modified aggregate for the next commit.
    pub fn add(&mut self, aggregate: Aggregate) -> Result<Identity, DomainError> {
        if !aggregate.has_uncommitted_changes() {
            return Err(DomainError::IllegalArgument(
                "aggregate has no uncommitted changes".to_string(),
            ));
        }
        let tracked = self.track(aggregate)?;
        tracked.id().ok_or(DomainError::MissingRoot)
    }

    /// Tracks an aggregate regardless of pending changes.
    pub(crate) fn track(&mut self, aggregate: Aggregate) -> Result<&mut Aggregate, DomainError> {
        let id = aggregate.id().ok_or(DomainError::MissingRoot)?;
        if self.aggregates.contains_key(&id) {
            tracing::warn!(aggregate_id = %id, "aggregate already tracked in session");
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: id,
                reason: ConflictReason::DuplicateInstance,
            });
        }

        self.order.push(id);
        Ok(self.aggregates.entry(id).or_insert(aggregate))
    }

    pub fn get(&self, id: Identity) -> Option<&Aggregate> {
        self.aggregates.get(&id)
    }

    pub fn get_mut(&mut self, id: Identity) -> Option<&mut Aggregate> {
        self.aggregates.get_mut(&id)
    }

    pub fn contains(&self, id: Identity) -> bool {
        self.aggregates.contains_key(&id)
    }

    /// Stops tracking an aggregate and hands it back.
    pub fn detach(&mut self, id: Identity) -> Option<Aggregate> {
        let aggregate = self.aggregates.remove(&id)?;
        self.order.retain(|tracked| *tracked != id);
        Some(aggregate)
    }

    /// Tracked identities in the order they entered the session.
    pub fn ids(&self) -> &[Identity] {
        &self.order
    }

    pub fn has_uncommitted_changes(&self) -> bool {
        self.aggregates
            .values()
            .any(Aggregate::has_uncommitted_changes)
    }

    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }

    pub fn clear(&mut self) {
        self.aggregates.clear();
        self.order.clear();
    }
}
