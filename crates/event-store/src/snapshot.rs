use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Identity, Result, Timestamp, Version};

/// A captured aggregate state at a specific stream version.
///
/// Snapshots only let a reader skip replaying the batches up to `version`.
/// Replaying from a snapshot must produce the same state as a full replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The aggregate this snapshot belongs to.
    pub aggregate_id: Identity,

    /// The type of aggregate (e.g., "Order").
    pub aggregate_type: String,

    /// The stream version the state reflects.
    pub version: Version,

    /// When the snapshot was taken.
    pub timestamp: Timestamp,

    /// The serialized aggregate state.
    pub state: serde_json::Value,
}

impl Snapshot {
    /// Creates a new snapshot.
    pub fn new(
        aggregate_id: Identity,
        aggregate_type: impl Into<String>,
        version: Version,
        state: serde_json::Value,
    ) -> Self {
        Self {
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version,
            timestamp: Timestamp::now(),
            state,
        }
    }

    /// Creates a snapshot from a serializable state.
    pub fn from_state<T: Serialize>(
        aggregate_id: Identity,
        aggregate_type: impl Into<String>,
        version: Version,
        state: &T,
    ) -> std::result::Result<Self, serde_json::Error> {
        Ok(Self::new(
            aggregate_id,
            aggregate_type,
            version,
            serde_json::to_value(state)?,
        ))
    }

    /// Deserializes the snapshot state into a concrete type.
    pub fn into_state<T: for<'de> Deserialize<'de>>(
        self,
    ) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_value(self.state)
    }
}

/// Storage for the latest snapshot per aggregate.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Saves a snapshot, replacing any earlier one for the same aggregate.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Returns the latest snapshot for an aggregate, if any.
    async fn find_latest(&self, aggregate_id: Identity) -> Result<Option<Snapshot>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Counter {
        hits: u32,
    }

    #[test]
    fn state_round_trips_through_json() {
        let id = Identity::new();
        let snapshot =
            Snapshot::from_state(id, "Counter", Version::new(4), &Counter { hits: 9 }).unwrap();

        assert_eq!(snapshot.aggregate_id, id);
        assert_eq!(snapshot.version, Version::new(4));
        assert_eq!(snapshot.into_state::<Counter>().unwrap(), Counter { hits: 9 });
    }
}
