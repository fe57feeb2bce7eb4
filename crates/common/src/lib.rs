//! Value types shared by the event store and the domain layer.

mod ids;
mod timestamp;
mod version;

pub use ids::{CommandId, EventId, Identity};
pub use timestamp::Timestamp;
pub use version::{InvalidVersion, Version};
