//! Entities: the mutable members of an aggregate.

use std::any::Any;
use std::fmt::Debug;

use common::Identity;

/// A member of an aggregate whose state changes only by applying events.
///
/// Entities are stored type-erased inside an [`Aggregate`](crate::Aggregate)
/// and recovered by downcasting, so implementors must be `'static`.
pub trait Entity: Any + Send + Sync + Debug + 'static {
    /// The entity's immutable identity.
    fn id(&self) -> Identity;
}

/// Constructs a blank entity for rehydration.
///
/// The repository wraps the blank instance in an aggregate and replays the
/// stream into it; the blank state itself is never persisted.
pub trait EntityFactory: Entity + Sized {
    fn empty(id: Identity) -> Self;
}

pub(crate) fn downcast_ref<T: Entity>(entity: &dyn Entity) -> Option<&T> {
    let any: &dyn Any = entity;
    any.downcast_ref::<T>()
}

pub(crate) fn type_id_of(entity: &dyn Entity) -> std::any::TypeId {
    let any: &dyn Any = entity;
    any.type_id()
}
