//! Prelude module.
//!
//! Contains all of the most common traits, structures, and functions that
//! a consumer of this library is expected to reach for.

pub use crate::{
    CommandBuffer, Component, ComponentId, ComponentMask, EcsError, Entity, EntityMap,
    EventBus, NonOwningGroup, Observer, OnAdded, OnRemoved, OnUpdated, OwningGroup,
    ParallelCommandBuffer, Registry, RuntimeView, SnapshotLoader, VecStorage, View,
    NULL_ENTITY,
};

#[cfg(feature = "parallel")]
pub use crate::Scheduler;
