#![warn(missing_docs)]

//! # Kestrel ECS
//!
//! A sparse-set Entity-Component-System runtime: entities are generational
//! handles, components live in per-type sparse-set stores with pluggable
//! dense containers, and behavior iterates over component intersections
//! through views and groups.
//!
//! ## Overview
//!
//! * [`Registry`]: the facade owning the entity allocator, every
//!   component store, the [`EventBus`], the groups and the context map.
//! * [`View`]/[`RuntimeView`]: read/write iteration over component
//!   intersections with optional exclusions.
//! * [`OwningGroup`]/[`NonOwningGroup`]: cached iteration; owning groups
//!   physically pack their members into a shared dense prefix.
//! * [`Observer`]: accumulates entities dirtied by lifecycle signals.
//! * [`CommandBuffer`]/[`ParallelCommandBuffer`]: deferred mutation,
//!   flushed at a barrier.
//! * [`Scheduler`]: runs systems in parallel under declared read/write
//!   masks (`parallel` feature, on by default).
//! * [`Snapshot`]/[`SnapshotLoader`]: binary save/restore with
//!   cross-entity reference remapping.
//!
//! ## Example
//!
//! ```
//! use kestrel_ecs::prelude::*;
//!
//! #[derive(Clone)]
//! struct Pos(f32, f32);
//! impl Component for Pos {
//!     type Storage = VecStorage<Self>;
//! }
//!
//! #[derive(Clone)]
//! struct Vel(f32, f32);
//! impl Component for Vel {
//!     type Storage = VecStorage<Self>;
//! }
//!
//! let mut registry = Registry::new();
//! let e = registry.create().unwrap();
//! registry.add(e, Pos(0.0, 0.0)).unwrap();
//! registry.add(e, Vel(1.0, 2.0)).unwrap();
//!
//! registry.view::<(&mut Pos, &Vel)>().each(|_e, (pos, vel)| {
//!     pos.0 += vel.0;
//!     pos.1 += vel.1;
//! });
//! ```

pub use crate::{
    comp::{Component, ComponentId, ComponentMask, ComponentSet, MAX_COMPONENT_TYPES},
    command::{CommandBuffer, ParallelCommandBuffer, PendingEntity, Target},
    entity::{Entity, Index, NULL_ENTITY},
    error::EcsError,
    event::{ComponentEventKind, EventBus},
    group::{NonOwningGroup, OwningGroup},
    observer::{Observer, ObserverTrigger, ObserverTriggers, OnAdded, OnRemoved, OnUpdated},
    process::{Process, ProcessChain, ProcessScheduler, ProcessState, Tick},
    registry::{EntityHandle, EntityHandleMut, Registry},
    signal::{ScopedConnection, Signal},
    snapshot::{BinaryReader, BinaryWriter, EntityMap, Snapshot, SnapshotLoader},
    storage::{
        AlignedVec, AlignedVecStorage, AnyStore, ComponentStore, ConcurrentVecStorage,
        CopyOutcome, LockPolicy, MutexLock, ReadStore, StoragePolicy, Store, VecStorage,
        WriteStore,
    },
    view::{RuntimeView, View, ViewElem, ViewFetch, ViewSet},
};

#[cfg(feature = "parallel")]
pub use crate::schedule::{Scheduler, SystemFn};

pub mod cell;
pub mod prelude;

mod command;
mod comp;
mod entity;
mod error;
mod event;
mod group;
mod observer;
mod process;
mod registry;
#[cfg(feature = "parallel")]
mod schedule;
mod signal;
mod snapshot;
mod storage;
mod view;
