//! Observers: reactive accumulators of dirtied entities.
//!
//! An observer watches a set of component lifecycle signals and collects
//! the entities they fire for. The dirty set deduplicates naturally, drops
//! entities the moment they are destroyed and resets when the registry
//! clears. Systems that react to change (physics proxies, render caches)
//! consume the dirty set each frame and call [`Observer::clear`] when done.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

use smallvec::SmallVec;

use crate::comp::{Component, ComponentId};
use crate::entity::{Entity, Index};
use crate::error::EcsError;
use crate::event::{ComponentEventKind, EventBus};
use crate::signal::ScopedConnection;

/// Trigger: entity enters the dirty set when `T` is added.
pub struct OnAdded<T>(PhantomData<T>);

/// Trigger: entity enters the dirty set when `T` is removed (including via
/// `destroy`, after which the destroyed-entity purge takes it back out).
pub struct OnRemoved<T>(PhantomData<T>);

/// Trigger: entity enters the dirty set when `T` is patched or replaced.
pub struct OnUpdated<T>(PhantomData<T>);

/// One observer trigger; implemented by the `On*` marker types.
pub trait ObserverTrigger {
    #[doc(hidden)]
    fn descriptor() -> Result<(ComponentEventKind, ComponentId), EcsError>;
}

impl<T: Component> ObserverTrigger for OnAdded<T> {
    fn descriptor() -> Result<(ComponentEventKind, ComponentId), EcsError> {
        Ok((ComponentEventKind::Added, ComponentId::of::<T>()?))
    }
}

impl<T: Component> ObserverTrigger for OnRemoved<T> {
    fn descriptor() -> Result<(ComponentEventKind, ComponentId), EcsError> {
        Ok((ComponentEventKind::Removed, ComponentId::of::<T>()?))
    }
}

impl<T: Component> ObserverTrigger for OnUpdated<T> {
    fn descriptor() -> Result<(ComponentEventKind, ComponentId), EcsError> {
        Ok((ComponentEventKind::Updated, ComponentId::of::<T>()?))
    }
}

/// A tuple of observer triggers, as accepted by
/// [`Registry::observe`](crate::registry::Registry::observe):
/// `registry.observe::<(OnAdded<Pos>, OnRemoved<Pos>)>()`.
pub trait ObserverTriggers {
    #[doc(hidden)]
    fn descriptors() -> Result<SmallVec<[(ComponentEventKind, ComponentId); 8]>, EcsError>;
}

macro_rules! observer_triggers {
    ($($trigger:ident),+) => {
        impl<$($trigger: ObserverTrigger),+> ObserverTriggers for ($($trigger,)+) {
            fn descriptors(
            ) -> Result<SmallVec<[(ComponentEventKind, ComponentId); 8]>, EcsError> {
                let mut all = SmallVec::new();
                $(all.push($trigger::descriptor()?);)+
                Ok(all)
            }
        }
    };
}

observer_triggers! {A}
observer_triggers! {A, B}
observer_triggers! {A, B, C}
observer_triggers! {A, B, C, D}
observer_triggers! {A, B, C, D, E}
observer_triggers! {A, B, C, D, E, F}

/// Sparse set of entities: O(1) insert/remove/lookup, dense iteration,
/// natural deduplication.
#[derive(Default)]
struct EntitySet {
    sparse: Vec<Index>,
    dense: Vec<Entity>,
}

const ABSENT: Index = Index::MAX;

impl EntitySet {
    fn contains(&self, e: Entity) -> bool {
        match self.sparse.get(e.id() as usize) {
            Some(&slot) => slot != ABSENT && self.dense[slot as usize] == e,
            None => false,
        }
    }

    fn insert(&mut self, e: Entity) {
        if self.contains(e) {
            return;
        }
        let index = e.id() as usize;
        if self.sparse.len() <= index {
            self.sparse.resize(index + 1, ABSENT);
        }
        self.sparse[index] = self.dense.len() as Index;
        self.dense.push(e);
    }

    fn remove(&mut self, e: Entity) {
        if !self.contains(e) {
            return;
        }
        let slot = self.sparse[e.id() as usize] as usize;
        self.sparse[e.id() as usize] = ABSENT;
        self.dense.swap_remove(slot);
        if let Some(&moved) = self.dense.get(slot) {
            self.sparse[moved.id() as usize] = slot as Index;
        }
    }

    fn clear(&mut self) {
        self.sparse.clear();
        self.dense.clear();
    }
}

/// Accumulates the entities dirtied by its triggers since the last
/// [`Observer::clear`].
///
/// Every entity yielded by [`Observer::each`] is alive: destroyed entities
/// are purged from the set the moment `entity_destroyed` fires, and the
/// destroy path fires all component-removed events first. Dropping the
/// observer disconnects every hook.
pub struct Observer {
    set: Arc<Mutex<EntitySet>>,
    _connections: Vec<ScopedConnection>,
}

impl Observer {
    pub(crate) fn connect<Tr: ObserverTriggers>(bus: &mut EventBus) -> Result<Self, EcsError> {
        let set = Arc::new(Mutex::new(EntitySet::default()));
        let mut connections = Vec::new();

        for (kind, id) in Tr::descriptors()? {
            let dirty = set.clone();
            connections.push(bus.connect_component(kind, id, move |e| {
                lock(&dirty).insert(e);
            }));
        }

        let dirty = set.clone();
        connections.push(bus.entity_destroyed().connect(move |e| {
            lock(&dirty).remove(e);
        }));

        let dirty = set.clone();
        connections.push(bus.cleared().connect(move |_| {
            lock(&dirty).clear();
        }));

        Ok(Observer {
            set,
            _connections: connections,
        })
    }

    /// Invokes `f` with each dirty entity.
    ///
    /// The set is snapshotted first, so `f` may clear the observer or
    /// trigger further registry work without invalidating the walk.
    pub fn each<F>(&self, mut f: F)
    where
        F: FnMut(Entity),
    {
        let snapshot: Vec<Entity> = lock(&self.set).dense.clone();
        for e in snapshot {
            f(e);
        }
    }

    /// Number of dirty entities.
    pub fn count(&self) -> usize {
        lock(&self.set).dense.len()
    }

    /// Returns `true` if nothing is dirty.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Returns `true` if `e` is in the dirty set.
    pub fn contains(&self, e: Entity) -> bool {
        lock(&self.set).contains(e)
    }

    /// Empties the dirty set.
    pub fn clear(&self) {
        lock(&self.set).clear();
    }
}

fn lock(set: &Arc<Mutex<EntitySet>>) -> MutexGuard<'_, EntitySet> {
    set.lock().unwrap_or_else(|poison| poison.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    fn e(id: Index, gen: u32) -> Entity {
        Entity::new(id, gen)
    }

    #[test]
    fn entity_set_deduplicates() {
        let mut set = EntitySet::default();
        set.insert(e(1, 0));
        set.insert(e(1, 0));
        set.insert(e(2, 0));
        assert_eq!(set.dense.len(), 2);
    }

    #[test]
    fn entity_set_remove_swaps_back() {
        let mut set = EntitySet::default();
        set.insert(e(1, 0));
        set.insert(e(2, 0));
        set.insert(e(3, 0));
        set.remove(e(1, 0));
        assert!(!set.contains(e(1, 0)));
        assert!(set.contains(e(2, 0)));
        assert!(set.contains(e(3, 0)));
        assert_eq!(set.dense.len(), 2);
    }

    #[test]
    fn entity_set_checks_generation() {
        let mut set = EntitySet::default();
        set.insert(e(1, 0));
        assert!(!set.contains(e(1, 1)));
        set.remove(e(1, 1));
        assert!(set.contains(e(1, 0)));
    }
}
