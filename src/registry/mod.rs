//! The registry: entity allocation, component stores, events, groups and
//! context, behind one façade.

pub use self::handle::{EntityHandle, EntityHandleMut};

use std::any::Any;
use std::cmp::Ordering;

use crate::cell::{Ref, TrustCell};
use crate::comp::{Component, ComponentId, ComponentMask};
use crate::entity::{Allocator, Entity};
use crate::error::EcsError;
use crate::event::EventBus;
use crate::group::{NonOwningGroup, OwningGroup};
use crate::observer::{Observer, ObserverTriggers};
use crate::storage::{
    typed_cell_mut, typed_cell_ref, AnyStore, CopyOutcome, ReadStore, StoragePolicy,
    StoreRegistry, WriteStore,
};
use crate::view::{RuntimeView, View, ViewSet};

use self::context::ContextMap;
use self::groups::{OwningGroupState, TrackedGroupState};

mod context;
pub(crate) mod groups;
mod handle;

/// The heart of the ECS: owns the entity allocator, every component store,
/// the event bus, all groups and the context map.
///
/// Mutating operations take `&mut self` and emit on the [`EventBus`] in the
/// orders documented per method. Read paths (`view`, `read_store`, groups)
/// borrow stores through `&self` with runtime-checked cells, which is what
/// lets the [`Scheduler`](crate::schedule::Scheduler) run non-conflicting
/// systems against the same registry concurrently.
#[derive(Default)]
pub struct Registry {
    allocator: Allocator,
    stores: StoreRegistry,
    events: EventBus,
    owning: Vec<OwningGroupState>,
    tracked: Vec<TrackedGroupState>,
    owned: ComponentMask,
    context: ContextMap,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ---- entities ----------------------------------------------------

    /// Creates a new entity.
    ///
    /// Emits `entity_created`. Fails with [`EcsError::OutOfEntities`] if the
    /// 32-bit index space is exhausted.
    pub fn create(&mut self) -> Result<Entity, EcsError> {
        let e = self.allocator.allocate()?;
        self.events.emit_created(e);
        Ok(e)
    }

    /// Destroys an entity and removes every component attached to it.
    ///
    /// For each component present, group membership is repaired and
    /// `on_removed` fires *before* the erase; after all components are gone
    /// and the entity is dead, `entity_destroyed` fires. Destroying a dead
    /// entity is a silent no-op.
    pub fn destroy(&mut self, e: Entity) {
        if !self.allocator.is_alive(e) {
            log::debug!("destroy on dead entity {:?} ignored", e);
            return;
        }
        for id in self.stores.ids().to_vec() {
            let present = self
                .stores
                .any_mut(id)
                .map_or(false, |store| store.contains(e));
            if !present {
                continue;
            }
            groups::on_removed(&mut self.stores, &mut self.owning, &mut self.tracked, id, e);
            self.events.emit_removed(id, e);
            self.stores
                .any_mut(id)
                .expect("store checked above")
                .remove_untyped(e);
        }
        self.allocator.deallocate(e);
        self.events.emit_destroyed(e);
    }

    /// Returns `true` if the handle refers to a live entity.
    #[inline]
    pub fn is_alive(&self, e: Entity) -> bool {
        self.allocator.is_alive(e)
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.allocator.len()
    }

    /// Returns `true` if no entity is alive.
    pub fn is_empty(&self) -> bool {
        self.entity_count() == 0
    }

    /// Iterates every live entity. Order is unspecified.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.allocator.iter()
    }

    // ---- components --------------------------------------------------

    /// Eagerly creates the store for `T` with its default policy. Stores
    /// are otherwise created lazily on first mutating use.
    pub fn register<T: Component>(&mut self) -> Result<(), EcsError> {
        self.stores.ensure::<T>().map(|_| ())
    }

    /// Creates the store for `T` with policy `P` instead of `T::Storage`.
    ///
    /// Must run before the store exists; an existing store with a different
    /// policy fails with [`EcsError::PolicyMismatch`], one with the same
    /// policy is a no-op.
    pub fn use_storage<T: Component, P: StoragePolicy<T>>(&mut self) -> Result<(), EcsError> {
        let id = ComponentId::of::<T>()?;
        self.stores.create::<T, P>(id)
    }

    /// Adds a component to a live entity.
    ///
    /// Emits `on_added` after the insert. Fails with
    /// [`EcsError::NotAlive`] or [`EcsError::AlreadyPresent`].
    pub fn add<T: Component>(&mut self, e: Entity, value: T) -> Result<(), EcsError> {
        if !self.allocator.is_alive(e) {
            return Err(EcsError::NotAlive(e));
        }
        let (id, store) = self.stores.ensure::<T>()?;
        store.insert(e, value)?;
        groups::on_added(&mut self.stores, &mut self.owning, &mut self.tracked, id, e);
        self.events.emit_added(id, e);
        Ok(())
    }

    /// Adds the component if absent, overwrites it otherwise.
    ///
    /// Emits `on_added` for an insert, `on_updated` for an overwrite.
    pub fn add_or_replace<T: Component>(&mut self, e: Entity, value: T) -> Result<(), EcsError> {
        if !self.allocator.is_alive(e) {
            return Err(EcsError::NotAlive(e));
        }
        let (id, store) = self.stores.ensure::<T>()?;
        match store.replace_or_insert(e, value) {
            Some(_) => self.events.emit_updated(id, e),
            None => {
                groups::on_added(&mut self.stores, &mut self.owning, &mut self.tracked, id, e);
                self.events.emit_added(id, e);
            }
        }
        Ok(())
    }

    /// Overwrites an existing component, returning the previous value.
    ///
    /// Emits `on_updated`. Fails with [`EcsError::NotAlive`] or
    /// [`EcsError::NotPresent`].
    pub fn replace<T: Component>(&mut self, e: Entity, value: T) -> Result<T, EcsError> {
        if !self.allocator.is_alive(e) {
            return Err(EcsError::NotAlive(e));
        }
        let id = ComponentId::of::<T>()?;
        let previous = self
            .stores
            .typed_mut::<T>(id)
            .and_then(|store| store.get_mut(e))
            .map(|slot| std::mem::replace(slot, value));
        match previous {
            Some(previous) => {
                self.events.emit_updated(id, e);
                Ok(previous)
            }
            None => Err(EcsError::NotPresent(e)),
        }
    }

    /// Returns the component, inserting `init()` first if absent.
    ///
    /// Emits `on_added` only when it inserts.
    pub fn get_or_insert_with<T: Component>(
        &mut self,
        e: Entity,
        init: impl FnOnce() -> T,
    ) -> Result<&mut T, EcsError> {
        if !self.allocator.is_alive(e) {
            return Err(EcsError::NotAlive(e));
        }
        let (id, store) = self.stores.ensure::<T>()?;
        if !store.contains(e) {
            store.insert(e, init())?;
            groups::on_added(&mut self.stores, &mut self.owning, &mut self.tracked, id, e);
            self.events.emit_added(id, e);
        }
        Ok(self
            .stores
            .typed_mut::<T>(id)
            .expect("store ensured above")
            .get_mut(e)
            .expect("component present"))
    }

    /// Removes and returns the component, if present. Absent component or
    /// dead entity: returns `None` without erroring.
    ///
    /// Emits `on_removed` *before* the erase, so listeners still observe
    /// the component.
    pub fn remove<T: Component>(&mut self, e: Entity) -> Option<T> {
        let id = ComponentId::of::<T>().ok()?;
        if !self
            .stores
            .typed_mut::<T>(id)
            .map_or(false, |store| store.contains(e))
        {
            return None;
        }
        groups::on_removed(&mut self.stores, &mut self.owning, &mut self.tracked, id, e);
        self.events.emit_removed(id, e);
        self.stores
            .typed_mut::<T>(id)
            .expect("store checked above")
            .remove(e)
    }

    /// Returns `true` if the live entity has the component.
    pub fn has<T: Component>(&self, e: Entity) -> bool {
        let Ok(id) = ComponentId::of::<T>() else {
            return false;
        };
        self.stores
            .cell(id)
            .map_or(false, |cell| cell.borrow().contains(e))
    }

    /// Shared access to the component of `e`, if present. The returned
    /// guard keeps the store borrowed.
    pub fn try_get<T: Component>(&self, e: Entity) -> Option<Ref<'_, T>> {
        let id = ComponentId::of::<T>().ok()?;
        let cell = self.stores.cell(id)?;
        typed_cell_ref::<T>(cell.borrow()).try_map(|store| store.get(e))
    }

    /// Mutable access to the component of `e`, if present. Does not emit
    /// `on_updated`; use [`Registry::patch`] when listeners should notice.
    pub fn get_mut<T: Component>(&mut self, e: Entity) -> Option<&mut T> {
        let id = ComponentId::of::<T>().ok()?;
        self.stores.typed_mut::<T>(id)?.get_mut(e)
    }

    /// Runs `f` on the component, then emits `on_updated`.
    ///
    /// Fails with [`EcsError::NotAlive`] or [`EcsError::NotPresent`].
    pub fn patch<T: Component>(
        &mut self,
        e: Entity,
        f: impl FnOnce(&mut T),
    ) -> Result<(), EcsError> {
        if !self.allocator.is_alive(e) {
            return Err(EcsError::NotAlive(e));
        }
        let id = ComponentId::of::<T>()?;
        match self.stores.typed_mut::<T>(id).and_then(|store| store.get_mut(e)) {
            Some(value) => {
                f(value);
                self.events.emit_updated(id, e);
                Ok(())
            }
            None => Err(EcsError::NotPresent(e)),
        }
    }

    /// Emits `on_updated` without changing the component ([`Registry::patch`]
    /// with an empty patch).
    pub fn touch<T: Component>(&mut self, e: Entity) -> Result<(), EcsError> {
        self.patch::<T>(e, |_| {})
    }

    /// Clones every component of `src` onto `dst`, returning how many were
    /// copied.
    ///
    /// Emits `on_added` per component new to `dst` and `on_updated` per
    /// overwrite. Returns `0` without erroring when either entity is dead
    /// or `src == dst`, so callers can sweep candidate sources freely.
    pub fn copy(&mut self, src: Entity, dst: Entity) -> usize {
        if src == dst || !self.allocator.is_alive(src) || !self.allocator.is_alive(dst) {
            return 0;
        }
        let mut copied = 0;
        for id in self.stores.ids().to_vec() {
            let outcome = self
                .stores
                .any_mut(id)
                .and_then(|store| store.copy_entry(src, dst));
            match outcome {
                Some(CopyOutcome::Added) => {
                    groups::on_added(&mut self.stores, &mut self.owning, &mut self.tracked, id, dst);
                    self.events.emit_added(id, dst);
                    copied += 1;
                }
                Some(CopyOutcome::Updated) => {
                    self.events.emit_updated(id, dst);
                    copied += 1;
                }
                None => {}
            }
        }
        copied
    }

    /// Empties the registry: every store cleared, every group reset, every
    /// entity dead.
    ///
    /// No per-entity events fire; observers are notified through the
    /// distinct reset signal instead. Slot generations stay monotonic, so
    /// handles from before the clear remain dead.
    pub fn clear(&mut self) {
        self.stores.clear_all();
        for group in &mut self.owning {
            group.len = 0;
        }
        for group in &mut self.tracked {
            group.entities.clear();
        }
        self.allocator.clear();
        self.events.emit_cleared();
    }

    // ---- sorting -----------------------------------------------------

    /// Sorts the dense arrays of `T`'s store by component value. Stable.
    ///
    /// A store with no entries (or never registered) is a no-op. Sorting a
    /// store owned by a group fails with [`EcsError::OwnershipConflict`].
    pub fn sort<T: Component>(
        &mut self,
        mut cmp: impl FnMut(&T, &T) -> Ordering,
    ) -> Result<(), EcsError> {
        let id = ComponentId::of::<T>()?;
        if self.owned.contains(id) {
            return Err(EcsError::OwnershipConflict);
        }
        if let Some(store) = self.stores.typed_mut::<T>(id) {
            store.sort_by(&mut cmp);
        }
        Ok(())
    }

    /// Permutes `T`'s store so its entities follow the dense order of
    /// `By`'s store; entities without `By` keep their relative order at the
    /// tail.
    pub fn sort_as<T: Component, By: Component>(&mut self) -> Result<(), EcsError> {
        let id = ComponentId::of::<T>()?;
        let by = ComponentId::of::<By>()?;
        if self.owned.contains(id) {
            return Err(EcsError::OwnershipConflict);
        }
        let order = match self.stores.any_mut(by) {
            Some(store) => store.entities().to_vec(),
            None => return Ok(()),
        };
        if let Some(store) = self.stores.typed_mut::<T>(id) {
            store.sort_as(&order);
        }
        Ok(())
    }

    // ---- stores, views, groups ---------------------------------------

    /// Shared borrow of `T`'s store, or `None` if it was never registered.
    pub fn read_store<T: Component>(&self) -> Option<ReadStore<'_, T>> {
        let id = ComponentId::of::<T>().ok()?;
        let cell = self.stores.cell(id)?;
        Some(ReadStore::new(typed_cell_ref::<T>(cell.borrow())))
    }

    /// Exclusive borrow of `T`'s store, or `None` if it was never
    /// registered.
    ///
    /// # Panics
    ///
    /// Panics if the store is already borrowed; in a scheduled system that
    /// means the system's declared masks were wrong.
    pub fn write_store<T: Component>(&self) -> Option<WriteStore<'_, T>> {
        let id = ComponentId::of::<T>().ok()?;
        let cell = self.stores.cell(id)?;
        Some(WriteStore::new(typed_cell_mut::<T>(cell.borrow_mut())))
    }

    /// A view over the intersection of the component types in `Q`, a tuple
    /// of `&T` / `&mut T` elements.
    ///
    /// ```
    /// # use kestrel_ecs::{Component, Registry, VecStorage};
    /// # #[derive(Clone)] struct Pos(f32); impl Component for Pos { type Storage = VecStorage<Self>; }
    /// # #[derive(Clone)] struct Vel(f32); impl Component for Vel { type Storage = VecStorage<Self>; }
    /// # let mut registry = Registry::new();
    /// # let e = registry.create().unwrap();
    /// # registry.add(e, Pos(0.0)).unwrap();
    /// # registry.add(e, Vel(1.0)).unwrap();
    /// registry.view::<(&mut Pos, &Vel)>().each(|_e, (pos, vel)| {
    ///     pos.0 += vel.0;
    /// });
    /// ```
    pub fn view<Q: ViewSet>(&self) -> View<'_, Q, ()> {
        View::new(self)
    }

    /// Like [`Registry::view`], additionally skipping entities that have
    /// any component type in the tuple `X`.
    pub fn view_excluding<Q: ViewSet, X: crate::comp::ComponentSet>(&self) -> View<'_, Q, X> {
        View::new(self)
    }

    /// A type-erased view over runtime include/exclude id lists.
    pub fn runtime_view(
        &self,
        include: &[ComponentId],
        exclude: &[ComponentId],
    ) -> RuntimeView<'_> {
        RuntimeView::new(self, include, exclude)
    }

    /// Creates (or retrieves) the owning group over the component types of
    /// `G`, reordering their stores so members share a dense prefix.
    ///
    /// Each component type may be owned by at most one group per registry;
    /// violating that fails with [`EcsError::OwnershipConflict`].
    /// Re-requesting a group with the same owned set returns the existing
    /// one.
    pub fn group<G: ViewSet>(&mut self) -> Result<OwningGroup<'_, G>, EcsError> {
        let ids = G::component_ids()?;
        G::register(self)?;

        let mut key: Vec<ComponentId> = ids.to_vec();
        key.sort_unstable();
        if let Some(index) = self.owning.iter().position(|g| g.key == key) {
            return Ok(OwningGroup::new(self, index));
        }

        for &id in &ids {
            if self.owned.contains(id) {
                return Err(EcsError::OwnershipConflict);
            }
        }

        let mut mask = ComponentMask::new();
        for &id in &ids {
            mask.add(id);
            self.owned.add(id);
        }
        let mut state = OwningGroupState {
            owned: ids.to_vec(),
            key,
            mask,
            len: 0,
        };
        groups::init_owning(&mut self.stores, &mut state);
        self.owning.push(state);
        Ok(OwningGroup::new(self, self.owning.len() - 1))
    }

    /// Retrieves the already-created owning group over the component types
    /// of `G`, without requiring exclusive registry access.
    pub fn try_group<G: ViewSet>(&self) -> Option<OwningGroup<'_, G>> {
        let mut key: Vec<ComponentId> = G::component_ids().ok()?.to_vec();
        key.sort_unstable();
        let index = self.owning.iter().position(|g| g.key == key)?;
        Some(OwningGroup::new(self, index))
    }

    /// Creates (or retrieves) the non-owning group over the component
    /// types of `G`: a tracked entity list, no store reordering, no
    /// ownership constraint.
    pub fn non_owning_group<G: ViewSet>(&mut self) -> Result<NonOwningGroup<'_, G>, EcsError> {
        let ids = G::component_ids()?;
        G::register(self)?;

        let mut key: Vec<ComponentId> = ids.to_vec();
        key.sort_unstable();
        if let Some(index) = self.tracked.iter().position(|g| g.key == key) {
            return Ok(NonOwningGroup::new(self, index));
        }

        let mut mask = ComponentMask::new();
        for &id in &ids {
            mask.add(id);
        }
        let mut state = TrackedGroupState {
            types: ids.to_vec(),
            key,
            mask,
            entities: Vec::new(),
        };
        groups::init_tracked(&mut self.stores, &mut state);
        self.tracked.push(state);
        Ok(NonOwningGroup::new(self, self.tracked.len() - 1))
    }

    /// Retrieves the already-created non-owning group over the component
    /// types of `G`, without requiring exclusive registry access.
    pub fn try_non_owning_group<G: ViewSet>(&self) -> Option<NonOwningGroup<'_, G>> {
        let mut key: Vec<ComponentId> = G::component_ids().ok()?.to_vec();
        key.sort_unstable();
        let index = self.tracked.iter().position(|g| g.key == key)?;
        Some(NonOwningGroup::new(self, index))
    }

    /// Creates an observer accumulating entities dirtied by the trigger
    /// tuple `Tr` (e.g. `(OnAdded<Pos>, OnUpdated<Pos>)`).
    pub fn observe<Tr: ObserverTriggers>(&mut self) -> Result<Observer, EcsError> {
        Observer::connect::<Tr>(&mut self.events)
    }

    /// A cheap read-only handle bundling the registry and an entity.
    pub fn handle(&self, e: Entity) -> EntityHandle<'_> {
        EntityHandle::new(self, e)
    }

    /// Like [`Registry::handle`], with mutation convenience.
    pub fn handle_mut(&mut self, e: Entity) -> EntityHandleMut<'_> {
        EntityHandleMut::new(self, e)
    }

    // ---- events & context --------------------------------------------

    /// The event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The event bus, for connecting component-signal listeners.
    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Stores a context value, replacing (and returning) a previous value
    /// of the same type.
    pub fn insert_context<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.context.insert(value)
    }

    /// The context value of type `T`.
    ///
    /// # Panics
    ///
    /// Panics if no such value was inserted; use [`Registry::try_context`]
    /// for a checked lookup.
    pub fn context<T: Any + Send + Sync>(&self) -> &T {
        self.context
            .get::<T>()
            .expect("no context value of the requested type")
    }

    /// The context value of type `T`, if present.
    pub fn try_context<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.context.get::<T>()
    }

    /// Mutable access to the context value of type `T`, if present.
    pub fn context_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.context.get_mut::<T>()
    }

    /// Removes and returns the context value of type `T`.
    pub fn remove_context<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.context.remove::<T>()
    }

    // ---- crate internals ---------------------------------------------

    pub(crate) fn store_cell(&self, id: ComponentId) -> Option<&TrustCell<Box<dyn AnyStore>>> {
        self.stores.cell(id)
    }

    pub(crate) fn owning_len(&self, index: usize) -> usize {
        self.owning[index].len
    }

    pub(crate) fn tracked_entities(&self, index: usize) -> &[Entity] {
        &self.tracked[index].entities
    }
}
