//! Component storage: per-type sparse sets with pluggable dense containers.
//!
//! Each component type gets one [`ComponentStore`]: a sparse array mapping
//! entity indices to dense positions, a dense array of full entity handles
//! and a parallel dense array of component values held in a
//! [`StoragePolicy`] container. Erasure is split in two layers, so the
//! registry can hold stores of unrelated types while hot loops stay free of
//! virtual dispatch: [`AnyStore`] exposes the untyped operations the
//! registry itself needs, [`Store`] adds the typed ones, and a single
//! downcast recovers the typed trait object from which contiguous slices
//! are read.

pub use self::aligned::{AlignedVec, AlignedVecStorage};
pub use self::policies::{
    ConcurrentVecStorage, LockPolicy, MutexLock, StoragePolicy, VecStorage,
};

use std::any::Any;
use std::cmp::Ordering;

use ahash::AHashMap;

use crate::cell::{Ref, RefMut, TrustCell};
use crate::comp::{Component, ComponentId};
use crate::entity::{Entity, Index};
use crate::error::EcsError;

mod aligned;
mod policies;

/// Sparse-array slot meaning "no dense entry".
const TOMBSTONE: Index = Index::MAX;

/// What [`AnyStore::copy_entry`] did to the destination entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyOutcome {
    /// The destination did not have the component before.
    Added,
    /// The destination's component was overwritten.
    Updated,
}

/// The untyped face of a component store: everything the registry needs
/// without knowing the component type.
pub trait AnyStore: Any + Send + Sync {
    /// Upcast for downcasting to the concrete store wrapper.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// The component type this store holds.
    fn component_id(&self) -> ComponentId;

    /// Number of stored components.
    fn len(&self) -> usize;

    /// Returns `true` if the store holds nothing.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if the entity has this component. The check compares
    /// the full handle, so a stale generation never matches.
    fn contains(&self, e: Entity) -> bool;

    /// The dense entity array. `entities()[k]` is the entity whose
    /// component sits at dense position `k`.
    fn entities(&self) -> &[Entity];

    /// The dense position of an entity's component, if present.
    fn dense_index_of(&self, e: Entity) -> Option<usize>;

    /// Swaps two dense entries, entity handles, component values and
    /// sparse back-references alike. Reorder primitive used by the owning
    /// groups and the sorts.
    fn swap_dense(&mut self, a: usize, b: usize);

    /// Removes the entity's component if present, dropping the value.
    /// Returns whether anything was removed.
    fn remove_untyped(&mut self, e: Entity) -> bool;

    /// Clones `src`'s component onto `dst`. Returns `None` if `src` has no
    /// component here.
    fn copy_entry(&mut self, src: Entity, dst: Entity) -> Option<CopyOutcome>;

    /// Drops every component.
    fn clear(&mut self);

    /// Alignment guaranteed for the dense data, as reported by the policy.
    fn data_alignment(&self) -> usize;
}

/// The typed face of a component store.
///
/// Obtained from the registry with one downcast; after that, calls are
/// plain virtual dispatch, and the slice accessors let hot loops drop to
/// direct array walks.
pub trait Store<T: Component>: AnyStore {
    /// The component of `e`, if present.
    fn get(&self, e: Entity) -> Option<&T>;

    /// Mutable access to the component of `e`, if present.
    fn get_mut(&mut self, e: Entity) -> Option<&mut T>;

    /// Adds a component for `e`.
    ///
    /// Fails with [`EcsError::AlreadyPresent`] if `e` already has one.
    fn insert(&mut self, e: Entity, value: T) -> Result<(), EcsError>;

    /// Adds or overwrites the component for `e`, returning the previous
    /// value if there was one.
    fn replace_or_insert(&mut self, e: Entity, value: T) -> Option<T>;

    /// Removes and returns the component of `e`. Swap-with-back: the dense
    /// arrays stay contiguous and the moved-in element's sparse entry is
    /// updated.
    fn remove(&mut self, e: Entity) -> Option<T>;

    /// The dense component values, parallel to
    /// [`entities`](AnyStore::entities).
    fn data(&self) -> &[T];

    /// The dense component values, mutable.
    fn data_mut(&mut self) -> &mut [T];

    /// Sorts the dense arrays by component value. Stable.
    fn sort_by(&mut self, cmp: &mut dyn FnMut(&T, &T) -> Ordering);

    /// Permutes the dense arrays so entities appear in the order they
    /// appear in `order`; entities absent from `order` keep their relative
    /// order at the tail.
    fn sort_as(&mut self, order: &[Entity]);
}

/// Sparse-set storage for one component type.
///
/// Invariants, for all `k < len`:
/// `sparse[entities[k].id()] == k`, and `data[k]` is the component value of
/// `entities[k]`. Erasure is swap-with-back, keeping the dense arrays
/// contiguous.
pub struct ComponentStore<T, P = <T as Component>::Storage>
where
    T: Component,
    P: StoragePolicy<T>,
{
    id: ComponentId,
    sparse: Vec<Index>,
    entities: Vec<Entity>,
    data: P,
    _marker: std::marker::PhantomData<T>,
}

impl<T, P> ComponentStore<T, P>
where
    T: Component,
    P: StoragePolicy<T>,
{
    /// Creates an empty store.
    pub fn new() -> Result<Self, EcsError> {
        Ok(ComponentStore {
            id: ComponentId::of::<T>()?,
            sparse: Vec::new(),
            entities: Vec::new(),
            data: P::default(),
            _marker: std::marker::PhantomData,
        })
    }

    #[inline]
    fn sparse_slot(&self, e: Entity) -> Option<usize> {
        match self.sparse.get(e.id() as usize) {
            Some(&slot) if slot != TOMBSTONE => Some(slot as usize),
            _ => None,
        }
    }

    /// Applies a permutation in place: `perm[k]` names the current dense
    /// index of the element that should end up at position `k`.
    fn apply_permutation(&mut self, mut perm: Vec<usize>) {
        for i in 0..perm.len() {
            while perm[i] != i {
                let j = perm[i];
                self.swap_dense_entries(i, j);
                perm.swap(i, j);
            }
        }
    }

    fn swap_dense_entries(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.entities.swap(a, b);
        self.data.swap(a, b);
        self.sparse[self.entities[a].id() as usize] = a as Index;
        self.sparse[self.entities[b].id() as usize] = b as Index;
    }
}

impl<T, P> AnyStore for ComponentStore<T, P>
where
    T: Component,
    P: StoragePolicy<T>,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn component_id(&self) -> ComponentId {
        self.id
    }

    fn len(&self) -> usize {
        self.entities.len()
    }

    fn contains(&self, e: Entity) -> bool {
        match self.sparse_slot(e) {
            Some(slot) => self.entities[slot] == e,
            None => false,
        }
    }

    fn entities(&self) -> &[Entity] {
        &self.entities
    }

    fn dense_index_of(&self, e: Entity) -> Option<usize> {
        self.sparse_slot(e).filter(|&slot| self.entities[slot] == e)
    }

    fn swap_dense(&mut self, a: usize, b: usize) {
        self.swap_dense_entries(a, b);
    }

    fn remove_untyped(&mut self, e: Entity) -> bool {
        Store::remove(self, e).is_some()
    }

    fn copy_entry(&mut self, src: Entity, dst: Entity) -> Option<CopyOutcome> {
        let value = Store::get(self, src)?.clone();
        match self.replace_or_insert(dst, value) {
            Some(_) => Some(CopyOutcome::Updated),
            None => Some(CopyOutcome::Added),
        }
    }

    fn clear(&mut self) {
        // Drop the data last so a panicking component `Drop` cannot leave
        // sparse entries pointing at freed slots.
        self.sparse.clear();
        self.entities.clear();
        self.data.clear();
    }

    fn data_alignment(&self) -> usize {
        P::data_alignment()
    }
}

impl<T, P> Store<T> for ComponentStore<T, P>
where
    T: Component,
    P: StoragePolicy<T>,
{
    fn get(&self, e: Entity) -> Option<&T> {
        let slot = self.dense_index_of(e)?;
        Some(&self.data.as_slice()[slot])
    }

    fn get_mut(&mut self, e: Entity) -> Option<&mut T> {
        let slot = self.dense_index_of(e)?;
        Some(&mut self.data.as_mut_slice()[slot])
    }

    fn insert(&mut self, e: Entity, value: T) -> Result<(), EcsError> {
        if self.contains(e) {
            return Err(EcsError::AlreadyPresent(e));
        }
        let index = e.id() as usize;
        if self.sparse.len() <= index {
            self.sparse.resize(index + 1, TOMBSTONE);
        }
        debug_assert_eq!(self.sparse[index], TOMBSTONE, "stale sparse entry");
        self.sparse[index] = self.entities.len() as Index;
        self.entities.push(e);
        self.data.push(value);
        Ok(())
    }

    fn replace_or_insert(&mut self, e: Entity, value: T) -> Option<T> {
        match self.dense_index_of(e) {
            Some(slot) => {
                Some(std::mem::replace(&mut self.data.as_mut_slice()[slot], value))
            }
            None => {
                // Checked above; cannot fail with `AlreadyPresent`.
                let _ = self.insert(e, value);
                None
            }
        }
    }

    fn remove(&mut self, e: Entity) -> Option<T> {
        let slot = self.dense_index_of(e)?;
        self.sparse[e.id() as usize] = TOMBSTONE;
        let value = self.data.swap_remove(slot);
        self.entities.swap_remove(slot);
        if let Some(&moved) = self.entities.get(slot) {
            self.sparse[moved.id() as usize] = slot as Index;
        }
        Some(value)
    }

    fn data(&self) -> &[T] {
        self.data.as_slice()
    }

    fn data_mut(&mut self) -> &mut [T] {
        self.data.as_mut_slice()
    }

    fn sort_by(&mut self, cmp: &mut dyn FnMut(&T, &T) -> Ordering) {
        let values = self.data.as_slice();
        let mut perm: Vec<usize> = (0..values.len()).collect();
        perm.sort_by(|&a, &b| cmp(&values[a], &values[b]));
        self.apply_permutation(perm);
    }

    fn sort_as(&mut self, order: &[Entity]) {
        let rank: AHashMap<Entity, usize> = order
            .iter()
            .enumerate()
            .map(|(position, &e)| (e, position))
            .collect();
        let mut perm: Vec<usize> = (0..self.entities.len()).collect();
        // Stable: entities missing from `order` all rank last and keep
        // their relative order.
        perm.sort_by_key(|&k| rank.get(&self.entities[k]).copied().unwrap_or(usize::MAX));
        self.apply_permutation(perm);
    }
}

/// Boxed typed store behind the untyped face, so the registry can hold
/// heterogeneous stores and hand back `dyn Store<T>` after one downcast.
pub(crate) struct ErasedStore<T: Component> {
    inner: Box<dyn Store<T>>,
}

impl<T: Component> ErasedStore<T> {
    pub fn with_policy<P: StoragePolicy<T>>() -> Result<Self, EcsError> {
        Ok(ErasedStore {
            inner: Box::new(ComponentStore::<T, P>::new()?),
        })
    }

    pub fn typed(&self) -> &dyn Store<T> {
        &*self.inner
    }

    pub fn typed_mut(&mut self) -> &mut dyn Store<T> {
        &mut *self.inner
    }

    /// Whether the wrapped store was created with policy `P`.
    pub fn policy_is<P: StoragePolicy<T>>(&self) -> bool {
        self.inner.as_any().is::<ComponentStore<T, P>>()
    }
}

impl<T: Component> AnyStore for ErasedStore<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn component_id(&self) -> ComponentId {
        self.inner.component_id()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn contains(&self, e: Entity) -> bool {
        self.inner.contains(e)
    }

    fn entities(&self) -> &[Entity] {
        self.inner.entities()
    }

    fn dense_index_of(&self, e: Entity) -> Option<usize> {
        self.inner.dense_index_of(e)
    }

    fn swap_dense(&mut self, a: usize, b: usize) {
        self.inner.swap_dense(a, b);
    }

    fn remove_untyped(&mut self, e: Entity) -> bool {
        self.inner.remove_untyped(e)
    }

    fn copy_entry(&mut self, src: Entity, dst: Entity) -> Option<CopyOutcome> {
        self.inner.copy_entry(src, dst)
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    fn data_alignment(&self) -> usize {
        self.inner.data_alignment()
    }
}

/// Maps [`ComponentId`]s to type-erased stores. Owned by the registry;
/// stores are created lazily on first mutating use.
#[derive(Default)]
pub(crate) struct StoreRegistry {
    slots: Vec<Option<TrustCell<Box<dyn AnyStore>>>>,
    registered: Vec<ComponentId>,
}

impl StoreRegistry {
    /// The cell for `id`, if a store exists.
    pub fn cell(&self, id: ComponentId) -> Option<&TrustCell<Box<dyn AnyStore>>> {
        self.slots.get(id.index())?.as_ref()
    }

    /// Exclusive untyped access through `&mut self` (no borrow flag
    /// traffic).
    pub fn any_mut(&mut self, id: ComponentId) -> Option<&mut dyn AnyStore> {
        match self.slots.get_mut(id.index())? {
            Some(cell) => Some(&mut **cell.get_mut()),
            None => None,
        }
    }

    /// Exclusive typed access through `&mut self`.
    pub fn typed_mut<T: Component>(&mut self, id: ComponentId) -> Option<&mut dyn Store<T>> {
        let store = self.any_mut(id)?;
        Some(downcast_mut::<T>(store).typed_mut())
    }

    /// Returns the typed store for `T`, creating it with `T`'s default
    /// policy if it does not exist yet.
    pub fn ensure<T: Component>(&mut self) -> Result<(ComponentId, &mut dyn Store<T>), EcsError> {
        let id = ComponentId::of::<T>()?;
        if self.cell(id).is_none() {
            self.create::<T, T::Storage>(id)?;
        }
        // Just created above if it was missing.
        Ok((id, self.typed_mut::<T>(id).expect("store just ensured")))
    }

    /// Creates the store for `T` with policy `P`.
    ///
    /// Fails with [`EcsError::PolicyMismatch`] if a store with a different
    /// policy already exists; an existing store with the same policy is a
    /// no-op.
    pub fn create<T: Component, P: StoragePolicy<T>>(
        &mut self,
        id: ComponentId,
    ) -> Result<(), EcsError> {
        if let Some(cell) = self.slots.get_mut(id.index()).and_then(Option::as_mut) {
            let existing = downcast_ref::<T>(&**cell.get_mut());
            return if existing.policy_is::<P>() {
                Ok(())
            } else {
                Err(EcsError::PolicyMismatch)
            };
        }
        if self.slots.len() <= id.index() {
            self.slots.resize_with(id.index() + 1, || None);
        }
        let erased: Box<dyn AnyStore> = Box::new(ErasedStore::<T>::with_policy::<P>()?);
        self.slots[id.index()] = Some(TrustCell::new(erased));
        self.registered.push(id);
        Ok(())
    }

    /// Component ids with a live store, in registration order.
    pub fn ids(&self) -> &[ComponentId] {
        &self.registered
    }

    /// Clears every store's contents (the stores themselves stay
    /// registered).
    pub fn clear_all(&mut self) {
        for slot in self.slots.iter_mut().flatten() {
            slot.get_mut().clear();
        }
    }
}

/// Downcasts an untyped store reference to its typed wrapper.
///
/// The id-to-type mapping is maintained by the registry, so a mismatch is
/// an internal bug, not a user error.
pub(crate) fn downcast_ref<T: Component>(store: &dyn AnyStore) -> &ErasedStore<T> {
    store
        .as_any()
        .downcast_ref::<ErasedStore<T>>()
        .expect("component store type mismatch")
}

pub(crate) fn downcast_mut<T: Component>(store: &mut dyn AnyStore) -> &mut ErasedStore<T> {
    store
        .as_any_mut()
        .downcast_mut::<ErasedStore<T>>()
        .expect("component store type mismatch")
}

/// Maps a shared cell borrow to the typed store trait object.
pub(crate) fn typed_cell_ref<T: Component>(
    cell: Ref<'_, Box<dyn AnyStore>>,
) -> Ref<'_, dyn Store<T>> {
    cell.map(|boxed| downcast_ref::<T>(&**boxed).typed())
}

/// Maps an exclusive cell borrow to the typed store trait object.
pub(crate) fn typed_cell_mut<T: Component>(
    cell: RefMut<'_, Box<dyn AnyStore>>,
) -> RefMut<'_, dyn Store<T>> {
    cell.map(|boxed| downcast_mut::<T>(&mut **boxed).typed_mut())
}

/// Shared borrow of one component store, the way read-only systems and
/// entity-only view loops access component data.
///
/// Holding one keeps the store readable but not writable; drop it before
/// mutating the registry through a command-buffer flush on the same thread.
pub struct ReadStore<'a, T: Component> {
    inner: Ref<'a, dyn Store<T>>,
}

impl<'a, T: Component> ReadStore<'a, T> {
    pub(crate) fn new(inner: Ref<'a, dyn Store<T>>) -> Self {
        ReadStore { inner }
    }

    /// The component of `e`, if present.
    pub fn get(&self, e: Entity) -> Option<&T> {
        self.inner.get(e)
    }

    /// Returns `true` if `e` has the component.
    pub fn contains(&self, e: Entity) -> bool {
        self.inner.contains(e)
    }

    /// Number of stored components.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The dense entity array.
    pub fn entities(&self) -> &[Entity] {
        self.inner.entities()
    }

    /// The dense component values, parallel to [`entities`](Self::entities).
    pub fn data(&self) -> &[T] {
        self.inner.data()
    }
}

/// Exclusive borrow of one component store.
///
/// This is the sanctioned way for a scheduled system to write component
/// data: the scheduler's conflict analysis keeps writers of the same store
/// out of the same wave, and the underlying cell turns any violation into a
/// panic. Writes through this guard do not emit update events; use
/// [`Registry::patch`](crate::registry::Registry::patch) when observers
/// should notice.
pub struct WriteStore<'a, T: Component> {
    inner: RefMut<'a, dyn Store<T>>,
}

impl<'a, T: Component> WriteStore<'a, T> {
    pub(crate) fn new(inner: RefMut<'a, dyn Store<T>>) -> Self {
        WriteStore { inner }
    }

    /// The component of `e`, if present.
    pub fn get(&self, e: Entity) -> Option<&T> {
        self.inner.get(e)
    }

    /// Mutable access to the component of `e`, if present.
    pub fn get_mut(&mut self, e: Entity) -> Option<&mut T> {
        self.inner.get_mut(e)
    }

    /// Returns `true` if `e` has the component.
    pub fn contains(&self, e: Entity) -> bool {
        self.inner.contains(e)
    }

    /// Number of stored components.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the store holds nothing.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// The dense entity array.
    pub fn entities(&self) -> &[Entity] {
        self.inner.entities()
    }

    /// The dense component values.
    pub fn data(&self) -> &[T] {
        self.inner.data()
    }

    /// The dense component values, mutable.
    pub fn data_mut(&mut self) -> &mut [T] {
        self.inner.data_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Weight(u32);
    impl Component for Weight {
        type Storage = VecStorage<Self>;
    }

    fn entity(id: Index) -> Entity {
        Entity::new(id, 0)
    }

    fn store() -> ComponentStore<Weight> {
        ComponentStore::new().unwrap()
    }

    fn assert_sparse_dense_consistent(s: &ComponentStore<Weight>) {
        for (k, &e) in s.entities().iter().enumerate() {
            assert_eq!(s.dense_index_of(e), Some(k));
        }
    }

    #[test]
    fn insert_get_remove() {
        let mut s = store();
        let (a, b) = (entity(0), entity(5));
        s.insert(a, Weight(1)).unwrap();
        s.insert(b, Weight(2)).unwrap();

        assert_eq!(Store::get(&s, a), Some(&Weight(1)));
        assert_eq!(Store::get(&s, b), Some(&Weight(2)));
        assert_eq!(
            s.insert(a, Weight(9)),
            Err(EcsError::AlreadyPresent(a))
        );

        assert_eq!(Store::remove(&mut s, a), Some(Weight(1)));
        assert_eq!(Store::get(&s, a), None);
        // b moved into a's dense slot; its sparse entry must follow.
        assert_eq!(s.dense_index_of(b), Some(0));
        assert_sparse_dense_consistent(&s);
    }

    #[test]
    fn generation_check_in_contains() {
        let mut s = store();
        let old = Entity::new(3, 0);
        let new = Entity::new(3, 1);
        s.insert(old, Weight(7)).unwrap();

        assert!(s.contains(old));
        assert!(!s.contains(new));
        assert_eq!(Store::get(&s, new), None);
    }

    #[test]
    fn swap_dense_updates_sparse() {
        let mut s = store();
        for id in 0..4 {
            s.insert(entity(id), Weight(id)).unwrap();
        }
        s.swap_dense(0, 3);
        assert_eq!(s.entities()[0], entity(3));
        assert_eq!(s.entities()[3], entity(0));
        assert_sparse_dense_consistent(&s);
    }

    #[test]
    fn sort_by_value() {
        let mut s = store();
        for (id, w) in [(0u32, 30u32), (1, 10), (2, 20)] {
            s.insert(entity(id), Weight(w)).unwrap();
        }
        Store::sort_by(&mut s, &mut |a: &Weight, b: &Weight| a.0.cmp(&b.0));

        let weights: Vec<u32> = Store::data(&s).iter().map(|w| w.0).collect();
        assert_eq!(weights, vec![10, 20, 30]);
        assert_sparse_dense_consistent(&s);
        // Lookups still land on the right values.
        assert_eq!(Store::get(&s, entity(0)), Some(&Weight(30)));
    }

    #[test]
    fn sort_as_matches_reference_order() {
        let mut s = store();
        for id in 0..5 {
            s.insert(entity(id), Weight(id)).unwrap();
        }
        // Reference order lists 3, 1 plus an entity this store lacks.
        let order = [entity(3), entity(9), entity(1)];
        Store::sort_as(&mut s, &order);

        let ids: Vec<Index> = s.entities().iter().map(|e| e.id()).collect();
        // Members first in reference order, the rest keep relative order.
        assert_eq!(ids, vec![3, 1, 0, 2, 4]);
        assert_sparse_dense_consistent(&s);
    }

    #[test]
    fn copy_entry_reports_outcome() {
        let mut s = store();
        let (src, fresh, taken) = (entity(0), entity(1), entity(2));
        s.insert(src, Weight(42)).unwrap();
        s.insert(taken, Weight(7)).unwrap();

        assert_eq!(s.copy_entry(src, fresh), Some(CopyOutcome::Added));
        assert_eq!(s.copy_entry(src, taken), Some(CopyOutcome::Updated));
        assert_eq!(s.copy_entry(entity(9), fresh), None);
        assert_eq!(Store::get(&s, taken), Some(&Weight(42)));
    }

    #[test]
    fn registry_policy_mismatch() {
        #[derive(Clone)]
        struct Mass(f32);
        impl Component for Mass {
            type Storage = VecStorage<Self>;
        }

        let mut stores = StoreRegistry::default();
        let id = ComponentId::of::<Mass>().unwrap();
        stores.create::<Mass, VecStorage<Mass>>(id).unwrap();
        // Same policy again: fine.
        stores.create::<Mass, VecStorage<Mass>>(id).unwrap();
        assert_eq!(
            stores.create::<Mass, AlignedVecStorage<Mass, 32>>(id),
            Err(EcsError::PolicyMismatch)
        );
    }
}
