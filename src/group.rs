//! Group handles: cached iteration over component intersections.
//!
//! An [`OwningGroup`] keeps its members packed into a shared dense prefix
//! of every owned store, so `each` is a flat index walk with no sparse
//! probes. A [`NonOwningGroup`] tracks its members in a private entity list
//! instead, leaving store order untouched. It is slower to iterate, but free of
//! the one-owner-per-type constraint and compatible with sorting.
//!
//! Handles are created by [`Registry::group`] and
//! [`Registry::non_owning_group`]; the membership state lives in the
//! registry and is kept current by every add/remove path, so a handle is
//! just `(registry, group index)`.
//!
//! [`Registry::group`]: crate::registry::Registry::group
//! [`Registry::non_owning_group`]: crate::registry::Registry::non_owning_group

use std::marker::PhantomData;

use crate::entity::Entity;
use crate::registry::Registry;
use crate::view::{FetchSet, ViewSet};

/// Handle to an owning group over the component types of `G`.
///
/// Guarantees that `[0, len)` of every owned store's dense array holds
/// exactly the entities possessing all owned types, with each entity at the
/// same dense index in every store.
pub struct OwningGroup<'w, G: ViewSet> {
    registry: &'w Registry,
    index: usize,
    marker: PhantomData<G>,
}

impl<'w, G: ViewSet> OwningGroup<'w, G> {
    pub(crate) fn new(registry: &'w Registry, index: usize) -> Self {
        OwningGroup {
            registry,
            index,
            marker: PhantomData,
        }
    }

    /// Number of member entities.
    pub fn len(&self) -> usize {
        self.registry.owning_len(self.index)
    }

    /// Returns `true` if the group has no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `e` is a member.
    pub fn contains(&self, e: Entity) -> bool {
        let Some(fetches) = <G::Fetch<'w> as FetchSet<'w>>::fetch(self.registry) else {
            return false;
        };
        // Members occupy the prefix of every owned store; checking the
        // first store's prefix suffices.
        let len = self.len();
        (0..len).any(|k| fetches.entity_at(0, k) == e)
    }

    /// Invokes `f` with each member and its components, walking the packed
    /// prefix by dense index, with no sparse lookups.
    pub fn each<F>(&self, mut f: F)
    where
        F: for<'a> FnMut(Entity, <G::Fetch<'w> as FetchSet<'w>>::Item<'a>),
    {
        let Some(mut fetches) = <G::Fetch<'w> as FetchSet<'w>>::fetch(self.registry) else {
            return;
        };
        let len = self.len();
        for k in 0..len {
            let e = fetches.entity_at(0, k);
            // SAFETY: Inside the group prefix every owned store has an
            // entry at `k`, and they all belong to the same entity.
            let items = unsafe { fetches.items_at(k) };
            f(e, items);
        }
    }

    /// Iterates the member entities in prefix order.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ + use<'_, 'w, G> {
        let fetches = <G::Fetch<'w> as FetchSet<'w>>::fetch(self.registry);
        let len = self.len();
        (0..len).filter_map(move |k| fetches.as_ref().map(|f| f.entity_at(0, k)))
    }
}

/// Handle to a non-owning group over the component types of `G`.
///
/// Tracks exactly the entities possessing all listed types in a private
/// list; component access during `each` is one sparse lookup per type.
pub struct NonOwningGroup<'w, G: ViewSet> {
    registry: &'w Registry,
    index: usize,
    marker: PhantomData<G>,
}

impl<'w, G: ViewSet> NonOwningGroup<'w, G> {
    pub(crate) fn new(registry: &'w Registry, index: usize) -> Self {
        NonOwningGroup {
            registry,
            index,
            marker: PhantomData,
        }
    }

    /// Number of member entities.
    pub fn len(&self) -> usize {
        self.registry.tracked_entities(self.index).len()
    }

    /// Returns `true` if the group has no members.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `e` is a member. Linear in the group size;
    /// callers visiting every member should use [`Self::each`].
    pub fn contains(&self, e: Entity) -> bool {
        self.registry
            .tracked_entities(self.index)
            .iter()
            .any(|&member| member == e)
    }

    /// Invokes `f` with each member and its components.
    pub fn each<F>(&self, mut f: F)
    where
        F: for<'a> FnMut(Entity, <G::Fetch<'w> as FetchSet<'w>>::Item<'a>),
    {
        let Some(mut fetches) = <G::Fetch<'w> as FetchSet<'w>>::fetch(self.registry) else {
            return;
        };
        for &e in self.registry.tracked_entities(self.index) {
            // SAFETY: The tracked list is maintained on every add/remove
            // path; members have every listed component.
            let items = unsafe { fetches.items(e) };
            f(e, items);
        }
    }

    /// Iterates the member entities.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        self.registry.tracked_entities(self.index).iter().copied()
    }
}
