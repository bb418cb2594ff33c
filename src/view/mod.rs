//! Views: read/write iteration over component intersections.
//!
//! A view is parameterized by a tuple of reference elements, `&T` for
//! shared access and `&mut T` for exclusive access, plus an optional tuple of
//! excluded component types:
//!
//! ```
//! # use kestrel_ecs::{Component, Registry, VecStorage};
//! # #[derive(Clone)] struct Pos(f32); impl Component for Pos { type Storage = VecStorage<Self>; }
//! # #[derive(Clone)] struct Vel(f32); impl Component for Vel { type Storage = VecStorage<Self>; }
//! # #[derive(Clone)] struct Frozen; impl Component for Frozen { type Storage = VecStorage<Self>; }
//! # let mut registry = Registry::new();
//! registry
//!     .view_excluding::<(&mut Pos, &Vel), (Frozen,)>()
//!     .each(|_entity, (pos, vel)| pos.0 += vel.0);
//! ```
//!
//! Iteration picks the smallest included store as the pivot, walks its
//! dense entity array and probes the remaining stores for presence (and the
//! excluded stores for absence). Store borrows are taken once at view
//! construction; the loop body runs on cached slices.

pub use self::runtime::RuntimeView;

mod runtime;

use std::marker::PhantomData;

use smallvec::SmallVec;

use crate::cell::Ref;
use crate::comp::{Component, ComponentId, ComponentSet};
use crate::entity::Entity;
use crate::error::EcsError;
use crate::registry::Registry;
use crate::storage::{typed_cell_mut, typed_cell_ref, AnyStore, Store};

/// One element of a view tuple: `&T` or `&mut T`.
pub trait ViewElem {
    /// The component type accessed.
    type Component: Component;
    /// The store borrow backing this element.
    type Fetch<'w>: ViewFetch<'w, Component = Self::Component>;
}

impl<'e, T: Component> ViewElem for &'e T {
    type Component = T;
    type Fetch<'w> = ReadFetch<'w, T>;
}

impl<'e, T: Component> ViewElem for &'e mut T {
    type Component = T;
    type Fetch<'w> = WriteFetch<'w, T>;
}

/// A borrowed store producing items for one view element.
pub trait ViewFetch<'w>: Sized {
    /// The component type accessed.
    type Component: Component;
    /// What the element yields per entity; the lifetime is scoped to one
    /// loop iteration so exclusive items cannot alias across iterations.
    type Item<'a>
    where
        Self: 'a;

    /// Borrows the store. `None` if it was never registered.
    fn fetch(registry: &'w Registry) -> Option<Self>;

    /// Number of entities in the store.
    fn len(&self) -> usize;

    /// The store's dense entity array.
    fn entities(&self) -> &[Entity];

    /// Whether the store has a component for `e`.
    fn contains(&self, e: Entity) -> bool;

    /// The item for `e`.
    ///
    /// # Safety
    ///
    /// `e` must be present in the store.
    unsafe fn get(&mut self, e: Entity) -> Self::Item<'_>;

    /// The item at dense position `k`.
    ///
    /// # Safety
    ///
    /// `k` must be below [`len`](Self::len).
    unsafe fn get_at(&mut self, k: usize) -> Self::Item<'_>;
}

/// Shared-store fetch backing `&T` elements.
pub struct ReadFetch<'w, T: Component> {
    store: Ref<'w, dyn Store<T>>,
}

impl<'w, T: Component> ViewFetch<'w> for ReadFetch<'w, T> {
    type Component = T;
    type Item<'a> = &'a T where Self: 'a;

    fn fetch(registry: &'w Registry) -> Option<Self> {
        let id = ComponentId::of::<T>().ok()?;
        let cell = registry.store_cell(id)?;
        Some(ReadFetch {
            store: typed_cell_ref::<T>(cell.borrow()),
        })
    }

    fn len(&self) -> usize {
        self.store.len()
    }

    fn entities(&self) -> &[Entity] {
        self.store.entities()
    }

    fn contains(&self, e: Entity) -> bool {
        self.store.contains(e)
    }

    unsafe fn get(&mut self, e: Entity) -> &T {
        // SAFETY: Caller guarantees presence.
        unsafe { self.store.get(e).unwrap_unchecked() }
    }

    unsafe fn get_at(&mut self, k: usize) -> &T {
        // SAFETY: Caller guarantees `k < len`.
        unsafe { self.store.data().get_unchecked(k) }
    }
}

/// Exclusive-store fetch backing `&mut T` elements.
pub struct WriteFetch<'w, T: Component> {
    store: crate::cell::RefMut<'w, dyn Store<T>>,
}

impl<'w, T: Component> ViewFetch<'w> for WriteFetch<'w, T> {
    type Component = T;
    type Item<'a> = &'a mut T where Self: 'a;

    fn fetch(registry: &'w Registry) -> Option<Self> {
        let id = ComponentId::of::<T>().ok()?;
        let cell = registry.store_cell(id)?;
        Some(WriteFetch {
            store: typed_cell_mut::<T>(cell.borrow_mut()),
        })
    }

    fn len(&self) -> usize {
        self.store.len()
    }

    fn entities(&self) -> &[Entity] {
        self.store.entities()
    }

    fn contains(&self, e: Entity) -> bool {
        self.store.contains(e)
    }

    unsafe fn get(&mut self, e: Entity) -> &mut T {
        // SAFETY: Caller guarantees presence.
        unsafe { self.store.get_mut(e).unwrap_unchecked() }
    }

    unsafe fn get_at(&mut self, k: usize) -> &mut T {
        // SAFETY: Caller guarantees `k < len`.
        unsafe { self.store.data_mut().get_unchecked_mut(k) }
    }
}

/// A tuple of view elements.
pub trait ViewSet {
    /// The matching tuple of store borrows.
    type Fetch<'w>: FetchSet<'w>;

    /// Ids of the accessed component types, in tuple order.
    fn component_ids() -> Result<SmallVec<[ComponentId; 8]>, EcsError>;

    /// Ensures a store exists for every accessed type (used by group
    /// construction, which must be able to reorder the stores).
    fn register(registry: &mut Registry) -> Result<(), EcsError>;
}

/// A tuple of store borrows; what a [`View`] actually iterates.
pub trait FetchSet<'w>: Sized {
    /// One item per element, lifetimes scoped to a single loop iteration.
    type Item<'a>
    where
        Self: 'a;

    /// Borrows every store. `None` if any is missing.
    fn fetch(registry: &'w Registry) -> Option<Self>;

    /// Index of the smallest store, the iteration pivot.
    fn pivot(&self) -> usize;

    /// Length of store `i`.
    fn len_at(&self, i: usize) -> usize;

    /// Entity at dense position `k` of store `i`.
    fn entity_at(&self, i: usize, k: usize) -> Entity;

    /// Whether every store except `skip` contains `e`.
    fn contains_all_except(&self, skip: usize, e: Entity) -> bool;

    /// Whether every store contains `e`.
    fn contains_all(&self, e: Entity) -> bool;

    /// Items for `e` from every store.
    ///
    /// # Safety
    ///
    /// Every store must contain `e`.
    unsafe fn items(&mut self, e: Entity) -> Self::Item<'_>;

    /// Items at the same dense position `k` in every store. Only
    /// meaningful inside an owning group's prefix, where the stores agree
    /// on dense order.
    ///
    /// # Safety
    ///
    /// `k` must be below every store's length.
    unsafe fn items_at(&mut self, k: usize) -> Self::Item<'_>;
}

macro_rules! view_set {
    ($($elem:ident . $idx:tt),+) => {
        impl<$($elem: ViewElem),+> ViewSet for ($($elem,)+) {
            type Fetch<'w> = ($($elem::Fetch<'w>,)+);

            fn component_ids() -> Result<SmallVec<[ComponentId; 8]>, EcsError> {
                let mut ids = SmallVec::new();
                $(ids.push(ComponentId::of::<$elem::Component>()?);)+
                Ok(ids)
            }

            fn register(registry: &mut Registry) -> Result<(), EcsError> {
                $(registry.register::<$elem::Component>()?;)+
                Ok(())
            }
        }

        impl<'w, $($elem: ViewFetch<'w>),+> FetchSet<'w> for ($($elem,)+) {
            type Item<'a> = ($($elem::Item<'a>,)+) where Self: 'a;

            fn fetch(registry: &'w Registry) -> Option<Self> {
                Some(($($elem::fetch(registry)?,)+))
            }

            fn pivot(&self) -> usize {
                let lens = [$(self.$idx.len()),+];
                let mut best = 0;
                for (i, &len) in lens.iter().enumerate() {
                    if len < lens[best] {
                        best = i;
                    }
                }
                best
            }

            fn len_at(&self, i: usize) -> usize {
                match i {
                    $($idx => self.$idx.len(),)+
                    _ => unreachable!(),
                }
            }

            fn entity_at(&self, i: usize, k: usize) -> Entity {
                match i {
                    $($idx => self.$idx.entities()[k],)+
                    _ => unreachable!(),
                }
            }

            fn contains_all_except(&self, skip: usize, e: Entity) -> bool {
                $((skip == $idx || self.$idx.contains(e)) &&)+ true
            }

            fn contains_all(&self, e: Entity) -> bool {
                $(self.$idx.contains(e) &&)+ true
            }

            unsafe fn items(&mut self, e: Entity) -> Self::Item<'_> {
                // SAFETY: Forwarded to the caller per element.
                unsafe { ($(self.$idx.get(e),)+) }
            }

            unsafe fn items_at(&mut self, k: usize) -> Self::Item<'_> {
                // SAFETY: Forwarded to the caller per element.
                unsafe { ($(self.$idx.get_at(k),)+) }
            }
        }
    };
}

view_set! {A.0}
view_set! {A.0, B.1}
view_set! {A.0, B.1, C.2}
view_set! {A.0, B.1, C.2, D.3}
view_set! {A.0, B.1, C.2, D.3, E.4}
view_set! {A.0, B.1, C.2, D.3, E.4, F.5}
view_set! {A.0, B.1, C.2, D.3, E.4, F.5, G.6}
view_set! {A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7}

/// A transient accessor over the entities possessing every component in
/// `Q` and none in `X`. See the [module docs](self) for iteration
/// semantics.
pub struct View<'w, Q: ViewSet, X: ComponentSet = ()> {
    fetches: Option<Q::Fetch<'w>>,
    excludes: SmallVec<[Ref<'w, Box<dyn AnyStore>>; 4]>,
    marker: PhantomData<X>,
}

impl<'w, Q: ViewSet, X: ComponentSet> View<'w, Q, X> {
    pub(crate) fn new(registry: &'w Registry) -> Self {
        let fetches = <Q::Fetch<'w> as FetchSet<'w>>::fetch(registry);
        let mut excludes = SmallVec::new();
        if fetches.is_some() {
            // An exclude type without an id or store was never attached to
            // anything, so there is nothing to exclude.
            if let Ok(ids) = X::component_ids() {
                for id in ids {
                    if let Some(cell) = registry.store_cell(id) {
                        excludes.push(cell.borrow());
                    }
                }
            }
        }
        View {
            fetches,
            excludes,
            marker: PhantomData,
        }
    }

    /// The smallest included store's size, an upper bound on how many
    /// entities the view yields. A view with a missing included store
    /// reports `0`.
    pub fn size_hint(&self) -> usize {
        match &self.fetches {
            Some(fetches) => fetches.len_at(fetches.pivot()),
            None => 0,
        }
    }

    /// Whether [`View::size_hint`] is `0`.
    pub fn is_empty_hint(&self) -> bool {
        self.size_hint() == 0
    }

    /// Returns `true` if `e` is in the view's set.
    pub fn contains(&self, e: Entity) -> bool {
        match &self.fetches {
            Some(fetches) => {
                fetches.contains_all(e) && !self.excludes.iter().any(|s| s.contains(e))
            }
            None => false,
        }
    }

    /// Invokes `f` with each matching entity and its components.
    ///
    /// The traversal walks the pivot store's dense array; structural
    /// changes are impossible while the view borrows the stores, so every
    /// matching entity is visited exactly once.
    pub fn each<F>(&mut self, mut f: F)
    where
        F: for<'a> FnMut(Entity, <Q::Fetch<'w> as FetchSet<'w>>::Item<'a>),
    {
        let Some(fetches) = self.fetches.as_mut() else {
            return;
        };
        let pivot = fetches.pivot();
        let count = fetches.len_at(pivot);
        for k in 0..count {
            let e = fetches.entity_at(pivot, k);
            if !fetches.contains_all_except(pivot, e) {
                continue;
            }
            if self.excludes.iter().any(|s| s.contains(e)) {
                continue;
            }
            // SAFETY: Presence in every included store was just checked.
            let items = unsafe { fetches.items(e) };
            f(e, items);
        }
    }

    /// Iterates the matching entities without touching component data.
    pub fn iter(&self) -> ViewIter<'_, 'w, Q, X> {
        let pivot = self.fetches.as_ref().map_or(0, |f| f.pivot());
        ViewIter {
            view: self,
            pivot,
            cursor: 0,
        }
    }
}

/// Entity-only iterator over a [`View`].
pub struct ViewIter<'v, 'w, Q: ViewSet, X: ComponentSet> {
    view: &'v View<'w, Q, X>,
    pivot: usize,
    cursor: usize,
}

impl<'v, 'w, Q: ViewSet, X: ComponentSet> Iterator for ViewIter<'v, 'w, Q, X> {
    type Item = Entity;

    fn next(&mut self) -> Option<Entity> {
        let fetches = self.view.fetches.as_ref()?;
        while self.cursor < fetches.len_at(self.pivot) {
            let e = fetches.entity_at(self.pivot, self.cursor);
            self.cursor += 1;
            if fetches.contains_all_except(self.pivot, e)
                && !self.view.excludes.iter().any(|s| s.contains(e))
            {
                return Some(e);
            }
        }
        None
    }
}
