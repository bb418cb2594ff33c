//! Type-erased views over runtime component-id lists.
//!
//! The compile-time [`View`](crate::view::View) covers code that knows its
//! component types; `RuntimeView` covers the rest (editor tooling,
//! scripting bridges, generic inspectors) where the include and exclude
//! sets only exist as [`ComponentId`] values. Iteration is entity-only and
//! probes stores through the untyped vtable, which is the inherent cost of
//! runtime dispatch.

use smallvec::SmallVec;

use crate::cell::Ref;
use crate::comp::ComponentId;
use crate::entity::Entity;
use crate::registry::Registry;
use crate::storage::AnyStore;

type StoreGuards<'w> = SmallVec<[Ref<'w, Box<dyn AnyStore>>; 8]>;

/// A view over the entities possessing every included component type and
/// none of the excluded ones, specified by id at runtime.
pub struct RuntimeView<'w> {
    includes: StoreGuards<'w>,
    excludes: StoreGuards<'w>,
    /// An include type with no store means the intersection is empty.
    missing_include: bool,
}

impl<'w> RuntimeView<'w> {
    pub(crate) fn new(
        registry: &'w Registry,
        include: &[ComponentId],
        exclude: &[ComponentId],
    ) -> Self {
        let mut includes = StoreGuards::new();
        let mut missing_include = false;
        for &id in include {
            match registry.store_cell(id) {
                Some(cell) => includes.push(cell.borrow()),
                None => {
                    missing_include = true;
                    break;
                }
            }
        }
        let mut excludes = StoreGuards::new();
        if !missing_include {
            for &id in exclude {
                // A missing exclude store excludes nothing.
                if let Some(cell) = registry.store_cell(id) {
                    excludes.push(cell.borrow());
                }
            }
        }
        RuntimeView {
            includes,
            excludes,
            missing_include,
        }
    }

    /// The smallest included store's size, or `0` for an empty view.
    pub fn size_hint(&self) -> usize {
        if self.missing_include {
            return 0;
        }
        self.includes.iter().map(|s| s.len()).min().unwrap_or(0)
    }

    /// Returns `true` if `e` matches the include and exclude sets.
    pub fn contains(&self, e: Entity) -> bool {
        !self.missing_include
            && !self.includes.is_empty()
            && self.includes.iter().all(|s| s.contains(e))
            && !self.excludes.iter().any(|s| s.contains(e))
    }

    /// Invokes `f` with each matching entity.
    pub fn each<F>(&self, mut f: F)
    where
        F: FnMut(Entity),
    {
        for e in self.iter() {
            f(e);
        }
    }

    /// Iterates the matching entities.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ + use<'_, 'w> {
        let pivot = (!self.missing_include && !self.includes.is_empty()).then(|| {
            let mut best = 0;
            for (i, store) in self.includes.iter().enumerate() {
                if store.len() < self.includes[best].len() {
                    best = i;
                }
            }
            best
        });

        let entities: &[Entity] = match pivot {
            Some(p) => self.includes[p].entities(),
            None => &[],
        };

        entities.iter().copied().filter(move |&e| {
            let p = pivot.unwrap_or(0);
            self.includes
                .iter()
                .enumerate()
                .all(|(i, store)| i == p || store.contains(e))
                && !self.excludes.iter().any(|store| store.contains(e))
        })
    }
}
