//! Group membership bookkeeping.
//!
//! The registry owns every store, so it repairs group membership directly
//! on the same add/remove paths that emit the component signals. The
//! observable contract is the one the signals describe: membership is fixed
//! up after an insert and before an erase.

use crate::comp::{ComponentId, ComponentMask};
use crate::entity::Entity;
use crate::storage::StoreRegistry;

/// State of one owning group: a prefix `[0, len)` of every owned store's
/// dense array holds exactly the entities possessing all owned types, with
/// each entity at the same dense index in every owned store.
pub(crate) struct OwningGroupState {
    /// Owned component types, in the order the group lists them.
    pub owned: Vec<ComponentId>,
    /// Same set, sorted; the identity used to detect re-requests.
    pub key: Vec<ComponentId>,
    pub mask: ComponentMask,
    pub len: usize,
}

/// State of one non-owning group: a private entity list tracking the
/// intersection without touching any store's order.
pub(crate) struct TrackedGroupState {
    pub types: Vec<ComponentId>,
    pub key: Vec<ComponentId>,
    pub mask: ComponentMask,
    pub entities: Vec<Entity>,
}

/// Called after `id` was inserted for `e`.
pub(crate) fn on_added(
    stores: &mut StoreRegistry,
    owning: &mut [OwningGroupState],
    tracked: &mut [TrackedGroupState],
    id: ComponentId,
    e: Entity,
) {
    for group in owning.iter_mut() {
        if !group.mask.contains(id) {
            continue;
        }
        if !has_all(stores, &group.owned, e) {
            continue;
        }
        // `e` just gained one of the owned types, so it was not a member
        // and sits outside the prefix in every owned store.
        for &owned in &group.owned {
            let store = stores.any_mut(owned).expect("owned store exists");
            let current = store.dense_index_of(e).expect("entity has owned type");
            debug_assert!(current >= group.len);
            store.swap_dense(current, group.len);
        }
        group.len += 1;
    }

    for group in tracked.iter_mut() {
        if group.mask.contains(id) && has_all(stores, &group.types, e) {
            group.entities.push(e);
        }
    }
}

/// Called when `id` is about to be erased for `e` (the component is still
/// present in its store).
pub(crate) fn on_removed(
    stores: &mut StoreRegistry,
    owning: &mut [OwningGroupState],
    tracked: &mut [TrackedGroupState],
    id: ComponentId,
    e: Entity,
) {
    for group in owning.iter_mut() {
        if !group.mask.contains(id) || group.len == 0 {
            continue;
        }
        let first = group.owned[0];
        let member = stores
            .any_mut(first)
            .and_then(|store| store.dense_index_of(e))
            .map_or(false, |position| position < group.len);
        if !member {
            continue;
        }
        let last = group.len - 1;
        for &owned in &group.owned {
            let store = stores.any_mut(owned).expect("owned store exists");
            let current = store.dense_index_of(e).expect("entity has owned type");
            store.swap_dense(current, last);
        }
        group.len = last;
    }

    for group in tracked.iter_mut() {
        if !group.mask.contains(id) {
            continue;
        }
        if let Some(position) = group.entities.iter().position(|&member| member == e) {
            group.entities.swap_remove(position);
        }
    }
}

/// Sweeps existing entities into a freshly created owning group.
pub(crate) fn init_owning(stores: &mut StoreRegistry, group: &mut OwningGroupState) {
    for e in candidates(stores, &group.owned) {
        if !has_all(stores, &group.owned, e) {
            continue;
        }
        for &owned in &group.owned {
            let store = stores.any_mut(owned).expect("owned store exists");
            let current = store.dense_index_of(e).expect("entity has owned type");
            if current >= group.len {
                store.swap_dense(current, group.len);
            }
        }
        group.len += 1;
    }
}

/// Fills a freshly created non-owning group's entity list.
pub(crate) fn init_tracked(stores: &mut StoreRegistry, group: &mut TrackedGroupState) {
    for e in candidates(stores, &group.types) {
        if has_all(stores, &group.types, e) {
            group.entities.push(e);
        }
    }
}

/// Entities of the smallest listed store, copied out so membership sweeps
/// can reorder freely while iterating.
fn candidates(stores: &mut StoreRegistry, types: &[ComponentId]) -> Vec<Entity> {
    let mut smallest: Option<(usize, ComponentId)> = None;
    for &id in types {
        let len = match stores.any_mut(id) {
            Some(store) => store.len(),
            // A listed type with no store means the intersection is empty.
            None => return Vec::new(),
        };
        if smallest.map_or(true, |(best, _)| len < best) {
            smallest = Some((len, id));
        }
    }
    match smallest {
        Some((_, id)) => stores
            .any_mut(id)
            .map(|store| store.entities().to_vec())
            .unwrap_or_default(),
        None => Vec::new(),
    }
}

fn has_all(stores: &mut StoreRegistry, types: &[ComponentId], e: Entity) -> bool {
    types.iter().all(|&id| {
        stores
            .any_mut(id)
            .map_or(false, |store| store.contains(e))
    })
}
