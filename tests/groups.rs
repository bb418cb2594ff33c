//! Owning groups, non-owning groups and observers.

use kestrel_ecs::prelude::*;

#[derive(Clone, Debug, PartialEq)]
struct Pos {
    x: f32,
}

impl Component for Pos {
    type Storage = VecStorage<Self>;
}

#[derive(Clone, Debug, PartialEq)]
struct Vel {
    dx: f32,
}

impl Component for Vel {
    type Storage = VecStorage<Self>;
}

#[derive(Clone, Debug, PartialEq)]
struct Health(u32);

impl Component for Health {
    type Storage = VecStorage<Self>;
}

fn assert_prefix_agreement(registry: &Registry, len: usize) {
    let positions = registry.read_store::<Pos>().unwrap();
    let velocities = registry.read_store::<Vel>().unwrap();
    assert_eq!(&positions.entities()[..len], &velocities.entities()[..len]);
    for &e in &positions.entities()[..len] {
        assert!(positions.contains(e));
        assert!(velocities.contains(e));
    }
}

// ---------------------------------------------------------------------
// owning groups

#[test]
fn owning_group_packs_existing_members() {
    let mut registry = Registry::new();
    for i in 0..1000 {
        let e = registry.create().unwrap();
        registry.add(e, Pos { x: i as f32 }).unwrap();
        if i % 3 == 0 {
            registry.add(e, Vel { dx: 1.0 }).unwrap();
        }
    }

    {
        let group = registry.group::<(&Pos, &Vel)>().unwrap();
        assert_eq!(group.len(), 334);
    }

    let group = registry.try_group::<(&Pos, &Vel)>().unwrap();
    let mut visited = 0;
    group.each(|_e, (_p, v)| {
        assert_eq!(v.dx, 1.0);
        visited += 1;
    });
    assert_eq!(visited, 334);

    assert_prefix_agreement(&registry, 334);
}

#[test]
fn owning_group_tracks_later_mutations() {
    let mut registry = Registry::new();
    {
        let group = registry.group::<(&mut Pos, &Vel)>().unwrap();
        assert!(group.is_empty());
    }

    let a = registry.create().unwrap();
    let b = registry.create().unwrap();
    let c = registry.create().unwrap();
    for e in [a, b, c] {
        registry.add(e, Pos { x: 0.0 }).unwrap();
    }
    registry.add(a, Vel { dx: 1.0 }).unwrap();
    registry.add(c, Vel { dx: 2.0 }).unwrap();

    {
        let group = registry.group::<(&mut Pos, &Vel)>().unwrap();
        assert_eq!(group.len(), 2);
        assert!(group.contains(a));
        assert!(!group.contains(b));
        assert!(group.contains(c));
        group.each(|_e, (p, v)| p.x += v.dx);
    }
    assert_eq!(registry.try_get::<Pos>(a).unwrap().x, 1.0);
    assert_eq!(registry.try_get::<Pos>(b).unwrap().x, 0.0);
    assert_eq!(registry.try_get::<Pos>(c).unwrap().x, 2.0);

    // Losing an owned component pulls the entity out of the prefix.
    registry.remove::<Vel>(a);
    {
        let group = registry.group::<(&mut Pos, &Vel)>().unwrap();
        assert_eq!(group.len(), 1);
        assert!(!group.contains(a));
    }
    assert_prefix_agreement(&registry, 1);

    // So does destroying it.
    registry.destroy(c);
    let group = registry.group::<(&mut Pos, &Vel)>().unwrap();
    assert_eq!(group.len(), 0);
}

#[test]
fn owning_group_iter_yields_members() {
    let mut registry = Registry::new();
    let a = registry.create().unwrap();
    registry.add(a, Pos { x: 1.0 }).unwrap();
    registry.add(a, Vel { dx: 1.0 }).unwrap();
    let b = registry.create().unwrap();
    registry.add(b, Pos { x: 2.0 }).unwrap();

    let group = registry.group::<(&Pos, &Vel)>().unwrap();
    let members: Vec<Entity> = group.iter().collect();
    assert_eq!(members, vec![a]);
}

#[test]
fn ownership_conflict_is_rejected() {
    let mut registry = Registry::new();
    registry.group::<(&Pos, &Vel)>().unwrap();

    // Pos is already owned; a second owning group cannot take it.
    let err = registry.group::<(&Pos, &Health)>().err();
    assert_eq!(err, Some(EcsError::OwnershipConflict));

    // Non-owning groups over the same types are fine.
    registry.non_owning_group::<(&Pos, &Health)>().unwrap();

    // Re-requesting the identical owned set returns the existing group.
    let e = registry.create().unwrap();
    registry.add(e, Pos { x: 0.0 }).unwrap();
    registry.add(e, Vel { dx: 0.0 }).unwrap();
    let group = registry.group::<(&Pos, &Vel)>().unwrap();
    assert_eq!(group.len(), 1);
}

#[test]
fn sorting_an_owned_store_is_rejected() {
    let mut registry = Registry::new();
    registry.group::<(&Pos, &Vel)>().unwrap();

    assert_eq!(
        registry.sort::<Pos>(|a, b| a.x.partial_cmp(&b.x).unwrap()),
        Err(EcsError::OwnershipConflict)
    );
    assert_eq!(
        registry.sort_as::<Vel, Health>(),
        Err(EcsError::OwnershipConflict)
    );
    // Unowned stores still sort.
    registry
        .sort::<Health>(|a, b| a.0.cmp(&b.0))
        .unwrap();
}

#[test]
fn group_survives_clear() {
    let mut registry = Registry::new();
    for i in 0..30 {
        let e = registry.create().unwrap();
        registry.add(e, Pos { x: i as f32 }).unwrap();
        registry.add(e, Vel { dx: 1.0 }).unwrap();
    }
    {
        let group = registry.group::<(&Pos, &Vel)>().unwrap();
        assert_eq!(group.len(), 30);
    }

    registry.clear();
    {
        let group = registry.group::<(&Pos, &Vel)>().unwrap();
        assert_eq!(group.len(), 0);
    }

    // Fresh entities re-enter the group.
    let e = registry.create().unwrap();
    registry.add(e, Pos { x: 0.0 }).unwrap();
    registry.add(e, Vel { dx: 0.0 }).unwrap();
    let group = registry.group::<(&Pos, &Vel)>().unwrap();
    assert_eq!(group.len(), 1);
    assert!(group.contains(e));
}

// ---------------------------------------------------------------------
// non-owning groups

#[test]
fn non_owning_group_tracks_membership() {
    let mut registry = Registry::new();
    let a = registry.create().unwrap();
    let b = registry.create().unwrap();
    registry.add(a, Pos { x: 0.0 }).unwrap();
    registry.add(a, Health(10)).unwrap();
    registry.add(b, Pos { x: 0.0 }).unwrap();

    {
        let group = registry.non_owning_group::<(&Pos, &Health)>().unwrap();
        assert_eq!(group.len(), 1);
        assert!(group.contains(a));
        assert!(!group.contains(b));
    }

    // Store order is untouched by membership tracking.
    let order_before: Vec<Entity> = registry
        .read_store::<Pos>()
        .unwrap()
        .entities()
        .to_vec();

    registry.add(b, Health(5)).unwrap();
    registry.remove::<Health>(a);

    let order_after: Vec<Entity> = registry
        .read_store::<Pos>()
        .unwrap()
        .entities()
        .to_vec();
    assert_eq!(order_before, order_after);

    let group = registry.non_owning_group::<(&Pos, &Health)>().unwrap();
    assert_eq!(group.len(), 1);
    assert!(group.contains(b));

    let mut total = 0;
    group.each(|_e, (_p, h)| total += h.0);
    assert_eq!(total, 5);
}

#[test]
fn non_owning_group_purges_destroyed_members() {
    let mut registry = Registry::new();
    let entities: Vec<Entity> = (0..10)
        .map(|i| {
            let e = registry.create().unwrap();
            registry.add(e, Pos { x: i as f32 }).unwrap();
            registry.add(e, Health(i)).unwrap();
            e
        })
        .collect();

    {
        let group = registry.non_owning_group::<(&Pos, &Health)>().unwrap();
        assert_eq!(group.len(), 10);
    }
    registry.destroy(entities[4]);
    registry.destroy(entities[8]);

    let group = registry.try_non_owning_group::<(&Pos, &Health)>().unwrap();
    assert_eq!(group.len(), 8);
    assert!(!group.contains(entities[4]));
    assert!(group.iter().all(|e| registry.is_alive(e)));
}

#[test]
fn non_owning_group_resets_on_clear() {
    let mut registry = Registry::new();
    let e = registry.create().unwrap();
    registry.add(e, Pos { x: 0.0 }).unwrap();
    registry.add(e, Health(1)).unwrap();
    {
        let group = registry.non_owning_group::<(&Pos, &Health)>().unwrap();
        assert_eq!(group.len(), 1);
    }
    registry.clear();
    let group = registry.non_owning_group::<(&Pos, &Health)>().unwrap();
    assert!(group.is_empty());
}

// ---------------------------------------------------------------------
// observers

#[test]
fn observer_accumulates_and_deduplicates() {
    let mut registry = Registry::new();
    let observer = registry
        .observe::<(OnAdded<Pos>, OnUpdated<Pos>)>()
        .unwrap();

    let e = registry.create().unwrap();
    registry.add(e, Pos { x: 0.0 }).unwrap();
    registry.patch::<Pos>(e, |p| p.x = 1.0).unwrap();
    registry.patch::<Pos>(e, |p| p.x = 2.0).unwrap();

    // Dirtied three times, present once.
    assert_eq!(observer.count(), 1);
    assert!(observer.contains(e));

    let mut visited = Vec::new();
    observer.each(|e| visited.push(e));
    assert_eq!(visited, vec![e]);

    observer.clear();
    assert!(observer.is_empty());
}

#[test]
fn observer_on_removed_tracks_live_entities_only() {
    let mut registry = Registry::new();
    let observer = registry.observe::<(OnRemoved<Pos>,)>().unwrap();

    let keep = registry.create().unwrap();
    let gone = registry.create().unwrap();
    registry.add(keep, Pos { x: 0.0 }).unwrap();
    registry.add(gone, Pos { x: 0.0 }).unwrap();
    observer.clear();

    // Plain removal leaves a live dirty entity.
    registry.remove::<Pos>(keep);
    assert!(observer.contains(keep));

    // Destruction purges the entity from the dirty set.
    registry.destroy(gone);
    assert!(!observer.contains(gone));
    assert_eq!(observer.count(), 1);
    observer.each(|e| assert!(registry.is_alive(e)));
}

#[test]
fn observer_updates_via_replace_and_touch() {
    let mut registry = Registry::new();
    let observer = registry.observe::<(OnUpdated<Health>,)>().unwrap();

    let e = registry.create().unwrap();
    registry.add(e, Health(1)).unwrap();
    assert!(observer.is_empty());

    registry.replace(e, Health(2)).unwrap();
    assert!(observer.contains(e));

    observer.clear();
    registry.touch::<Health>(e).unwrap();
    assert!(observer.contains(e));
}

#[test]
fn observer_resets_on_registry_clear() {
    let mut registry = Registry::new();
    let observer = registry.observe::<(OnAdded<Pos>,)>().unwrap();

    let e = registry.create().unwrap();
    registry.add(e, Pos { x: 0.0 }).unwrap();
    assert!(!observer.is_empty());

    registry.clear();
    assert!(observer.is_empty());
}

#[test]
fn dropped_observer_disconnects() {
    let mut registry = Registry::new();
    let observer = registry.observe::<(OnAdded<Pos>,)>().unwrap();
    drop(observer);

    // No listener left; mutations proceed unobserved.
    let e = registry.create().unwrap();
    registry.add(e, Pos { x: 0.0 }).unwrap();
    registry.destroy(e);
}
