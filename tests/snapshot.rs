//! Snapshot round-trips, entity remapping and loader error handling.

use kestrel_ecs::prelude::*;

#[derive(Clone, Debug, PartialEq)]
struct Pos {
    x: f32,
    y: f32,
}

impl Component for Pos {
    type Storage = VecStorage<Self>;
}

#[derive(Clone, Debug, PartialEq)]
struct Health(u32);

impl Component for Health {
    type Storage = VecStorage<Self>;
}

#[derive(Clone, Debug, PartialEq)]
struct Link {
    target: Entity,
}

impl Component for Link {
    type Storage = VecStorage<Self>;
}

fn encode_full(registry: &Registry) -> Vec<u8> {
    let mut snapshot = registry.snapshot();
    snapshot
        .component::<Pos, _>(|p, w| {
            w.put_f32(p.x);
            w.put_f32(p.y);
        })
        .unwrap();
    snapshot
        .component::<Health, _>(|h, w| w.put_u32(h.0))
        .unwrap();
    snapshot.finish()
}

fn full_loader() -> SnapshotLoader {
    let mut loader = SnapshotLoader::new();
    loader
        .component::<Pos, _>(|r, _| {
            Ok(Pos {
                x: r.read_f32()?,
                y: r.read_f32()?,
            })
        })
        .unwrap();
    loader
        .component::<Health, _>(|r, _| Ok(Health(r.read_u32()?)))
        .unwrap();
    loader
}

#[test]
fn round_trip_restores_values_and_topology() {
    let mut registry = Registry::new();
    let mut originals = Vec::new();
    for i in 0..100u32 {
        let e = registry.create().unwrap();
        registry
            .add(
                e,
                Pos {
                    x: i as f32,
                    y: -(i as f32),
                },
            )
            .unwrap();
        if i % 4 == 0 {
            registry.add(e, Health(i)).unwrap();
        }
        originals.push(e);
    }

    let bytes = encode_full(&registry);
    let map = full_loader().load(&mut registry, &bytes).unwrap();

    assert_eq!(map.len(), 100);
    assert_eq!(registry.entity_count(), 100);
    for (i, &old) in originals.iter().enumerate() {
        let new = map.remap(old).unwrap();
        assert!(registry.is_alive(new));
        assert!(!registry.is_alive(old));
        assert_eq!(
            registry.try_get::<Pos>(new).as_deref(),
            Some(&Pos {
                x: i as f32,
                y: -(i as f32)
            })
        );
        assert_eq!(registry.has::<Health>(new), i % 4 == 0);
    }
}

#[test]
fn cross_entity_references_are_remapped() {
    let mut registry = Registry::new();
    let parent = registry.create().unwrap();
    let child = registry.create().unwrap();
    registry.add(child, Health(3)).unwrap();
    registry.add(parent, Link { target: child }).unwrap();

    let bytes = {
        let mut snapshot = registry.snapshot();
        snapshot
            .component::<Link, _>(|link, w| w.put_entity(link.target))
            .unwrap();
        snapshot
            .component::<Health, _>(|h, w| w.put_u32(h.0))
            .unwrap();
        snapshot.finish()
    };

    let mut loader = SnapshotLoader::new();
    loader
        .component::<Link, _>(|r, map| {
            let old = r.read_entity()?;
            Ok(Link {
                target: map.remap(old).unwrap_or(NULL_ENTITY),
            })
        })
        .unwrap();
    loader
        .component::<Health, _>(|r, _| Ok(Health(r.read_u32()?)))
        .unwrap();

    let map = loader.load(&mut registry, &bytes).unwrap();

    let new_parent = map.remap(parent).unwrap();
    let new_child = map.remap(child).unwrap();
    assert_ne!(new_parent, parent);
    assert_ne!(new_child, child);
    assert!(registry.is_alive(new_child));

    // The link points at the restored child, and the topology survived.
    let link = registry.try_get::<Link>(new_parent).unwrap();
    assert_eq!(link.target, new_child);
    assert_eq!(registry.try_get::<Health>(new_child).as_deref(), Some(&Health(3)));
}

#[test]
fn unknown_blocks_are_skipped() {
    let mut registry = Registry::new();
    let e = registry.create().unwrap();
    registry.add(e, Pos { x: 1.0, y: 2.0 }).unwrap();
    registry.add(e, Health(9)).unwrap();

    let bytes = encode_full(&registry);

    // This loader has never heard of Health; its block is consumed and
    // dropped.
    let mut loader = SnapshotLoader::new();
    loader
        .component::<Pos, _>(|r, _| {
            Ok(Pos {
                x: r.read_f32()?,
                y: r.read_f32()?,
            })
        })
        .unwrap();

    let map = loader.load(&mut registry, &bytes).unwrap();
    let new = map.remap(e).unwrap();
    assert_eq!(
        registry.try_get::<Pos>(new).as_deref(),
        Some(&Pos { x: 1.0, y: 2.0 })
    );
    assert!(!registry.has::<Health>(new));
}

#[test]
fn empty_registry_round_trips() {
    let mut registry = Registry::new();
    let bytes = encode_full(&registry);
    let map = full_loader().load(&mut registry, &bytes).unwrap();
    assert!(map.is_empty());
    assert_eq!(registry.entity_count(), 0);
}

#[test]
fn loaded_components_fire_signals_and_fill_groups() {
    let mut registry = Registry::new();
    {
        let group = registry.non_owning_group::<(&Pos, &Health)>().unwrap();
        assert!(group.is_empty());
    }
    let e = registry.create().unwrap();
    registry.add(e, Pos { x: 0.0, y: 0.0 }).unwrap();
    registry.add(e, Health(1)).unwrap();

    let bytes = encode_full(&registry);
    full_loader().load(&mut registry, &bytes).unwrap();

    let group = registry.try_non_owning_group::<(&Pos, &Health)>().unwrap();
    assert_eq!(group.len(), 1);
}

// ---------------------------------------------------------------------
// malformed buffers

/// `EntityMap` carries no `PartialEq`; compare on the error side only.
fn load_err(registry: &mut Registry, bytes: &[u8]) -> Result<(), EcsError> {
    full_loader().load(registry, bytes).map(|_| ())
}

#[test]
fn rejects_bad_magic() {
    let mut registry = Registry::new();
    let mut bytes = encode_full(&registry);
    // Byte 0 is the u32 tag; the magic's first byte follows it.
    bytes[1] ^= 0xFF;
    assert!(matches!(
        load_err(&mut registry, &bytes),
        Err(EcsError::BadMagic(_))
    ));
}

#[test]
fn rejects_bad_version() {
    let mut registry = Registry::new();
    let mut bytes = encode_full(&registry);
    // Bytes 0..5 are the tagged magic; byte 5 the u8 tag, byte 6 the
    // version.
    bytes[6] = 42;
    assert_eq!(load_err(&mut registry, &bytes), Err(EcsError::BadVersion(42)));
}

#[test]
fn rejects_truncated_buffer() {
    let mut registry = Registry::new();
    let e = registry.create().unwrap();
    registry.add(e, Pos { x: 1.0, y: 2.0 }).unwrap();

    let bytes = encode_full(&registry);
    let cut = bytes[..bytes.len() - 3].to_vec();
    assert_eq!(load_err(&mut registry, &cut), Err(EcsError::Truncated));
}

#[test]
fn rejects_trailing_garbage() {
    let mut registry = Registry::new();
    let mut bytes = encode_full(&registry);
    bytes.push(0xAB);
    assert_eq!(load_err(&mut registry, &bytes), Err(EcsError::BadFooter));
}
