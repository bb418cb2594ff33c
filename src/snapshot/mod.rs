//! Binary snapshots: save and restore full registry state.
//!
//! A [`Snapshot`] serializes the live entity table and one block per
//! registered component type; a [`SnapshotLoader`] decodes that buffer into
//! a cleared registry, recreating every entity with a *fresh* handle and
//! exposing the old-to-new [`EntityMap`] so component decoders can fix up
//! cross-entity references.
//!
//! Wire format (all values tagged little-endian, see
//! [`BinaryWriter`]/[`BinaryReader`]):
//!
//! ```text
//! header:   magic u32 = 0x46415053, version u8 = 1
//! entities: count u32, count x entity u64 (packed index|generation)
//! blocks:   per component() call, in call order:
//!             type id u32, count u32,
//!             count x { entity u64, blob bytes (length-prefixed) }
//! footer:   magic u32 = 0x00444E45
//! ```
//!
//! Component type ids are process-local, so producer and consumer must
//! register their component types in the same order (the id counter then
//! assigns equal values). Blocks whose type id the loader does not know are
//! skipped by consuming their entries.

pub use self::binary::{BinaryReader, BinaryWriter};

mod binary;

use ahash::AHashMap;

use crate::comp::{Component, ComponentId};
use crate::entity::Entity;
use crate::error::EcsError;
use crate::registry::Registry;

/// Header magic, `"FAPS"`.
pub const SNAPSHOT_MAGIC: u32 = 0x4641_5053;

/// Supported format version.
pub const SNAPSHOT_VERSION: u8 = 1;

/// Footer magic, `"END\0"`.
pub const FOOTER_MAGIC: u32 = 0x0044_4E45;

/// Maps the entity handles recorded in a snapshot to the handles the
/// loader created for them. Handed to component decoders for reference
/// fix-ups and returned by [`SnapshotLoader::load`]; discard it once the
/// fix-ups are done.
#[derive(Default)]
pub struct EntityMap {
    map: AHashMap<Entity, Entity>,
}

impl EntityMap {
    /// The restored handle for a serialized one, if the snapshot contained
    /// that entity.
    pub fn remap(&self, old: Entity) -> Option<Entity> {
        self.map.get(&old).copied()
    }

    /// Number of remapped entities.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the snapshot contained no entities.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Serializes a registry into the wire format, one component type per
/// [`Snapshot::component`] call.
///
/// The header and entity table are written when the snapshot is created,
/// so the entity set is pinned at that moment; keep the registry unchanged
/// until [`Snapshot::finish`].
pub struct Snapshot<'a> {
    registry: &'a Registry,
    writer: BinaryWriter,
}

impl<'a> Snapshot<'a> {
    pub(crate) fn new(registry: &'a Registry) -> Self {
        let mut writer = BinaryWriter::new();
        writer.put_u32(SNAPSHOT_MAGIC);
        writer.put_u8(SNAPSHOT_VERSION);

        let entities: Vec<Entity> = registry.entities().collect();
        writer.put_u32(entities.len() as u32);
        for e in entities {
            writer.put_u64(e.to_bits());
        }
        Snapshot { registry, writer }
    }

    /// Appends one block for `T`, invoking `write` per stored component.
    /// A type with no store writes an empty block.
    pub fn component<T, F>(&mut self, mut write: F) -> Result<&mut Self, EcsError>
    where
        T: Component,
        F: FnMut(&T, &mut BinaryWriter),
    {
        let id = ComponentId::of::<T>()?;
        self.writer.put_u32(id.value());
        match self.registry.read_store::<T>() {
            Some(store) => {
                self.writer.put_u32(store.len() as u32);
                let entities = store.entities();
                let data = store.data();
                for (k, &e) in entities.iter().enumerate() {
                    self.writer.put_u64(e.to_bits());
                    let mut blob = BinaryWriter::new();
                    write(&data[k], &mut blob);
                    self.writer.put_bytes(blob.as_slice());
                }
            }
            None => self.writer.put_u32(0),
        }
        Ok(self)
    }

    /// Appends the footer and returns the finished buffer.
    pub fn finish(mut self) -> Vec<u8> {
        self.writer.put_u32(FOOTER_MAGIC);
        self.writer.into_inner()
    }
}

type BlockDecoder =
    Box<dyn Fn(&mut Registry, Entity, &mut BinaryReader<'_>, &EntityMap) -> Result<(), EcsError>>;

/// Decodes a snapshot buffer into a registry.
///
/// Register a decoder per component type with [`SnapshotLoader::component`]
/// (in the same order the producing process registered its types), then
/// call [`SnapshotLoader::load`].
#[derive(Default)]
pub struct SnapshotLoader {
    decoders: AHashMap<u32, BlockDecoder>,
}

impl SnapshotLoader {
    /// Creates a loader with no registered decoders.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a decoder for `T`. The closure reads one component value
    /// from its blob; the [`EntityMap`] lets it remap serialized entity
    /// handles stored inside the component.
    pub fn component<T, F>(&mut self, read: F) -> Result<&mut Self, EcsError>
    where
        T: Component,
        F: Fn(&mut BinaryReader<'_>, &EntityMap) -> Result<T, EcsError> + 'static,
    {
        let id = ComponentId::of::<T>()?;
        self.decoders.insert(
            id.value(),
            Box::new(move |registry, e, reader, map| {
                let value = read(reader, map)?;
                registry.add(e, value)
            }),
        );
        Ok(self)
    }

    /// Clears `registry` and rebuilds it from `bytes`.
    ///
    /// Every serialized entity is recreated through `registry.create()`, so
    /// the restored handles differ from the originals; the returned
    /// [`EntityMap`] documents the correspondence. Components re-enter
    /// through the normal `add` path, so signals fire and groups stay
    /// consistent. Unknown blocks are skipped (and logged); a malformed or
    /// short buffer fails with the codec errors, a missing footer with
    /// [`EcsError::Truncated`] and trailing garbage with
    /// [`EcsError::BadFooter`].
    pub fn load(&self, registry: &mut Registry, bytes: &[u8]) -> Result<EntityMap, EcsError> {
        let mut reader = BinaryReader::new(bytes);

        let magic = reader.read_u32()?;
        if magic != SNAPSHOT_MAGIC {
            return Err(EcsError::BadMagic(magic));
        }
        let version = reader.read_u8()?;
        if version != SNAPSHOT_VERSION {
            return Err(EcsError::BadVersion(version));
        }

        registry.clear();

        let count = reader.read_u32()?;
        let mut map = EntityMap::default();
        for _ in 0..count {
            let old = Entity::from_bits(reader.read_u64()?);
            let new = registry.create()?;
            map.map.insert(old, new);
        }

        loop {
            let value = reader.read_u32()?;
            if value == FOOTER_MAGIC {
                break;
            }
            let entries = reader.read_u32()?;
            match self.decoders.get(&value) {
                Some(decode) => {
                    for _ in 0..entries {
                        let old = Entity::from_bits(reader.read_u64()?);
                        // An entry for an entity missing from the entity
                        // table means the buffer is inconsistent.
                        let new = map.remap(old).ok_or(EcsError::Truncated)?;
                        let blob = reader.read_bytes()?;
                        let mut blob_reader = BinaryReader::new(blob);
                        decode(registry, new, &mut blob_reader, &map)?;
                    }
                }
                None => {
                    log::warn!("skipping unknown snapshot block (type id {})", value);
                    for _ in 0..entries {
                        reader.read_u64()?;
                        reader.read_bytes()?;
                    }
                }
            }
        }

        if !reader.is_at_end() {
            return Err(EcsError::BadFooter);
        }
        Ok(map)
    }
}

impl Registry {
    /// Starts a snapshot of the current registry state. See the
    /// [module docs](crate::snapshot) for the wire format.
    pub fn snapshot(&self) -> Snapshot<'_> {
        Snapshot::new(self)
    }
}
