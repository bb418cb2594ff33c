//! Entity handles and the generational allocator.

use hibitset::{BitSet, BitSetLike};

use crate::error::EcsError;

/// An index is basically the id of an `Entity`.
///
/// Keeping it 32 bit allows a single 64 bit word per entity handle.
pub type Index = u32;

/// `Entity` type, as seen by the user.
///
/// A 64-bit opaque handle packing a slot index in the low 32 bits and a
/// generation counter in the high 32 bits. Handles are plain values; copying
/// one does not affect registry state. A handle stays valid until the entity
/// is destroyed, at which point the slot's generation is bumped and every
/// old handle for that slot goes dead.
#[derive(Clone, Copy, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct Entity(u64);

/// The null entity sentinel. All bits set; never equal to any live handle.
pub const NULL_ENTITY: Entity = Entity(u64::MAX);

impl Entity {
    /// Packs an index and a generation into a handle.
    #[inline]
    pub(crate) fn new(index: Index, generation: u32) -> Self {
        Entity(u64::from(generation) << 32 | u64::from(index))
    }

    /// Returns the slot index of the `Entity`.
    #[inline]
    pub fn id(&self) -> Index {
        self.0 as Index
    }

    /// Returns the generation of the `Entity`.
    #[inline]
    pub fn gen(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Returns `true` if this is the null sentinel.
    #[inline]
    pub fn is_null(&self) -> bool {
        *self == NULL_ENTITY
    }

    /// The raw packed representation, as written by the snapshot.
    #[inline]
    pub fn to_bits(self) -> u64 {
        self.0
    }

    /// Reconstructs a handle from its packed representation.
    ///
    /// The result is only meaningful for bit patterns previously obtained
    /// from [`Entity::to_bits`]; it is not checked against any registry.
    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Entity(bits)
    }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "Entity(null)")
        } else {
            write!(f, "Entity({}v{})", self.id(), self.gen())
        }
    }
}

/// Internally used structure for `Entity` allocation.
///
/// Holds one generation counter per slot, a free-list of recycled slots and
/// an alive bit set. A handle `(i, g)` is alive iff bit `i` is set and
/// `generations[i] == g`.
#[derive(Default, Debug)]
pub(crate) struct Allocator {
    generations: Vec<u32>,
    alive: BitSet,
    free: Vec<Index>,
}

impl Allocator {
    /// Allocates a new entity, recycling a destroyed slot if one is free.
    ///
    /// Recycled slots come back with the generation that was bumped when
    /// they were destroyed, so stale handles for the slot stay dead.
    pub fn allocate(&mut self) -> Result<Entity, EcsError> {
        if let Some(index) = self.free.pop() {
            self.alive.add(index);
            return Ok(Entity::new(index, self.generations[index as usize]));
        }

        // The all-ones index is reserved for the null sentinel.
        if self.generations.len() >= Index::MAX as usize {
            return Err(EcsError::OutOfEntities);
        }

        let index = self.generations.len() as Index;
        self.generations.push(0);
        self.alive.add(index);
        Ok(Entity::new(index, 0))
    }

    /// Kills a live entity: bumps the slot generation (wrap permitted) and
    /// recycles the slot.
    ///
    /// The caller must have checked [`Allocator::is_alive`].
    pub fn deallocate(&mut self, e: Entity) {
        debug_assert!(self.is_alive(e));
        let id = e.id();
        self.alive.remove(id);
        let slot = &mut self.generations[id as usize];
        *slot = slot.wrapping_add(1);
        self.free.push(id);
    }

    /// Returns `true` if the entity handle refers to a live slot.
    #[inline]
    pub fn is_alive(&self, e: Entity) -> bool {
        !e.is_null()
            && self.alive.contains(e.id())
            && self.generations[e.id() as usize] == e.gen()
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.generations.len() - self.free.len()
    }

    /// Kills every live entity, keeping slot generations monotonic so that
    /// pre-clear handles stay dead.
    pub fn clear(&mut self) {
        for id in (&self.alive).iter() {
            let slot = &mut self.generations[id as usize];
            *slot = slot.wrapping_add(1);
            self.free.push(id);
        }
        self.alive.clear();
    }

    /// Iterates all live entities. Order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = Entity> + '_ {
        (&self.alive)
            .iter()
            .map(|id| Entity::new(id, self.generations[id as usize]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recycles_slot_with_bumped_generation() {
        let mut alloc = Allocator::default();
        let e1 = alloc.allocate().unwrap();
        alloc.deallocate(e1);
        let e2 = alloc.allocate().unwrap();

        assert_eq!(e1.id(), e2.id());
        assert_eq!(e2.gen(), e1.gen() + 1);
        assert!(!alloc.is_alive(e1));
        assert!(alloc.is_alive(e2));
    }

    #[test]
    fn null_is_never_alive() {
        let alloc = Allocator::default();
        assert!(!alloc.is_alive(NULL_ENTITY));
        assert!(NULL_ENTITY.is_null());
    }

    #[test]
    fn len_tracks_allocations() {
        let mut alloc = Allocator::default();
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        assert_eq!(alloc.len(), 2);
        alloc.deallocate(a);
        assert_eq!(alloc.len(), 1);
        alloc.deallocate(b);
        assert_eq!(alloc.len(), 0);
    }

    #[test]
    fn clear_kills_everything() {
        let mut alloc = Allocator::default();
        let entities: Vec<_> = (0..16).map(|_| alloc.allocate().unwrap()).collect();
        alloc.clear();
        assert_eq!(alloc.len(), 0);
        for e in entities {
            assert!(!alloc.is_alive(e));
        }
        // Slots are recycled with fresh generations.
        let e = alloc.allocate().unwrap();
        assert_eq!(e.gen(), 1);
    }

    #[test]
    fn packs_and_unpacks_bits() {
        let e = Entity::new(42, 7);
        assert_eq!(e.id(), 42);
        assert_eq!(e.gen(), 7);
        assert_eq!(Entity::from_bits(e.to_bits()), e);
    }
}
