//! Component trait, component type ids and component masks.

use std::any::TypeId;
use std::sync::{Mutex, OnceLock};

use ahash::AHashMap;
use hibitset::{BitSet, BitSetAnd, BitSetLike};
use smallvec::SmallVec;

use crate::error::EcsError;
use crate::storage::StoragePolicy;

/// Maximum number of distinct component types supported by one process.
pub const MAX_COMPONENT_TYPES: usize = 256;

/// Abstract component type.
///
/// Components are plain data records attached to entities, stored in one
/// sparse-set store per type for maximum cache efficiency. The `Storage`
/// associated type names the container policy backing the dense data array:
///
/// - [`VecStorage`](crate::storage::VecStorage): plain contiguous vector,
///   the right default for almost everything.
/// - [`AlignedVecStorage`](crate::storage::AlignedVecStorage): contiguous
///   allocation with a guaranteed alignment, for SIMD-consumed data.
/// - [`ConcurrentVecStorage`](crate::storage::ConcurrentVecStorage):
///   contiguous vector whose mutators run under a lock.
///
/// `Clone` is required so [`Registry::copy`](crate::registry::Registry::copy)
/// can duplicate components without knowing their concrete type.
///
/// ## Examples
///
/// ```
/// use kestrel_ecs::{Component, VecStorage};
///
/// #[derive(Clone)]
/// pub struct Position {
///     pub x: f32,
///     pub y: f32,
/// }
///
/// impl Component for Position {
///     type Storage = VecStorage<Self>;
/// }
/// ```
pub trait Component: Clone + Send + Sync + Sized + 'static {
    /// Associated storage policy for this component.
    type Storage: StoragePolicy<Self>;
}

/// A small process-unique integer identifying a component type.
///
/// Ids are handed out on first use from a process-wide counter and stay
/// stable for the lifetime of the process, but not across processes: anything
/// persisted (see the snapshot module) must rely on callers registering
/// component types in a fixed order instead of on raw id values.
#[derive(Clone, Copy, Debug, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct ComponentId(u32);

impl ComponentId {
    /// Returns the id for `T`, assigning the next free one on first use.
    ///
    /// Fails with [`EcsError::TooManyTypes`] once
    /// [`MAX_COMPONENT_TYPES`] distinct types have been seen.
    pub fn of<T: Component>() -> Result<Self, EcsError> {
        static IDS: OnceLock<Mutex<AHashMap<TypeId, u32>>> = OnceLock::new();

        let mut ids = IDS
            .get_or_init(|| Mutex::new(AHashMap::new()))
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        if let Some(&id) = ids.get(&TypeId::of::<T>()) {
            return Ok(ComponentId(id));
        }
        let next = ids.len();
        if next >= MAX_COMPONENT_TYPES {
            return Err(EcsError::TooManyTypes);
        }
        ids.insert(TypeId::of::<T>(), next as u32);
        Ok(ComponentId(next as u32))
    }

    /// The raw id value.
    #[inline]
    pub fn value(self) -> u32 {
        self.0
    }

    /// The id as a container index.
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Reconstructs an id from its raw value, e.g. when matching snapshot
    /// blocks. Not checked against the live counter.
    #[inline]
    pub(crate) fn from_value(value: u32) -> Self {
        ComponentId(value)
    }
}

/// A set of component types as a fixed-capacity bit set: bit
/// `ComponentId::of::<T>()` is set iff the mask contains `T`.
///
/// Used by the scheduler for read/write dependency analysis and by the
/// groups for membership filtering.
#[derive(Clone, Debug, Default)]
pub struct ComponentMask {
    bits: BitSet,
}

impl ComponentMask {
    /// Creates an empty mask.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a mask containing every type in the tuple `S`.
    ///
    /// ```
    /// # use kestrel_ecs::{Component, ComponentMask, VecStorage};
    /// # #[derive(Clone)] struct P; impl Component for P { type Storage = VecStorage<Self>; }
    /// # #[derive(Clone)] struct V; impl Component for V { type Storage = VecStorage<Self>; }
    /// let mask = ComponentMask::of::<(P, V)>().unwrap();
    /// ```
    pub fn of<S: ComponentSet>() -> Result<Self, EcsError> {
        let mut mask = Self::new();
        for id in S::component_ids()? {
            mask.add(id);
        }
        Ok(mask)
    }

    /// Inserts a component type by id.
    pub fn add(&mut self, id: ComponentId) {
        self.bits.add(id.value());
    }

    /// Inserts `T` into the mask.
    pub fn with<T: Component>(mut self) -> Result<Self, EcsError> {
        self.add(ComponentId::of::<T>()?);
        Ok(self)
    }

    /// Returns `true` if the mask contains the component type.
    #[inline]
    pub fn contains(&self, id: ComponentId) -> bool {
        self.bits.contains(id.value())
    }

    /// Returns `true` if no type is set.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Returns `true` if the two masks share at least one component type.
    pub fn intersects(&self, other: &ComponentMask) -> bool {
        BitSetAnd(&self.bits, &other.bits).iter().next().is_some()
    }

    /// Ids contained in the mask, ascending.
    pub fn iter(&self) -> impl Iterator<Item = ComponentId> + '_ {
        (&self.bits).iter().map(ComponentId::from_value)
    }
}

/// A tuple of component types, convertible to the matching id list.
///
/// Implemented for tuples up to arity 8; the unit tuple is the empty set.
/// This is what view exclusion lists, group type lists and
/// [`ComponentMask::of`] accept.
pub trait ComponentSet {
    /// The ids of every type in the set, in tuple order.
    fn component_ids() -> Result<SmallVec<[ComponentId; 8]>, EcsError>;
}

impl ComponentSet for () {
    fn component_ids() -> Result<SmallVec<[ComponentId; 8]>, EcsError> {
        Ok(SmallVec::new())
    }
}

macro_rules! component_set {
    ($($ty:ident),*) => {
        impl<$($ty),*> ComponentSet for ($($ty,)*)
        where
            $($ty: Component),*
        {
            fn component_ids() -> Result<SmallVec<[ComponentId; 8]>, EcsError> {
                let mut ids = SmallVec::new();
                $(ids.push(ComponentId::of::<$ty>()?);)*
                Ok(ids)
            }
        }
    };
}

component_set! {A}
component_set! {A, B}
component_set! {A, B, C}
component_set! {A, B, C, D}
component_set! {A, B, C, D, E}
component_set! {A, B, C, D, E, F}
component_set! {A, B, C, D, E, F, G}
component_set! {A, B, C, D, E, F, G, H}
