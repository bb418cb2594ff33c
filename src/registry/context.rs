//! Typed singleton storage keyed by type, for ambient per-registry state
//! (delta time, RNG seeds, asset handles).

use std::any::{Any, TypeId};

use ahash::AHashMap;

/// The registry's context map: one value per type.
#[derive(Default)]
pub(crate) struct ContextMap {
    values: AHashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl ContextMap {
    /// Inserts a value, returning the previous one of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.values
            .insert(TypeId::of::<T>(), Box::new(value))
            .map(|previous| *previous.downcast::<T>().expect("context type keyed by TypeId"))
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_mut::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.values
            .remove(&TypeId::of::<T>())
            .map(|previous| *previous.downcast::<T>().expect("context type keyed by TypeId"))
    }
}
