//! Cheap value handles bundling a registry reference with one entity.

use crate::cell::Ref;
use crate::comp::Component;
use crate::entity::Entity;
use crate::error::EcsError;
use crate::registry::Registry;

/// Read-only convenience wrapper around `(registry, entity)`.
#[derive(Clone, Copy)]
pub struct EntityHandle<'a> {
    registry: &'a Registry,
    entity: Entity,
}

impl<'a> EntityHandle<'a> {
    pub(crate) fn new(registry: &'a Registry, entity: Entity) -> Self {
        EntityHandle { registry, entity }
    }

    /// The wrapped entity.
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Whether the entity is alive.
    pub fn is_alive(&self) -> bool {
        self.registry.is_alive(self.entity)
    }

    /// Whether the entity has `T`.
    pub fn has<T: Component>(&self) -> bool {
        self.registry.has::<T>(self.entity)
    }

    /// The entity's `T` component, if present.
    pub fn try_get<T: Component>(&self) -> Option<Ref<'a, T>> {
        self.registry.try_get::<T>(self.entity)
    }
}

/// Mutating convenience wrapper around `(registry, entity)`.
pub struct EntityHandleMut<'a> {
    registry: &'a mut Registry,
    entity: Entity,
}

impl<'a> EntityHandleMut<'a> {
    pub(crate) fn new(registry: &'a mut Registry, entity: Entity) -> Self {
        EntityHandleMut { registry, entity }
    }

    /// The wrapped entity.
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Whether the entity is alive.
    pub fn is_alive(&self) -> bool {
        self.registry.is_alive(self.entity)
    }

    /// Whether the entity has `T`.
    pub fn has<T: Component>(&self) -> bool {
        self.registry.has::<T>(self.entity)
    }

    /// Adds a component; see [`Registry::add`]. Returns `self` for
    /// chaining.
    pub fn add<T: Component>(&mut self, value: T) -> Result<&mut Self, EcsError> {
        self.registry.add(self.entity, value)?;
        Ok(self)
    }

    /// Removes a component; see [`Registry::remove`].
    pub fn remove<T: Component>(&mut self) -> Option<T> {
        self.registry.remove::<T>(self.entity)
    }

    /// Mutable access to the entity's `T`, if present.
    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.registry.get_mut::<T>(self.entity)
    }

    /// Destroys the entity; see [`Registry::destroy`].
    pub fn destroy(self) {
        self.registry.destroy(self.entity);
    }
}
