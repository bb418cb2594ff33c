//! Event bus: signals for entity and component lifecycle.
//!
//! The registry emits on these signals from every mutating operation, in
//! the orders documented on the respective [`Registry`] methods. The
//! per-component signals are created lazily on first listener connection;
//! emitting for a component type nobody listens to costs one `Option`
//! check.
//!
//! [`Registry`]: crate::registry::Registry

use crate::comp::{Component, ComponentId};
use crate::entity::Entity;
use crate::error::EcsError;
use crate::signal::{ScopedConnection, Signal};

/// Per-component-type signal table, indexed by [`ComponentId`].
#[derive(Default)]
struct SignalTable {
    signals: Vec<Option<Signal>>,
}

impl SignalTable {
    /// Returns the signal for `id`, creating it if necessary.
    fn get_or_create(&mut self, id: ComponentId) -> &Signal {
        let index = id.index();
        if self.signals.len() <= index {
            self.signals.resize_with(index + 1, || None);
        }
        self.signals[index].get_or_insert_with(Signal::new)
    }

    /// Emits on the signal for `id` if any listener ever connected.
    #[inline]
    fn emit(&self, id: ComponentId, entity: Entity) {
        if let Some(Some(signal)) = self.signals.get(id.index()) {
            signal.emit(entity);
        }
    }
}

/// Signals for entity and component lifecycle.
///
/// Obtained from [`Registry::events`](crate::registry::Registry::events) /
/// [`events_mut`](crate::registry::Registry::events_mut). Component signals
/// carry only the entity; listeners read current component state through
/// whatever access they captured.
#[derive(Default)]
pub struct EventBus {
    entity_created: Signal,
    entity_destroyed: Signal,
    cleared: Signal,
    added: SignalTable,
    removed: SignalTable,
    updated: SignalTable,
}

impl EventBus {
    /// Fired after a new entity is created.
    pub fn entity_created(&self) -> &Signal {
        &self.entity_created
    }

    /// Fired after an entity is destroyed. At this point every component
    /// has already been removed from the entity and it is no longer alive.
    pub fn entity_destroyed(&self) -> &Signal {
        &self.entity_destroyed
    }

    /// Fired after `T` is added to an entity.
    pub fn on_added<T: Component>(&mut self) -> Result<&Signal, EcsError> {
        Ok(self.added.get_or_create(ComponentId::of::<T>()?))
    }

    /// Fired for `T` just before it is erased from an entity's store, both
    /// on `remove` and on `destroy`. The component is still present when
    /// the listeners run.
    pub fn on_removed<T: Component>(&mut self) -> Result<&Signal, EcsError> {
        Ok(self.removed.get_or_create(ComponentId::of::<T>()?))
    }

    /// Fired after `T` is overwritten or patched on an entity.
    pub fn on_updated<T: Component>(&mut self) -> Result<&Signal, EcsError> {
        Ok(self.updated.get_or_create(ComponentId::of::<T>()?))
    }

    /// The distinct reset path: fired once by
    /// [`Registry::clear`](crate::registry::Registry::clear) instead of any
    /// per-entity events. Observers reset their dirty sets on it.
    pub(crate) fn cleared(&self) -> &Signal {
        &self.cleared
    }

    pub(crate) fn emit_created(&self, entity: Entity) {
        self.entity_created.emit(entity);
    }

    pub(crate) fn emit_destroyed(&self, entity: Entity) {
        self.entity_destroyed.emit(entity);
    }

    pub(crate) fn emit_added(&self, id: ComponentId, entity: Entity) {
        self.added.emit(id, entity);
    }

    pub(crate) fn emit_removed(&self, id: ComponentId, entity: Entity) {
        self.removed.emit(id, entity);
    }

    pub(crate) fn emit_updated(&self, id: ComponentId, entity: Entity) {
        self.updated.emit(id, entity);
    }

    pub(crate) fn emit_cleared(&self) {
        self.cleared.emit(crate::entity::NULL_ENTITY);
    }

    /// Connects to the added/removed/updated signal for a component id,
    /// creating the signal on demand. Used by observers.
    pub(crate) fn connect_component<F>(
        &mut self,
        kind: ComponentEventKind,
        id: ComponentId,
        listener: F,
    ) -> ScopedConnection
    where
        F: Fn(Entity) + Send + Sync + 'static,
    {
        let table = match kind {
            ComponentEventKind::Added => &mut self.added,
            ComponentEventKind::Removed => &mut self.removed,
            ComponentEventKind::Updated => &mut self.updated,
        };
        table.get_or_create(id).connect(listener)
    }
}

/// Which component lifecycle signal a connection targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentEventKind {
    /// The component was added to an entity.
    Added,
    /// The component is about to be erased from an entity.
    Removed,
    /// The component was overwritten or patched.
    Updated,
}
