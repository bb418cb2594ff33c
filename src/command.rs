//! Deferred command buffers.
//!
//! While iterating (or while running inside a scheduled system), structural
//! mutation of the registry is off limits: the stores are borrowed.
//! Command buffers record the mutations instead and replay them at a
//! barrier: systems record, the main thread flushes.
//!
//! Failures during replay (a target destroyed earlier in the same buffer, a
//! component already present) are logged and skipped, so one stale command
//! cannot abort the rest of the frame's work.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::SegQueue;

use crate::comp::Component;
use crate::entity::Entity;
use crate::registry::Registry;

/// Placeholder for an entity that will exist once the buffer flushes.
///
/// Returned by `spawn`; valid as a target for operations recorded *after*
/// the spawn in the same buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingEntity(usize);

/// Something a deferred operation can target: a live entity or a
/// placeholder from `spawn`.
#[derive(Clone, Copy, Debug)]
pub enum Target {
    /// An already-existing entity.
    Entity(Entity),
    /// A placeholder resolved at flush time.
    Pending(PendingEntity),
}

impl From<Entity> for Target {
    fn from(e: Entity) -> Self {
        Target::Entity(e)
    }
}

impl From<PendingEntity> for Target {
    fn from(p: PendingEntity) -> Self {
        Target::Pending(p)
    }
}

/// Placeholder-to-entity table built while a flush replays spawns.
#[derive(Default)]
struct SpawnTable {
    entities: Vec<Option<Entity>>,
}

impl SpawnTable {
    fn record(&mut self, placeholder: usize, e: Entity) {
        if self.entities.len() <= placeholder {
            self.entities.resize(placeholder + 1, None);
        }
        self.entities[placeholder] = Some(e);
    }

    fn resolve(&self, target: Target) -> Option<Entity> {
        match target {
            Target::Entity(e) => Some(e),
            Target::Pending(p) => self.entities.get(p.0).copied().flatten(),
        }
    }
}

enum Command {
    Spawn(usize),
    Apply(Box<dyn FnOnce(&mut Registry, &SpawnTable) + Send>),
}

fn destroy_command(target: Target) -> Command {
    Command::Apply(Box::new(move |registry, table| {
        match table.resolve(target) {
            Some(e) => registry.destroy(e),
            None => log::warn!("deferred destroy targets an unresolved placeholder"),
        }
    }))
}

fn add_command<T: Component>(target: Target, value: T) -> Command {
    Command::Apply(Box::new(move |registry, table| {
        match table.resolve(target) {
            Some(e) => {
                if let Err(err) = registry.add(e, value) {
                    log::warn!("deferred add skipped: {}", err);
                }
            }
            None => log::warn!("deferred add targets an unresolved placeholder"),
        }
    }))
}

fn remove_command<T: Component>(target: Target) -> Command {
    Command::Apply(Box::new(move |registry, table| {
        match table.resolve(target) {
            Some(e) => {
                registry.remove::<T>(e);
            }
            None => log::warn!("deferred remove targets an unresolved placeholder"),
        }
    }))
}

fn replay(
    commands: impl Iterator<Item = Command>,
    registry: &mut Registry,
) {
    let mut table = SpawnTable::default();
    for command in commands {
        match command {
            Command::Spawn(placeholder) => match registry.create() {
                Ok(e) => table.record(placeholder, e),
                Err(err) => log::warn!("deferred spawn failed: {}", err),
            },
            Command::Apply(op) => op(registry, &table),
        }
    }
}

/// Single-producer command buffer backed by a plain vector.
///
/// Recording takes `&mut self` and is not thread-safe; use one buffer per
/// thread or a [`ParallelCommandBuffer`]. [`CommandBuffer::flush`] replays
/// in insertion order and leaves the buffer empty.
#[derive(Default)]
pub struct CommandBuffer {
    commands: Vec<Command>,
    spawned: usize,
}

impl CommandBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an entity creation, returning a placeholder usable as a
    /// target by subsequently recorded operations.
    pub fn spawn(&mut self) -> PendingEntity {
        let placeholder = PendingEntity(self.spawned);
        self.spawned += 1;
        self.commands.push(Command::Spawn(placeholder.0));
        placeholder
    }

    /// Records an entity destruction.
    pub fn destroy(&mut self, target: impl Into<Target>) {
        self.commands.push(destroy_command(target.into()));
    }

    /// Records a component addition.
    pub fn add<T: Component>(&mut self, target: impl Into<Target>, value: T) {
        self.commands.push(add_command(target.into(), value));
    }

    /// Records a component removal.
    pub fn remove<T: Component>(&mut self, target: impl Into<Target>) {
        self.commands.push(remove_command::<T>(target.into()));
    }

    /// Records an arbitrary deferred operation.
    pub fn defer(&mut self, f: impl FnOnce(&mut Registry) + Send + 'static) {
        self.commands
            .push(Command::Apply(Box::new(move |registry, _| f(registry))));
    }

    /// Number of recorded commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Replays every recorded command in insertion order and clears the
    /// buffer.
    pub fn flush(&mut self, registry: &mut Registry) {
        replay(self.commands.drain(..), registry);
        self.spawned = 0;
    }
}

/// Multi-producer command buffer backed by a lock-free queue, the
/// recommended mutation path for parallel systems.
///
/// Recording takes `&self` and is safe from any number of threads. Each
/// producer's own commands replay in its recording order; commands from
/// different producers interleave in arrival order, which callers must
/// treat as unordered.
#[derive(Default)]
pub struct ParallelCommandBuffer {
    queue: SegQueue<Command>,
    spawned: AtomicUsize,
}

impl ParallelCommandBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an entity creation. See [`CommandBuffer::spawn`]; the
    /// placeholder is valid for operations this producer records
    /// afterwards.
    pub fn spawn(&self) -> PendingEntity {
        let placeholder = PendingEntity(self.spawned.fetch_add(1, Ordering::Relaxed));
        self.queue.push(Command::Spawn(placeholder.0));
        placeholder
    }

    /// Records an entity destruction.
    pub fn destroy(&self, target: impl Into<Target>) {
        self.queue.push(destroy_command(target.into()));
    }

    /// Records a component addition.
    pub fn add<T: Component>(&self, target: impl Into<Target>, value: T) {
        self.queue.push(add_command(target.into(), value));
    }

    /// Records a component removal.
    pub fn remove<T: Component>(&self, target: impl Into<Target>) {
        self.queue.push(remove_command::<T>(target.into()));
    }

    /// Records an arbitrary deferred operation.
    pub fn defer(&self, f: impl FnOnce(&mut Registry) + Send + 'static) {
        self.queue
            .push(Command::Apply(Box::new(move |registry, _| f(registry))));
    }

    /// Returns `true` if nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Replays every recorded command in arrival order and clears the
    /// buffer.
    pub fn flush(&self, registry: &mut Registry) {
        self.spawned.store(0, Ordering::Relaxed);
        replay(std::iter::from_fn(|| self.queue.pop()), registry);
    }
}
