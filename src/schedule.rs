//! Parallel system execution under declared read/write component masks.
//!
//! Systems are plain `FnMut(&Registry)` closures registered with a name and
//! the masks of the component types they read and write. Two systems
//! conflict when one writes what the other touches; the scheduler runs
//! maximal non-conflicting *waves* on a rayon thread pool, joining each
//! wave before the next starts. Conflicting systems serialize in
//! registration order.
//!
//! Inside a system, component data is written through
//! [`write_store`](crate::registry::Registry::write_store) guards (the
//! declared masks are what make those exclusive borrows disjoint across a
//! wave) and structural changes are recorded into a
//! [`ParallelCommandBuffer`](crate::command::ParallelCommandBuffer) for the
//! main thread to flush after the run.

use crate::comp::ComponentMask;
use crate::registry::Registry;

/// The closure type a system registers.
pub type SystemFn = Box<dyn FnMut(&Registry) + Send>;

struct SystemEntry {
    name: String,
    reads: ComponentMask,
    writes: ComponentMask,
    enabled: bool,
    run: SystemFn,
}

fn conflicts(a: &SystemEntry, b: &SystemEntry) -> bool {
    a.writes.intersects(&b.writes)
        || a.writes.intersects(&b.reads)
        || a.reads.intersects(&b.writes)
}

/// Greedy wave scheduler over a shared thread pool.
pub struct Scheduler {
    pool: rayon::ThreadPool,
    systems: Vec<SystemEntry>,
}

impl Scheduler {
    /// Creates a scheduler with one worker per hardware thread.
    ///
    /// # Panics
    ///
    /// Panics if the thread pool cannot be built; use
    /// [`Scheduler::with_threads`] to handle that case.
    pub fn new() -> Self {
        Self::with_threads(0).expect("failed to build the scheduler thread pool")
    }

    /// Creates a scheduler with an explicit worker count (`0` = hardware
    /// concurrency).
    pub fn with_threads(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        Ok(Scheduler {
            pool: rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()?,
            systems: Vec::new(),
        })
    }

    /// Registers a system with its declared read and write masks.
    ///
    /// The masks are trusted: a system touching stores outside its
    /// declaration may panic on a store borrow (or worse, starve another
    /// wave). Registration order is the serialization order for
    /// conflicting systems.
    pub fn add_system<F>(
        &mut self,
        name: impl Into<String>,
        reads: ComponentMask,
        writes: ComponentMask,
        run: F,
    ) where
        F: FnMut(&Registry) + Send + 'static,
    {
        self.systems.push(SystemEntry {
            name: name.into(),
            reads,
            writes,
            enabled: true,
            run: Box::new(run),
        });
    }

    /// Enables or disables a system by name. Disabled systems are skipped
    /// by [`Scheduler::run`]. Returns `false` if no system has that name.
    pub fn set_system_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.systems.iter_mut().find(|s| s.name == name) {
            Some(system) => {
                system.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Whether the named system is enabled. Unknown names report `false`.
    pub fn is_system_enabled(&self, name: &str) -> bool {
        self.systems
            .iter()
            .find(|s| s.name == name)
            .map_or(false, |s| s.enabled)
    }

    /// Number of registered systems.
    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Runs every enabled system once.
    ///
    /// Pending systems are consumed in greedy waves: each wave takes, in
    /// registration order, every pending system that conflicts with
    /// nothing already in the wave; the wave executes on the pool and is
    /// joined before the next is formed. Effects of wave *k* are visible
    /// to wave *k + 1*. There is no cancellation: every started system
    /// runs to completion.
    pub fn run(&mut self, registry: &mut Registry) {
        let mut pending: Vec<usize> = (0..self.systems.len())
            .filter(|&i| self.systems[i].enabled)
            .collect();

        while !pending.is_empty() {
            let mut wave: Vec<usize> = Vec::new();
            for &candidate in &pending {
                let ok = wave
                    .iter()
                    .all(|&member| !conflicts(&self.systems[candidate], &self.systems[member]));
                if ok {
                    wave.push(candidate);
                }
            }
            pending.retain(|i| !wave.contains(i));
            log::trace!("scheduler wave: {} system(s)", wave.len());
            self.run_wave(&wave, registry);
        }
    }

    fn run_wave(&mut self, wave: &[usize], registry: &Registry) {
        if let [single] = wave {
            (self.systems[*single].run)(registry);
            return;
        }

        let Self { pool, systems } = self;
        let mut selected: Vec<&mut SystemEntry> = systems
            .iter_mut()
            .enumerate()
            .filter(|(i, _)| wave.contains(i))
            .map(|(_, entry)| entry)
            .collect();

        pool.scope(|scope| {
            for entry in &mut selected {
                let run = &mut entry.run;
                scope.spawn(move |_| run(registry));
            }
        });
    }

    /// Splits `[begin, end)` into chunks of at most `chunk` elements,
    /// dispatches all but the last chunk to the pool and runs the last on
    /// the calling thread. Returns when every chunk is done. No ordering
    /// across chunks.
    pub fn parallel_for<F>(&self, begin: usize, end: usize, chunk: usize, f: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        if begin >= end {
            return;
        }
        let chunk = chunk.max(1);
        if end - begin <= chunk {
            for i in begin..end {
                f(i);
            }
            return;
        }

        let f = &f;
        self.pool.scope(|scope| {
            let mut start = begin;
            while end - start > chunk {
                let stop = start + chunk;
                scope.spawn(move |_| {
                    for i in start..stop {
                        f(i);
                    }
                });
                start = stop;
            }
            for i in start..end {
                f(i);
            }
        });
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
