//! Cooperative processes: tasks ticked every update until they finish.
//!
//! A [`Process`] runs once per [`ProcessScheduler::update`] until it
//! reports success or failure, or is aborted from outside. Chains built
//! with [`ProcessChain::then`] run their successor as soon as the
//! predecessor succeeds; a failed or aborted process drops the rest of its
//! chain. Ticking happens wherever the scheduler is driven from, by
//! contract the main thread, which is also where processes may call back
//! into the registry they were handed as `Data`.

use std::collections::VecDeque;

/// Lifecycle of a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    /// Attached, not yet ticked.
    Uninitialized,
    /// Ticking every update.
    Running,
    /// Finished successfully; its successor (if any) takes over.
    Succeeded,
    /// Finished unsuccessfully; the rest of the chain is dropped.
    Failed,
    /// Externally aborted; the abort hook runs at the next tick
    /// opportunity, then the chain is dropped.
    Aborted,
}

/// What a process's `update` wants to happen next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// Keep running; tick again next update.
    Continue,
    /// Done; run the successor.
    Succeed,
    /// Give up; drop the chain.
    Fail,
}

/// A cooperative task ticked by a [`ProcessScheduler`].
///
/// `Delta` is the time-step type, `Data` whatever ambient state the
/// scheduler's driver passes along (typically `&mut Registry` wrapped in
/// the `Data` type).
pub trait Process<Delta, Data>: Send {
    /// Called once, before the first update.
    fn init(&mut self) {}

    /// Called every tick while running.
    fn update(&mut self, delta: Delta, data: &mut Data) -> Tick;

    /// Called after the process reports [`Tick::Succeed`].
    fn succeeded(&mut self) {}

    /// Called after the process reports [`Tick::Fail`].
    fn failed(&mut self) {}

    /// Called when the process is aborted, at the next tick opportunity.
    fn aborted(&mut self) {}
}

struct Chain<Delta, Data> {
    stages: VecDeque<Box<dyn Process<Delta, Data>>>,
    state: ProcessState,
}

impl<Delta: Clone, Data> Chain<Delta, Data> {
    /// Ticks the chain head. Returns whether the chain stays alive.
    fn tick(&mut self, delta: Delta, data: &mut Data) -> bool {
        loop {
            let Some(head) = self.stages.front_mut() else {
                return false;
            };
            match self.state {
                ProcessState::Aborted => {
                    head.aborted();
                    return false;
                }
                ProcessState::Uninitialized => {
                    head.init();
                    self.state = ProcessState::Running;
                }
                ProcessState::Running => {}
                ProcessState::Succeeded | ProcessState::Failed => return false,
            }
            match head.update(delta.clone(), data) {
                Tick::Continue => return true,
                Tick::Succeed => {
                    head.succeeded();
                    self.stages.pop_front();
                    if self.stages.is_empty() {
                        self.state = ProcessState::Succeeded;
                        return false;
                    }
                    // The successor starts within the same update.
                    self.state = ProcessState::Uninitialized;
                }
                Tick::Fail => {
                    head.failed();
                    self.state = ProcessState::Failed;
                    return false;
                }
            }
        }
    }
}

/// Owns process chains and ticks them.
pub struct ProcessScheduler<Delta, Data> {
    chains: Vec<Chain<Delta, Data>>,
}

impl<Delta: Clone, Data> ProcessScheduler<Delta, Data> {
    /// Creates a scheduler with no processes.
    pub fn new() -> Self {
        ProcessScheduler { chains: Vec::new() }
    }

    /// Attaches a new process chain headed by `process`. Chain successors
    /// are added through the returned handle.
    pub fn attach<P>(&mut self, process: P) -> ProcessChain<'_, Delta, Data>
    where
        P: Process<Delta, Data> + 'static,
    {
        let mut stages: VecDeque<Box<dyn Process<Delta, Data>>> = VecDeque::new();
        stages.push_back(Box::new(process));
        self.chains.push(Chain {
            stages,
            state: ProcessState::Uninitialized,
        });
        ProcessChain {
            chain: self.chains.last_mut().expect("chain just pushed"),
        }
    }

    /// Number of live chains.
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Returns `true` if no chain is live.
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Ticks every live chain once. Finished chains are removed; a chain
    /// whose head succeeds continues with its successor within this same
    /// call.
    pub fn update(&mut self, delta: Delta, data: &mut Data) {
        self.chains
            .retain_mut(|chain| chain.tick(delta.clone(), data));
    }

    /// Marks every chain aborted. Cooperative: each head's
    /// [`Process::aborted`] hook runs at its next tick opportunity, after
    /// which the chain is dropped.
    pub fn abort_all(&mut self) {
        for chain in &mut self.chains {
            chain.state = ProcessState::Aborted;
        }
    }

    /// Drops every chain without running any hook.
    pub fn clear(&mut self) {
        self.chains.clear();
    }
}

impl<Delta: Clone, Data> Default for ProcessScheduler<Delta, Data> {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder handle for appending successors to a freshly attached chain.
pub struct ProcessChain<'a, Delta, Data> {
    chain: &'a mut Chain<Delta, Data>,
}

impl<'a, Delta, Data> ProcessChain<'a, Delta, Data> {
    /// Appends `next` to run after the current chain tail succeeds.
    pub fn then<P>(self, next: P) -> Self
    where
        P: Process<Delta, Data> + 'static,
    {
        self.chain.stages.push_back(Box::new(next));
        self
    }
}
