//! Synchronous entity signals with scoped connections.
//!
//! A [`Signal`] is a list of listeners invoked synchronously on
//! [`Signal::emit`]. Connecting returns a [`ScopedConnection`] that
//! disconnects the listener when dropped. Emission snapshots the slot list
//! first, so listeners may connect or disconnect (including themselves)
//! while a dispatch is in progress without invalidating it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::entity::Entity;

type Listener = Arc<dyn Fn(Entity) + Send + Sync>;

#[derive(Clone)]
struct Slot {
    id: u64,
    listener: Listener,
}

#[derive(Default)]
struct Inner {
    slots: Mutex<Vec<Slot>>,
    next_id: AtomicU64,
}

/// A synchronous signal carrying an [`Entity`].
///
/// Listeners receive only the entity; anything else they need, they capture.
/// They may run on whatever thread emitted the signal and must not assume a
/// particular thread identity.
#[derive(Default)]
pub struct Signal {
    inner: Arc<Inner>,
}

impl Signal {
    /// Creates a signal with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a listener and returns its scoped connection.
    ///
    /// Dropping the connection disconnects the listener. A listener
    /// disconnected during an emission still sees that emission through the
    /// dispatch snapshot taken at `emit`.
    pub fn connect<F>(&self, listener: F) -> ScopedConnection
    where
        F: Fn(Entity) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock_slots().push(Slot {
            id,
            listener: Arc::new(listener),
        });
        ScopedConnection {
            signal: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Invokes every connected listener with `entity`.
    pub fn emit(&self, entity: Entity) {
        // Copy-on-dispatch: the lock is released before any listener runs,
        // so reentrant connects and disconnects cannot deadlock or
        // invalidate this dispatch.
        let snapshot: Vec<Slot> = self.lock_slots().clone();
        for slot in &snapshot {
            (slot.listener)(entity);
        }
    }

    /// Returns `true` if no listener is connected.
    pub fn is_empty(&self) -> bool {
        self.lock_slots().is_empty()
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, Vec<Slot>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

/// RAII guard for a signal connection; disconnects the listener on drop.
///
/// Outliving the signal is fine: disconnecting from a dead signal is a
/// no-op.
pub struct ScopedConnection {
    signal: Weak<Inner>,
    id: u64,
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        if let Some(inner) = self.signal.upgrade() {
            let mut slots = inner
                .slots
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            if let Some(pos) = slots.iter().position(|s| s.id == self.id) {
                slots.remove(pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::NULL_ENTITY;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emits_to_connected_listeners() {
        let signal = Signal::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let conn = signal.connect(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        signal.emit(NULL_ENTITY);
        signal.emit(NULL_ENTITY);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        drop(conn);
    }

    #[test]
    fn dropping_connection_disconnects() {
        let signal = Signal::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let conn = signal.connect(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        signal.emit(NULL_ENTITY);
        drop(conn);
        signal.emit(NULL_ENTITY);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(signal.is_empty());
    }

    #[test]
    fn connecting_during_emission_is_safe() {
        let signal = Arc::new(Signal::new());
        let late = Arc::new(AtomicUsize::new(0));
        let held = Arc::new(Mutex::new(Vec::new()));

        let sig = signal.clone();
        let counter = late.clone();
        let store = held.clone();
        let conn = signal.connect(move |_| {
            let c = counter.clone();
            let inner = sig.connect(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            });
            store.lock().unwrap().push(inner);
        });

        // The listener connected mid-dispatch must not fire for the
        // emission that created it.
        signal.emit(NULL_ENTITY);
        assert_eq!(late.load(Ordering::SeqCst), 0);

        drop(conn);
        signal.emit(NULL_ENTITY);
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn outliving_the_signal_is_harmless() {
        let signal = Signal::new();
        let conn = signal.connect(|_| {});
        drop(signal);
        drop(conn);
    }
}
