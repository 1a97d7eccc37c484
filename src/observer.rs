//! Keyed listener registry with capability-style unsubscription
//!
//! Backs both the address subscription bus (keyed by OSC address) and the
//! per-parameter subscriptions of the sync engine (keyed by parameter id).
//! Listeners for a key run in registration order; a panicking listener is
//! logged and skipped so its siblings still run.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, trace};

/// Listener callback invoked with a borrowed value
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slot<T> {
    id: u64,
    listener: Listener<T>,
}

struct Inner<T> {
    /// Used as a prefix in log lines ("bus", "engine", ...)
    label: &'static str,
    next_id: AtomicU64,
    slots: RwLock<HashMap<String, Vec<Slot<T>>>>,
}

/// Type-erased removal so `Subscription` does not carry the value type
trait Detach: Send + Sync {
    fn detach(&self, key: &str, id: u64) -> bool;
}

impl<T: 'static> Detach for Inner<T> {
    fn detach(&self, key: &str, id: u64) -> bool {
        let mut slots = self.slots.write();
        let Some(list) = slots.get_mut(key) else {
            return false;
        };
        let before = list.len();
        list.retain(|slot| slot.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            slots.remove(key);
        }
        removed
    }
}

/// Ordered, multi-listener registry keyed by string
pub struct ListenerRegistry<T> {
    inner: Arc<Inner<T>>,
}

impl<T: 'static> ListenerRegistry<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                label,
                next_id: AtomicU64::new(1),
                slots: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register `listener` under `key` and return its unsubscribe capability
    pub fn subscribe<F>(&self, key: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let key = key.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .slots
            .write()
            .entry(key.clone())
            .or_default()
            .push(Slot {
                id,
                listener: Arc::new(listener),
            });

        trace!("[{}] listener #{} subscribed to {}", self.inner.label, id, key);

        let registry: Arc<dyn Detach> = self.inner.clone();
        Subscription {
            key,
            id,
            registry: Arc::downgrade(&registry),
            active: AtomicBool::new(true),
        }
    }

    /// Invoke every listener currently registered for `key`
    ///
    /// Returns how many listeners completed without panicking. The lock is
    /// released before any listener runs, so listeners may subscribe or
    /// unsubscribe re-entrantly.
    pub fn notify(&self, key: &str, value: &T) -> usize {
        let snapshot: Vec<(u64, Listener<T>)> = {
            let slots = self.inner.slots.read();
            match slots.get(key) {
                Some(list) => list
                    .iter()
                    .map(|slot| (slot.id, Arc::clone(&slot.listener)))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(value))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    error!(
                        "[{}] listener #{} for {} failed: {}",
                        self.inner.label,
                        id,
                        key,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        delivered
    }

    /// Number of listeners registered for `key`
    pub fn listener_count(&self, key: &str) -> usize {
        self.inner.slots.read().get(key).map_or(0, Vec::len)
    }

    /// Drop every registration for every key
    pub fn clear(&self) {
        self.inner.slots.write().clear();
    }
}

impl<T: 'static> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new("observer")
    }
}

/// Capability that removes exactly one listener registration
///
/// Dropping the handle leaves the listener registered.
pub struct Subscription {
    key: String,
    id: u64,
    registry: Weak<dyn Detach>,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the listener; later calls are no-ops
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(&self.key, self.id);
        }
    }

    /// Whether `unsubscribe` has not been called on this handle yet
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Key this subscription was registered under
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
