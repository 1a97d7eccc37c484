//! Address subscription bus
//!
//! Exact-match publish/subscribe keyed by OSC address. No wildcard
//! pattern matching.

use super::message::Message;
use crate::observer::{ListenerRegistry, Subscription};
use std::sync::Arc;
use tracing::trace;

/// Publish/subscribe hub for dispatched messages
#[derive(Clone)]
pub struct SubscriptionBus {
    listeners: Arc<ListenerRegistry<Message>>,
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(ListenerRegistry::new("bus")),
        }
    }

    /// Listen for messages published on exactly `address`
    pub fn subscribe<F>(&self, address: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.listeners.subscribe(address, listener)
    }

    /// Deliver `message` to the listeners of `address`, synchronously
    ///
    /// Never fails; listener faults are logged by the registry.
    pub fn publish(&self, address: &str, message: &Message) -> usize {
        let delivered = self.listeners.notify(address, message);
        trace!(address, delivered, "bus publish");
        delivered
    }

    pub fn listener_count(&self, address: &str) -> usize {
        self.listeners.listener_count(address)
    }

    pub fn clear(&self) {
        self.listeners.clear();
    }
}

impl Default for SubscriptionBus {
    fn default() -> Self {
        Self::new()
    }
}
