//! SyncEngine - per-parameter synchronization state machine
//!
//! ```text
//! idle ──update──► syncing ──send ok──► synced
//!                     ▲   └──send err─► error
//!                     └────update─────────┘ (from synced or error)
//! ```
//!
//! The engine owns every `ParameterState`; it reaches devices only through
//! `DeviceTransport::send` / `send_batch` and reports transitions to
//! per-parameter subscribers.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{ParameterState, ParameterUpdate, SyncStatus, SyncSummary};
use crate::observer::{ListenerRegistry, Subscription};
use crate::transport::{DeviceTransport, Message, TransportError};

/// Parameter synchronization engine
pub struct SyncEngine {
    transport: Arc<DeviceTransport>,
    states: RwLock<HashMap<String, ParameterState>>,
    subscribers: ListenerRegistry<ParameterState>,
}

impl SyncEngine {
    pub fn new(transport: Arc<DeviceTransport>) -> Self {
        Self {
            transport,
            states: RwLock::new(HashMap::new()),
            subscribers: ListenerRegistry::new("engine"),
        }
    }

    pub fn transport(&self) -> &Arc<DeviceTransport> {
        &self.transport
    }

    // =========================================================================
    // State transitions
    // =========================================================================

    /// Record a new value and enter `syncing`
    ///
    /// Creates the state on first use and starts a new attempt, so results
    /// of sends still in flight for older values are discarded. Performs no I/O.
    pub fn update_parameter(&self, parameter_id: &str, address: &str, value: f64) -> ParameterState {
        let state = {
            let mut states = self.states.write();
            let state = states
                .entry(parameter_id.to_string())
                .or_insert_with(|| ParameterState::new(parameter_id, address, value));
            state.address = address.to_string();
            state.value = value;
            state.status = SyncStatus::Syncing;
            state.attempt += 1;
            state.clone()
        };

        debug!(parameter_id, address, value, "parameter syncing");
        self.subscribers.notify(parameter_id, &state);
        state
    }

    /// Mark a parameter delivered; no-op for unknown ids
    pub fn mark_synced(&self, parameter_id: &str) -> Option<ParameterState> {
        self.transition(parameter_id, |state| {
            state.status = SyncStatus::Synced;
            state.last_sync_time = Some(Utc::now());
            state.last_error = None;
        })
    }

    /// Mark a parameter failed; no-op for unknown ids
    pub fn mark_error(&self, parameter_id: &str) -> Option<ParameterState> {
        self.transition(parameter_id, |state| {
            state.status = SyncStatus::Error;
        })
    }

    fn transition<F>(&self, parameter_id: &str, apply: F) -> Option<ParameterState>
    where
        F: FnOnce(&mut ParameterState),
    {
        let state = {
            let mut states = self.states.write();
            let state = states.get_mut(parameter_id)?;
            apply(state);
            state.clone()
        };
        self.subscribers.notify(parameter_id, &state);
        Some(state)
    }

    /// Apply a send result if `attempt` is still the parameter's latest
    fn resolve(&self, parameter_id: &str, attempt: u64, result: &Result<(), TransportError>) {
        let current = self.transition_if(parameter_id, attempt, |state| match result {
            Ok(()) => {
                state.status = SyncStatus::Synced;
                state.last_sync_time = Some(Utc::now());
                state.last_error = None;
            }
            Err(e) => {
                state.status = SyncStatus::Error;
                state.last_error = Some(e.to_string());
            }
        });
        if current.is_none() {
            debug!(parameter_id, attempt, "result superseded by a newer value");
        }
    }

    /// Like `transition`, but only while `attempt` is the latest one
    fn transition_if<F>(&self, parameter_id: &str, attempt: u64, apply: F) -> Option<ParameterState>
    where
        F: FnOnce(&mut ParameterState),
    {
        let state = {
            let mut states = self.states.write();
            let state = states.get_mut(parameter_id)?;
            if state.attempt != attempt {
                return None;
            }
            apply(state);
            state.clone()
        };
        self.subscribers.notify(parameter_id, &state);
        Some(state)
    }

    // =========================================================================
    // Device sync
    // =========================================================================

    /// Record `value` and send it to `device_id` as a one-argument message
    ///
    /// The parameter ends in `synced` or `error` when this returns, whatever
    /// went wrong while building or sending the message.
    pub async fn sync_to_device(
        &self,
        device_id: &str,
        parameter_id: &str,
        address: &str,
        value: f64,
    ) -> Result<(), TransportError> {
        let attempt = self.update_parameter(parameter_id, address, value).attempt;
        let mut pending = PendingSync::new(self, vec![(parameter_id.to_string(), attempt)]);

        let result = match Message::value(address, value) {
            Ok(message) => {
                self.transport
                    .send(device_id, message.stamped(Utc::now()))
                    .await
            }
            Err(e) => Err(e),
        };

        pending.disarm();
        self.resolve(parameter_id, attempt, &result);

        match &result {
            Ok(()) => debug!("✅ {} = {} synced to {}", parameter_id, value, device_id),
            Err(e) => warn!("❌ {} sync to {} failed: {}", parameter_id, device_id, e),
        }
        result
    }

    /// Sync several parameters through one batch send
    ///
    /// Resolution is all-or-nothing: every listed parameter becomes `synced`
    /// if the whole batch was delivered, `error` otherwise.
    pub async fn sync_batch(
        &self,
        device_id: &str,
        parameters: &[ParameterUpdate],
    ) -> Result<(), TransportError> {
        let attempts: Vec<(String, u64)> = parameters
            .iter()
            .map(|p| {
                let attempt = self.update_parameter(&p.id, &p.address, p.value).attempt;
                (p.id.clone(), attempt)
            })
            .collect();
        let mut pending = PendingSync::new(self, attempts.clone());

        let messages: Result<Vec<Message>, TransportError> = parameters
            .iter()
            .map(|p| Message::value(p.address.as_str(), p.value))
            .collect();

        let result = match messages {
            Ok(messages) => self.transport.send_batch(device_id, messages).await,
            Err(e) => Err(e),
        };

        pending.disarm();
        for (id, attempt) in &attempts {
            self.resolve(id, *attempt, &result);
        }

        match &result {
            Ok(()) => info!("✅ Batch of {} parameters synced to {}", parameters.len(), device_id),
            Err(e) => warn!("❌ Batch sync to {} failed: {}", device_id, e),
        }
        result
    }

    /// Re-send a parameter's stored value to its stored address
    pub async fn retry(&self, device_id: &str, parameter_id: &str) -> Result<(), TransportError> {
        let Some(state) = self.get_parameter(parameter_id) else {
            return Err(TransportError::UnknownParameter {
                parameter_id: parameter_id.to_string(),
            });
        };
        info!("🔄 Retrying {} ({}) on {}", parameter_id, state.address, device_id);
        self.sync_to_device(device_id, parameter_id, &state.address, state.value)
            .await
    }

    // =========================================================================
    // Queries and subscriptions
    // =========================================================================

    pub fn get_parameter(&self, parameter_id: &str) -> Option<ParameterState> {
        self.states.read().get(parameter_id).cloned()
    }

    /// All states, ordered by parameter id
    pub fn parameters(&self) -> Vec<ParameterState> {
        let mut all: Vec<ParameterState> = self.states.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Status counts computed from the current states
    pub fn summary(&self) -> SyncSummary {
        SyncSummary::from_states(self.states.read().values())
    }

    /// Listen for state changes of one parameter
    pub fn subscribe<F>(&self, parameter_id: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&ParameterState) + Send + Sync + 'static,
    {
        self.subscribers.subscribe(parameter_id, listener)
    }

    /// Full reset: drop every state and every subscription
    pub fn clear(&self) {
        self.states.write().clear();
        self.subscribers.clear();
        info!("Parameter states cleared");
    }
}

/// Marks its parameters `error` if a sync is abandoned before resolving
///
/// Covers a caller dropping the sync future mid-send. Parameters that moved
/// on to a newer attempt are left alone.
struct PendingSync<'a> {
    engine: &'a SyncEngine,
    attempts: Vec<(String, u64)>,
    armed: bool,
}

impl<'a> PendingSync<'a> {
    fn new(engine: &'a SyncEngine, attempts: Vec<(String, u64)>) -> Self {
        Self {
            engine,
            attempts,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingSync<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for (id, attempt) in &self.attempts {
            let abandoned = self.engine.transition_if(id, *attempt, |state| {
                state.status = SyncStatus::Error;
                state.last_error = Some("sync abandoned".to_string());
            });
            if abandoned.is_some() {
                warn!("Sync of {} abandoned before completion", id);
            }
        }
    }
}
