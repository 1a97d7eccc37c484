//! Device transport - connection lifecycle, ordered dispatch, address pub/sub
//!
//! `DeviceTransport` composes the connection registry, the subscription bus,
//! a `DeviceLink` backend and one dispatch lane per connected device.

mod bus;
mod connection;
mod error;
mod lane;
mod link;
mod message;

pub use bus::SubscriptionBus;
pub use connection::{Connection, ConnectionRegistry};
pub use error::TransportError;
pub use link::{DeviceLink, SimulatedLink};
pub use message::{ArgValue, Message};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::observer::Subscription;
use lane::{DispatchLane, LaneHandle};

/// Transport timing settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TransportConfig {
    /// Simulated handshake latency before a link is opened
    #[serde(default = "default_connect_delay")]
    pub connect_delay_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Upper bound for a single message transmit
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

fn default_connect_delay() -> u64 {
    500
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_send_timeout() -> u64 {
    1000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_delay_ms: default_connect_delay(),
            connect_timeout_ms: default_connect_timeout(),
            send_timeout_ms: default_send_timeout(),
        }
    }
}

impl TransportConfig {
    /// No simulated connect delay (tests, scripted runs)
    pub fn immediate() -> Self {
        Self {
            connect_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Device transport
///
/// Share it as `Arc<DeviceTransport>`; all methods take `&self`.
/// Lanes are tokio tasks, so `connect`/`send` must run inside a runtime.
pub struct DeviceTransport {
    config: TransportConfig,
    registry: Arc<ConnectionRegistry>,
    bus: SubscriptionBus,
    link: Arc<dyn DeviceLink>,
    lanes: DashMap<String, LaneHandle>,
}

impl DeviceTransport {
    pub fn new(config: TransportConfig, link: Arc<dyn DeviceLink>) -> Self {
        Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            bus: SubscriptionBus::new(),
            link,
            lanes: DashMap::new(),
        }
    }

    /// Transport backed by `SimulatedLink`
    pub fn simulated(config: TransportConfig) -> Self {
        Self::new(config, Arc::new(SimulatedLink::new()))
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Open (or re-open) the connection for `device_id`
    ///
    /// On success the registry holds a fresh live entry for the id. On
    /// failure any prior entry for the id is left untouched.
    pub async fn connect(
        &self,
        device_id: &str,
        host: &str,
        port: u16,
    ) -> Result<(), TransportError> {
        info!("🔌 Connecting {} to {}:{}", device_id, host, port);

        let delay = self.config.connect_delay();
        let handshake = async {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.link.open(device_id, host, port).await
        };

        let endpoint = format!("{}:{}", host, port);
        match tokio::time::timeout(self.config.connect_timeout(), handshake).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("❌ Connection to {} failed: {}", endpoint, e);
                return Err(match e {
                    TransportError::ConnectFailed { .. } => e,
                    other => TransportError::ConnectFailed {
                        device_id: device_id.to_string(),
                        endpoint,
                        reason: other.to_string(),
                    },
                });
            }
            Err(_) => {
                let err = TransportError::Timeout {
                    device_id: device_id.to_string(),
                    operation: "connect",
                    after_ms: self.config.connect_timeout_ms,
                };
                warn!("⏱️  {}", err);
                return Err(err);
            }
        }

        self.registry
            .upsert(Connection::open(device_id, host, port));
        if self.attach_lane(device_id).is_none() {
            debug!("{} removed while connecting", device_id);
        }

        info!("✅ Connected {} at {} via {} link", device_id, endpoint, self.link.name());
        Ok(())
    }

    /// Mark a device disconnected; false if it was never connected
    ///
    /// The entry stays so later sends report `NotConnected`.
    pub fn disconnect(&self, device_id: &str) -> bool {
        let existed = self.registry.mark_disconnected(device_id);
        if existed {
            info!("🔌 Disconnected {}", device_id);
        }
        existed
    }

    /// Drop a device entirely (device removal)
    pub fn remove(&self, device_id: &str) -> Option<Connection> {
        let removed = self.registry.remove(device_id);
        if let Some((_, lane)) = self.lanes.remove(device_id) {
            lane.shutdown();
        }
        if removed.is_some() {
            info!("🗑️  Removed {}", device_id);
        }
        removed
    }

    /// Disconnect every device and clear the registry
    pub fn disconnect_all(&self) {
        let ids = self.registry.disconnect_all();
        for id in &ids {
            if let Some((_, lane)) = self.lanes.remove(id) {
                lane.shutdown();
            }
        }
        // Lanes whose entry was removed concurrently
        self.lanes.retain(|_, lane| {
            lane.shutdown();
            false
        });
        info!("🛑 Disconnected all devices ({})", ids.len());
    }

    /// Application stop: tear down every connection and lane
    pub fn shutdown(&self) {
        self.disconnect_all();
        self.bus.clear();
    }

    pub fn get(&self, device_id: &str) -> Option<Connection> {
        self.registry.get(device_id)
    }

    /// Connections in insertion order
    pub fn list(&self) -> Vec<Connection> {
        self.registry.list()
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.registry.is_live(device_id)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Send one message to a device
    ///
    /// Fails with `NotConnected` for unknown or disconnected devices. On
    /// success the connection's bookkeeping is updated and bus listeners
    /// for the message address have already run.
    pub async fn send(&self, device_id: &str, message: Message) -> Result<(), TransportError> {
        let lane = self.lane_for(device_id)?;
        lane.send(message).await
    }

    /// Send messages in order as one uninterrupted unit
    ///
    /// Every message is attempted even after a failure. Succeeds only if all
    /// of them were delivered.
    pub async fn send_batch(
        &self,
        device_id: &str,
        messages: Vec<Message>,
    ) -> Result<(), TransportError> {
        let total = messages.len();
        if total == 0 {
            return Ok(());
        }

        let results = match self.lane_for(device_id) {
            Ok(lane) => lane.send_batch(messages).await,
            Err(e) => vec![Err(e); total],
        };

        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed == 0 {
            debug!("Batch of {} delivered to {}", total, device_id);
            return Ok(());
        }

        warn!("❌ Batch to {}: {}/{} failed", device_id, failed, total);
        Err(TransportError::BatchFailed {
            device_id: device_id.to_string(),
            failed,
            total,
        })
    }

    // =========================================================================
    // Address subscriptions
    // =========================================================================

    /// Listen for messages dispatched on exactly `address`
    pub fn subscribe<F>(&self, address: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.bus.subscribe(address, listener)
    }

    /// Publish an inbound message to address listeners
    pub fn publish(&self, address: &str, message: &Message) -> usize {
        self.bus.publish(address, message)
    }

    pub fn bus(&self) -> &SubscriptionBus {
        &self.bus
    }

    // =========================================================================
    // Lanes
    // =========================================================================

    fn ensure_lane(&self, device_id: &str) -> LaneHandle {
        let entry = self.lanes.entry(device_id.to_string());
        let lane = entry
            .and_modify(|lane| {
                if !lane.is_alive() {
                    *lane = self.spawn_lane(device_id);
                }
            })
            .or_insert_with(|| self.spawn_lane(device_id));
        lane.value().clone()
    }

    fn spawn_lane(&self, device_id: &str) -> LaneHandle {
        DispatchLane::spawn(
            device_id,
            Arc::clone(&self.registry),
            self.bus.clone(),
            Arc::clone(&self.link),
            self.config.send_timeout(),
        )
    }

    /// Lane for a known device; unknown devices fail fast without a lane
    fn lane_for(&self, device_id: &str) -> Result<LaneHandle, TransportError> {
        if self.registry.get(device_id).is_none() {
            warn!("⚠️  Device not connected: {}", device_id);
            return Err(TransportError::NotConnected {
                device_id: device_id.to_string(),
            });
        }
        self.attach_lane(device_id)
            .ok_or_else(|| TransportError::NotConnected {
                device_id: device_id.to_string(),
            })
    }

    /// Ensure a lane, then confirm the device is still registered
    ///
    /// A remove or disconnect_all racing with lane creation would otherwise
    /// leave a lane behind for a device that no longer exists.
    fn attach_lane(&self, device_id: &str) -> Option<LaneHandle> {
        let lane = self.ensure_lane(device_id);
        if self.registry.get(device_id).is_some() {
            return Some(lane);
        }
        if let Some((_, stale)) = self.lanes.remove(device_id) {
            stale.shutdown();
        }
        None
    }
}

impl Drop for DeviceTransport {
    fn drop(&mut self) {
        for lane in self.lanes.iter() {
            lane.shutdown();
        }
    }
}
