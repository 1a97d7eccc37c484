//! DispatchLane - one ordered send queue per device
//!
//! Each connected device gets its own lane task. All sends for that device
//! go through the lane's command channel, so a device's messages leave in
//! the order they were queued while different devices dispatch in parallel.
//!
//! ```text
//! send(dev-1) ──┐                       ┌─► link.transmit ─► registry ─► bus
//! batch(dev-1) ─┼─► lane[dev-1] (FIFO) ─┘
//! send(dev-2) ────► lane[dev-2] (FIFO) ───► ...
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::bus::SubscriptionBus;
use super::connection::ConnectionRegistry;
use super::error::TransportError;
use super::link::DeviceLink;
use super::message::Message;

/// Commands processed by a lane, strictly in arrival order
pub(crate) enum LaneCommand {
    /// Dispatch one message
    Send {
        message: Message,
        response: oneshot::Sender<Result<(), TransportError>>,
    },
    /// Dispatch several messages back to back, nothing interleaved
    Batch {
        messages: Vec<Message>,
        response: oneshot::Sender<Vec<Result<(), TransportError>>>,
    },
    /// Stop after draining everything queued before this command
    Shutdown,
}

/// Handle for queueing work on a device's lane
#[derive(Clone)]
pub(crate) struct LaneHandle {
    device_id: Arc<str>,
    cmd_tx: mpsc::UnboundedSender<LaneCommand>,
}

impl LaneHandle {
    /// Queue one message and wait for its outcome
    pub(crate) async fn send(&self, message: Message) -> Result<(), TransportError> {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = LaneCommand::Send {
            message,
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return Err(self.closed());
        }
        response_rx.await.unwrap_or_else(|_| Err(self.closed()))
    }

    /// Queue a batch as a single unit and wait for every outcome
    pub(crate) async fn send_batch(
        &self,
        messages: Vec<Message>,
    ) -> Vec<Result<(), TransportError>> {
        let total = messages.len();
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = LaneCommand::Batch {
            messages,
            response: response_tx,
        };

        if self.cmd_tx.send(cmd).is_err() {
            return vec![Err(self.closed()); total];
        }
        response_rx
            .await
            .unwrap_or_else(|_| vec![Err(self.closed()); total])
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.cmd_tx.send(LaneCommand::Shutdown);
    }

    pub(crate) fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    fn closed(&self) -> TransportError {
        TransportError::LaneClosed {
            device_id: self.device_id.to_string(),
        }
    }
}

/// Lane task state
pub(crate) struct DispatchLane {
    device_id: Arc<str>,
    registry: Arc<ConnectionRegistry>,
    bus: SubscriptionBus,
    link: Arc<dyn DeviceLink>,
    send_timeout: Duration,
    command_rx: mpsc::UnboundedReceiver<LaneCommand>,
    dispatched: u64,
}

impl DispatchLane {
    /// Spawn the lane task for `device_id` and return its handle
    pub(crate) fn spawn(
        device_id: &str,
        registry: Arc<ConnectionRegistry>,
        bus: SubscriptionBus,
        link: Arc<dyn DeviceLink>,
        send_timeout: Duration,
    ) -> LaneHandle {
        let (cmd_tx, command_rx) = mpsc::unbounded_channel();
        let device_id: Arc<str> = Arc::from(device_id);

        let lane = DispatchLane {
            device_id: Arc::clone(&device_id),
            registry,
            bus,
            link,
            send_timeout,
            command_rx,
            dispatched: 0,
        };
        tokio::spawn(lane.run());

        LaneHandle { device_id, cmd_tx }
    }

    async fn run(mut self) {
        debug!("Dispatch lane for {} started", self.device_id);

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                LaneCommand::Send { message, response } => {
                    let result = self.dispatch(message).await;
                    let _ = response.send(result);
                }
                LaneCommand::Batch { messages, response } => {
                    let mut results = Vec::with_capacity(messages.len());
                    for message in messages {
                        results.push(self.dispatch(message).await);
                    }
                    let _ = response.send(results);
                }
                LaneCommand::Shutdown => break,
            }
        }

        debug!(
            "Dispatch lane for {} stopped ({} messages dispatched)",
            self.device_id, self.dispatched
        );
    }

    /// Deliver one message: liveness check, transmit, bookkeeping, publish
    ///
    /// Bus listeners have run by the time this returns.
    async fn dispatch(&mut self, message: Message) -> Result<(), TransportError> {
        let device_id = self.device_id.as_ref();

        let connection = match self.registry.get(device_id) {
            Some(c) if c.connected => c,
            _ => {
                warn!("⚠️  Device not connected: {}", device_id);
                return Err(TransportError::NotConnected {
                    device_id: device_id.to_string(),
                });
            }
        };

        let transmit = self.link.transmit(&connection, &message);
        match tokio::time::timeout(self.send_timeout, transmit).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("❌ Send to {} failed: {}", device_id, e);
                return Err(e);
            }
            Err(_) => {
                let err = TransportError::Timeout {
                    device_id: device_id.to_string(),
                    operation: "send",
                    after_ms: self.send_timeout.as_millis() as u64,
                };
                warn!("⏱️  {}", err);
                return Err(err);
            }
        }

        let stamped = message.stamped(Utc::now());
        if !self.registry.record_sent(device_id, stamped.clone()) {
            // Disconnected while the link was transmitting
            return Err(TransportError::NotConnected {
                device_id: device_id.to_string(),
            });
        }
        self.dispatched += 1;

        debug!(
            device_id,
            target = %connection.endpoint(),
            address = stamped.address(),
            args = %stamped.args_display(),
            "Message sent"
        );

        self.bus.publish(stamped.address(), &stamped);
        Ok(())
    }
}
