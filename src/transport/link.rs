//! Device links - the seam where a real network transport would plug in
//!
//! The transport owns bookkeeping, ordering and timeouts; a link only opens
//! a device endpoint and puts one message on the wire.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::connection::Connection;
use super::error::TransportError;
use super::message::Message;

/// Link trait - every device backend implements this
///
/// Methods take `&self` so links can be shared as `Arc<dyn DeviceLink>`
/// across dispatch lanes; use interior mutability for state.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Short name for logs ("simulated", "udp", ...)
    fn name(&self) -> &str;

    /// Open the endpoint for `device_id`
    async fn open(&self, device_id: &str, host: &str, port: u16) -> Result<(), TransportError>;

    /// Transmit one message over an open connection
    async fn transmit(&self, connection: &Connection, message: &Message)
        -> Result<(), TransportError>;
}

/// Link that only logs what it would send
///
/// Useful for:
/// - Driving the UI without hardware on the network
/// - Checking address and argument mapping in the logs
pub struct SimulatedLink {
    /// Per-message latency added before reporting success
    latency: Duration,
    transmitted: AtomicU64,
}

impl SimulatedLink {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            transmitted: AtomicU64::new(0),
        }
    }

    /// Messages transmitted since creation
    pub fn transmitted(&self) -> u64 {
        self.transmitted.load(Ordering::Relaxed)
    }
}

impl Default for SimulatedLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceLink for SimulatedLink {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn open(&self, device_id: &str, host: &str, port: u16) -> Result<(), TransportError> {
        info!("🔌 [simulated] opened {} at {}:{}", device_id, host, port);
        Ok(())
    }

    async fn transmit(
        &self,
        connection: &Connection,
        message: &Message,
    ) -> Result<(), TransportError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let n = self.transmitted.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            device_id = %connection.device_id,
            target = %connection.endpoint(),
            address = message.address(),
            args = %message.args_display(),
            tags = %message.type_tags(),
            "📤 [simulated] message #{} sent",
            n
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_link_counts_transmissions() {
        let link = SimulatedLink::new();
        let conn = Connection::open("device-1", "10.0.0.5", 9000);

        assert_eq!(link.name(), "simulated");
        link.open("device-1", "10.0.0.5", 9000).await.unwrap();

        for i in 0..3 {
            let msg = Message::value("/master/volume", f64::from(i)).unwrap();
            link.transmit(&conn, &msg).await.unwrap();
        }
        assert_eq!(link.transmitted(), 3);
    }
}
