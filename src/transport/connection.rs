//! Connection registry - known device links and their liveness
//!
//! One entry per device id, kept in insertion order for display.
//! `mark_disconnected` keeps the entry so later sends report
//! "not connected" rather than "unknown device".

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;

use super::message::Message;

/// One logical link to a device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    pub device_id: String,
    pub host: String,
    pub port: u16,
    /// False until a connect succeeds, false again after disconnect
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    pub message_count: u64,
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    /// A freshly opened, live connection
    pub fn open(device_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            device_id: device_id.into(),
            host: host.into(),
            port,
            connected: true,
            last_message: None,
            message_count: 0,
            connected_at: Utc::now(),
        }
    }

    /// "host:port" for log lines
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Set of known device connections
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<IndexMap<String, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a live connection, replacing any prior entry for the same id
    ///
    /// A replaced entry keeps its position in the listing.
    pub fn upsert(&self, connection: Connection) -> Option<Connection> {
        self.connections
            .write()
            .insert(connection.device_id.clone(), connection)
    }

    /// Mark a connection dead without removing it; false if unknown
    pub fn mark_disconnected(&self, device_id: &str) -> bool {
        match self.connections.write().get_mut(device_id) {
            Some(connection) => {
                connection.connected = false;
                true
            }
            None => false,
        }
    }

    /// Mark every connection dead and empty the registry
    ///
    /// Returns the ids that were present.
    pub fn disconnect_all(&self) -> Vec<String> {
        let mut connections = self.connections.write();
        for connection in connections.values_mut() {
            connection.connected = false;
        }
        connections.drain(..).map(|(id, _)| id).collect()
    }

    /// Remove an entry entirely
    pub fn remove(&self, device_id: &str) -> Option<Connection> {
        self.connections.write().shift_remove(device_id).map(|mut c| {
            c.connected = false;
            c
        })
    }

    pub fn get(&self, device_id: &str) -> Option<Connection> {
        self.connections.read().get(device_id).cloned()
    }

    /// Snapshot in insertion order
    pub fn list(&self) -> Vec<Connection> {
        self.connections.read().values().cloned().collect()
    }

    pub fn is_live(&self, device_id: &str) -> bool {
        self.connections
            .read()
            .get(device_id)
            .is_some_and(|c| c.connected)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Record a delivered message on a live connection
    ///
    /// Returns false when the device is unknown or no longer live, in which
    /// case nothing is recorded.
    pub fn record_sent(&self, device_id: &str, message: Message) -> bool {
        let mut connections = self.connections.write();
        match connections.get_mut(device_id) {
            Some(connection) if connection.connected => {
                connection.message_count += 1;
                connection.last_message = Some(message);
                true
            }
            _ => false,
        }
    }
}
