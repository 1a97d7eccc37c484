//! Transport and synchronization error kinds

use thiserror::Error;

/// Failure outcomes of connect, send and sync operations
///
/// None of these are fatal; callers surface them as an `error` parameter
/// status and the operator retries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Device not connected: {device_id}")]
    NotConnected { device_id: String },

    #[error("Cannot connect to {device_id} at {endpoint}: {reason}")]
    ConnectFailed {
        device_id: String,
        endpoint: String,
        reason: String,
    },

    #[error("Transmit to {device_id} failed: {reason}")]
    Transmit { device_id: String, reason: String },

    #[error("{operation} on {device_id} timed out after {after_ms}ms")]
    Timeout {
        device_id: String,
        operation: &'static str,
        after_ms: u64,
    },

    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    #[error("Batch to {device_id} failed: {failed} of {total} messages not delivered")]
    BatchFailed {
        device_id: String,
        failed: usize,
        total: usize,
    },

    #[error("Dispatch lane for {device_id} is closed")]
    LaneClosed { device_id: String },

    #[error("Unknown parameter: {parameter_id}")]
    UnknownParameter { parameter_id: String },
}

impl TransportError {
    pub fn is_not_connected(&self) -> bool {
        matches!(self, TransportError::NotConnected { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}
