//! Parameter synchronization type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery status of a parameter's current value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Never synced yet
    #[default]
    Idle,
    /// A send for the current value is in flight
    Syncing,
    /// Last send succeeded
    Synced,
    /// Last send failed
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Synchronization record for one parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterState {
    pub id: String,
    pub address: String,
    pub value: f64,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
    /// Reason of the latest failure, cleared once synced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Bumped on every update; a send result only lands on the attempt it was issued for
    pub attempt: u64,
}

impl ParameterState {
    pub(crate) fn new(id: &str, address: &str, value: f64) -> Self {
        Self {
            id: id.to_string(),
            address: address.to_string(),
            value,
            status: SyncStatus::Idle,
            last_sync_time: None,
            last_error: None,
            attempt: 0,
        }
    }
}

/// One entry of a batch sync request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterUpdate {
    pub id: String,
    pub address: String,
    pub value: f64,
}

impl ParameterUpdate {
    pub fn new(id: impl Into<String>, address: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            value,
        }
    }
}

/// Per-status counts, recomputed from a set of states on demand
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub idle: usize,
    pub syncing: usize,
    pub synced: usize,
    pub error: usize,
    pub total: usize,
}

impl SyncSummary {
    pub fn from_states<'a>(states: impl IntoIterator<Item = &'a ParameterState>) -> Self {
        let mut summary = Self::default();
        for state in states {
            summary.total += 1;
            match state.status {
                SyncStatus::Idle => summary.idle += 1,
                SyncStatus::Syncing => summary.syncing += 1,
                SyncStatus::Synced => summary.synced += 1,
                SyncStatus::Error => summary.error += 1,
            }
        }
        summary
    }
}
