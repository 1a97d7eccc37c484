//! Parameter synchronization module
//!
//! Tracks the value and delivery status of every controllable parameter and
//! drives single and batched syncs through the device transport.

mod engine;
mod types;

pub use engine::SyncEngine;
pub use types::{ParameterState, ParameterUpdate, SyncStatus, SyncSummary};

#[cfg(test)]
mod tests;
