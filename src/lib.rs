//! OSC Sync - push parameter values to OSC-style remote devices
//!
//! `transport` owns device connections and per-device ordered dispatch,
//! `sync` tracks each parameter's sync status on top of it, and `control`
//! turns operator events into calls on both.

pub mod cli;
pub mod config;
pub mod control;
pub mod observer;
pub mod sync;
pub mod transport;

pub use config::AppConfig;
pub use control::{ControlEvent, Session};
pub use observer::Subscription;
pub use sync::{ParameterState, SyncEngine, SyncStatus};
pub use transport::{DeviceTransport, Message, TransportConfig, TransportError};
