//! Control session - the boundary UI collaborators talk to
//!
//! Turns operator events (parameter moves, retries, device add/remove/toggle,
//! presets) into transport and engine calls. Holds the device descriptors,
//! the selected device, the control-group catalogue from config and the
//! session's presets.

mod presets;

pub use presets::{Preset, PresetStore};

use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, DeviceConfig, GroupConfig, ParameterConfig};
use crate::sync::{ParameterUpdate, SyncEngine, SyncSummary};
use crate::transport::DeviceTransport;

/// Device as the operator configured it
pub type DeviceDescriptor = DeviceConfig;

/// Events consumed from UI collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// A control widget moved
    ParameterChanged {
        group_id: String,
        parameter_id: String,
        address: String,
        value: f64,
    },
    /// Re-send a parameter's last value
    RetrySync { parameter_id: String },
    /// Push every catalogue parameter to the selected device
    SyncAll,
    AddDevice(DeviceDescriptor),
    RemoveDevice { device_id: String },
    /// Flip enabled: connect when enabling, disconnect when disabling
    ToggleDevice { device_id: String },
    SelectDevice { device_id: String },
    /// Snapshot current catalogue values under `name`
    SavePreset { name: String, description: String },
    /// Push a preset's values to the selected device as one batch
    LoadPreset { name: String },
    DeletePreset { name: String },
    FavoritePreset { name: String },
}

/// Device row for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceView {
    pub descriptor: DeviceDescriptor,
    pub connected: bool,
    pub selected: bool,
    pub message_count: u64,
}

/// Operator session over one transport and engine
pub struct Session {
    transport: Arc<DeviceTransport>,
    engine: Arc<SyncEngine>,
    devices: RwLock<IndexMap<String, DeviceDescriptor>>,
    selected: RwLock<Option<String>>,
    groups: RwLock<Vec<GroupConfig>>,
    presets: RwLock<PresetStore>,
}

impl Session {
    pub fn new(transport: Arc<DeviceTransport>, engine: Arc<SyncEngine>) -> Self {
        Self {
            transport,
            engine,
            devices: RwLock::new(IndexMap::new()),
            selected: RwLock::new(None),
            groups: RwLock::new(Vec::new()),
            presets: RwLock::new(PresetStore::new()),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn transport(&self) -> &Arc<DeviceTransport> {
        &self.transport
    }

    /// Handle one operator event
    pub async fn handle(&self, event: ControlEvent) -> Result<()> {
        debug!(?event, "control event");
        match event {
            ControlEvent::ParameterChanged {
                group_id,
                parameter_id,
                address,
                value,
            } => {
                self.change_parameter(&group_id, &parameter_id, &address, value)
                    .await
            }
            ControlEvent::RetrySync { parameter_id } => {
                let device_id = self.require_selected()?;
                self.engine
                    .retry(&device_id, &parameter_id)
                    .await
                    .with_context(|| format!("Retry of {} failed", parameter_id))
            }
            ControlEvent::SyncAll => self.sync_all().await,
            ControlEvent::AddDevice(descriptor) => self.add_device(descriptor).await,
            ControlEvent::RemoveDevice { device_id } => self.remove_device(&device_id),
            ControlEvent::ToggleDevice { device_id } => self.toggle_device(&device_id).await,
            ControlEvent::SelectDevice { device_id } => self.select_device(&device_id),
            ControlEvent::SavePreset { name, description } => {
                self.save_preset(&name, &description)
            }
            ControlEvent::LoadPreset { name } => self.load_preset(&name).await,
            ControlEvent::DeletePreset { name } => self.delete_preset(&name),
            ControlEvent::FavoritePreset { name } => self.favorite_preset(&name),
        }
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    async fn change_parameter(
        &self,
        group_id: &str,
        parameter_id: &str,
        address: &str,
        value: f64,
    ) -> Result<()> {
        let device_id = self.require_selected()?;

        let value = match self.find_parameter(group_id, parameter_id) {
            Some(p) => p.normalize(value),
            None => value,
        };

        self.engine
            .sync_to_device(&device_id, parameter_id, address, value)
            .await
            .with_context(|| format!("{} = {} not delivered to {}", parameter_id, value, device_id))
    }

    fn find_parameter(&self, group_id: &str, parameter_id: &str) -> Option<ParameterConfig> {
        self.groups
            .read()
            .iter()
            .filter(|g| g.id == group_id)
            .flat_map(|g| g.parameters.iter())
            .find(|p| p.id == parameter_id)
            .cloned()
    }

    /// Catalogue parameters with their current (or default) values
    pub fn catalogue_updates(&self) -> Vec<ParameterUpdate> {
        self.groups
            .read()
            .iter()
            .flat_map(|g| g.parameters.iter())
            .map(|p| {
                let value = self
                    .engine
                    .get_parameter(&p.id)
                    .map_or(p.default, |state| state.value);
                ParameterUpdate::new(p.id.clone(), p.address.clone(), value)
            })
            .collect()
    }

    async fn sync_all(&self) -> Result<()> {
        let device_id = self.require_selected()?;
        let updates = self.catalogue_updates();
        if updates.is_empty() {
            info!("No parameters configured, nothing to sync");
            return Ok(());
        }
        self.engine
            .sync_batch(&device_id, &updates)
            .await
            .with_context(|| format!("Sync of {} parameters to {} failed", updates.len(), device_id))
    }

    pub fn summary(&self) -> SyncSummary {
        self.engine.summary()
    }

    pub fn groups(&self) -> Vec<GroupConfig> {
        self.groups.read().clone()
    }

    // =========================================================================
    // Presets
    // =========================================================================

    fn save_preset(&self, name: &str, description: &str) -> Result<()> {
        let mut snapshot: IndexMap<String, IndexMap<String, f64>> = IndexMap::new();
        for group in self.groups.read().iter() {
            let values = snapshot.entry(group.id.clone()).or_default();
            for p in &group.parameters {
                let value = self
                    .engine
                    .get_parameter(&p.id)
                    .map_or(p.default, |state| state.value);
                values.insert(p.id.clone(), value);
            }
        }
        self.presets
            .write()
            .save(Preset::new(name, description, snapshot))
    }

    /// Sync a preset's values to the selected device in one batch
    ///
    /// Values are normalized against the current catalogue; parameters no
    /// longer in it are skipped.
    async fn load_preset(&self, name: &str) -> Result<()> {
        let device_id = self.require_selected()?;
        let preset = self
            .presets
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("Unknown preset: {}", name))?;

        let mut updates = Vec::with_capacity(preset.len());
        for (group_id, parameter_id, value) in preset.values() {
            match self.find_parameter(group_id, parameter_id) {
                Some(p) => updates.push(ParameterUpdate::new(
                    parameter_id,
                    p.address.clone(),
                    p.normalize(value),
                )),
                None => warn!("Preset '{}': {} no longer configured, skipped", name, parameter_id),
            }
        }
        if updates.is_empty() {
            bail!("Preset '{}' has no configured parameters", name);
        }

        info!("🎚️  Loading preset '{}' on {} ({} values)", name, device_id, updates.len());
        self.engine
            .sync_batch(&device_id, &updates)
            .await
            .with_context(|| format!("Preset '{}' not fully delivered to {}", name, device_id))
    }

    fn delete_preset(&self, name: &str) -> Result<()> {
        match self.presets.write().delete(name) {
            Some(_) => Ok(()),
            None => bail!("Unknown preset: {}", name),
        }
    }

    fn favorite_preset(&self, name: &str) -> Result<()> {
        let favorite = self
            .presets
            .write()
            .toggle_favorite(name)
            .ok_or_else(|| anyhow!("Unknown preset: {}", name))?;
        info!("{} Preset '{}'", if favorite { "⭐" } else { "☆" }, name);
        Ok(())
    }

    /// Presets, favorites first
    pub fn presets(&self) -> Vec<Preset> {
        self.presets.read().list()
    }

    // =========================================================================
    // Devices
    // =========================================================================

    async fn add_device(&self, descriptor: DeviceDescriptor) -> Result<()> {
        let device_id = descriptor.id.clone();
        if device_id.trim().is_empty() {
            bail!("Device id must not be empty");
        }
        let enabled = descriptor.enabled;
        let (host, port) = (descriptor.host.clone(), descriptor.port);

        self.devices.write().insert(device_id.clone(), descriptor);
        {
            let mut selected = self.selected.write();
            if selected.is_none() {
                *selected = Some(device_id.clone());
            }
        }
        info!("➕ Device {} added ({}:{})", device_id, host, port);

        if enabled {
            self.transport
                .connect(&device_id, &host, port)
                .await
                .with_context(|| format!("Device {} added but not connected", device_id))?;
        }
        Ok(())
    }

    fn remove_device(&self, device_id: &str) -> Result<()> {
        if self.devices.write().shift_remove(device_id).is_none() {
            bail!("Unknown device: {}", device_id);
        }
        self.transport.remove(device_id);

        let mut selected = self.selected.write();
        if selected.as_deref() == Some(device_id) {
            *selected = self.devices.read().keys().next().cloned();
        }
        info!("➖ Device {} removed", device_id);
        Ok(())
    }

    async fn toggle_device(&self, device_id: &str) -> Result<()> {
        let descriptor = {
            let mut devices = self.devices.write();
            let descriptor = devices
                .get_mut(device_id)
                .ok_or_else(|| anyhow!("Unknown device: {}", device_id))?;
            descriptor.enabled = !descriptor.enabled;
            descriptor.clone()
        };

        if descriptor.enabled {
            info!("▶️  Enabling {}", device_id);
            self.transport
                .connect(&descriptor.id, &descriptor.host, descriptor.port)
                .await
                .with_context(|| format!("Failed to enable {}", device_id))?;
        } else {
            info!("⏸️  Disabling {}", device_id);
            self.transport.disconnect(device_id);
        }
        Ok(())
    }

    fn select_device(&self, device_id: &str) -> Result<()> {
        if !self.devices.read().contains_key(device_id) {
            bail!("Unknown device: {}", device_id);
        }
        *self.selected.write() = Some(device_id.to_string());
        info!("🎯 Selected device {}", device_id);
        Ok(())
    }

    pub fn selected_device(&self) -> Option<String> {
        self.selected.read().clone()
    }

    fn require_selected(&self) -> Result<String> {
        self.selected_device()
            .ok_or_else(|| anyhow!("No device selected"))
    }

    /// Devices in the order they were added, with live connection data
    pub fn device_views(&self) -> Vec<DeviceView> {
        let selected = self.selected_device();
        self.devices
            .read()
            .values()
            .map(|d| {
                let connection = self.transport.get(&d.id);
                DeviceView {
                    descriptor: d.clone(),
                    connected: connection.as_ref().is_some_and(|c| c.connected),
                    selected: selected.as_deref() == Some(d.id.as_str()),
                    message_count: connection.map_or(0, |c| c.message_count),
                }
            })
            .collect()
    }

    // =========================================================================
    // Config reconciliation
    // =========================================================================

    /// Bring devices and catalogue in line with `config`
    ///
    /// New enabled devices connect, removed devices are dropped, devices
    /// whose endpoint or enabled flag changed are reconnected or
    /// disconnected. Connect failures are logged, not returned, so one
    /// unreachable device does not block the rest.
    pub async fn apply_config(&self, config: &AppConfig) {
        *self.groups.write() = config.groups.clone();

        let stale: Vec<String> = self
            .devices
            .read()
            .keys()
            .filter(|id| !config.devices.iter().any(|d| &d.id == *id))
            .cloned()
            .collect();
        for id in stale {
            if let Err(e) = self.remove_device(&id) {
                warn!("Failed to remove {}: {:#}", id, e);
            }
        }

        for device in &config.devices {
            let previous = self.devices.read().get(&device.id).cloned();
            match previous {
                Some(prev) if prev == *device => continue,
                Some(prev) => {
                    self.devices.write().insert(device.id.clone(), device.clone());
                    let endpoint_changed = prev.host != device.host || prev.port != device.port;
                    if !device.enabled {
                        self.transport.disconnect(&device.id);
                    } else if endpoint_changed || !prev.enabled || !self.transport.is_connected(&device.id) {
                        if let Err(e) = self
                            .transport
                            .connect(&device.id, &device.host, device.port)
                            .await
                        {
                            warn!("Failed to reconnect {}: {}", device.id, e);
                        }
                    }
                }
                None => {
                    if let Err(e) = self.add_device(device.clone()).await {
                        warn!("{:#}", e);
                    }
                }
            }
        }

        info!(
            "Config applied: {} devices, {} groups",
            self.devices.read().len(),
            self.groups.read().len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncStatus;
    use crate::transport::TransportConfig;

    fn make_session() -> Session {
        let transport = Arc::new(DeviceTransport::simulated(TransportConfig::immediate()));
        let engine = Arc::new(SyncEngine::new(Arc::clone(&transport)));
        Session::new(transport, engine)
    }

    fn device(id: &str, enabled: bool) -> DeviceDescriptor {
        DeviceDescriptor {
            id: id.to_string(),
            name: id.to_uppercase(),
            host: "10.0.0.5".to_string(),
            port: 9000,
            enabled,
        }
    }

    const CONFIG: &str = r#"
devices:
  - id: synth
    host: 10.0.0.5
  - id: fx-unit
    host: 10.0.0.6
    enabled: false
groups:
  - id: master
    parameters:
      - id: master-vol
        address: /master/volume
        default: 75
      - id: pan
        address: /master/pan
        min: -50
        max: 50
        default: 0
"#;

    #[tokio::test]
    async fn test_preset_save_and_load_round_trip() {
        let session = make_session();
        session
            .apply_config(&AppConfig::from_yaml(CONFIG).unwrap())
            .await;

        session
            .handle(ControlEvent::SavePreset {
                name: "defaults".to_string(),
                description: String::new(),
            })
            .await
            .unwrap();
        session
            .handle(ControlEvent::ParameterChanged {
                group_id: "master".to_string(),
                parameter_id: "master-vol".to_string(),
                address: "/master/volume".to_string(),
                value: 20.0,
            })
            .await
            .unwrap();

        session
            .handle(ControlEvent::LoadPreset {
                name: "defaults".to_string(),
            })
            .await
            .unwrap();

        let vol = session.engine().get_parameter("master-vol").unwrap();
        assert_eq!(vol.value, 75.0);
        assert_eq!(vol.status, SyncStatus::Synced);
        assert_eq!(session.engine().get_parameter("pan").unwrap().value, 0.0);
        assert_eq!(
            session.transport().get("synth").unwrap().last_message.unwrap().address(),
            "/master/pan"
        );
    }

    #[tokio::test]
    async fn test_preset_favorite_delete_and_unknown() {
        let session = make_session();
        session
            .apply_config(&AppConfig::from_yaml(CONFIG).unwrap())
            .await;

        for name in ["a", "b"] {
            session
                .handle(ControlEvent::SavePreset {
                    name: name.to_string(),
                    description: String::new(),
                })
                .await
                .unwrap();
        }
        session
            .handle(ControlEvent::FavoritePreset {
                name: "b".to_string(),
            })
            .await
            .unwrap();
        let names: Vec<String> = session.presets().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["b", "a"]);

        session
            .handle(ControlEvent::DeletePreset {
                name: "a".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(session.presets().len(), 1);

        assert!(session
            .handle(ControlEvent::LoadPreset {
                name: "a".to_string(),
            })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_add_device_connects_and_selects() {
        let session = make_session();
        session
            .handle(ControlEvent::AddDevice(device("a", true)))
            .await
            .unwrap();
        session
            .handle(ControlEvent::AddDevice(device("b", false)))
            .await
            .unwrap();

        assert_eq!(session.selected_device().as_deref(), Some("a"));
        let views = session.device_views();
        assert_eq!(views.len(), 2);
        assert!(views[0].connected && views[0].selected);
        assert!(!views[1].connected && !views[1].selected);
    }

    #[tokio::test]
    async fn test_parameter_change_clamps_and_syncs() {
        let session = make_session();
        session
            .apply_config(&AppConfig::from_yaml(CONFIG).unwrap())
            .await;

        session
            .handle(ControlEvent::ParameterChanged {
                group_id: "master".to_string(),
                parameter_id: "pan".to_string(),
                address: "/master/pan".to_string(),
                value: 80.4,
            })
            .await
            .unwrap();

        let state = session.engine().get_parameter("pan").unwrap();
        assert_eq!(state.value, 50.0);
        assert_eq!(state.status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_parameter_change_without_device_fails() {
        let session = make_session();
        let err = session
            .handle(ControlEvent::ParameterChanged {
                group_id: "g".to_string(),
                parameter_id: "p".to_string(),
                address: "/p".to_string(),
                value: 1.0,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No device selected"));
        assert!(session.engine().get_parameter("p").is_none());
    }

    #[tokio::test]
    async fn test_toggle_disconnects_then_retry_recovers() {
        let session = make_session();
        session
            .apply_config(&AppConfig::from_yaml(CONFIG).unwrap())
            .await;

        session
            .handle(ControlEvent::ToggleDevice {
                device_id: "synth".to_string(),
            })
            .await
            .unwrap();
        assert!(!session.transport().is_connected("synth"));

        let failed = session
            .handle(ControlEvent::ParameterChanged {
                group_id: "master".to_string(),
                parameter_id: "master-vol".to_string(),
                address: "/master/volume".to_string(),
                value: 60.0,
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(session.summary().error, 1);

        session
            .handle(ControlEvent::ToggleDevice {
                device_id: "synth".to_string(),
            })
            .await
            .unwrap();
        session
            .handle(ControlEvent::RetrySync {
                parameter_id: "master-vol".to_string(),
            })
            .await
            .unwrap();

        let state = session.engine().get_parameter("master-vol").unwrap();
        assert_eq!(state.status, SyncStatus::Synced);
        assert_eq!(state.value, 60.0);
    }

    #[tokio::test]
    async fn test_sync_all_uses_current_or_default_values() {
        let session = make_session();
        session
            .apply_config(&AppConfig::from_yaml(CONFIG).unwrap())
            .await;
        session.engine().update_parameter("pan", "/master/pan", -10.0);

        session.handle(ControlEvent::SyncAll).await.unwrap();

        let summary = session.summary();
        assert_eq!(summary.synced, 2);
        assert_eq!(summary.total, 2);
        assert_eq!(session.engine().get_parameter("master-vol").unwrap().value, 75.0);
        assert_eq!(session.engine().get_parameter("pan").unwrap().value, -10.0);
        assert_eq!(
            session.transport().get("synth").unwrap().message_count,
            2
        );
    }

    #[tokio::test]
    async fn test_remove_selected_device_reselects() {
        let session = make_session();
        session
            .apply_config(&AppConfig::from_yaml(CONFIG).unwrap())
            .await;
        assert_eq!(session.selected_device().as_deref(), Some("synth"));

        session
            .handle(ControlEvent::RemoveDevice {
                device_id: "synth".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(session.selected_device().as_deref(), Some("fx-unit"));
        assert!(session.transport().get("synth").is_none());
        assert!(session
            .handle(ControlEvent::RemoveDevice {
                device_id: "synth".to_string()
            })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_apply_config_reconciles_devices() {
        let session = make_session();
        session
            .apply_config(&AppConfig::from_yaml(CONFIG).unwrap())
            .await;

        let updated = r#"
devices:
  - id: fx-unit
    host: 10.0.0.6
    enabled: true
  - id: new-one
    host: 10.0.0.7
    port: 8000
"#;
        session
            .apply_config(&AppConfig::from_yaml(updated).unwrap())
            .await;

        let ids: Vec<String> = session
            .device_views()
            .into_iter()
            .map(|v| v.descriptor.id)
            .collect();
        assert_eq!(ids, vec!["fx-unit", "new-one"]);
        assert!(session.transport().is_connected("fx-unit"));
        assert!(session.transport().is_connected("new-one"));
        assert!(session.transport().get("synth").is_none());
        assert!(session.groups().is_empty());
    }

    #[tokio::test]
    async fn test_select_unknown_device_fails() {
        let session = make_session();
        assert!(session
            .handle(ControlEvent::SelectDevice {
                device_id: "nope".to_string()
            })
            .await
            .is_err());
    }
}
