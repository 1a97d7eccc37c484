//! Configuration management for OSC Sync
//!
//! Handles loading, validating, and hot-reloading the YAML configuration
//! that lists devices, control groups, and transport timing.

pub mod watcher;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;

pub use watcher::ConfigWatcher;

use crate::transport::TransportConfig;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// Remote control surface reachable over OSC
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Named set of parameters shown together
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GroupConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: GroupCategory,
    #[serde(default)]
    pub parameters: Vec<ParameterConfig>,
}

/// Group category
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupCategory {
    Audio,
    Effects,
    Mixer,
    #[default]
    Custom,
}

/// One controllable parameter and its range
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ParameterConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_max")]
    pub max: f64,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default)]
    pub default: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
}

impl ParameterConfig {
    /// Clamp into `[min, max]` and snap to the nearest step from `min`
    pub fn normalize(&self, value: f64) -> f64 {
        let clamped = value.clamp(self.min, self.max);
        if self.step <= 0.0 {
            return clamped;
        }
        let steps = ((clamped - self.min) / self.step).round();
        (self.min + steps * self.step).clamp(self.min, self.max)
    }
}

fn default_host() -> String {
    "192.168.1.100".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_max() -> f64 {
    100.0
}

fn default_step() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    /// Load and validate configuration from a YAML file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate configuration from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        let mut device_ids = HashSet::new();
        for device in &self.devices {
            if device.id.trim().is_empty() {
                bail!("Device id must not be empty");
            }
            if !device_ids.insert(device.id.as_str()) {
                bail!("Duplicate device id: {}", device.id);
            }
            if device.port == 0 {
                bail!("Device {} has port 0", device.id);
            }
        }

        let mut parameter_ids = HashSet::new();
        for group in &self.groups {
            for p in &group.parameters {
                if !parameter_ids.insert(p.id.as_str()) {
                    bail!("Duplicate parameter id: {}", p.id);
                }
                if !p.address.starts_with('/') || p.address.len() < 2 {
                    bail!(
                        "Parameter {} address must start with '/': {:?}",
                        p.id,
                        p.address
                    );
                }
                if p.min > p.max {
                    bail!("Parameter {} has min > max", p.id);
                }
                if p.step <= 0.0 {
                    bail!("Parameter {} step must be positive", p.id);
                }
                if p.default < p.min || p.default > p.max {
                    bail!("Parameter {} default {} outside [{}, {}]", p.id, p.default, p.min, p.max);
                }
            }
        }

        Ok(())
    }

    /// Find a parameter by id across all groups
    pub fn parameter(&self, parameter_id: &str) -> Option<(&GroupConfig, &ParameterConfig)> {
        self.groups.iter().find_map(|g| {
            g.parameters
                .iter()
                .find(|p| p.id == parameter_id)
                .map(|p| (g, p))
        })
    }

    /// Every parameter in declaration order
    pub fn parameters(&self) -> impl Iterator<Item = &ParameterConfig> {
        self.groups.iter().flat_map(|g| g.parameters.iter())
    }
}
