//! In-memory parameter presets
//!
//! A preset is a named snapshot of catalogue values, grouped by control
//! group. Presets live for the session only.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::info;

/// Named snapshot of parameter values
#[derive(Debug, Clone, PartialEq)]
pub struct Preset {
    pub name: String,
    pub description: String,
    /// group id -> parameter id -> value
    pub parameters: IndexMap<String, IndexMap<String, f64>>,
    pub created_at: DateTime<Utc>,
    pub favorite: bool,
}

impl Preset {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: IndexMap<String, IndexMap<String, f64>>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            created_at: Utc::now(),
            favorite: false,
        }
    }

    /// (group id, parameter id, value) in snapshot order
    pub fn values(&self) -> impl Iterator<Item = (&str, &str, f64)> {
        self.parameters.iter().flat_map(|(group, params)| {
            params
                .iter()
                .map(move |(id, value)| (group.as_str(), id.as_str(), *value))
        })
    }

    pub fn len(&self) -> usize {
        self.parameters.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Presets keyed by name, in creation order
#[derive(Debug, Default)]
pub struct PresetStore {
    presets: IndexMap<String, Preset>,
}

impl PresetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `preset`; an existing preset of the same name is replaced but
    /// keeps its favorite flag and position
    pub fn save(&mut self, mut preset: Preset) -> Result<()> {
        let name = preset.name.trim().to_string();
        if name.is_empty() {
            bail!("Preset name must not be empty");
        }
        preset.name = name.clone();

        if let Some(existing) = self.presets.get(&name) {
            preset.favorite = existing.favorite;
        }
        info!("💾 Preset '{}' saved ({} values)", name, preset.len());
        self.presets.insert(name, preset);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    pub fn delete(&mut self, name: &str) -> Option<Preset> {
        let removed = self.presets.shift_remove(name);
        if removed.is_some() {
            info!("🗑️  Preset '{}' deleted", name);
        }
        removed
    }

    /// Flip the favorite flag; returns the new value
    pub fn toggle_favorite(&mut self, name: &str) -> Option<bool> {
        let preset = self.presets.get_mut(name)?;
        preset.favorite = !preset.favorite;
        Some(preset.favorite)
    }

    /// Favorites first, each part in creation order
    pub fn list(&self) -> Vec<Preset> {
        let (mut favorites, others): (Vec<Preset>, Vec<Preset>) =
            self.presets.values().cloned().partition(|p| p.favorite);
        favorites.extend(others);
        favorites
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}
