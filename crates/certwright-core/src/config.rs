use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{bail, Context, Result};
use certwright_plugin_sdk::{PluginConfig, DEFAULT_GROUP};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration structure deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub plugins: Plugins,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Plugins {
    /// Entry point groups scanned during discovery, in order.
    pub groups: Vec<String>,
    /// Directories holding JSON plugin manifests.
    pub search_paths: Vec<String>,
    /// Per-plugin settings tables, keyed by plugin name.
    pub settings: BTreeMap<String, toml::Table>,
}

impl Default for Plugins {
    fn default() -> Self {
        Self {
            groups: vec![DEFAULT_GROUP.to_string()],
            search_paths: Vec::new(),
            settings: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Validates structural invariants and provides actionable error messages.
    pub fn validate(&self) -> Result<()> {
        self.plugins.validate()
    }

    /// Builds the settings handle shared by every plugin instance.
    pub fn plugin_config(&self) -> Result<PluginConfig> {
        let mut settings = BTreeMap::new();
        for (plugin, table) in &self.plugins.settings {
            let value = serde_json::to_value(table)
                .with_context(|| format!("failed to convert settings for plugin `{plugin}`"))?;
            let Value::Object(map) = value else {
                bail!("settings for plugin `{plugin}` must be a table");
            };
            settings.insert(plugin.clone(), map);
        }
        Ok(PluginConfig::from_settings(settings))
    }

    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.plugins.search_paths.iter().map(PathBuf::from).collect()
    }
}

impl Plugins {
    pub fn validate(&self) -> Result<()> {
        if self.groups.is_empty() {
            bail!("at least one plugin group is required");
        }
        if self.groups.iter().any(|group| group.trim().is_empty()) {
            bail!("plugin group names must not be empty");
        }
        if self.search_paths.iter().any(|path| path.trim().is_empty()) {
            bail!("plugin search paths must not be empty");
        }
        if self.settings.keys().any(|name| name.trim().is_empty()) {
            bail!("plugin settings must be keyed by a plugin name");
        }
        Ok(())
    }
}
