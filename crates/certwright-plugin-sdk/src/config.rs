use std::collections::BTreeMap;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PluginError;

/// Settings handed to every plugin at construction time.
///
/// Settings are namespaced by plugin name: `webroot.path` lives in the
/// `webroot` table. The handle is shared; plugins keep an `Arc` to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PluginConfig {
    settings: BTreeMap<String, Map<String, Value>>,
}

impl PluginConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: BTreeMap<String, Map<String, Value>>) -> Self {
        Self { settings }
    }

    /// Builder used by callers that assemble settings programmatically.
    pub fn with_setting(
        mut self,
        plugin: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.settings
            .entry(plugin.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    pub fn settings(&self, plugin: &str) -> Option<&Map<String, Value>> {
        self.settings.get(plugin)
    }

    /// Returns a typed setting, `None` when unset.
    ///
    /// A value of the wrong shape is the user's mistake, so it surfaces as a
    /// [`PluginError::Misconfiguration`].
    pub fn setting<T: DeserializeOwned>(
        &self,
        plugin: &str,
        key: &str,
    ) -> Result<Option<T>, PluginError> {
        let Some(raw) = self.settings(plugin).and_then(|table| table.get(key)) else {
            return Ok(None);
        };
        T::deserialize(raw).map(Some).map_err(|err| {
            PluginError::misconfiguration(format!("invalid value for `{plugin}.{key}`: {err}"))
        })
    }
}
