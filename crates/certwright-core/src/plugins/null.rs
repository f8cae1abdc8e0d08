use std::sync::Arc;

use certwright_plugin_sdk::{Capability, Plugin, PluginConfig, PluginError, PluginType};

/// Installer that accepts every request and changes nothing.
pub struct Null;

impl PluginType for Null {
    fn description(&self) -> &str {
        "Null Installer"
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Installer]
    }

    fn create(&self, _config: Arc<PluginConfig>, name: &str) -> Arc<dyn Plugin> {
        Arc::new(NullInstaller {
            name: name.to_string(),
        })
    }
}

pub struct NullInstaller {
    name: String,
}

impl Plugin for NullInstaller {
    fn prepare(&self) -> Result<(), PluginError> {
        tracing::debug!(plugin = %self.name, "null installer has nothing to prepare");
        Ok(())
    }

    fn more_info(&self) -> String {
        "Installer that does not touch any server configuration.".to_string()
    }
}
