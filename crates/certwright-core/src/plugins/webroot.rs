use std::{
    path::PathBuf,
    sync::{Arc, OnceLock},
};

use certwright_plugin_sdk::{Capability, Plugin, PluginConfig, PluginError, PluginType};

/// Authenticator that writes challenge files below an existing document root.
pub struct Webroot;

impl PluginType for Webroot {
    fn description(&self) -> &str {
        "Place files in webroot directory"
    }

    fn long_description(&self) -> Option<&str> {
        Some(
            "Writes validation files to .well-known/acme-challenge/ inside the configured \
             webroot path. An HTTP server must already be serving files from that path.",
        )
    }

    fn capabilities(&self) -> &[Capability] {
        &[Capability::Authenticator]
    }

    fn create(&self, config: Arc<PluginConfig>, name: &str) -> Arc<dyn Plugin> {
        Arc::new(WebrootAuthenticator {
            name: name.to_string(),
            config,
            root: OnceLock::new(),
        })
    }
}

pub struct WebrootAuthenticator {
    name: String,
    config: Arc<PluginConfig>,
    root: OnceLock<PathBuf>,
}

impl Plugin for WebrootAuthenticator {
    fn prepare(&self) -> Result<(), PluginError> {
        let path = self
            .config
            .setting::<PathBuf>(&self.name, "path")?
            .ok_or_else(|| {
                PluginError::misconfiguration(format!("`{}.path` must be set", self.name))
            })?;
        if !path.is_dir() {
            return Err(PluginError::misconfiguration(format!(
                "webroot path {} is not an existing directory",
                path.display()
            )));
        }
        tracing::debug!(plugin = %self.name, path = %path.display(), "using webroot");
        self.root.get_or_init(|| path);
        Ok(())
    }

    fn more_info(&self) -> String {
        match self.root.get() {
            Some(root) => format!("Using webroot path {}.", root.display()),
            None => "Webroot path not yet verified.".to_string(),
        }
    }
}
