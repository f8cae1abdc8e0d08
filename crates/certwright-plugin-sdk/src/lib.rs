pub mod config;
pub mod error;
pub mod manifest;

pub use config::PluginConfig;
pub use error::PluginError;
pub use manifest::{ManifestError, PluginManifest};

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

/// Entry point group that every certwright plugin registers under by default.
pub const DEFAULT_GROUP: &str = "certwright.plugins";

/// Named contract a plugin type can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Proves control over a domain to the certificate authority.
    Authenticator,
    /// Deploys issued certificates into a server configuration.
    Installer,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Capability::Authenticator, Capability::Installer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Authenticator => "Authenticator",
            Capability::Installer => "Installer",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability `{0}`")]
pub struct UnknownCapability(pub String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|cap| cap.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownCapability(s.to_string()))
    }
}

/// A loadable plugin implementation: descriptive metadata plus a constructor.
///
/// Discovery resolves an entry point to one of these; instances are only
/// created once a configuration is available.
pub trait PluginType: Send + Sync + 'static {
    /// Short, one-line description shown in plugin listings.
    fn description(&self) -> &str;

    /// Optional longer help text. Callers fall back to [`Self::description`].
    fn long_description(&self) -> Option<&str> {
        None
    }

    fn capabilities(&self) -> &[Capability];

    /// Builds an instance bound to `config`. Must not fail; configuration
    /// problems are reported from [`Plugin::prepare`].
    fn create(&self, config: Arc<PluginConfig>, name: &str) -> Arc<dyn Plugin>;
}

/// A configured plugin instance.
pub trait Plugin: Send + Sync + 'static {
    /// Checks that the plugin can run on this system with its configuration.
    ///
    /// May acquire exclusive resources (sockets, locks) that the plugin keeps
    /// for the rest of the run.
    fn prepare(&self) -> Result<(), PluginError>;

    /// Free-form details for operators, shown once the plugin is prepared.
    fn more_info(&self) -> String {
        String::new()
    }
}
