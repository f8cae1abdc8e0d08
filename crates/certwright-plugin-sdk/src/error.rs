use thiserror::Error;

/// Failure reported by [`crate::Plugin::prepare`].
///
/// The variant decides how the registry treats the plugin for the rest of the
/// run: a misconfigured plugin stays available, the others do not.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// The plugin is installed but its settings are invalid.
    #[error("misconfiguration: {0}")]
    Misconfiguration(String),

    /// Something the plugin depends on is missing from this system.
    #[error("no installation: {0}")]
    NoInstallation(String),

    #[error("plugin error: {0}")]
    Plugin(String),
}

impl PluginError {
    pub fn misconfiguration(msg: impl Into<String>) -> Self {
        Self::Misconfiguration(msg.into())
    }

    pub fn no_installation(msg: impl Into<String>) -> Self {
        Self::NoInstallation(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Plugin(msg.into())
    }

    pub fn is_misconfiguration(&self) -> bool {
        matches!(self, Self::Misconfiguration(_))
    }

    pub fn is_no_installation(&self) -> bool {
        matches!(self, Self::NoInstallation(_))
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Misconfiguration(_) => "misconfiguration",
            Self::NoInstallation(_) => "no_installation",
            Self::Plugin(_) => "plugin",
        }
    }
}
