use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DEFAULT_GROUP;

/// On-disk JSON manifest registering a plugin without recompiling the host.
///
/// `target` names the implementation to load, e.g.
/// `certwright.plugins.webroot:Authenticator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    #[serde(default = "default_group")]
    pub group: String,
    pub target: String,
    pub distribution: String,
    pub version: String,
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("malformed manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid manifest: {0}")]
    Invalid(String),

    #[error("invalid version `{version}`: {source}")]
    Version {
        version: String,
        source: semver::Error,
    },
}

impl PluginManifest {
    /// Parses and validates a manifest document.
    pub fn from_json(data: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(data)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::Invalid("name must not be empty".into()));
        }
        // Registered names are short; `dist:name` qualification is not supported.
        if self.name.contains(':') {
            return Err(ManifestError::Invalid(format!(
                "name `{}` must not contain `:`",
                self.name
            )));
        }
        if self.group.trim().is_empty() {
            return Err(ManifestError::Invalid(format!(
                "group for `{}` must not be empty",
                self.name
            )));
        }
        if self.target.trim().is_empty() {
            return Err(ManifestError::Invalid(format!(
                "target for `{}` must not be empty",
                self.name
            )));
        }
        self.parsed_version()?;
        Ok(())
    }

    pub fn parsed_version(&self) -> Result<semver::Version, ManifestError> {
        semver::Version::parse(&self.version).map_err(|source| ManifestError::Version {
            version: self.version.clone(),
            source,
        })
    }
}
