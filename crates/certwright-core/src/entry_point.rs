use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use certwright_plugin_sdk::{PluginManifest, PluginType};
use thiserror::Error;

/// Failure to resolve an entry point to its plugin type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("no plugin implementation is known for target `{target}`")]
    UnknownTarget { target: String },

    #[error("failed to load `{target}`: {reason}")]
    Failed { target: String, reason: String },
}

type Loader = Arc<dyn Fn() -> Result<Arc<dyn PluginType>, LoadError> + Send + Sync>;

/// Raw registration record pointing at a loadable plugin type.
#[derive(Clone)]
pub struct EntryPoint {
    name: String,
    target: String,
    distribution: Option<String>,
    loader: Loader,
}

impl EntryPoint {
    pub fn new<F>(name: impl Into<String>, target: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn PluginType>, LoadError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            target: target.into(),
            distribution: None,
            loader: Arc::new(loader),
        }
    }

    /// Entry point whose type is already in memory.
    pub fn for_type(
        name: impl Into<String>,
        target: impl Into<String>,
        plugin_type: Arc<dyn PluginType>,
    ) -> Self {
        Self::new(name, target, move || Ok(Arc::clone(&plugin_type)))
    }

    pub fn with_distribution(mut self, distribution: impl Into<String>) -> Self {
        self.distribution = Some(distribution.into());
        self
    }

    /// The short registered name. Never qualified by the distribution.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn distribution(&self) -> Option<&str> {
        self.distribution.as_deref()
    }

    pub fn load(&self) -> Result<Arc<dyn PluginType>, LoadError> {
        (self.loader)()
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("distribution", &self.distribution)
            .finish()
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.target)?;
        if let Some(distribution) = &self.distribution {
            write!(f, " [{distribution}]")?;
        }
        Ok(())
    }
}

/// Enumerates registration records per named group.
pub trait EntryPointSource {
    fn entry_points(&self, group: &str) -> Vec<EntryPoint>;
}

impl EntryPointSource for Vec<Box<dyn EntryPointSource>> {
    fn entry_points(&self, group: &str) -> Vec<EntryPoint> {
        self.iter()
            .flat_map(|source| source.entry_points(group))
            .collect()
    }
}

/// In-memory registrations, used for compiled-in plugins and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    groups: HashMap<String, Vec<EntryPoint>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, group: impl Into<String>, entry_point: EntryPoint) {
        self.groups.entry(group.into()).or_default().push(entry_point);
    }

    pub fn with(mut self, group: impl Into<String>, entry_point: EntryPoint) -> Self {
        self.register(group, entry_point);
        self
    }
}

impl EntryPointSource for StaticSource {
    fn entry_points(&self, group: &str) -> Vec<EntryPoint> {
        self.groups.get(group).cloned().unwrap_or_default()
    }
}

/// Known plugin types keyed by manifest target.
pub type TypeCatalog = HashMap<String, Arc<dyn PluginType>>;

/// Registrations read from JSON manifests on disk.
///
/// Each manifest names a target that is resolved against a [`TypeCatalog`]
/// when the entry point is loaded, so an unknown target only fails that one
/// entry.
pub struct ManifestSource {
    manifests: Vec<PluginManifest>,
    catalog: Arc<TypeCatalog>,
}

impl ManifestSource {
    pub fn new(manifests: Vec<PluginManifest>, catalog: TypeCatalog) -> Self {
        Self {
            manifests,
            catalog: Arc::new(catalog),
        }
    }

    /// Reads every `*.json` manifest in `dirs`. Missing directories are
    /// skipped; unreadable or invalid manifests are logged and skipped.
    pub fn from_dirs(dirs: &[PathBuf], catalog: TypeCatalog) -> Result<Self> {
        let mut manifests = Vec::new();
        for dir in dirs {
            manifests.extend(read_manifests(dir)?);
        }
        Ok(Self::new(manifests, catalog))
    }

    pub fn manifests(&self) -> &[PluginManifest] {
        &self.manifests
    }
}

impl EntryPointSource for ManifestSource {
    fn entry_points(&self, group: &str) -> Vec<EntryPoint> {
        self.manifests
            .iter()
            .filter(|manifest| manifest.group == group)
            .map(|manifest| {
                let catalog = Arc::clone(&self.catalog);
                let target = manifest.target.clone();
                EntryPoint::new(manifest.name.clone(), manifest.target.clone(), move || {
                    catalog
                        .get(&target)
                        .cloned()
                        .ok_or_else(|| LoadError::UnknownTarget {
                            target: target.clone(),
                        })
                })
                .with_distribution(manifest.distribution.clone())
            })
            .collect()
    }
}

fn read_manifests(dir: &Path) -> Result<Vec<PluginManifest>> {
    let mut manifests = Vec::new();
    if !dir.exists() {
        tracing::debug!(dir = %dir.display(), "plugin search path does not exist");
        return Ok(manifests);
    }
    let mut paths = fs::read_dir(dir)
        .with_context(|| format!("failed to read plugin directory {}", dir.display()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("failed to list plugin directory {}", dir.display()))?;
    paths.sort();

    for path in paths {
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping unreadable plugin manifest");
                continue;
            }
        };
        match PluginManifest::from_json(&data) {
            Ok(manifest) => manifests.push(manifest),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping invalid plugin manifest");
            }
        }
    }
    Ok(manifests)
}
