pub mod config;
pub mod disco;
pub mod entry_point;
pub mod plugins;

use anyhow::Result;

use crate::{
    config::Config,
    disco::PluginRegistry,
    entry_point::{EntryPointSource, ManifestSource},
};

/// Returns the crate version baked in at compile time.
pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Discovers compiled-in plugins plus any manifests in the configured search
/// paths. Manifests are scanned after the built-ins, so a manifest reusing a
/// built-in name replaces it.
pub fn discover(config: &Config) -> Result<PluginRegistry> {
    let manifests = ManifestSource::from_dirs(&config.search_paths(), plugins::catalog())?;
    let sources: Vec<Box<dyn EntryPointSource>> =
        vec![Box::new(plugins::builtin_source()), Box::new(manifests)];
    Ok(PluginRegistry::discover(&sources, &config.plugins.groups))
}
