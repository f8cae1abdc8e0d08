//! Plugins compiled into certwright.

pub mod null;
pub mod standalone;
pub mod webroot;

use std::sync::Arc;

use certwright_plugin_sdk::{PluginType, DEFAULT_GROUP};

use crate::entry_point::{EntryPoint, StaticSource, TypeCatalog};

pub const STANDALONE_TARGET: &str = "certwright.plugins.standalone:Authenticator";
pub const WEBROOT_TARGET: &str = "certwright.plugins.webroot:Authenticator";
pub const NULL_TARGET: &str = "certwright.plugins.null:Installer";

const DISTRIBUTION: &str = "certwright";

fn builtins() -> [(&'static str, &'static str, Arc<dyn PluginType>); 3] {
    [
        ("standalone", STANDALONE_TARGET, Arc::new(standalone::Standalone)),
        ("webroot", WEBROOT_TARGET, Arc::new(webroot::Webroot)),
        ("null", NULL_TARGET, Arc::new(null::Null)),
    ]
}

/// Registrations for every compiled-in plugin under [`DEFAULT_GROUP`].
pub fn builtin_source() -> StaticSource {
    builtins()
        .into_iter()
        .fold(StaticSource::new(), |source, (name, target, plugin_type)| {
            source.with(
                DEFAULT_GROUP,
                EntryPoint::for_type(name, target, plugin_type).with_distribution(DISTRIBUTION),
            )
        })
}

/// Targets that manifests may point at.
pub fn catalog() -> TypeCatalog {
    builtins()
        .into_iter()
        .map(|(_, target, plugin_type)| (target.to_string(), plugin_type))
        .collect()
}
