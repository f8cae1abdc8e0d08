use std::{
    fs,
    path::PathBuf,
    sync::{Arc, OnceLock},
};

use anyhow::{Context, Result};
use certwright_core::{config::Config, disco::PluginRegistry};
use certwright_plugin_sdk::Capability;
use clap::{Args, Parser, Subcommand};
use regex::Regex;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "certwright", author, version, about = "Certificate management toolkit")]
struct Cli {
    /// Sets the log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List discovered plugins, optionally initializing and preparing them.
    Plugins(PluginsArgs),
    /// Interact with configuration files (validate, sample output).
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args, Debug)]
struct PluginsArgs {
    /// Configuration file; built-in defaults are used when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Limit to plugins that can authenticate.
    #[arg(long)]
    authenticators: bool,

    /// Limit to plugins that can install certificates.
    #[arg(long)]
    installers: bool,

    /// Require a capability by tag (case-insensitive); may be repeated.
    #[arg(long = "capability", value_name = "TAG")]
    capabilities: Vec<Capability>,

    /// Initialize plugins with the configuration.
    #[arg(long)]
    init: bool,

    /// Initialize and prepare plugins, then list only the available ones.
    #[arg(long)]
    prepare: bool,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Validates the provided configuration file.
    Validate {
        #[arg(value_name = "FILE")]
        config: PathBuf,
    },
    /// Prints the bundled minimal example configuration.
    Example,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;
    match cli.command {
        Commands::Plugins(args) => handle_plugins(args),
        Commands::Config { command } => handle_config(command),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).try_init().ok();
    Ok(())
}

fn handle_plugins(args: PluginsArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    config.validate()?;

    let registry = certwright_core::discover(&config)?;
    tracing::debug!(count = registry.len(), "discovered plugins");
    let filtered = registry.filter_by_capabilities(&required_capabilities(&args));

    if !(args.init || args.prepare) {
        println!("{filtered}");
        return Ok(());
    }

    let plugin_config = Arc::new(config.plugin_config()?);
    filtered.init_all(&plugin_config)?;
    if !args.prepare {
        println!("{filtered}");
        return Ok(());
    }

    report_prepare(&filtered);
    println!("{}", filtered.filter_by_availability());
    Ok(())
}

fn required_capabilities(args: &PluginsArgs) -> Vec<Capability> {
    let mut required = args.capabilities.clone();
    if args.authenticators {
        required.push(Capability::Authenticator);
    }
    if args.installers {
        required.push(Capability::Installer);
    }
    required.sort();
    required.dedup();
    required
}

fn report_prepare(registry: &PluginRegistry) {
    for (name, outcome) in registry.prepare_all() {
        match outcome {
            Ok(()) => tracing::info!(plugin = %name, "plugin ready"),
            Err(err) if err.is_misconfiguration() => {
                tracing::warn!(plugin = %name, error = %err, "plugin ready but misconfigured");
            }
            Err(err) => tracing::warn!(plugin = %name, error = %err, "plugin unavailable"),
        }
    }
}

fn handle_config(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Validate { config } => {
            let cfg = load_config(&config)?;
            cfg.validate()?;
            cfg.plugin_config()?;
            println!("configuration OK: {}", config.display());
        }
        ConfigCommands::Example => {
            println!("{}", include_str!("../../../demos/minimal.certwright.toml"));
        }
    }
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let expanded = interpolate_env(&raw);
    let cfg = toml::from_str::<Config>(&expanded)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    tracing::debug!(groups = ?cfg.plugins.groups, path = %path.display(), "loaded configuration");
    Ok(cfg)
}

fn interpolate_env(input: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let regex = RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Z0-9_]+)(?::([^}]+))?\}").expect("static pattern is valid")
    });
    let result = regex.replace_all(input, |caps: &regex::Captures| {
        let key = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(key).unwrap_or_else(|_| default.to_string())
    });
    result.into_owned()
}
