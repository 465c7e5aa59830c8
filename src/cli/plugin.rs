//! Plugin CLI commands

use super::{load_cluster_params, open_manager, parse_params, print_result};
use crate::config::Config;
use crate::plugins::{OperationKind, PluginLoader, PluginManifest, PluginValidator};
use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Plugin subcommands
#[derive(Subcommand, Debug)]
pub enum PluginSubcommand {
    /// List discovered and loaded plugins
    List,

    /// Validate a plugin directory or manifest file
    Validate {
        /// Plugin directory or path to its plugin.yaml
        path: PathBuf,
    },

    /// Execute one operation on one plugin
    Run {
        /// Plugin name
        name: String,

        /// Operation kind (deploy, upgrade, scale, monitor, export, import)
        operation: OperationKind,

        /// Cluster specification passed as the "cluster" parameter
        #[arg(long)]
        cluster: Option<PathBuf>,

        /// Extra parameter as key=value (value parsed as JSON when possible)
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
    },
}

/// Handle plugin CLI commands
pub async fn handle_plugin_command(
    subcommand: PluginSubcommand,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<()> {
    tracing::debug!("Handling plugin command: {:?}", subcommand);

    match subcommand {
        PluginSubcommand::List => list_plugins(config, cancel).await,
        PluginSubcommand::Validate { path } => validate_plugin(&path),
        PluginSubcommand::Run {
            name,
            operation,
            cluster,
            params,
        } => run_plugin(config, cancel, &name, operation, cluster.as_deref(), &params).await,
    }
}

async fn list_plugins(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let manager = open_manager(config, cancel).await?;
    let loaded = manager.list_plugins().await;

    println!("Plugins directory: {}", manager.plugins_dir().display());
    println!("Loaded plugins ({}):\n", loaded.len());
    for plugin in &loaded {
        let origin = if plugin.is_builtin() { "builtin" } else { "external" };
        println!("  {} (v{}, {})", plugin.name(), plugin.plugin.version(), origin);
        let description = plugin.plugin.description();
        if !description.is_empty() {
            println!("    Description: {}", description);
        }
        let operations: Vec<&str> = plugin
            .plugin
            .supported_operations()
            .iter()
            .map(OperationKind::as_str)
            .collect();
        println!("    Operations: {}", operations.join(", "));
        let capabilities = plugin.plugin.capability_names();
        if !capabilities.is_empty() {
            println!("    Capabilities: {}", capabilities.join(", "));
        }
        println!("    Loaded at: {}", plugin.loaded_at.to_rfc3339());
    }

    let skipped: Vec<PluginManifest> = {
        let mut skipped = Vec::new();
        for manifest in manager.list_manifests().await {
            if !manager.is_loaded(&manifest.name).await {
                skipped.push(manifest);
            }
        }
        skipped
    };
    if !skipped.is_empty() {
        println!("\nDiscovered but not loaded:");
        for manifest in skipped {
            println!("  {} (v{})", manifest.name, manifest.version);
        }
    }

    manager.shutdown(cancel).await;
    Ok(())
}

fn validate_plugin(path: &Path) -> Result<()> {
    let manifest_path = if path.is_dir() {
        PluginLoader::manifest_in(path)
            .with_context(|| format!("No plugin manifest in {}", path.display()))?
    } else {
        path.to_path_buf()
    };
    println!("Validating plugin: {}", manifest_path.display());

    let manifest = PluginLoader::load_manifest(&manifest_path).context("Plugin validation failed")?;

    // <pluginsDir>/<name>/plugin.yaml
    let plugins_dir = manifest_path
        .parent()
        .and_then(Path::parent)
        .context("Manifest must live inside <pluginsDir>/<name>/")?;

    PluginValidator::validate(&manifest, plugins_dir)?;
    PluginValidator::verify_integrity(
        &manifest,
        plugins_dir,
        std::env::consts::OS,
        std::env::consts::ARCH,
    )?;

    println!("✓ Plugin is valid!");
    println!("\nPlugin details:");
    println!("  Name: {}", manifest.name);
    println!("  Version: {}", manifest.version);
    if !manifest.description.is_empty() {
        println!("  Description: {}", manifest.description);
    }
    println!("  Binary: {}", manifest.binary_path(plugins_dir).display());
    if !manifest.dependencies.is_empty() {
        println!("  Dependencies: {}", manifest.dependencies.join(", "));
    }
    let options: Vec<String> = manifest
        .config
        .options()
        .map(|option| format!("{} ({})", option.name, option.option_type))
        .collect();
    if !options.is_empty() {
        println!("  Config options: {}", options.join(", "));
    }

    Ok(())
}

async fn run_plugin(
    config: &Config,
    cancel: &CancellationToken,
    name: &str,
    operation: OperationKind,
    cluster: Option<&Path>,
    raw_params: &[String],
) -> Result<()> {
    let mut params = match cluster {
        Some(path) => load_cluster_params(path)?,
        None => Default::default(),
    };
    params.extend(parse_params(raw_params)?);

    let manager = open_manager(config, cancel).await?;
    let (result, error) = manager
        .execute_plugin_recorded(cancel, name, operation, &params)
        .await;
    manager.shutdown(cancel).await;

    print_result(&result)?;
    match error {
        Some(e) => Err(anyhow::Error::new(e).context(result.message)),
        None => Ok(()),
    }
}
