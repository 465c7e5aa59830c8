//! clusterplug - plugin-driven cluster operation orchestrator
//!
//! Loads plugins from the plugins directory alongside the builtin TiKV
//! bootstrap plugin and runs cluster operations and hooks through them.

use anyhow::Result;
use clap::{Parser, Subcommand};
use clusterplug::cli::{
    ClusterSubcommand, ConfigSubcommand, HooksSubcommand, PluginSubcommand, handle_cluster_command,
    handle_config_command, handle_hooks_command, handle_plugin_command, init_logging,
};
use clusterplug::config::{Config, ConfigLoader};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// clusterplug - plugin-driven cluster operation orchestrator
#[derive(Parser, Debug)]
#[command(name = "clusterplug", version)]
#[command(about = "Run cluster operations through plugins", long_about = None)]
struct Args {
    /// Configuration file (defaults to the root config file)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

/// Main commands
#[derive(Subcommand, Debug)]
enum Command {
    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
    /// Plugin management and execution
    Plugin {
        #[command(subcommand)]
        subcommand: PluginSubcommand,
    },
    /// Operation hooks
    Hooks {
        #[command(subcommand)]
        subcommand: HooksSubcommand,
    },
    /// Cluster lifecycle
    Cluster {
        #[command(subcommand)]
        subcommand: ClusterSubcommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.log_file.as_deref())?;
    let config_path = args.config.as_deref();

    match args.command {
        // Works on the file itself, so a broken file must not stop it
        Command::Config { subcommand } => handle_config_command(subcommand, config_path).await,
        Command::Plugin { subcommand } => {
            let (config, cancel) = prepare(config_path)?;
            handle_plugin_command(subcommand, &config, &cancel).await
        }
        Command::Hooks { subcommand } => {
            let (config, cancel) = prepare(config_path)?;
            handle_hooks_command(subcommand, &config, &cancel).await
        }
        Command::Cluster { subcommand } => {
            let (config, cancel) = prepare(config_path)?;
            handle_cluster_command(subcommand, &config, &cancel).await
        }
    }
}

/// Load configuration and arm Ctrl-C to cancel running operations
fn prepare(config_path: Option<&Path>) -> Result<(Config, CancellationToken)> {
    let config = ConfigLoader::load(config_path)?;
    tracing::debug!("Plugins directory: {}", config.plugins_dir().display());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling running operations");
            on_signal.cancel();
        }
    });

    Ok((config, cancel))
}
