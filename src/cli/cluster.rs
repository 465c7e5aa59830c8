//! Cluster CLI commands

use super::{open_manager, print_result};
use crate::bootstrap::{BootstrapOptions, BootstrapSpec, PLUGIN_NAME};
use crate::cluster::ClusterSpec;
use crate::config::Config;
use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Cluster subcommands
#[derive(Subcommand, Debug)]
pub enum ClusterSubcommand {
    /// Print the PD and TiKV nodes derived from a cluster specification
    Extract {
        /// Cluster specification file
        spec: PathBuf,
    },

    /// Check a cluster topology with a cluster lifecycle plugin
    Validate {
        /// Cluster specification file
        spec: PathBuf,

        #[arg(long, default_value = PLUGIN_NAME)]
        plugin: String,
    },

    /// Deploy a cluster with a cluster lifecycle plugin
    Deploy {
        /// Cluster specification file
        spec: PathBuf,

        #[arg(long, default_value = PLUGIN_NAME)]
        plugin: String,
    },

    /// Upgrade a cluster with a cluster lifecycle plugin
    Upgrade {
        /// Cluster specification file
        spec: PathBuf,

        #[arg(long, default_value = PLUGIN_NAME)]
        plugin: String,
    },
}

/// Handle cluster CLI commands
pub async fn handle_cluster_command(
    subcommand: ClusterSubcommand,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<()> {
    match subcommand {
        ClusterSubcommand::Extract { spec } => {
            let cluster = ClusterSpec::load(&spec)?;
            let bootstrap = BootstrapSpec::extract(&cluster, &BootstrapOptions::from(&config.bootstrap))?;
            let yaml = serde_yaml::to_string(&bootstrap).context("Failed to serialize topology")?;
            print!("{}", yaml);
            if let Err(e) = bootstrap.validate() {
                eprintln!("Warning: {}", e);
            }
            Ok(())
        }
        ClusterSubcommand::Validate { spec, plugin } => {
            let cluster = ClusterSpec::load(&spec)?;
            let manager = open_manager(config, cancel).await?;
            let outcome = manager.validate_cluster(&plugin, &cluster).await;
            manager.shutdown(cancel).await;
            outcome.with_context(|| format!("Cluster rejected by {}", plugin))?;
            println!("✓ Cluster topology is valid for {}", plugin);
            Ok(())
        }
        ClusterSubcommand::Deploy { spec, plugin } => {
            let cluster = ClusterSpec::load(&spec)?;
            let manager = open_manager(config, cancel).await?;
            let outcome = manager.deploy_cluster(cancel, &plugin, &cluster).await;
            manager.shutdown(cancel).await;
            let result = outcome.with_context(|| format!("Deployment with {} failed", plugin))?;
            print_result(&result)
        }
        ClusterSubcommand::Upgrade { spec, plugin } => {
            let cluster = ClusterSpec::load(&spec)?;
            let manager = open_manager(config, cancel).await?;
            let outcome = manager.upgrade_cluster(cancel, &plugin, &cluster).await;
            manager.shutdown(cancel).await;
            let result = outcome.with_context(|| format!("Upgrade with {} failed", plugin))?;
            print_result(&result)
        }
    }
}
