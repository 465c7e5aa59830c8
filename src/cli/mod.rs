//! CLI command handling module
//!
//! Handles all CLI subcommands. Every command that runs plugins opens a
//! fresh manager: discovered plugins plus the builtin TiKV bootstrap.

mod cluster;
mod config;
mod hooks;
mod logging;
mod plugin;

pub use cluster::{ClusterSubcommand, handle_cluster_command};
pub use config::{ConfigSubcommand, handle_config_command};
pub use hooks::{HooksSubcommand, handle_hooks_command};
pub use logging::init_logging;
pub use plugin::{PluginSubcommand, handle_plugin_command};

use crate::bootstrap::TikvBootstrap;
use crate::cluster::ClusterSpec;
use crate::config::Config;
use crate::plugins::capability::cluster_spec_params;
use crate::plugins::{OperationParams, OperationResult, PluginManager};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Build a manager, load the builtin plugin and discover external ones
async fn open_manager(config: &Config, cancel: &CancellationToken) -> Result<PluginManager> {
    let manager = PluginManager::from_config(config);

    let bootstrap = TikvBootstrap::from_config(config)?;
    manager
        .load_builtin(cancel, Arc::new(bootstrap))
        .await
        .context("Failed to load builtin TiKV bootstrap plugin")?;

    manager.initialize(cancel).await?;
    Ok(manager)
}

fn load_cluster_params(path: &Path) -> Result<OperationParams> {
    let spec = ClusterSpec::load(path)?;
    Ok(cluster_spec_params(&spec))
}

/// Parse `key=value` pairs; values are JSON when they parse as JSON
fn parse_params(raw: &[String]) -> Result<OperationParams> {
    let mut params = OperationParams::new();
    for pair in raw {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("Parameter '{}' is not key=value", pair))?;
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

fn print_result(result: &OperationResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize result")?;
    println!("{}", json);
    Ok(())
}
