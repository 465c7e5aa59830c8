//! TiKV bootstrap as an external plugin executable
//!
//! Install next to a `plugin.yaml` in the plugins directory to run the
//! bootstrap out of process. Every verb runs in a fresh process, so the
//! request's plugin config is applied on each invocation.

use clusterplug::bootstrap::TikvBootstrap;
use clusterplug::config::ConfigLoader;
use clusterplug::plugins::{Plugin, PluginError, sdk};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries the protocol response
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_ansi(false)
        .init();

    let config = ConfigLoader::load(None).unwrap_or_else(|e| {
        tracing::warn!("Failed to load configuration, using defaults: {:#}", e);
        ConfigLoader::load_defaults()
    });

    sdk::serve(|request| {
        let plugin = TikvBootstrap::from_config(&config).map_err(|e| PluginError::Load {
            name: request.plugin.clone(),
            reason: format!("{:#}", e),
        })?;
        plugin.configure(&request.config)?;
        let plugin: Arc<dyn Plugin> = Arc::new(plugin);
        Ok(plugin)
    })
    .await
}
