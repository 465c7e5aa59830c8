//! Hook CLI commands

use super::{load_cluster_params, open_manager, parse_params, print_result};
use crate::config::Config;
use crate::plugins::OperationKind;
use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Hook subcommands
#[derive(Subcommand, Debug)]
pub enum HooksSubcommand {
    /// Register plugins as hooks for an operation and run them in order
    Run {
        /// Operation kind the hooks run for
        operation: OperationKind,

        /// Plugin to run, in order; repeat to register several
        #[arg(long = "hook", required = true)]
        hooks: Vec<String>,

        /// Cluster specification passed as the "cluster" parameter
        #[arg(long)]
        cluster: Option<PathBuf>,

        /// Extra parameter as key=value (value parsed as JSON when possible)
        #[arg(long = "param", short = 'p')]
        params: Vec<String>,
    },
}

/// Handle hook CLI commands
pub async fn handle_hooks_command(
    subcommand: HooksSubcommand,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<()> {
    match subcommand {
        HooksSubcommand::Run {
            operation,
            hooks,
            cluster,
            params: raw,
        } => {
            let mut params = match cluster {
                Some(path) => load_cluster_params(&path)?,
                None => Default::default(),
            };
            params.extend(parse_params(&raw)?);

            let manager = open_manager(config, cancel).await?;
            for hook in &hooks {
                manager.register_hook(operation, hook).await?;
            }

            let outcome = manager.execute_hooks(cancel, operation, &params).await;
            manager.shutdown(cancel).await;

            for result in &outcome.results {
                print_result(result)?;
            }
            let failed = outcome.failed_count();
            match outcome.error {
                Some(e) => Err(anyhow::Error::new(e).context(format!(
                    "{} of {} hooks failed for {}; first failure",
                    failed,
                    outcome.results.len(),
                    operation
                ))),
                None => Ok(()),
            }
        }
    }
}
