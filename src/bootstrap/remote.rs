//! Remote command execution on cluster nodes

use crate::config::SshConfig;
use crate::plugins::external::{CommandOutput, CommandRunner, Invocation, ProcessRunner};
use crate::plugins::{PluginError, PluginResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Runs commands on and copies files to cluster hosts
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a shell command on a host, returning its standard output
    async fn execute(&self, host: &str, command: &str) -> PluginResult<String>;

    /// Copy a local file to a path on a host
    async fn copy_file(&self, local: &Path, host: &str, remote: &str) -> PluginResult<()>;
}

/// `ssh`/`scp` based executor
pub struct SshExecutor {
    user: String,
    port: u16,
    identity_file: Option<PathBuf>,
    connect_timeout_secs: u64,
    runner: Arc<dyn CommandRunner>,
}

impl SshExecutor {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            user: config.user.clone(),
            port: config.port,
            identity_file: config.identity_file.as_ref().map(PathBuf::from),
            connect_timeout_secs: config.connect_timeout_secs,
            runner: Arc::new(ProcessRunner),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    fn common_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }

    fn target(&self, host: &str) -> String {
        format!("{}@{}", self.user, host)
    }

    async fn run(&self, host: &str, program: &str, args: Vec<String>) -> PluginResult<CommandOutput> {
        let invocation = Invocation {
            program: PathBuf::from(program),
            args,
            cwd: std::env::temp_dir(),
            env: Vec::new(),
            stdin: Vec::new(),
        };

        let output = self
            .runner
            .run(invocation)
            .await
            .map_err(|e| PluginError::Remote {
                host: host.to_string(),
                reason: format!("failed to run {}: {}", program, e),
            })?;

        if !output.success() {
            let reason = match output.code {
                Some(code) => format!("{} exited with status {}: {}", program, code, output.combined()),
                None => format!("{} terminated by signal", program),
            };
            return Err(PluginError::Remote {
                host: host.to_string(),
                reason,
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, host: &str, command: &str) -> PluginResult<String> {
        let mut args = vec!["-p".to_string(), self.port.to_string()];
        args.extend(self.common_options());
        args.push(self.target(host));
        args.push("--".to_string());
        args.push(command.to_string());

        tracing::debug!("ssh {}: {}", host, command);
        let output = self.run(host, "ssh", args).await?;
        Ok(output.stdout)
    }

    async fn copy_file(&self, local: &Path, host: &str, remote: &str) -> PluginResult<()> {
        let mut args = vec!["-P".to_string(), self.port.to_string()];
        args.extend(self.common_options());
        args.push(local.display().to_string());
        args.push(format!("{}:{}", self.target(host), remote));

        tracing::debug!("scp {:?} -> {}:{}", local, host, remote);
        self.run(host, "scp", args).await?;
        Ok(())
    }
}
