//! External plugin adapter
//!
//! Wraps one validated manifest + binary pair and turns the `Plugin`
//! capability calls into subprocess invocations of the plugin binary.

use super::capability::{OperationKind, OperationParams, Plugin, PluginContext};
use super::manifest::PluginManifest;
use super::protocol::{ENV_PLUGIN_NAME, ENV_PLUGIN_VERSION, PluginRequest, PluginResponse, Verb};
use super::result::OperationResult;
use super::{PluginError, PluginResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Operation kinds assumed when a binary does not answer `describe`
pub const DEFAULT_OPERATIONS: [OperationKind; 3] = [
    OperationKind::Deploy,
    OperationKind::Upgrade,
    OperationKind::Scale,
];

/// One subprocess invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub stdin: Vec<u8>,
}

/// Captured result of a finished subprocess
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Standard output followed by standard error
    pub fn combined(&self) -> String {
        match (self.stdout.trim_end(), self.stderr.trim_end()) {
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}

/// Runs plugin subprocesses
///
/// Dropping the returned future must stop the subprocess.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: Invocation) -> std::io::Result<CommandOutput>;
}

/// Runs plugins as real child processes
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: Invocation) -> std::io::Result<CommandOutput> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = invocation.stdin;
            // Plugins that ignore stdin may exit before reading it
            tokio::spawn(async move {
                let _ = stdin.write_all(&payload).await;
                let _ = stdin.shutdown().await;
            });
        }

        let output = child.wait_with_output().await?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Adapter for a plugin implemented by an external executable
pub struct ExternalPlugin {
    manifest: PluginManifest,
    plugin_dir: PathBuf,
    binary: PathBuf,
    runner: Arc<dyn CommandRunner>,
    config: RwLock<std::collections::HashMap<String, serde_json::Value>>,
    operations: RwLock<Vec<OperationKind>>,
}

impl ExternalPlugin {
    pub fn new(manifest: PluginManifest, plugins_dir: &Path, runner: Arc<dyn CommandRunner>) -> Self {
        let plugin_dir = manifest.plugin_dir(plugins_dir);
        let binary = manifest.binary_path(plugins_dir);
        Self {
            manifest,
            plugin_dir,
            binary,
            runner,
            config: RwLock::new(Default::default()),
            operations: RwLock::new(DEFAULT_OPERATIONS.to_vec()),
        }
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn request(&self, verb: Verb) -> PluginRequest {
        let config = self
            .config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone());
        PluginRequest::new(verb, &self.manifest.name, &self.manifest.version).with_config(&config)
    }

    /// Run `<binary> <verb>` and interpret the outcome
    async fn invoke(
        &self,
        cancel: &CancellationToken,
        request: PluginRequest,
    ) -> PluginResult<(CommandOutput, Option<PluginResponse>)> {
        let verb = request.verb;
        let stdin = serde_json::to_vec(&request).map_err(|e| PluginError::Execution {
            plugin: self.manifest.name.clone(),
            verb: verb.to_string(),
            message: format!("failed to encode request: {}", e),
            output: String::new(),
        })?;

        let invocation = Invocation {
            program: self.binary.clone(),
            args: vec![verb.to_string()],
            cwd: self.plugin_dir.clone(),
            env: vec![
                (ENV_PLUGIN_NAME.to_string(), self.manifest.name.clone()),
                (ENV_PLUGIN_VERSION.to_string(), self.manifest.version.clone()),
            ],
            stdin,
        };

        tracing::debug!("Invoking plugin {} {:?} {}", self.manifest.name, self.binary, verb);

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PluginError::Cancelled),
            result = self.runner.run(invocation) => result,
        }
        .map_err(|e| PluginError::Execution {
            plugin: self.manifest.name.clone(),
            verb: verb.to_string(),
            message: format!("failed to run {:?}: {}", self.binary, e),
            output: String::new(),
        })?;

        if !output.success() {
            let message = match output.code {
                Some(code) => format!("exited with status {}", code),
                None => "terminated by signal".to_string(),
            };
            return Err(PluginError::Execution {
                plugin: self.manifest.name.clone(),
                verb: verb.to_string(),
                message,
                output: output.combined(),
            });
        }

        let response = PluginResponse::parse_from_output(&output.stdout);
        if let Some(response) = &response {
            if !response.success {
                return Err(PluginError::Execution {
                    plugin: self.manifest.name.clone(),
                    verb: verb.to_string(),
                    message: response
                        .error
                        .clone()
                        .unwrap_or_else(|| response.message.clone()),
                    output: output.combined(),
                });
            }
        }

        Ok((output, response))
    }

    /// Ask the binary for its operation set, keeping the default on any failure
    async fn describe(&self, cancel: &CancellationToken) {
        match self.invoke(cancel, self.request(Verb::Describe)).await {
            Ok((_, Some(PluginResponse {
                operations: Some(operations),
                ..
            }))) => {
                tracing::debug!(
                    "Plugin {} declares operations: {:?}",
                    self.manifest.name,
                    operations
                );
                if let Ok(mut cached) = self.operations.write() {
                    *cached = operations;
                }
            }
            Ok(_) => {
                tracing::debug!(
                    "Plugin {} gave no operation list, using defaults",
                    self.manifest.name
                );
            }
            Err(e) => {
                tracing::debug!(
                    "Plugin {} does not answer describe ({}), using defaults",
                    self.manifest.name,
                    e
                );
            }
        }
    }
}

#[async_trait]
impl Plugin for ExternalPlugin {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn version(&self) -> &str {
        &self.manifest.version
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    async fn initialize(
        &self,
        cancel: &CancellationToken,
        context: &PluginContext,
    ) -> PluginResult<()> {
        if let Ok(mut config) = self.config.write() {
            *config = context.config.clone();
        }
        self.invoke(cancel, self.request(Verb::Init)).await?;
        self.describe(cancel).await;
        Ok(())
    }

    async fn validate(&self, cancel: &CancellationToken) -> PluginResult<()> {
        self.invoke(cancel, self.request(Verb::Validate)).await?;
        Ok(())
    }

    async fn cleanup(&self, cancel: &CancellationToken) -> PluginResult<()> {
        self.invoke(cancel, self.request(Verb::Cleanup)).await?;
        Ok(())
    }

    fn supported_operations(&self) -> Vec<OperationKind> {
        self.operations
            .read()
            .map(|ops| ops.clone())
            .unwrap_or_else(|_| DEFAULT_OPERATIONS.to_vec())
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        operation: OperationKind,
        params: &OperationParams,
    ) -> PluginResult<OperationResult> {
        let request = self.request(Verb::Execute).with_operation(operation, params);
        let (output, response) = self.invoke(cancel, request).await?;

        let result = match response {
            Some(response) => {
                let message = if response.message.is_empty() {
                    format!("Plugin '{}' completed {}", self.manifest.name, operation)
                } else {
                    response.message
                };
                let mut result = OperationResult::success(message);
                result.data = response.data;
                result
            }
            None => OperationResult::success(format!(
                "Plugin '{}' completed {}",
                self.manifest.name, operation
            ))
            .with_data("output", output.combined()),
        };

        Ok(result)
    }
}
