//! TiKV bootstrap plugin
//!
//! Brings up a PD quorum and a set of TiKV storage nodes on remote hosts.
//! Inside a managed deploy the work is split across the cluster lifecycle:
//! `pre_deploy` provisions, `execute(deploy)` starts processes and
//! `post_deploy` waits for convergence and verifies health. An `execute(deploy)`
//! with no deployment in flight provisions and starts, stopping at `Started`;
//! `execute(monitor)` reports health afterwards.
//!
//! Nothing is rolled back: a failure after processes were started leaves them
//! running and the deployment in `Failed`.

use super::convergence::{self, PollSettings};
use super::phase::{Deployment, DeploymentPhase};
use super::probe::{HealthProbe, HttpProbe};
use super::release::{Component, HttpReleaseSource, ReleaseSource};
use super::remote::{RemoteExecutor, SshExecutor};
use super::render::{PD_CONFIG_FILE, TIKV_CONFIG_FILE, render_pd_config, render_tikv_config};
use super::topology::{BootstrapOptions, BootstrapSpec};
use crate::cluster::ClusterSpec;
use crate::config::Config;
use crate::plugins::capability::{
    ClusterPlugin, OperationKind, OperationParams, Plugin, PluginContext, cluster_spec_param,
};
use crate::plugins::{OperationResult, PluginError, PluginResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const PLUGIN_NAME: &str = "tikv-bootstrap";

/// One process to provision and start
struct NodeTarget<'a> {
    name: &'a str,
    host: &'a str,
    data_dir: &'a str,
    log_dir: &'a str,
    deploy_dir: &'a str,
    component: Component,
}

impl NodeTarget<'_> {
    fn binary_path(&self) -> String {
        format!("{}/bin/{}", self.deploy_dir, self.component.binary_name())
    }

    fn config_path(&self) -> String {
        let file = match self.component {
            Component::Pd => PD_CONFIG_FILE,
            Component::Tikv => TIKV_CONFIG_FILE,
        };
        format!("{}/conf/{}", self.deploy_dir, file)
    }

    fn mkdir_command(&self) -> PluginResult<String> {
        Ok(format!(
            "mkdir -p {} {} {} {}",
            shell_quote(self.data_dir)?,
            shell_quote(self.log_dir)?,
            shell_quote(&format!("{}/bin", self.deploy_dir))?,
            shell_quote(&format!("{}/conf", self.deploy_dir))?
        ))
    }

    fn chmod_command(&self) -> PluginResult<String> {
        Ok(format!("chmod 755 {}", shell_quote(&self.binary_path())?))
    }

    fn start_command(&self) -> PluginResult<String> {
        Ok(format!(
            "nohup {} {} >> {} 2>&1 &",
            shell_quote(&self.binary_path())?,
            shell_quote(&format!("--config={}", self.config_path()))?,
            shell_quote(&format!("{}/{}.stdout", self.log_dir, self.component))?
        ))
    }
}

/// Single argument of a remote shell command
fn shell_quote(arg: &str) -> PluginResult<String> {
    shlex::try_quote(arg)
        .map(|quoted| quoted.into_owned())
        .map_err(|_| PluginError::Validation(format!("{:?} cannot be passed to a remote shell", arg)))
}

fn targets(spec: &BootstrapSpec) -> Vec<NodeTarget<'_>> {
    let coordination = spec.coordination.iter().map(|node| NodeTarget {
        name: &node.name,
        host: &node.host,
        data_dir: &node.data_dir,
        log_dir: &node.log_dir,
        deploy_dir: &node.deploy_dir,
        component: Component::Pd,
    });
    let storage = spec.storage.iter().map(|node| NodeTarget {
        name: &node.name,
        host: &node.host,
        data_dir: &node.data_dir,
        log_dir: &node.log_dir,
        deploy_dir: &node.deploy_dir,
        component: Component::Tikv,
    });
    coordination.chain(storage).collect()
}

/// TiKV cluster lifecycle plugin
pub struct TikvBootstrap {
    options: RwLock<BootstrapOptions>,
    executor: Arc<dyn RemoteExecutor>,
    probe: Arc<dyn HealthProbe>,
    release: Arc<dyn ReleaseSource>,
    deployment: Mutex<Deployment>,
}

impl TikvBootstrap {
    pub fn new(
        options: BootstrapOptions,
        executor: Arc<dyn RemoteExecutor>,
        probe: Arc<dyn HealthProbe>,
        release: Arc<dyn ReleaseSource>,
    ) -> Self {
        Self {
            options: RwLock::new(options),
            executor,
            probe,
            release,
            deployment: Mutex::new(Deployment::default()),
        }
    }

    /// Build with the SSH executor, HTTP probe and HTTP release source
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let bootstrap = &config.bootstrap;
        Ok(Self::new(
            BootstrapOptions::from(bootstrap),
            Arc::new(SshExecutor::new(&bootstrap.ssh)),
            Arc::new(HttpProbe::new(Duration::from_secs(5))?),
            Arc::new(HttpReleaseSource::new(
                bootstrap.release_url.clone(),
                bootstrap.cache_dir(),
            )),
        ))
    }

    /// Apply plugin config overrides; options are left untouched on error
    pub fn configure(&self, overrides: &HashMap<String, serde_json::Value>) -> PluginResult<()> {
        let mut options = self.options();
        options.apply_overrides(overrides)?;
        options.validate()?;
        tracing::debug!(
            "TiKV bootstrap configured: version {}, engine {}",
            options.version,
            options.storage_engine
        );
        let mut guard = self.options.write().unwrap_or_else(|e| e.into_inner());
        *guard = options;
        Ok(())
    }

    pub fn options(&self) -> BootstrapOptions {
        self.options
            .read()
            .map(|o| o.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn phase(&self) -> DeploymentPhase {
        self.deployment().phase()
    }

    /// Snapshot of the current deployment's history
    pub fn deployment_snapshot(&self) -> Deployment {
        self.deployment().clone()
    }

    fn deployment(&self) -> MutexGuard<'_, Deployment> {
        self.deployment.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Derive and check the topology without touching any deployment state
    pub fn extract(&self, spec: &ClusterSpec) -> PluginResult<BootstrapSpec> {
        let bootstrap = BootstrapSpec::extract(spec, &self.options())?;
        bootstrap.validate()?;
        Ok(bootstrap)
    }

    /// Run one phase and record its outcome
    ///
    /// Dropping the returned future before it finishes (caller deadline or
    /// cancellation) fails the deployment as well.
    async fn step<T, Fut>(&self, target: DeploymentPhase, work: Fut) -> PluginResult<T>
    where
        Fut: Future<Output = PluginResult<T>>,
    {
        let mut pending = PendingPhase {
            deployment: &self.deployment,
            target,
            armed: true,
        };
        let outcome = work.await;
        pending.armed = false;

        match outcome {
            Ok(value) => {
                self.deployment().advance(target)?;
                Ok(value)
            }
            Err(e) => {
                self.deployment().fail(target, &e);
                Err(e)
            }
        }
    }

    /// Extract, validate and provision a new deployment
    pub async fn prepare(
        &self,
        cancel: &CancellationToken,
        spec: &ClusterSpec,
    ) -> PluginResult<BootstrapSpec> {
        let options = self.options();
        self.deployment().begin();

        let bootstrap = self
            .step(DeploymentPhase::Extracted, async {
                BootstrapSpec::extract(spec, &options)
            })
            .await?;
        self.step(DeploymentPhase::Validated, async { bootstrap.validate() })
            .await?;
        self.step(
            DeploymentPhase::Provisioned,
            self.provision(cancel, &bootstrap),
        )
        .await?;
        Ok(bootstrap)
    }

    /// Fetch binaries, create directories, copy binaries and write configs
    pub async fn provision(
        &self,
        cancel: &CancellationToken,
        spec: &BootstrapSpec,
    ) -> PluginResult<()> {
        tracing::info!(
            "Provisioning {} coordination and {} storage nodes",
            spec.coordination.len(),
            spec.storage.len()
        );

        let pd_binary = self.fetch(Component::Pd, &spec.version).await?;
        let tikv_binary = self.fetch(Component::Tikv, &spec.version).await?;
        let nodes = targets(spec);

        for node in &nodes {
            ensure_active(cancel)?;
            self.executor.execute(node.host, &node.mkdir_command()?).await?;
        }

        for node in &nodes {
            ensure_active(cancel)?;
            let local = match node.component {
                Component::Pd => &pd_binary,
                Component::Tikv => &tikv_binary,
            };
            let remote = node.binary_path();
            self.executor.copy_file(local, node.host, &remote).await?;
            self.executor.execute(node.host, &node.chmod_command()?).await?;
        }

        let staging = tempfile::TempDir::new()?;
        for (index, node) in spec.coordination.iter().enumerate() {
            ensure_active(cancel)?;
            let target = &nodes[index];
            let local = stage(staging.path(), node.name.as_str(), &render_pd_config(node, spec)?)?;
            self.executor
                .copy_file(&local, &node.host, &target.config_path())
                .await?;
        }
        let offset = spec.coordination.len();
        for (index, node) in spec.storage.iter().enumerate() {
            ensure_active(cancel)?;
            let target = &nodes[offset + index];
            let local = stage(staging.path(), node.name.as_str(), &render_tikv_config(node, spec)?)?;
            self.executor
                .copy_file(&local, &node.host, &target.config_path())
                .await?;
        }

        tracing::info!("Provisioned {} nodes", nodes.len());
        Ok(())
    }

    async fn fetch(&self, component: Component, version: &str) -> PluginResult<PathBuf> {
        self.release
            .fetch(component, version)
            .await
            .map_err(|e| PluginError::Execution {
                plugin: PLUGIN_NAME.to_string(),
                verb: "provision".to_string(),
                message: format!("failed to fetch {} {}", component, version),
                output: format!("{:#}", e),
            })
    }

    /// Start PD nodes, gate on quorum, then start TiKV nodes
    ///
    /// Storage nodes are configured with coordination endpoints, so they are
    /// only started once the quorum answers.
    pub async fn start(&self, cancel: &CancellationToken, spec: &BootstrapSpec) -> PluginResult<()> {
        let timing = self.options().timing;
        let nodes = targets(spec);
        let (coordination, storage) = nodes.split_at(spec.coordination.len());

        self.start_role(cancel, coordination, timing.coordination_stagger)
            .await?;

        convergence::wait_for_quorum(
            cancel,
            self.probe.as_ref(),
            &spec.coordination,
            PollSettings {
                interval: timing.poll_interval,
                timeout: timing.quorum_timeout,
            },
        )
        .await?;

        self.start_role(cancel, storage, timing.storage_stagger).await
    }

    async fn start_role(
        &self,
        cancel: &CancellationToken,
        nodes: &[NodeTarget<'_>],
        stagger: Duration,
    ) -> PluginResult<()> {
        for (index, node) in nodes.iter().enumerate() {
            if index > 0 {
                pause(cancel, stagger).await?;
            }
            ensure_active(cancel)?;
            tracing::info!("Starting {} on {}", node.name, node.host);
            self.executor.execute(node.host, &node.start_command()?).await?;
        }
        Ok(())
    }

    /// Wait for the quorum, then for every storage node
    pub async fn converge(
        &self,
        cancel: &CancellationToken,
        spec: &BootstrapSpec,
    ) -> PluginResult<()> {
        let timing = self.options().timing;
        convergence::wait_for_quorum(
            cancel,
            self.probe.as_ref(),
            &spec.coordination,
            PollSettings {
                interval: timing.poll_interval,
                timeout: timing.quorum_timeout,
            },
        )
        .await?;
        convergence::wait_for_storage_nodes(
            cancel,
            self.probe.as_ref(),
            &spec.storage,
            PollSettings {
                interval: timing.poll_interval,
                timeout: timing.storage_timeout,
            },
        )
        .await
    }

    async fn settle(&self, cancel: &CancellationToken, spec: &BootstrapSpec) -> PluginResult<()> {
        self.step(DeploymentPhase::Converged, self.converge(cancel, spec))
            .await?;
        self.step(
            DeploymentPhase::Verified,
            convergence::verify_cluster_health(cancel, self.probe.as_ref(), spec),
        )
        .await
    }

    /// Provision and start a new deployment
    ///
    /// Convergence and verification are left to `post_deploy`, so the call
    /// stays within a single operation deadline.
    pub async fn launch(
        &self,
        cancel: &CancellationToken,
        spec: &ClusterSpec,
    ) -> PluginResult<BootstrapSpec> {
        let bootstrap = self.prepare(cancel, spec).await?;
        self.step(DeploymentPhase::Started, self.start(cancel, &bootstrap))
            .await?;
        tracing::info!("TiKV processes started, waiting for post-deploy to converge");
        Ok(bootstrap)
    }

    async fn deploy(
        &self,
        cancel: &CancellationToken,
        params: &OperationParams,
    ) -> PluginResult<OperationResult> {
        let cluster = cluster_spec_param(params)?;

        let bootstrap = match self.phase() {
            DeploymentPhase::Provisioned => {
                let bootstrap = self.extract(&cluster)?;
                self.step(DeploymentPhase::Started, self.start(cancel, &bootstrap))
                    .await?;
                bootstrap
            }
            phase if phase.is_settled() => self.launch(cancel, &cluster).await?,
            phase => {
                return Err(PluginError::Validation(format!(
                    "cannot deploy while a deployment is {}",
                    phase
                )));
            }
        };

        Ok(OperationResult::success("TiKV processes started")
            .with_data("phase", self.phase().as_str())
            .with_data("coordination_nodes", bootstrap.coordination.len())
            .with_data("storage_nodes", bootstrap.storage.len())
            .with_data("pd_endpoints", bootstrap.coordination_endpoints()))
    }

    /// Probe every node once without touching the deployment state
    async fn monitor(
        &self,
        cancel: &CancellationToken,
        params: &OperationParams,
    ) -> PluginResult<OperationResult> {
        let bootstrap = self.extract(&cluster_spec_param(params)?)?;
        let health =
            convergence::verify_cluster_health(cancel, self.probe.as_ref(), &bootstrap).await;
        let result = match health {
            Ok(()) => OperationResult::success("TiKV cluster healthy").with_data("healthy", true),
            Err(PluginError::Cancelled) => return Err(PluginError::Cancelled),
            Err(e) => OperationResult::success("TiKV cluster unhealthy")
                .with_data("healthy", false)
                .with_data("reason", e.to_string()),
        };
        Ok(result.with_data("phase", self.phase().as_str()))
    }
}

/// Fails the deployment if a phase is dropped before it finishes
struct PendingPhase<'a> {
    deployment: &'a Mutex<Deployment>,
    target: DeploymentPhase,
    armed: bool,
}

impl Drop for PendingPhase<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut deployment = self.deployment.lock().unwrap_or_else(|e| e.into_inner());
            deployment.abandon(self.target);
        }
    }
}

fn ensure_active(cancel: &CancellationToken) -> PluginResult<()> {
    if cancel.is_cancelled() {
        Err(PluginError::Cancelled)
    } else {
        Ok(())
    }
}

async fn pause(cancel: &CancellationToken, delay: Duration) -> PluginResult<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PluginError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn stage(dir: &Path, node: &str, contents: &str) -> PluginResult<PathBuf> {
    let path = dir.join(format!("{}.toml", node));
    std::fs::write(&path, contents)?;
    Ok(path)
}

#[async_trait]
impl Plugin for TikvBootstrap {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Bootstraps a TiKV cluster (PD quorum and storage nodes) over SSH"
    }

    async fn initialize(
        &self,
        _cancel: &CancellationToken,
        context: &PluginContext,
    ) -> PluginResult<()> {
        self.configure(&context.config)
    }

    async fn validate(&self, _cancel: &CancellationToken) -> PluginResult<()> {
        self.options().validate()
    }

    async fn cleanup(&self, _cancel: &CancellationToken) -> PluginResult<()> {
        let phase = self.phase();
        if !phase.is_settled() {
            tracing::warn!("Cleaning up TiKV bootstrap with a deployment {}", phase);
        }
        Ok(())
    }

    fn supported_operations(&self) -> Vec<OperationKind> {
        vec![
            OperationKind::Deploy,
            OperationKind::Upgrade,
            OperationKind::Scale,
            OperationKind::Monitor,
        ]
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        operation: OperationKind,
        params: &OperationParams,
    ) -> PluginResult<OperationResult> {
        match operation {
            OperationKind::Deploy => self.deploy(cancel, params).await,
            OperationKind::Monitor => self.monitor(cancel, params).await,
            OperationKind::Upgrade | OperationKind::Scale => {
                tracing::warn!("TiKV bootstrap does not implement {}; nothing applied", operation);
                Ok(
                    OperationResult::success(format!("{} is not implemented; nothing applied", operation))
                        .with_data("applied", false),
                )
            }
            other => Err(PluginError::Unsupported {
                plugin: PLUGIN_NAME.to_string(),
                capability: format!("operation {}", other),
            }),
        }
    }

    fn as_cluster(&self) -> Option<&dyn ClusterPlugin> {
        Some(self)
    }
}

#[async_trait]
impl ClusterPlugin for TikvBootstrap {
    async fn pre_deploy(&self, cancel: &CancellationToken, spec: &ClusterSpec) -> PluginResult<()> {
        self.prepare(cancel, spec).await.map(|_| ())
    }

    async fn post_deploy(
        &self,
        cancel: &CancellationToken,
        spec: &ClusterSpec,
    ) -> PluginResult<()> {
        self.deployment().require(DeploymentPhase::Started)?;
        let bootstrap = self.extract(spec)?;
        self.settle(cancel, &bootstrap).await
    }

    async fn pre_upgrade(
        &self,
        _cancel: &CancellationToken,
        _spec: &ClusterSpec,
    ) -> PluginResult<()> {
        tracing::warn!("TiKV bootstrap has no pre-upgrade work");
        Ok(())
    }

    async fn post_upgrade(
        &self,
        _cancel: &CancellationToken,
        _spec: &ClusterSpec,
    ) -> PluginResult<()> {
        tracing::warn!("TiKV bootstrap has no post-upgrade work");
        Ok(())
    }

    fn validate_cluster(&self, spec: &ClusterSpec) -> PluginResult<()> {
        self.extract(spec).map(|_| ())
    }
}
