//! Plugin manager
//!
//! Owns discovery, the load/unload/reload lifecycle, the hook registry and
//! dispatch. All shared state sits behind one reader/writer lock that is never
//! held while a plugin runs: plugin handles and hook lists are copied out
//! under the lock and the lock is released before the (slow) call.

use super::capability::{
    ClusterPlugin, OperationKind, OperationParams, Plugin, PluginContext, cluster_spec_params,
};
use super::external::{CommandRunner, ExternalPlugin, ProcessRunner};
use super::hooks::{HookOutcome, HookRegistry};
use super::loader::PluginLoader;
use super::manifest::PluginManifest;
use super::result::OperationResult;
use super::validator::PluginValidator;
use super::{PluginError, PluginResult};
use crate::cluster::ClusterSpec;
use crate::config::schema::{Config, TimeoutConfig};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Per-call deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub init: Duration,
    pub validate: Duration,
    pub cleanup: Duration,
    pub execute: Duration,
    /// Bound for cluster lifecycle hooks (pre/post deploy and upgrade)
    pub lifecycle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            init: Duration::from_secs(30),
            validate: Duration::from_secs(30),
            cleanup: Duration::from_secs(10),
            execute: Duration::from_secs(300),
            lifecycle: Duration::from_secs(900),
        }
    }
}

impl From<&TimeoutConfig> for Timeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            init: Duration::from_secs(config.init_secs),
            validate: Duration::from_secs(config.validate_secs),
            cleanup: Duration::from_secs(config.cleanup_secs),
            execute: Duration::from_secs(config.execute_secs),
            lifecycle: Duration::from_secs(config.lifecycle_secs),
        }
    }
}

/// A plugin instance owned by the manager
#[derive(Clone)]
pub struct LoadedPlugin {
    /// Manifest the plugin was loaded from; `None` for in-process plugins
    pub manifest: Option<PluginManifest>,
    pub plugin: Arc<dyn Plugin>,
    pub loaded_at: DateTime<Utc>,
}

impl LoadedPlugin {
    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    pub fn is_builtin(&self) -> bool {
        self.manifest.is_none()
    }
}

#[derive(Default)]
struct ManagerState {
    loaded: HashMap<String, LoadedPlugin>,
    /// Names whose load is in progress
    loading: HashSet<String>,
    manifests: HashMap<String, PluginManifest>,
    hooks: HookRegistry,
}

/// Plugin manager
pub struct PluginManager {
    plugins_dir: PathBuf,
    timeouts: Timeouts,
    runner: Arc<dyn CommandRunner>,
    plugin_config: HashMap<String, HashMap<String, serde_json::Value>>,
    state: RwLock<ManagerState>,
}

impl PluginManager {
    /// Create a manager for a plugins directory with default deadlines
    pub fn new(plugins_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            timeouts: Timeouts::default(),
            runner: Arc::new(ProcessRunner),
            plugin_config: HashMap::new(),
            state: RwLock::new(ManagerState::default()),
        }
    }

    /// Create a manager from application configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.plugins_dir())
            .with_timeouts(Timeouts::from(&config.timeouts))
            .with_plugin_config(config.plugins.clone())
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Replace the subprocess runner used by external plugins
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_plugin_config(
        mut self,
        config: HashMap<String, HashMap<String, serde_json::Value>>,
    ) -> Self {
        self.plugin_config = config;
        self
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Create the plugins directory, discover manifests and load them
    ///
    /// Returns the number of plugins loaded. Discovery and load failures of a
    /// single plugin are logged and never abort the scan.
    pub async fn initialize(&self, cancel: &CancellationToken) -> Result<usize> {
        let loader = PluginLoader::with_dir(self.plugins_dir.clone());
        loader.ensure_dir()?;
        let manifests = loader.discover()?;

        {
            let mut state = self.state.write().await;
            for manifest in &manifests {
                state
                    .manifests
                    .insert(manifest.name.clone(), manifest.clone());
            }
        }

        let mut loaded = 0;
        for manifest in PluginLoader::dependency_order(&manifests) {
            if cancel.is_cancelled() {
                return Err(PluginError::Cancelled.into());
            }
            let name = manifest.name.clone();
            match self.load_plugin(cancel, manifest).await {
                Ok(()) => loaded += 1,
                Err(e) => tracing::warn!("Failed to load plugin '{}': {}", name, e),
            }
        }

        tracing::info!(
            "Plugin manager initialized: {} of {} discovered plugins loaded",
            loaded,
            manifests.len()
        );
        Ok(loaded)
    }

    /// Validate a manifest and its binary against this manager's plugins directory
    pub fn validate_plugin(&self, manifest: &PluginManifest) -> PluginResult<()> {
        PluginValidator::validate(manifest, &self.plugins_dir)
    }

    /// Load an external plugin from its manifest
    pub async fn load_plugin(
        &self,
        cancel: &CancellationToken,
        manifest: PluginManifest,
    ) -> PluginResult<()> {
        let name = manifest.name.clone();
        self.reserve(&name).await?;

        {
            let mut state = self.state.write().await;
            state.manifests.insert(name.clone(), manifest.clone());
        }

        let result = self.build_and_init(cancel, manifest).await;

        let mut state = self.state.write().await;
        state.loading.remove(&name);
        let loaded = result?;
        state.loaded.insert(name.clone(), loaded);
        tracing::info!("Loaded plugin: {}", name);
        Ok(())
    }

    async fn build_and_init(
        &self,
        cancel: &CancellationToken,
        manifest: PluginManifest,
    ) -> PluginResult<LoadedPlugin> {
        let name = manifest.name.clone();

        PluginValidator::validate(&manifest, &self.plugins_dir)?;
        PluginValidator::verify_integrity(
            &manifest,
            &self.plugins_dir,
            std::env::consts::OS,
            std::env::consts::ARCH,
        )?;
        self.check_dependencies(&manifest).await?;

        let values = self.plugin_config.get(&name).cloned().unwrap_or_default();
        let config = PluginValidator::validate_config(&name, &manifest.config, &values)?;

        let context = PluginContext {
            plugin_dir: manifest.plugin_dir(&self.plugins_dir),
            config,
        };
        let plugin: Arc<dyn Plugin> = Arc::new(ExternalPlugin::new(
            manifest.clone(),
            &self.plugins_dir,
            self.runner.clone(),
        ));

        self.init_plugin(cancel, &plugin, &context).await?;

        Ok(LoadedPlugin {
            manifest: Some(manifest),
            plugin,
            loaded_at: Utc::now(),
        })
    }

    /// Load an in-process plugin through the same lifecycle
    pub async fn load_builtin(
        &self,
        cancel: &CancellationToken,
        plugin: Arc<dyn Plugin>,
    ) -> PluginResult<()> {
        let name = plugin.name().to_string();
        self.reserve(&name).await?;

        let context = PluginContext {
            plugin_dir: PathBuf::new(),
            config: self.plugin_config.get(&name).cloned().unwrap_or_default(),
        };
        let result = self.init_plugin(cancel, &plugin, &context).await;

        let mut state = self.state.write().await;
        state.loading.remove(&name);
        result?;
        state.loaded.insert(
            name.clone(),
            LoadedPlugin {
                manifest: None,
                plugin,
                loaded_at: Utc::now(),
            },
        );
        tracing::info!("Loaded builtin plugin: {}", name);
        Ok(())
    }

    async fn reserve(&self, name: &str) -> PluginResult<()> {
        let mut state = self.state.write().await;
        if state.loaded.contains_key(name) || state.loading.contains(name) {
            return Err(PluginError::AlreadyLoaded(name.to_string()));
        }
        state.loading.insert(name.to_string());
        Ok(())
    }

    async fn check_dependencies(&self, manifest: &PluginManifest) -> PluginResult<()> {
        let state = self.state.read().await;
        let missing: Vec<&str> = manifest
            .dependencies
            .iter()
            .filter(|dep| !state.loaded.contains_key(dep.as_str()))
            .map(|dep| dep.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PluginError::Load {
                name: manifest.name.clone(),
                reason: format!("dependencies not loaded: {}", missing.join(", ")),
            })
        }
    }

    async fn init_plugin(
        &self,
        cancel: &CancellationToken,
        plugin: &Arc<dyn Plugin>,
        context: &PluginContext,
    ) -> PluginResult<()> {
        let name = plugin.name().to_string();
        bounded(cancel, self.timeouts.init, format!("{} init", name), |token| {
            let plugin = plugin.clone();
            async move { plugin.initialize(&token, context).await }
        })
        .await
        .map_err(|e| match e {
            PluginError::Cancelled => PluginError::Cancelled,
            other => PluginError::Load {
                name,
                reason: format!("init failed: {}", other),
            },
        })
    }

    /// Unload a plugin, running its cleanup
    ///
    /// Its hook registrations go with it. A cleanup failure is logged; the
    /// plugin is removed regardless.
    pub async fn unload_plugin(&self, cancel: &CancellationToken, name: &str) -> PluginResult<()> {
        let loaded = {
            let mut state = self.state.write().await;
            let loaded = state
                .loaded
                .remove(name)
                .ok_or_else(|| PluginError::NotLoaded(name.to_string()))?;
            let hooks = state.hooks.remove_plugin(name);
            if hooks > 0 {
                tracing::debug!("Dropped {} hook registrations of '{}'", hooks, name);
            }
            loaded
        };

        let plugin = loaded.plugin;
        let result = bounded(cancel, self.timeouts.cleanup, format!("{} cleanup", name), |token| {
            let plugin = plugin.clone();
            async move { plugin.cleanup(&token).await }
        })
        .await;

        if let Err(e) = result {
            tracing::warn!("Cleanup of plugin '{}' failed: {}", name, e);
        }

        tracing::info!("Unloaded plugin: {}", name);
        Ok(())
    }

    /// Unload (if loaded) and load again from the discovered manifest
    pub async fn reload_plugin(&self, cancel: &CancellationToken, name: &str) -> PluginResult<()> {
        let manifest = {
            let state = self.state.read().await;
            state
                .manifests
                .get(name)
                .cloned()
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?
        };

        match self.unload_plugin(cancel, name).await {
            Ok(()) | Err(PluginError::NotLoaded(_)) => {}
            Err(e) => return Err(e),
        }

        self.load_plugin(cancel, manifest).await
    }

    /// Unload every plugin
    pub async fn shutdown(&self, cancel: &CancellationToken) {
        let names: Vec<String> = {
            let state = self.state.read().await;
            state.loaded.keys().cloned().collect()
        };
        for name in names {
            if let Err(e) = self.unload_plugin(cancel, &name).await {
                tracing::debug!("Plugin '{}' already gone during shutdown: {}", name, e);
            }
        }
    }

    /// Loaded plugins sorted by name
    pub async fn list_plugins(&self) -> Vec<LoadedPlugin> {
        let state = self.state.read().await;
        let mut plugins: Vec<LoadedPlugin> = state.loaded.values().cloned().collect();
        plugins.sort_by(|a, b| a.name().cmp(b.name()));
        plugins
    }

    pub async fn get_plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        let state = self.state.read().await;
        state.loaded.get(name).map(|loaded| loaded.plugin.clone())
    }

    pub async fn is_loaded(&self, name: &str) -> bool {
        self.state.read().await.loaded.contains_key(name)
    }

    /// Every manifest discovered or loaded so far, sorted by name
    pub async fn list_manifests(&self) -> Vec<PluginManifest> {
        let state = self.state.read().await;
        let mut manifests: Vec<PluginManifest> = state.manifests.values().cloned().collect();
        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        manifests
    }

    /// Register a loaded plugin as a hook for an operation
    pub async fn register_hook(&self, operation: OperationKind, name: &str) -> PluginResult<()> {
        let mut state = self.state.write().await;
        if !state.loaded.contains_key(name) {
            return Err(PluginError::NotLoaded(name.to_string()));
        }
        state.hooks.register(operation, name);
        tracing::debug!("Registered hook {} for {}", name, operation);
        Ok(())
    }

    pub async fn unregister_hook(&self, operation: OperationKind, name: &str) -> PluginResult<()> {
        let mut state = self.state.write().await;
        state.hooks.unregister(operation, name)
    }

    /// Current hook list for an operation
    pub async fn hooks_for(&self, operation: OperationKind) -> Vec<String> {
        self.state.read().await.hooks.snapshot(operation)
    }

    async fn require(&self, name: &str) -> PluginResult<Arc<dyn Plugin>> {
        self.get_plugin(name)
            .await
            .ok_or_else(|| PluginError::NotLoaded(name.to_string()))
    }

    /// Run a loaded plugin's own validation
    pub async fn validate_loaded(&self, cancel: &CancellationToken, name: &str) -> PluginResult<()> {
        let plugin = self.require(name).await?;
        bounded(cancel, self.timeouts.validate, format!("{} validate", name), |token| {
            async move { plugin.validate(&token).await }
        })
        .await
    }

    /// Execute one operation on one plugin
    pub async fn execute_plugin(
        &self,
        cancel: &CancellationToken,
        name: &str,
        operation: OperationKind,
        params: &OperationParams,
    ) -> PluginResult<OperationResult> {
        let started = Instant::now();
        let plugin = self.require(name).await?;

        if !plugin.supported_operations().contains(&operation) {
            return Err(PluginError::Unsupported {
                plugin: name.to_string(),
                capability: format!("operation {}", operation),
            });
        }

        tracing::info!("Executing {} on plugin {}", operation, name);
        let result = bounded(
            cancel,
            self.timeouts.execute,
            format!("{} {}", name, operation),
            |token| async move { plugin.execute(&token, operation, params).await },
        )
        .await?;

        Ok(result.stamped(started.elapsed()))
    }

    /// Execute one operation, always producing a result record
    ///
    /// A failure becomes a stamped failure result carrying the templated
    /// message; the error itself is returned alongside it.
    pub async fn execute_plugin_recorded(
        &self,
        cancel: &CancellationToken,
        name: &str,
        operation: OperationKind,
        params: &OperationParams,
    ) -> (OperationResult, Option<PluginError>) {
        let started = Instant::now();
        match self.execute_plugin(cancel, name, operation, params).await {
            Ok(result) => (result, None),
            Err(e) => {
                tracing::warn!("Plugin {} failed to {}: {}", name, operation, e);
                let result =
                    OperationResult::operation_failure(name, operation, &e).stamped(started.elapsed());
                (result, Some(e))
            }
        }
    }

    /// Run every hook registered for an operation, in registration order
    ///
    /// All hooks run exactly once even after a failure; the outcome carries
    /// every result and the first error.
    pub async fn execute_hooks(
        &self,
        cancel: &CancellationToken,
        operation: OperationKind,
        params: &OperationParams,
    ) -> HookOutcome {
        let hooks = self.hooks_for(operation).await;
        tracing::info!("Running {} hooks for {}", hooks.len(), operation);

        let mut outcome = HookOutcome::default();
        for name in hooks {
            let (result, error) = self
                .execute_plugin_recorded(cancel, &name, operation, params)
                .await;
            outcome.record(result, error);
        }
        outcome
    }

    async fn require_cluster(&self, name: &str) -> PluginResult<Arc<dyn Plugin>> {
        let plugin = self.require(name).await?;
        if plugin.as_cluster().is_none() {
            return Err(PluginError::Unsupported {
                plugin: name.to_string(),
                capability: "cluster lifecycle".to_string(),
            });
        }
        Ok(plugin)
    }

    /// Check a cluster topology with a cluster lifecycle plugin
    pub async fn validate_cluster(&self, name: &str, spec: &ClusterSpec) -> PluginResult<()> {
        let plugin = self.require_cluster(name).await?;
        cluster(&plugin)?.validate_cluster(spec)
    }

    /// Validate, pre-deploy, deploy and post-deploy a cluster with one plugin
    pub async fn deploy_cluster(
        &self,
        cancel: &CancellationToken,
        name: &str,
        spec: &ClusterSpec,
    ) -> PluginResult<OperationResult> {
        let started = Instant::now();
        let plugin = self.require_cluster(name).await?;
        cluster(&plugin)?.validate_cluster(spec)?;

        self.lifecycle(cancel, &plugin, "pre-deploy", |c, token| async move {
            c.pre_deploy(&token, spec).await
        })
        .await?;

        let params = cluster_spec_params(spec);
        let result = self
            .execute_plugin(cancel, name, OperationKind::Deploy, &params)
            .await?;

        self.lifecycle(cancel, &plugin, "post-deploy", |c, token| async move {
            c.post_deploy(&token, spec).await
        })
        .await?;

        Ok(result.stamped(started.elapsed()))
    }

    /// Pre-upgrade, upgrade and post-upgrade a cluster with one plugin
    pub async fn upgrade_cluster(
        &self,
        cancel: &CancellationToken,
        name: &str,
        spec: &ClusterSpec,
    ) -> PluginResult<OperationResult> {
        let started = Instant::now();
        let plugin = self.require_cluster(name).await?;

        self.lifecycle(cancel, &plugin, "pre-upgrade", |c, token| async move {
            c.pre_upgrade(&token, spec).await
        })
        .await?;

        let params = cluster_spec_params(spec);
        let result = self
            .execute_plugin(cancel, name, OperationKind::Upgrade, &params)
            .await?;

        self.lifecycle(cancel, &plugin, "post-upgrade", |c, token| async move {
            c.post_upgrade(&token, spec).await
        })
        .await?;

        Ok(result.stamped(started.elapsed()))
    }

    async fn lifecycle<'a, F, Fut>(
        &self,
        cancel: &CancellationToken,
        plugin: &'a Arc<dyn Plugin>,
        stage: &str,
        call: F,
    ) -> PluginResult<()>
    where
        F: FnOnce(&'a dyn ClusterPlugin, CancellationToken) -> Fut,
        Fut: Future<Output = PluginResult<()>>,
    {
        let capability = cluster(plugin)?;
        tracing::info!("Running {} of plugin {}", stage, plugin.name());
        bounded(
            cancel,
            self.timeouts.lifecycle,
            format!("{} {}", plugin.name(), stage),
            |token| call(capability, token),
        )
        .await
    }
}

fn cluster(plugin: &Arc<dyn Plugin>) -> PluginResult<&dyn ClusterPlugin> {
    plugin.as_cluster().ok_or_else(|| PluginError::Unsupported {
        plugin: plugin.name().to_string(),
        capability: "cluster lifecycle".to_string(),
    })
}

/// Run a plugin call under a deadline and the caller's cancellation
///
/// The call gets a child token that is cancelled once the call ends, so
/// work it spawned stops with it. Cancellation wins over the deadline.
async fn bounded<T, F, Fut>(
    cancel: &CancellationToken,
    limit: Duration,
    what: String,
    call: F,
) -> PluginResult<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = PluginResult<T>>,
{
    let token = cancel.child_token();
    let _guard = token.clone().drop_guard();

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PluginError::Cancelled),
        result = tokio::time::timeout(limit, call(token)) => match result {
            Ok(result) => result,
            Err(_) => Err(PluginError::Timeout { what, after: limit }),
        },
    }
}
