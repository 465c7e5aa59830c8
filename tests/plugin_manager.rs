//! Plugin manager lifecycle: validation, discovery, load, unload, reload

use async_trait::async_trait;
use clusterplug::plugins::{
    OperationKind, OperationParams, OperationResult, Plugin, PluginContext, PluginError,
    PluginManager, PluginManifest, PluginResult, PluginValidator,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct StaticPlugin {
    name: String,
}

#[async_trait]
impl Plugin for StaticPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        "0.1.0"
    }

    async fn initialize(&self, _: &CancellationToken, _: &PluginContext) -> PluginResult<()> {
        Ok(())
    }

    async fn validate(&self, _: &CancellationToken) -> PluginResult<()> {
        Ok(())
    }

    async fn cleanup(&self, _: &CancellationToken) -> PluginResult<()> {
        Ok(())
    }

    fn supported_operations(&self) -> Vec<OperationKind> {
        vec![OperationKind::Monitor]
    }

    async fn execute(
        &self,
        _: &CancellationToken,
        _: OperationKind,
        _: &OperationParams,
    ) -> PluginResult<OperationResult> {
        Ok(OperationResult::success("ok"))
    }
}

fn manifest(name: &str, version: &str, binary: &str) -> PluginManifest {
    PluginManifest::from_yaml(&format!(
        "name: \"{}\"\nversion: \"{}\"\nbinary: \"{}\"\n",
        name, version, binary
    ))
    .unwrap()
}

#[tokio::test]
async fn test_duplicate_load_keeps_original_instance() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let manager = PluginManager::new(dir.path());

    let original: Arc<dyn Plugin> = Arc::new(StaticPlugin { name: "p".to_string() });
    manager.load_builtin(&cancel, original.clone()).await.unwrap();

    let err = manager
        .load_builtin(&cancel, Arc::new(StaticPlugin { name: "p".to_string() }))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::AlreadyLoaded(ref name) if name == "p"));

    let loaded = manager.list_plugins().await;
    assert_eq!(loaded.len(), 1);
    let current = manager.get_plugin("p").await.unwrap();
    assert!(Arc::ptr_eq(&current, &original));
}

#[tokio::test]
async fn test_unsupported_operation_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let manager = PluginManager::new(dir.path());
    manager
        .load_builtin(&cancel, Arc::new(StaticPlugin { name: "watch".to_string() }))
        .await
        .unwrap();

    let result = manager
        .execute_plugin(&cancel, "watch", OperationKind::Monitor, &OperationParams::new())
        .await
        .unwrap();
    assert!(result.success);

    let err = manager
        .execute_plugin(&cancel, "watch", OperationKind::Deploy, &OperationParams::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Unsupported { .. }));
}

#[tokio::test]
async fn test_failed_execute_yields_failure_record() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let manager = PluginManager::new(dir.path());
    manager
        .load_builtin(&cancel, Arc::new(StaticPlugin { name: "watch".to_string() }))
        .await
        .unwrap();

    let (result, error) = manager
        .execute_plugin_recorded(&cancel, "watch", OperationKind::Deploy, &OperationParams::new())
        .await;
    assert!(!result.success);
    assert_eq!(result.message, "Plugin 'watch' failed to deploy");
    assert!(result.error.as_deref().unwrap().contains("does not support"));
    assert!(matches!(error, Some(PluginError::Unsupported { .. })));

    let (result, error) = manager
        .execute_plugin_recorded(&cancel, "absent", OperationKind::Monitor, &OperationParams::new())
        .await;
    assert_eq!(result.message, "Plugin 'absent' failed to monitor");
    assert_eq!(result.error.as_deref(), Some("Plugin 'absent' is not loaded"));
    assert!(matches!(error, Some(PluginError::NotLoaded(_))));

    let (result, error) = manager
        .execute_plugin_recorded(&cancel, "watch", OperationKind::Monitor, &OperationParams::new())
        .await;
    assert!(result.success);
    assert!(error.is_none());
}

#[tokio::test]
async fn test_unload_and_reload_without_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    let manager = PluginManager::new(dir.path());

    assert!(matches!(
        manager.unload_plugin(&cancel, "nothing").await,
        Err(PluginError::NotLoaded(_))
    ));
    assert!(matches!(
        manager.reload_plugin(&cancel, "nothing").await,
        Err(PluginError::NotFound(_))
    ));
}

#[test]
fn test_validate_rejects_empty_fields() {
    let dir = tempfile::tempdir().unwrap();
    for broken in [
        manifest("", "1.0.0", "run"),
        manifest("p", "", "run"),
        manifest("p", "1.0.0", ""),
    ] {
        let err = PluginValidator::validate(&broken, dir.path()).unwrap_err();
        assert!(matches!(err, PluginError::Manifest(_)), "got {}", err);
    }

    // Fields fine, binary missing
    let err = PluginValidator::validate(&manifest("p", "1.0.0", "run"), dir.path()).unwrap_err();
    assert!(matches!(err, PluginError::Binary { .. }));
}

/// Deploys through the manager whose remote side never answers
mod stalled_deploy {
    use super::*;
    use clusterplug::bootstrap::{
        BootstrapOptions, Component, DeploymentPhase, HealthProbe, PLUGIN_NAME, ReleaseSource,
        RemoteExecutor, TikvBootstrap,
    };
    use clusterplug::cluster::ClusterSpec;
    use clusterplug::plugins::Timeouts;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tokio::time::Instant;

    /// Every remote command hangs
    struct StalledExecutor;

    #[async_trait]
    impl RemoteExecutor for StalledExecutor {
        async fn execute(&self, _: &str, _: &str) -> PluginResult<String> {
            std::future::pending().await
        }

        async fn copy_file(&self, _: &Path, _: &str, _: &str) -> PluginResult<()> {
            std::future::pending().await
        }
    }

    struct CachedRelease;

    #[async_trait]
    impl ReleaseSource for CachedRelease {
        async fn fetch(&self, component: Component, version: &str) -> anyhow::Result<PathBuf> {
            Ok(PathBuf::from(format!("/cache/{}/{}", version, component.binary_name())))
        }
    }

    struct AlwaysHealthy;

    #[async_trait]
    impl HealthProbe for AlwaysHealthy {
        async fn probe(&self, _: &str, _: u16, _: &str) -> PluginResult<u16> {
            Ok(200)
        }
    }

    fn six_nodes() -> ClusterSpec {
        ClusterSpec::from_yaml(
            r#"
master_servers:
  - host: 10.0.0.1
  - host: 10.0.0.2
  - host: 10.0.0.3
volume_servers:
  - host: 10.0.1.1
  - host: 10.0.1.2
  - host: 10.0.1.3
"#,
        )
        .unwrap()
    }

    async fn manager_with_bootstrap(
        dir: &Path,
        lifecycle: Duration,
    ) -> (PluginManager, Arc<TikvBootstrap>) {
        let plugin = Arc::new(TikvBootstrap::new(
            BootstrapOptions::default(),
            Arc::new(StalledExecutor),
            Arc::new(AlwaysHealthy),
            Arc::new(CachedRelease),
        ));
        let manager = PluginManager::new(dir).with_timeouts(Timeouts {
            lifecycle,
            ..Timeouts::default()
        });
        manager
            .load_builtin(&CancellationToken::new(), plugin.clone())
            .await
            .unwrap();
        (manager, plugin)
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_pre_deploy_fails_deployment() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, plugin) = manager_with_bootstrap(dir.path(), Duration::from_secs(1)).await;

        let start = Instant::now();
        let err = manager
            .deploy_cluster(&CancellationToken::new(), PLUGIN_NAME, &six_nodes())
            .await
            .unwrap_err();

        assert!(matches!(err, PluginError::Timeout { .. }), "got {}", err);
        assert_eq!(start.elapsed(), Duration::from_secs(1));

        let deployment = plugin.deployment_snapshot();
        assert_eq!(deployment.phase(), DeploymentPhase::Failed);
        assert_eq!(deployment.failed_towards(), Some(DeploymentPhase::Provisioned));
        assert!(deployment.error().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pre_deploy_fails_deployment() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, plugin) = manager_with_bootstrap(dir.path(), Duration::from_secs(900)).await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let err = manager
            .deploy_cluster(&cancel, PLUGIN_NAME, &six_nodes())
            .await
            .unwrap_err();

        assert!(err.is_cancelled(), "got {}", err);
        assert_eq!(plugin.phase(), DeploymentPhase::Failed);
        assert_eq!(
            plugin.deployment_snapshot().failed_towards(),
            Some(DeploymentPhase::Provisioned)
        );
    }
}

#[cfg(unix)]
mod subprocess {
    use super::*;
    use sha2::{Digest, Sha256};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    const QUIET_PLUGIN: &str = "#!/bin/sh\ncat > /dev/null\nexit 0\n";

    fn write_binary(path: &Path, script: &str, mode: u32) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, script).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).unwrap();
    }

    fn install(plugins_dir: &Path, manifest_yaml: &str, name: &str, script: &str) -> PathBuf {
        let dir = plugins_dir.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("plugin.yaml"), manifest_yaml).unwrap();
        let binary = dir.join("run.sh");
        write_binary(&binary, script, 0o755);
        binary
    }

    fn simple_manifest(name: &str) -> String {
        format!("name: {}\nversion: 1.0.0\nbinary: run.sh\n", name)
    }

    #[test]
    fn test_validate_requires_executable_bit() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("p").join("run.sh");
        let manifest = manifest("p", "1.0.0", "run.sh");

        write_binary(&binary, QUIET_PLUGIN, 0o644);
        let err = PluginValidator::validate(&manifest, dir.path()).unwrap_err();
        assert!(err.to_string().contains("not executable"), "got {}", err);

        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o700)).unwrap();
        PluginValidator::validate(&manifest, dir.path()).unwrap();

        // A directory at the binary path is not a plugin
        let err = PluginValidator::validate(&crate::manifest("p", "1.0.0", "."), dir.path()).unwrap_err();
        assert!(err.to_string().contains("not a regular file"), "got {}", err);
    }

    #[test]
    fn test_checksum_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("p").join("run.sh");
        write_binary(&binary, QUIET_PLUGIN, 0o755);
        let digest = format!("{:x}", Sha256::digest(QUIET_PLUGIN.as_bytes()));

        let mut manifest = manifest("p", "1.0.0", "run.sh");
        manifest.checksum = Some(format!("sha256:{}", digest));
        PluginValidator::verify_integrity(&manifest, dir.path(), "linux", "x86_64").unwrap();

        manifest.checksum = Some("0".repeat(64));
        let err = PluginValidator::verify_integrity(&manifest, dir.path(), "linux", "x86_64")
            .unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
    }

    #[tokio::test]
    async fn test_discovery_skips_malformed_manifests() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), &simple_manifest("good"), "good", QUIET_PLUGIN);
        install(dir.path(), "name: [unclosed\n", "broken", QUIET_PLUGIN);
        install(dir.path(), "name: nameless-version\nbinary: run.sh\n", "partial", QUIET_PLUGIN);
        // Valid manifest, binary not executable
        let binary = install(dir.path(), &simple_manifest("inert"), "inert", QUIET_PLUGIN);
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o644)).unwrap();

        let cancel = CancellationToken::new();
        let manager = PluginManager::new(dir.path());
        assert_eq!(manager.initialize(&cancel).await.unwrap(), 1);

        assert!(manager.is_loaded("good").await);
        assert!(!manager.is_loaded("inert").await);
        let discovered: Vec<String> = manager
            .list_manifests()
            .await
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(discovered, vec!["good", "inert"]);

        let loaded = manager.list_plugins().await;
        assert_eq!(loaded.len(), 1);
        assert!(!loaded[0].is_builtin());
    }

    #[tokio::test]
    async fn test_dependencies_load_first() {
        let dir = tempfile::tempdir().unwrap();
        install(
            dir.path(),
            "name: aaa-dependent\nversion: 1.0.0\nbinary: run.sh\ndependencies: [zzz-base]\n",
            "aaa-dependent",
            QUIET_PLUGIN,
        );
        install(dir.path(), &simple_manifest("zzz-base"), "zzz-base", QUIET_PLUGIN);
        install(
            dir.path(),
            "name: orphan\nversion: 1.0.0\nbinary: run.sh\ndependencies: [missing]\n",
            "orphan",
            QUIET_PLUGIN,
        );

        let manager = PluginManager::new(dir.path());
        assert_eq!(manager.initialize(&CancellationToken::new()).await.unwrap(), 2);
        assert!(manager.is_loaded("aaa-dependent").await);
        assert!(!manager.is_loaded("orphan").await);
    }

    #[tokio::test]
    async fn test_describe_sets_operations_and_execute_reads_response() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"#!/bin/sh
cat > /dev/null
case "$1" in
  describe) echo '{"success":true,"message":"exporter","operations":["export"]}' ;;
  execute) echo "exporting"; echo '{"success":true,"message":"exported","data":{"rows":7}}' ;;
esac
exit 0
"#;
        install(dir.path(), &simple_manifest("exporter"), "exporter", script);

        let cancel = CancellationToken::new();
        let manager = PluginManager::new(dir.path());
        manager.initialize(&cancel).await.unwrap();

        let plugin = manager.get_plugin("exporter").await.unwrap();
        assert_eq!(plugin.supported_operations(), vec![OperationKind::Export]);

        let result = manager
            .execute_plugin(&cancel, "exporter", OperationKind::Export, &OperationParams::new())
            .await
            .unwrap();
        assert_eq!(result.message, "exported");
        assert_eq!(result.data["rows"], serde_json::json!(7));

        assert!(
            manager
                .execute_plugin(&cancel, "exporter", OperationKind::Deploy, &OperationParams::new())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_failing_init_is_not_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let script = "#!/bin/sh\ncat > /dev/null\n[ \"$1\" = init ] && { echo boom >&2; exit 1; }\nexit 0\n";
        install(dir.path(), &simple_manifest("fragile"), "fragile", script);

        let manager = PluginManager::new(dir.path());
        assert_eq!(manager.initialize(&CancellationToken::new()).await.unwrap(), 0);
        assert!(!manager.is_loaded("fragile").await);
        // Discovered all the same, so it can be reloaded once fixed
        assert_eq!(manager.list_manifests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_reload_replaces_instance() {
        let dir = tempfile::tempdir().unwrap();
        install(dir.path(), &simple_manifest("svc"), "svc", QUIET_PLUGIN);

        let cancel = CancellationToken::new();
        let manager = PluginManager::new(dir.path());
        manager.initialize(&cancel).await.unwrap();
        let before = manager.get_plugin("svc").await.unwrap();

        manager.reload_plugin(&cancel, "svc").await.unwrap();
        let after = manager.get_plugin("svc").await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));

        // Reload of an unloaded but discovered plugin just loads it
        manager.unload_plugin(&cancel, "svc").await.unwrap();
        assert!(!manager.is_loaded("svc").await);
        manager.reload_plugin(&cancel, "svc").await.unwrap();
        assert!(manager.is_loaded("svc").await);

        manager.shutdown(&cancel).await;
        assert!(manager.list_plugins().await.is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_execute_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = format!(
            "#!/bin/sh\ncat > /dev/null\n[ \"$1\" = execute ] && {{ sleep 3; touch '{}'; }}\nexit 0\n",
            marker.display()
        );
        install(dir.path(), &simple_manifest("sluggish"), "sluggish", &script);

        let cancel = CancellationToken::new();
        let manager = PluginManager::new(dir.path()).with_timeouts(clusterplug::plugins::Timeouts {
            execute: std::time::Duration::from_secs(1),
            ..Default::default()
        });
        manager.initialize(&cancel).await.unwrap();

        let err = manager
            .execute_plugin(&cancel, "sluggish", OperationKind::Deploy, &OperationParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Timeout { .. }), "got {}", err);

        // Well past the point the script would have written its marker
        tokio::time::sleep(std::time::Duration::from_secs(4)).await;
        assert!(!marker.exists(), "plugin process outlived its deadline");
    }
}
