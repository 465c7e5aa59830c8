//! Plugin capability contract
//!
//! `Plugin` is the base capability every plugin provides. Specialized
//! capability sets (cluster lifecycle, monitoring, export, import) are
//! extension traits; a plugin advertises them through the `as_*` accessors,
//! which the manager checks before calling specialized methods.

use super::result::OperationResult;
use super::PluginResult;
use crate::cluster::ClusterSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Operation parameters passed to `execute`
pub type OperationParams = HashMap<String, serde_json::Value>;

/// Kind of cluster operation a plugin or hook handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Deploy,
    Upgrade,
    Scale,
    Monitor,
    Export,
    Import,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Deploy,
        OperationKind::Upgrade,
        OperationKind::Scale,
        OperationKind::Monitor,
        OperationKind::Export,
        OperationKind::Import,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Deploy => "deploy",
            OperationKind::Upgrade => "upgrade",
            OperationKind::Scale => "scale",
            OperationKind::Monitor => "monitor",
            OperationKind::Export => "export",
            OperationKind::Import => "import",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown operation kind: {}", s))
    }
}

/// Context handed to a plugin on `initialize`
#[derive(Debug, Clone, Default)]
pub struct PluginContext {
    /// The plugin's own directory
    pub plugin_dir: PathBuf,
    /// Resolved configuration (schema defaults applied)
    pub config: HashMap<String, serde_json::Value>,
}

/// Base capability every plugin implements
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    async fn initialize(
        &self,
        cancel: &CancellationToken,
        context: &PluginContext,
    ) -> PluginResult<()>;

    async fn validate(&self, cancel: &CancellationToken) -> PluginResult<()>;

    async fn cleanup(&self, cancel: &CancellationToken) -> PluginResult<()>;

    /// Operation kinds this plugin accepts in `execute`
    fn supported_operations(&self) -> Vec<OperationKind>;

    async fn execute(
        &self,
        cancel: &CancellationToken,
        operation: OperationKind,
        params: &OperationParams,
    ) -> PluginResult<OperationResult>;

    fn as_cluster(&self) -> Option<&dyn ClusterPlugin> {
        None
    }

    fn as_monitoring(&self) -> Option<&dyn MonitoringPlugin> {
        None
    }

    fn as_export(&self) -> Option<&dyn ExportPlugin> {
        None
    }

    fn as_import(&self) -> Option<&dyn ImportPlugin> {
        None
    }

    /// Names of the specialized capability sets this plugin satisfies
    fn capability_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.as_cluster().is_some() {
            names.push("cluster");
        }
        if self.as_monitoring().is_some() {
            names.push("monitoring");
        }
        if self.as_export().is_some() {
            names.push("export");
        }
        if self.as_import().is_some() {
            names.push("import");
        }
        names
    }
}

/// Cluster lifecycle capability: hooks around deploy and upgrade
#[async_trait]
pub trait ClusterPlugin: Send + Sync {
    async fn pre_deploy(&self, cancel: &CancellationToken, spec: &ClusterSpec) -> PluginResult<()>;

    async fn post_deploy(
        &self,
        cancel: &CancellationToken,
        spec: &ClusterSpec,
    ) -> PluginResult<()>;

    async fn pre_upgrade(
        &self,
        cancel: &CancellationToken,
        spec: &ClusterSpec,
    ) -> PluginResult<()>;

    async fn post_upgrade(
        &self,
        cancel: &CancellationToken,
        spec: &ClusterSpec,
    ) -> PluginResult<()>;

    /// Check the cluster topology without deploying anything
    fn validate_cluster(&self, spec: &ClusterSpec) -> PluginResult<()>;
}

/// Monitoring capability
#[async_trait]
pub trait MonitoringPlugin: Send + Sync {
    async fn collect_metrics(
        &self,
        cancel: &CancellationToken,
        spec: &ClusterSpec,
    ) -> PluginResult<HashMap<String, serde_json::Value>>;

    async fn health_check(
        &self,
        cancel: &CancellationToken,
        spec: &ClusterSpec,
    ) -> PluginResult<()>;
}

/// Export capability
#[async_trait]
pub trait ExportPlugin: Send + Sync {
    fn export_formats(&self) -> Vec<String>;

    async fn export(
        &self,
        cancel: &CancellationToken,
        spec: &ClusterSpec,
        format: &str,
    ) -> PluginResult<Vec<u8>>;
}

/// Import capability
#[async_trait]
pub trait ImportPlugin: Send + Sync {
    fn import_formats(&self) -> Vec<String>;

    async fn import(
        &self,
        cancel: &CancellationToken,
        data: &[u8],
        format: &str,
    ) -> PluginResult<ClusterSpec>;
}

/// Read the cluster specification carried in operation params
pub fn cluster_spec_param(params: &OperationParams) -> PluginResult<ClusterSpec> {
    let value = params.get("cluster").ok_or_else(|| {
        super::PluginError::Validation("operation params carry no 'cluster' entry".to_string())
    })?;
    serde_json::from_value(value.clone()).map_err(|e| {
        super::PluginError::Validation(format!("invalid cluster specification: {}", e))
    })
}

/// Build operation params carrying a cluster specification
pub fn cluster_spec_params(spec: &ClusterSpec) -> OperationParams {
    let mut params = OperationParams::new();
    // ClusterSpec is plain data, serialization cannot fail
    if let Ok(value) = serde_json::to_value(spec) {
        params.insert("cluster".to_string(), value);
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_kind_parse_and_display() {
        for kind in OperationKind::ALL {
            assert_eq!(kind.as_str().parse::<OperationKind>().unwrap(), kind);
        }
        assert_eq!("DEPLOY".parse::<OperationKind>().unwrap(), OperationKind::Deploy);
        assert!("destroy".parse::<OperationKind>().is_err());
        assert_eq!(OperationKind::Scale.to_string(), "scale");
    }

    #[test]
    fn test_operation_kind_serde() {
        let json = serde_json::to_string(&OperationKind::Upgrade).unwrap();
        assert_eq!(json, "\"upgrade\"");
    }

    #[test]
    fn test_cluster_spec_param_missing() {
        let err = cluster_spec_param(&OperationParams::new()).unwrap_err();
        assert!(err.to_string().contains("'cluster'"));
    }
}
