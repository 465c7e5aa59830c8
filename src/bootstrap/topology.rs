//! Bootstrap topology
//!
//! Derives coordination (PD) and storage (TiKV) nodes from a cluster
//! specification, one-to-one by list position, and checks the topology
//! before anything is provisioned.

use crate::cluster::ClusterSpec;
use crate::config::BootstrapConfig;
use crate::plugins::{PluginError, PluginResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Minimum number of nodes in each role
pub const MIN_NODES_PER_ROLE: usize = 3;

pub const DEFAULT_PD_CLIENT_PORT: u16 = 2379;
pub const DEFAULT_PD_PEER_PORT: u16 = 2380;
pub const DEFAULT_TIKV_PORT: u16 = 20160;
pub const DEFAULT_TIKV_STATUS_PORT: u16 = 20180;

/// Storage engines TiKV accepts
pub const STORAGE_ENGINES: [&str; 2] = ["raft-kv", "partitioned-raft-kv"];

/// Pacing and deadlines of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapTiming {
    /// Delay between successive coordination node starts
    pub coordination_stagger: Duration,
    /// Delay between successive storage node starts
    pub storage_stagger: Duration,
    pub poll_interval: Duration,
    pub quorum_timeout: Duration,
    pub storage_timeout: Duration,
}

impl Default for BootstrapTiming {
    fn default() -> Self {
        Self {
            coordination_stagger: Duration::from_secs(5),
            storage_stagger: Duration::from_secs(3),
            poll_interval: Duration::from_secs(10),
            quorum_timeout: Duration::from_secs(120),
            storage_timeout: Duration::from_secs(180),
        }
    }
}

/// Deployment options of the bootstrap plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapOptions {
    /// Release version of pd-server and tikv-server (e.g. "v7.5.0")
    pub version: String,
    /// Base directory for node data directories
    pub data_base: String,
    /// Base directory for node log directories
    pub log_base: String,
    /// Base directory for node deploy directories (binaries and configs)
    pub deploy_base: String,
    pub storage_engine: String,
    pub pd_client_port: u16,
    pub pd_peer_port: u16,
    pub tikv_port: u16,
    pub tikv_status_port: u16,
    /// Local directory caching downloaded binaries
    pub cache_dir: PathBuf,
    pub timing: BootstrapTiming,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            version: "v7.5.0".to_string(),
            data_base: "/data/tikv".to_string(),
            log_base: "/var/log/tikv".to_string(),
            deploy_base: "/opt/tikv".to_string(),
            storage_engine: STORAGE_ENGINES[0].to_string(),
            pd_client_port: DEFAULT_PD_CLIENT_PORT,
            pd_peer_port: DEFAULT_PD_PEER_PORT,
            tikv_port: DEFAULT_TIKV_PORT,
            tikv_status_port: DEFAULT_TIKV_STATUS_PORT,
            cache_dir: std::env::temp_dir().join("clusterplug").join("releases"),
            timing: BootstrapTiming::default(),
        }
    }
}

impl From<&BootstrapConfig> for BootstrapOptions {
    fn from(config: &BootstrapConfig) -> Self {
        Self {
            version: config.version.clone(),
            data_base: config.data_base.clone(),
            log_base: config.log_base.clone(),
            deploy_base: config.deploy_base.clone(),
            storage_engine: config.storage_engine.clone(),
            cache_dir: config.cache_dir(),
            ..Self::default()
        }
    }
}

impl BootstrapOptions {
    /// Apply plugin configuration values on top of these options
    ///
    /// Unknown keys are ignored; wrongly typed values are errors.
    pub fn apply_overrides(
        &mut self,
        values: &HashMap<String, serde_json::Value>,
    ) -> PluginResult<()> {
        for (key, value) in values {
            match key.as_str() {
                "version" => self.version = string_value(key, value)?,
                "data_base" | "dataBase" => self.data_base = string_value(key, value)?,
                "log_base" | "logBase" => self.log_base = string_value(key, value)?,
                "deploy_base" | "deployBase" => self.deploy_base = string_value(key, value)?,
                "storage_engine" | "storageEngine" => {
                    self.storage_engine = string_value(key, value)?
                }
                "cache_dir" | "cacheDir" => self.cache_dir = PathBuf::from(string_value(key, value)?),
                _ => tracing::debug!("Ignoring unknown bootstrap option '{}'", key),
            }
        }
        Ok(())
    }

    /// Check the options themselves
    pub fn validate(&self) -> PluginResult<()> {
        if self.version.trim().is_empty() {
            return Err(PluginError::Validation(
                "bootstrap version cannot be empty".to_string(),
            ));
        }
        if !STORAGE_ENGINES.contains(&self.storage_engine.as_str()) {
            return Err(PluginError::Validation(format!(
                "unknown storage engine '{}', expected one of: {}",
                self.storage_engine,
                STORAGE_ENGINES.join(", ")
            )));
        }
        for (label, base) in [
            ("data", &self.data_base),
            ("log", &self.log_base),
            ("deploy", &self.deploy_base),
        ] {
            if base.trim().is_empty() {
                return Err(PluginError::Validation(format!(
                    "{} base directory cannot be empty",
                    label
                )));
            }
        }
        Ok(())
    }
}

fn string_value(key: &str, value: &serde_json::Value) -> PluginResult<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PluginError::Validation(format!("option '{}' must be a string", key)))
}

/// Member of the coordination (PD) quorum
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationNode {
    pub name: String,
    pub host: String,
    pub client_port: u16,
    pub peer_port: u16,
    pub data_dir: String,
    pub log_dir: String,
    pub deploy_dir: String,
}

impl CoordinationNode {
    pub fn client_endpoint(&self) -> String {
        format!("{}:{}", self.host, self.client_port)
    }

    pub fn peer_url(&self) -> String {
        format!("http://{}:{}", self.host, self.peer_port)
    }
}

/// Storage (TiKV) node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageNode {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub status_port: u16,
    pub data_dir: String,
    pub log_dir: String,
    pub deploy_dir: String,
    pub storage_engine: String,
}

/// Coordination and storage nodes of one deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSpec {
    pub version: String,
    pub coordination: Vec<CoordinationNode>,
    pub storage: Vec<StorageNode>,
}

impl BootstrapSpec {
    /// Derive nodes from the master (coordination) and volume (storage) lists
    pub fn extract(spec: &ClusterSpec, options: &BootstrapOptions) -> PluginResult<Self> {
        if spec.master_servers.is_empty() {
            return Err(PluginError::Validation(
                "cluster specification has no master servers".to_string(),
            ));
        }
        if spec.volume_servers.is_empty() {
            return Err(PluginError::Validation(
                "cluster specification has no volume servers".to_string(),
            ));
        }

        let coordination = spec
            .master_servers
            .iter()
            .enumerate()
            .map(|(i, master)| {
                let name = format!("pd-{}", i + 1);
                CoordinationNode {
                    host: master.host.clone(),
                    client_port: options.pd_client_port,
                    peer_port: options.pd_peer_port,
                    data_dir: format!("{}/{}", options.data_base, name),
                    log_dir: format!("{}/{}", options.log_base, name),
                    deploy_dir: format!("{}/{}", options.deploy_base, name),
                    name,
                }
            })
            .collect();

        let storage = spec
            .volume_servers
            .iter()
            .enumerate()
            .map(|(i, volume)| {
                let name = format!("tikv-{}", i + 1);
                StorageNode {
                    host: volume.host.clone(),
                    port: options.tikv_port,
                    status_port: options.tikv_status_port,
                    data_dir: format!("{}/{}", options.data_base, name),
                    log_dir: format!("{}/{}", options.log_base, name),
                    deploy_dir: format!("{}/{}", options.deploy_base, name),
                    storage_engine: options.storage_engine.clone(),
                    name,
                }
            })
            .collect();

        Ok(Self {
            version: options.version.clone(),
            coordination,
            storage,
        })
    }

    /// Enforce the minimum topology and required node fields
    pub fn validate(&self) -> PluginResult<()> {
        if self.coordination.len() < MIN_NODES_PER_ROLE {
            return Err(PluginError::Validation(format!(
                "at least {} coordination nodes are required, got {}",
                MIN_NODES_PER_ROLE,
                self.coordination.len()
            )));
        }
        if self.storage.len() < MIN_NODES_PER_ROLE {
            return Err(PluginError::Validation(format!(
                "at least {} storage nodes are required, got {}",
                MIN_NODES_PER_ROLE,
                self.storage.len()
            )));
        }

        let fields = self
            .coordination
            .iter()
            .map(|n| (&n.name, &n.host, &n.data_dir, &n.log_dir, &n.deploy_dir))
            .chain(
                self.storage
                    .iter()
                    .map(|n| (&n.name, &n.host, &n.data_dir, &n.log_dir, &n.deploy_dir)),
            );
        for (name, host, data_dir, log_dir, deploy_dir) in fields {
            require_field(name, "host", host)?;
            require_field(name, "data directory", data_dir)?;
            require_shell_safe(name, "name", name)?;
            require_shell_safe(name, "host", host)?;
            if host.starts_with('-') {
                return Err(PluginError::Validation(format!(
                    "node {} has a host starting with '-': {}",
                    name, host
                )));
            }
            for (field, dir) in [
                ("data directory", data_dir),
                ("log directory", log_dir),
                ("deploy directory", deploy_dir),
            ] {
                require_shell_safe(name, field, dir)?;
            }
        }

        Ok(())
    }

    /// `host:client_port` of every coordination node
    pub fn coordination_endpoints(&self) -> Vec<String> {
        self.coordination
            .iter()
            .map(CoordinationNode::client_endpoint)
            .collect()
    }

    /// `name=peer_url` list used to bootstrap the quorum
    pub fn initial_cluster(&self) -> String {
        self.coordination
            .iter()
            .map(|node| format!("{}={}", node.name, node.peer_url()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Characters a remote shell would interpret
const SHELL_METACHARACTERS: &[char] = &[
    '$', '`', '\\', '"', '\'', ';', '&', '|', '<', '>', '(', ')', '{', '}', '*', '?', '[', ']',
    '~', '!', '#',
];

/// Node names, hosts and directories end up in remote commands
fn require_shell_safe(node: &str, field: &str, value: &str) -> PluginResult<()> {
    let unsafe_char = value
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || SHELL_METACHARACTERS.contains(c));
    if let Some(c) = unsafe_char {
        return Err(PluginError::Validation(format!(
            "node {} has {:?} in its {}: {:?}",
            node, c, field, value
        )));
    }
    Ok(())
}

fn require_field(node: &str, field: &str, value: &str) -> PluginResult<()> {
    if value.trim().is_empty() {
        return Err(PluginError::Validation(format!(
            "node {} has an empty {}",
            node, field
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterSpec;

    fn spec(masters: &[&str], volumes: &[&str]) -> ClusterSpec {
        let yaml = format!(
            "master_servers:\n{}volume_servers:\n{}",
            masters
                .iter()
                .map(|h| format!("  - host: \"{}\"\n", h))
                .collect::<String>(),
            volumes
                .iter()
                .map(|h| format!("  - host: \"{}\"\n", h))
                .collect::<String>(),
        );
        ClusterSpec::from_yaml(&yaml).unwrap()
    }

    #[test]
    fn test_extract_requires_both_lists() {
        let options = BootstrapOptions::default();
        let mut cluster = spec(&["a"], &["b"]);
        cluster.master_servers.clear();
        assert!(BootstrapSpec::extract(&cluster, &options).is_err());

        let mut cluster = spec(&["a"], &["b"]);
        cluster.volume_servers.clear();
        let err = BootstrapSpec::extract(&cluster, &options).unwrap_err();
        assert!(err.to_string().contains("no volume servers"));
    }

    #[test]
    fn test_initial_cluster_lists_every_peer() {
        let cluster = spec(&["h1", "h2"], &["s1"]);
        let bootstrap = BootstrapSpec::extract(&cluster, &BootstrapOptions::default()).unwrap();
        assert_eq!(
            bootstrap.initial_cluster(),
            "pd-1=http://h1:2380,pd-2=http://h2:2380"
        );
        assert_eq!(bootstrap.coordination_endpoints(), vec!["h1:2379", "h2:2379"]);
    }

    #[test]
    fn test_empty_host_rejected() {
        let cluster = spec(&["a", "b", ""], &["c", "d", "e"]);
        let bootstrap = BootstrapSpec::extract(&cluster, &BootstrapOptions::default()).unwrap();
        let err = bootstrap.validate().unwrap_err();
        assert!(err.to_string().contains("pd-3 has an empty host"));
    }

    #[test]
    fn test_shell_metacharacters_rejected() {
        let cluster = spec(&["a", "b", "c"], &["d", "e", "f"]);
        let clean = BootstrapSpec::extract(&cluster, &BootstrapOptions::default()).unwrap();
        assert!(clean.validate().is_ok());

        let mut bootstrap = clean.clone();
        bootstrap.storage[2].deploy_dir = "/opt/tikv; rm -rf /".to_string();
        let err = bootstrap.validate().unwrap_err().to_string();
        assert!(err.contains("tikv-3"), "got {}", err);
        assert!(err.contains("deploy directory"), "got {}", err);

        let mut bootstrap = clean.clone();
        bootstrap.coordination[0].log_dir = "/var/log/pd 1".to_string();
        assert!(bootstrap.validate().is_err());

        let mut bootstrap = clean.clone();
        bootstrap.coordination[1].data_dir = "/data/$(id)".to_string();
        assert!(bootstrap.validate().is_err());

        let mut bootstrap = clean;
        bootstrap.storage[0].host = "-oProxyCommand=sh".to_string();
        let err = bootstrap.validate().unwrap_err().to_string();
        assert!(err.contains("starting with '-'"), "got {}", err);
    }

    #[test]
    fn test_too_few_storage_nodes() {
        let cluster = spec(&["a", "b", "c"], &["d", "e"]);
        let bootstrap = BootstrapSpec::extract(&cluster, &BootstrapOptions::default()).unwrap();
        let err = bootstrap.validate().unwrap_err();
        assert!(matches!(err, PluginError::Validation(_)));
        assert!(err.to_string().contains("storage nodes"));
    }

    #[test]
    fn test_overrides_applied() {
        let mut options = BootstrapOptions::default();
        let values = HashMap::from([
            ("version".to_string(), serde_json::json!("v8.1.0")),
            ("storageEngine".to_string(), serde_json::json!("partitioned-raft-kv")),
            ("unknown".to_string(), serde_json::json!(1)),
        ]);
        options.apply_overrides(&values).unwrap();
        assert_eq!(options.version, "v8.1.0");
        assert_eq!(options.storage_engine, "partitioned-raft-kv");
        assert!(options.validate().is_ok());

        let bad = HashMap::from([("version".to_string(), serde_json::json!(8))]);
        assert!(options.apply_overrides(&bad).is_err());
    }

    #[test]
    fn test_unknown_engine_rejected() {
        let options = BootstrapOptions {
            storage_engine: "rocks".to_string(),
            ..BootstrapOptions::default()
        };
        assert!(options.validate().is_err());
    }
}
