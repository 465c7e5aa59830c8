//! Per-node server configuration files
//!
//! Coordination nodes get the full peer list so the first three can form a
//! quorum; storage nodes get every coordination client endpoint.

use super::topology::{BootstrapSpec, CoordinationNode, StorageNode};
use crate::plugins::{PluginError, PluginResult};
use serde::Serialize;

pub const PD_CONFIG_FILE: &str = "pd.toml";
pub const TIKV_CONFIG_FILE: &str = "tikv.toml";

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct PdConfig {
    name: String,
    data_dir: String,
    client_urls: String,
    advertise_client_urls: String,
    peer_urls: String,
    advertise_peer_urls: String,
    initial_cluster: String,
    initial_cluster_state: &'static str,
    log: LogSection,
}

#[derive(Debug, Serialize)]
struct TikvConfig {
    server: ServerSection,
    pd: PdSection,
    storage: StorageSection,
    log: LogSection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct ServerSection {
    addr: String,
    advertise_addr: String,
    status_addr: String,
    advertise_status_addr: String,
}

#[derive(Debug, Serialize)]
struct PdSection {
    endpoints: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct StorageSection {
    data_dir: String,
    engine: String,
}

#[derive(Debug, Serialize)]
struct LogSection {
    file: LogFile,
}

#[derive(Debug, Serialize)]
struct LogFile {
    filename: String,
}

impl LogSection {
    fn at(log_dir: &str, file: &str) -> Self {
        Self {
            file: LogFile {
                filename: format!("{}/{}", log_dir, file),
            },
        }
    }
}

/// `pd.toml` for one coordination node
pub fn render_pd_config(node: &CoordinationNode, spec: &BootstrapSpec) -> PluginResult<String> {
    let config = PdConfig {
        name: node.name.clone(),
        data_dir: node.data_dir.clone(),
        client_urls: format!("http://0.0.0.0:{}", node.client_port),
        advertise_client_urls: format!("http://{}", node.client_endpoint()),
        peer_urls: format!("http://0.0.0.0:{}", node.peer_port),
        advertise_peer_urls: node.peer_url(),
        initial_cluster: spec.initial_cluster(),
        initial_cluster_state: "new",
        log: LogSection::at(&node.log_dir, "pd.log"),
    };
    to_toml(&config, PD_CONFIG_FILE, &node.name)
}

/// `tikv.toml` for one storage node
pub fn render_tikv_config(node: &StorageNode, spec: &BootstrapSpec) -> PluginResult<String> {
    let config = TikvConfig {
        server: ServerSection {
            addr: format!("0.0.0.0:{}", node.port),
            advertise_addr: format!("{}:{}", node.host, node.port),
            status_addr: format!("0.0.0.0:{}", node.status_port),
            advertise_status_addr: format!("{}:{}", node.host, node.status_port),
        },
        pd: PdSection {
            endpoints: spec.coordination_endpoints(),
        },
        storage: StorageSection {
            data_dir: node.data_dir.clone(),
            engine: node.storage_engine.clone(),
        },
        log: LogSection::at(&node.log_dir, "tikv.log"),
    };
    to_toml(&config, TIKV_CONFIG_FILE, &node.name)
}

fn to_toml<T: Serialize>(config: &T, file: &str, node: &str) -> PluginResult<String> {
    toml::to_string(config)
        .map_err(|e| PluginError::Validation(format!("cannot render {} for {}: {}", file, node, e)))
}
