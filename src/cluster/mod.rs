//! Cluster specification
//!
//! The subset of the on-disk cluster specification consumed by plugins:
//! ordered master, volume and filer server lists. Plugins only read it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Cluster specification
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterSpec {
    #[serde(default)]
    pub global: GlobalOptions,

    #[serde(default)]
    pub master_servers: Vec<MasterServer>,

    #[serde(default)]
    pub volume_servers: Vec<VolumeServer>,

    #[serde(default)]
    pub filer_servers: Vec<FilerServer>,
}

impl ClusterSpec {
    /// Load a cluster specification from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cluster specification: {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse cluster specification: {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

/// Options shared by all servers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalOptions {
    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    #[serde(default)]
    pub deploy_dir: String,

    #[serde(default)]
    pub data_dir: String,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            user: default_user(),
            ssh_port: default_ssh_port(),
            deploy_dir: String::new(),
            data_dir: String::new(),
        }
    }
}

fn default_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

/// Master server descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasterServer {
    pub host: String,

    #[serde(default = "default_master_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_grpc: Option<u16>,

    #[serde(default)]
    pub data_dir: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size_limit_mb: Option<u64>,
}

fn default_master_port() -> u16 {
    9333
}

/// Volume server descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeServer {
    pub host: String,

    #[serde(default = "default_volume_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_grpc: Option<u16>,

    #[serde(default)]
    pub folders: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_center: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rack: Option<String>,
}

fn default_volume_port() -> u16 {
    8080
}

/// Filer server descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilerServer {
    pub host: String,

    #[serde(default = "default_filer_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_grpc: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<bool>,
}

fn default_filer_port() -> u16 {
    8888
}
