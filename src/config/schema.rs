//! Configuration schema definitions
//!
//! Defines the structure of configuration files using serde for serialization.

use super::paths;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Directory holding one sub-directory per plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins_dir: Option<String>,

    /// Per-call plugin deadlines
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Option values per plugin name, passed to the plugin at init
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub plugins: HashMap<String, HashMap<String, serde_json::Value>>,

    /// Bootstrap plugin settings
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl Config {
    /// Effective plugins directory
    pub fn plugins_dir(&self) -> PathBuf {
        self.plugins_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(paths::default_plugins_dir)
    }
}

/// Plugin call deadlines, in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    #[serde(default = "default_init_secs")]
    pub init_secs: u64,

    #[serde(default = "default_validate_secs")]
    pub validate_secs: u64,

    #[serde(default = "default_cleanup_secs")]
    pub cleanup_secs: u64,

    #[serde(default = "default_execute_secs")]
    pub execute_secs: u64,

    /// Pre/post deploy and upgrade hooks
    #[serde(default = "default_lifecycle_secs")]
    pub lifecycle_secs: u64,
}

/// Bootstrap orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapConfig {
    /// Release version of pd-server and tikv-server
    #[serde(default = "default_version")]
    pub version: String,

    /// Tarball URL template; `{component}` and `{version}` are substituted
    #[serde(default = "default_release_url")]
    pub release_url: String,

    /// Local cache of downloaded binaries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,

    #[serde(default = "default_data_base")]
    pub data_base: String,

    #[serde(default = "default_log_base")]
    pub log_base: String,

    #[serde(default = "default_deploy_base")]
    pub deploy_base: String,

    #[serde(default = "default_storage_engine")]
    pub storage_engine: String,

    #[serde(default)]
    pub ssh: SshConfig,
}

impl BootstrapConfig {
    /// Effective binary cache directory
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(paths::release_cache_dir)
    }
}

/// SSH settings for remote node commands
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    #[serde(default = "default_ssh_user")]
    pub user: String,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Private key passed to ssh/scp with `-i`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_init_secs() -> u64 {
    30
}

fn default_validate_secs() -> u64 {
    30
}

fn default_cleanup_secs() -> u64 {
    10
}

fn default_execute_secs() -> u64 {
    300
}

fn default_lifecycle_secs() -> u64 {
    900
}

fn default_version() -> String {
    "v7.5.0".to_string()
}

fn default_release_url() -> String {
    "https://tiup-mirrors.pingcap.com/{component}-{version}-linux-amd64.tar.gz".to_string()
}

fn default_data_base() -> String {
    "/data/tikv".to_string()
}

fn default_log_base() -> String {
    "/var/log/tikv".to_string()
}

fn default_deploy_base() -> String {
    "/opt/tikv".to_string()
}

fn default_storage_engine() -> String {
    "raft-kv".to_string()
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugins_dir: None,
            timeouts: TimeoutConfig::default(),
            plugins: HashMap::new(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            init_secs: default_init_secs(),
            validate_secs: default_validate_secs(),
            cleanup_secs: default_cleanup_secs(),
            execute_secs: default_execute_secs(),
            lifecycle_secs: default_lifecycle_secs(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            release_url: default_release_url(),
            cache_dir: None,
            data_base: default_data_base(),
            log_base: default_log_base(),
            deploy_base: default_deploy_base(),
            storage_engine: default_storage_engine(),
            ssh: SshConfig::default(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            port: default_ssh_port(),
            identity_file: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}
