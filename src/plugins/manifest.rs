//! Plugin manifest schema
//!
//! Defines the structure of the `plugin.yaml` file that sits in every plugin
//! directory and describes the plugin's identity, binary and configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the manifest inside a plugin directory
pub const MANIFEST_FILE: &str = "plugin.yaml";

/// Alternate manifest file name
pub const MANIFEST_FILE_ALT: &str = "plugin.yml";

/// Plugin manifest - root structure of a plugin YAML file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginManifest {
    /// Plugin name (must be unique)
    pub name: String,

    /// Plugin version (semver recommended)
    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: String,

    /// Binary path relative to the plugin's own directory
    pub binary: String,

    /// Optional SHA-256 of the binary, either bare hex or `sha256:<hex>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Names of plugins that must be loaded before this one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,

    /// Supported (os, arch) pairs; empty means any platform
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<Platform>,

    /// Configuration schema
    #[serde(default)]
    pub config: ConfigSchema,
}

impl PluginManifest {
    /// Parse a manifest from YAML text
    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Directory holding this plugin under the plugins directory
    pub fn plugin_dir(&self, plugins_dir: &Path) -> PathBuf {
        plugins_dir.join(&self.name)
    }

    /// Absolute location of the plugin binary
    pub fn binary_path(&self, plugins_dir: &Path) -> PathBuf {
        self.plugin_dir(plugins_dir).join(&self.binary)
    }

    /// Whether the manifest allows the given platform
    pub fn supports_platform(&self, os: &str, arch: &str) -> bool {
        self.platforms.is_empty() || self.platforms.iter().any(|p| p.os == os && p.arch == arch)
    }
}

/// Operating system / architecture pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

/// Configuration schema split into required and optional options
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSchema {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<ConfigOption>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional: Vec<ConfigOption>,
}

impl ConfigSchema {
    /// Iterate over all options, required first
    pub fn options(&self) -> impl Iterator<Item = &ConfigOption> {
        self.required.iter().chain(self.optional.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.optional.is_empty()
    }
}

/// A single named configuration option
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigOption {
    pub name: String,

    #[serde(rename = "type", default)]
    pub option_type: OptionType,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    #[serde(default)]
    pub required: bool,

    /// Allowed values; empty means unrestricted
    #[serde(default, rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<serde_json::Value>,
}

/// Type tag of a configuration option
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    #[default]
    String,
    Int,
    Float,
    Bool,
    List,
    Map,
}

impl OptionType {
    /// Check that a JSON value carries this type
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match self {
            OptionType::String => value.is_string(),
            OptionType::Int => value.is_i64() || value.is_u64(),
            OptionType::Float => value.is_number(),
            OptionType::Bool => value.is_boolean(),
            OptionType::List => matches!(value, Value::Array(_)),
            OptionType::Map => matches!(value, Value::Object(_)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OptionType::String => "string",
            OptionType::Int => "int",
            OptionType::Float => "float",
            OptionType::Bool => "bool",
            OptionType::List => "list",
            OptionType::Map => "map",
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_manifest() {
        let yaml = r#"
name: tikv-bootstrap
version: 0.3.1
description: Bootstraps a TiKV cluster
author: storage team
binary: bin/clusterplug-tikv
checksum: sha256:abcd
dependencies:
  - ssh-keys
platforms:
  - os: linux
    arch: x86_64
config:
  required:
    - name: version
      type: string
      description: TiKV release
  optional:
    - name: engine
      type: string
      default: raft-kv
      enum: [raft-kv, partitioned-raft-kv]
"#;
        let manifest = PluginManifest::from_yaml(yaml).unwrap();
        assert_eq!(manifest.name, "tikv-bootstrap");
        assert_eq!(manifest.binary, "bin/clusterplug-tikv");
        assert_eq!(manifest.checksum.as_deref(), Some("sha256:abcd"));
        assert_eq!(manifest.dependencies, vec!["ssh-keys".to_string()]);
        assert_eq!(manifest.config.required.len(), 1);
        assert_eq!(manifest.config.optional[0].allowed_values.len(), 2);
        assert_eq!(
            manifest.config.optional[0].default,
            Some(serde_json::json!("raft-kv"))
        );
    }

    #[test]
    fn test_minimal_manifest_defaults() {
        let manifest = PluginManifest::from_yaml("name: a\nversion: '1'\nbinary: run\n").unwrap();
        assert!(manifest.description.is_empty());
        assert!(manifest.checksum.is_none());
        assert!(manifest.config.is_empty());
        assert!(manifest.supports_platform("windows", "aarch64"));
    }

    #[test]
    fn test_binary_path_is_under_plugin_dir() {
        let manifest = PluginManifest::from_yaml("name: a\nversion: '1'\nbinary: bin/run\n").unwrap();
        assert_eq!(
            manifest.binary_path(Path::new("/plugins")),
            PathBuf::from("/plugins/a/bin/run")
        );
    }

    #[test]
    fn test_platform_restriction() {
        let mut manifest =
            PluginManifest::from_yaml("name: a\nversion: '1'\nbinary: run\n").unwrap();
        manifest.platforms = vec![Platform {
            os: "linux".to_string(),
            arch: "x86_64".to_string(),
        }];
        assert!(manifest.supports_platform("linux", "x86_64"));
        assert!(!manifest.supports_platform("macos", "x86_64"));
    }

    #[test]
    fn test_option_type_matching() {
        assert!(OptionType::Int.matches(&serde_json::json!(3)));
        assert!(!OptionType::Int.matches(&serde_json::json!(3.5)));
        assert!(OptionType::Float.matches(&serde_json::json!(3)));
        assert!(OptionType::List.matches(&serde_json::json!(["a"])));
        assert!(!OptionType::Bool.matches(&serde_json::json!("true")));
    }
}
