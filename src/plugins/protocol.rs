//! Subprocess command protocol
//!
//! A plugin binary is invoked as `<binary> <verb>` from its own directory.
//! The request is also written to stdin as JSON; a plugin may answer with a
//! JSON `PluginResponse` as the last line of stdout. Plugins that only use
//! exit codes and free-form output remain valid: exit 0 is success.

use super::capability::{OperationKind, OperationParams};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment variable carrying the plugin name
pub const ENV_PLUGIN_NAME: &str = "CLUSTERPLUG_PLUGIN_NAME";

/// Environment variable carrying the plugin version
pub const ENV_PLUGIN_VERSION: &str = "CLUSTERPLUG_PLUGIN_VERSION";

/// Protocol verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Init,
    Validate,
    Cleanup,
    Execute,
    /// Ask the plugin for the operation kinds it implements
    Describe,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Init => "init",
            Verb::Validate => "validate",
            Verb::Cleanup => "cleanup",
            Verb::Execute => "execute",
            Verb::Describe => "describe",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Verb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(Verb::Init),
            "validate" => Ok(Verb::Validate),
            "cleanup" => Ok(Verb::Cleanup),
            "execute" => Ok(Verb::Execute),
            "describe" => Ok(Verb::Describe),
            other => Err(format!("Unknown verb: {}", other)),
        }
    }
}

/// Request written to the plugin's stdin
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginRequest {
    pub verb: Verb,
    pub plugin: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationKind>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: OperationParams,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, serde_json::Value>,
}

impl PluginRequest {
    pub fn new(verb: Verb, plugin: &str, version: &str) -> Self {
        Self {
            verb,
            plugin: plugin.to_string(),
            version: version.to_string(),
            operation: None,
            params: OperationParams::new(),
            config: HashMap::new(),
        }
    }

    pub fn with_operation(mut self, operation: OperationKind, params: &OperationParams) -> Self {
        self.operation = Some(operation);
        self.params = params.clone();
        self
    }

    pub fn with_config(mut self, config: &HashMap<String, serde_json::Value>) -> Self {
        self.config = config.clone();
        self
    }
}

/// Structured answer a plugin may print as the last line of stdout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set in answers to `describe`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<OperationKind>>,
}

impl PluginResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: HashMap::new(),
            error: None,
            operations: None,
        }
    }

    pub fn failed(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: HashMap::new(),
            error: Some(error.into()),
            operations: None,
        }
    }

    /// Find a response in captured stdout, looking at the last non-empty line
    pub fn parse_from_output(stdout: &str) -> Option<Self> {
        let line = stdout.lines().rev().find(|line| !line.trim().is_empty())?;
        serde_json::from_str(line.trim()).ok()
    }

    /// Single-line JSON encoding
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"message":"unencodable response"}"#.to_string()
        })
    }
}
