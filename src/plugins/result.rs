//! Operation results
//!
//! `OperationResult` is the single structured output of every plugin call.
//! Duration and timestamp are stamped by the manager once the call returns.

use super::PluginError;
use super::capability::OperationKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Outcome of a plugin operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub data: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

impl OperationResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: HashMap::new(),
            error: None,
            duration: Duration::ZERO,
            timestamp: Utc::now(),
        }
    }

    /// Failure record with the templated one-line summary
    pub fn failure(plugin: &str, operation: &str, error: &PluginError) -> Self {
        Self {
            success: false,
            message: format!("Plugin '{}' failed to {}", plugin, operation),
            data: HashMap::new(),
            error: Some(error.to_string()),
            duration: Duration::ZERO,
            timestamp: Utc::now(),
        }
    }

    /// Convenience for failures of a known operation kind
    pub fn operation_failure(plugin: &str, operation: OperationKind, error: &PluginError) -> Self {
        Self::failure(plugin, operation.as_str(), error)
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Stamp timing once the call has returned
    pub fn stamped(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self.timestamp = Utc::now();
        self
    }
}
