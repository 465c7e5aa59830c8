// Plugin system for clusterplug
//
// Lets cluster lifecycle operations (deploy, upgrade, scale, monitor, export)
// be implemented by independently packaged executables described by a
// `plugin.yaml` manifest, and dispatches operations to them.

pub mod capability;
pub mod external;
pub mod hooks;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod protocol;
pub mod result;
pub mod sdk;
pub mod validator;

pub use capability::{
    ClusterPlugin, ExportPlugin, ImportPlugin, MonitoringPlugin, OperationKind, OperationParams,
    Plugin, PluginContext,
};
pub use external::{CommandOutput, CommandRunner, ExternalPlugin, ProcessRunner};
pub use hooks::{HookOutcome, HookRegistry};
pub use loader::PluginLoader;
pub use manager::{LoadedPlugin, PluginManager, Timeouts};
pub use manifest::PluginManifest;
pub use result::OperationResult;
pub use validator::PluginValidator;

use std::path::PathBuf;
use std::time::Duration;

/// Plugin errors
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Invalid plugin manifest: {0}")]
    Manifest(String),

    #[error("Plugin binary {path:?}: {reason}")]
    Binary { path: PathBuf, reason: String },

    #[error("Failed to load plugin '{name}': {reason}")]
    Load { name: String, reason: String },

    #[error("Plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("Plugin '{0}' is not loaded")]
    NotLoaded(String),

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Plugin '{plugin}' failed on '{verb}': {message}\n{output}")]
    Execution {
        plugin: String,
        verb: String,
        message: String,
        output: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("Health check failed for {node}: {reason}")]
    HealthCheck { node: String, reason: String },

    #[error("Plugin '{plugin}' does not support {capability}")]
    Unsupported { plugin: String, capability: String },

    #[error("Remote command on {host} failed: {reason}")]
    Remote { host: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// True for errors caused by the caller's cancellation token
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PluginError::Cancelled)
    }
}

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;
