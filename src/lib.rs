//! clusterplug
//!
//! Plugin-driven cluster operations. External plugin executables and builtin
//! plugins are loaded through one manager; the builtin TiKV bootstrap plugin
//! deploys a PD quorum and TiKV storage nodes from a cluster specification.

pub mod bootstrap;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod plugins;

pub use bootstrap::{BootstrapSpec, DeploymentPhase, TikvBootstrap};
pub use cluster::ClusterSpec;
pub use plugins::{
    OperationKind, OperationParams, OperationResult, Plugin, PluginError, PluginManager,
    PluginResult,
};
