// TiKV cluster bootstrap
//
// A cluster lifecycle plugin that turns the master and volume server lists of
// a cluster specification into a PD quorum and TiKV storage nodes, then
// provisions, starts and verifies them over SSH.

pub mod convergence;
pub mod orchestrator;
pub mod phase;
pub mod probe;
pub mod release;
pub mod remote;
pub mod render;
pub mod topology;

pub use convergence::{PollSettings, verify_cluster_health, wait_for_quorum, wait_for_storage_nodes};
pub use orchestrator::{PLUGIN_NAME, TikvBootstrap};
pub use phase::{Deployment, DeploymentPhase};
pub use probe::{HealthProbe, HttpProbe};
pub use release::{Component, HttpReleaseSource, ReleaseSource};
pub use remote::{RemoteExecutor, SshExecutor};
pub use topology::{BootstrapOptions, BootstrapSpec, BootstrapTiming, CoordinationNode, StorageNode};
