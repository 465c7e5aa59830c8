//! Waiting for a freshly started cluster to converge
//!
//! Every wait polls on a fixed interval (first poll immediately) until the
//! condition holds, the deadline passes or the caller cancels. Probe
//! failures during a wait are logged and retried, never returned.

use super::probe::{HealthProbe, PD_HEALTH_PATH, TIKV_STATUS_PATH, is_healthy};
use super::topology::{BootstrapSpec, CoordinationNode, StorageNode};
use crate::plugins::{PluginError, PluginResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Interval and deadline of one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

/// Wait until the coordination service answers healthy on any node
pub async fn wait_for_quorum(
    cancel: &CancellationToken,
    probe: &dyn HealthProbe,
    nodes: &[CoordinationNode],
    settings: PollSettings,
) -> PluginResult<()> {
    tracing::info!("Waiting for coordination quorum across {} nodes", nodes.len());
    poll_until(cancel, settings, "coordination quorum", move || async move {
        for node in nodes {
            if is_healthy(probe, &node.host, node.client_port, PD_HEALTH_PATH).await {
                tracing::info!("Coordination service healthy via {}", node.name);
                return true;
            }
        }
        false
    })
    .await
}

/// Wait until every storage node answers healthy within a single pass
pub async fn wait_for_storage_nodes(
    cancel: &CancellationToken,
    probe: &dyn HealthProbe,
    nodes: &[StorageNode],
    settings: PollSettings,
) -> PluginResult<()> {
    tracing::info!("Waiting for {} storage nodes", nodes.len());
    poll_until(cancel, settings, "storage nodes", move || async move {
        let mut healthy = 0;
        for node in nodes {
            if is_healthy(probe, &node.host, node.status_port, TIKV_STATUS_PATH).await {
                healthy += 1;
            }
        }
        tracing::debug!("{}/{} storage nodes healthy", healthy, nodes.len());
        healthy == nodes.len()
    })
    .await
}

/// Probe every node once; the first unhealthy node is the error
pub async fn verify_cluster_health(
    cancel: &CancellationToken,
    probe: &dyn HealthProbe,
    spec: &BootstrapSpec,
) -> PluginResult<()> {
    let targets = spec
        .coordination
        .iter()
        .map(|node| (&node.name, &node.host, node.client_port, PD_HEALTH_PATH))
        .chain(
            spec.storage
                .iter()
                .map(|node| (&node.name, &node.host, node.status_port, TIKV_STATUS_PATH)),
        );

    for (name, host, port, path) in targets {
        if cancel.is_cancelled() {
            return Err(PluginError::Cancelled);
        }
        let failure = match probe.probe(host, port, path).await {
            Ok(status) if (200..300).contains(&status) => None,
            Ok(status) => Some(format!("HTTP status {}", status)),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = failure {
            return Err(PluginError::HealthCheck {
                node: format!("{} ({}:{})", name, host, port),
                reason,
            });
        }
    }

    tracing::info!(
        "Cluster healthy: {} coordination and {} storage nodes",
        spec.coordination.len(),
        spec.storage.len()
    );
    Ok(())
}

async fn poll_until<F, Fut>(
    cancel: &CancellationToken,
    settings: PollSettings,
    what: &str,
    mut check: F,
) -> PluginResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + settings.timeout;
    let timed_out = || PluginError::Timeout {
        what: what.to_string(),
        after: settings.timeout,
    };

    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polls = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PluginError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
            _ = ticker.tick() => {}
        }

        polls += 1;
        let satisfied = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PluginError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(timed_out()),
            satisfied = check() => satisfied,
        };

        if satisfied {
            tracing::debug!("{} ready after {} polls", what, polls);
            return Ok(());
        }
        tracing::debug!("{} not ready (poll {})", what, polls);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Healthy from the given poll onwards
    struct EventuallyHealthy {
        after: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl HealthProbe for EventuallyHealthy {
        async fn probe(&self, _host: &str, _port: u16, _path: &str) -> PluginResult<u16> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.after { Ok(200) } else { Ok(503) }
        }
    }

    fn settings() -> PollSettings {
        PollSettings {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(120),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_is_immediate_then_on_interval() {
        let probe = EventuallyHealthy {
            after: 2,
            calls: AtomicUsize::new(0),
        };
        let node = CoordinationNode {
            name: "pd-1".to_string(),
            host: "h".to_string(),
            client_port: 2379,
            peer_port: 2380,
            data_dir: "/d".to_string(),
            log_dir: "/l".to_string(),
            deploy_dir: "/o".to_string(),
        };

        let started = Instant::now();
        wait_for_quorum(&CancellationToken::new(), &probe, &[node], settings())
            .await
            .unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_wait() {
        let probe = EventuallyHealthy {
            after: usize::MAX,
            calls: AtomicUsize::new(0),
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            trigger.cancel();
        });

        // An empty node list is trivially healthy
        wait_for_storage_nodes(&cancel, &probe, &[], settings())
            .await
            .unwrap();

        let started = Instant::now();
        let node = StorageNode {
            name: "tikv-1".to_string(),
            host: "h".to_string(),
            port: 20160,
            status_port: 20180,
            data_dir: "/d".to_string(),
            log_dir: "/l".to_string(),
            deploy_dir: "/o".to_string(),
            storage_engine: "raft-kv".to_string(),
        };
        let err = wait_for_storage_nodes(&cancel, &probe, &[node], settings())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
