//! HTTP health probing of cluster nodes

use crate::plugins::{PluginError, PluginResult};
use async_trait::async_trait;
use std::time::Duration;

/// Health endpoint of a coordination node
pub const PD_HEALTH_PATH: &str = "/pd/api/v1/health";

/// Status endpoint of a storage node
pub const TIKV_STATUS_PATH: &str = "/status";

/// Issues one health request to a node
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// GET `http://host:port{path}` and return the HTTP status code
    async fn probe(&self, host: &str, port: u16, path: &str) -> PluginResult<u16>;
}

/// Treat 2xx as healthy; log and swallow transport errors
pub async fn is_healthy(probe: &dyn HealthProbe, host: &str, port: u16, path: &str) -> bool {
    match probe.probe(host, port, path).await {
        Ok(status) if (200..300).contains(&status) => true,
        Ok(status) => {
            tracing::debug!("{}:{}{} answered {}", host, port, path, status);
            false
        }
        Err(e) => {
            tracing::debug!("{}:{}{} unreachable: {}", host, port, path, e);
            false
        }
    }
}

/// `reqwest` based probe
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, host: &str, port: u16, path: &str) -> PluginResult<u16> {
        let node = format!("{}:{}", host, port);
        let url = url::Url::parse(&format!("http://{}{}", node, path)).map_err(|e| {
            PluginError::HealthCheck {
                node: node.clone(),
                reason: format!("invalid probe URL: {}", e),
            }
        })?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PluginError::HealthCheck {
                node: node.clone(),
                reason: e.to_string(),
            })?;

        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        Probe {}

        #[async_trait]
        impl HealthProbe for Probe {
            async fn probe(&self, host: &str, port: u16, path: &str) -> PluginResult<u16>;
        }
    }

    #[tokio::test]
    async fn test_only_2xx_is_healthy() {
        let mut probe = MockProbe::new();
        probe
            .expect_probe()
            .returning(|host, _, _| match host {
                "ok" => Ok(200),
                "busy" => Ok(503),
                _ => Err(PluginError::HealthCheck {
                    node: host.to_string(),
                    reason: "connection refused".to_string(),
                }),
            });

        assert!(is_healthy(&probe, "ok", 2379, PD_HEALTH_PATH).await);
        assert!(!is_healthy(&probe, "busy", 2379, PD_HEALTH_PATH).await);
        assert!(!is_healthy(&probe, "down", 2379, PD_HEALTH_PATH).await);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_health_check_error() {
        let probe = HttpProbe::new(Duration::from_millis(200)).unwrap();
        // Port 1 on localhost is closed in any sane test environment
        let err = probe.probe("127.0.0.1", 1, TIKV_STATUS_PATH).await.unwrap_err();
        assert!(matches!(err, PluginError::HealthCheck { ref node, .. } if node == "127.0.0.1:1"));
    }
}
