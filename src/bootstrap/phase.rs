//! Deployment state machine
//!
//! `Extracted -> Validated -> Provisioned -> Started -> Converged -> Verified`,
//! with `Failed` reachable from any state. Phases only move forward; a new
//! deployment starts over from `Idle`.

use crate::plugins::{PluginError, PluginResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentPhase {
    /// No deployment attempted yet
    Idle,
    Extracted,
    Validated,
    Provisioned,
    Started,
    Converged,
    Verified,
    Failed,
}

impl DeploymentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentPhase::Idle => "idle",
            DeploymentPhase::Extracted => "extracted",
            DeploymentPhase::Validated => "validated",
            DeploymentPhase::Provisioned => "provisioned",
            DeploymentPhase::Started => "started",
            DeploymentPhase::Converged => "converged",
            DeploymentPhase::Verified => "verified",
            DeploymentPhase::Failed => "failed",
        }
    }

    /// The only phase this one may advance to
    pub fn next(&self) -> Option<DeploymentPhase> {
        match self {
            DeploymentPhase::Idle => Some(DeploymentPhase::Extracted),
            DeploymentPhase::Extracted => Some(DeploymentPhase::Validated),
            DeploymentPhase::Validated => Some(DeploymentPhase::Provisioned),
            DeploymentPhase::Provisioned => Some(DeploymentPhase::Started),
            DeploymentPhase::Started => Some(DeploymentPhase::Converged),
            DeploymentPhase::Converged => Some(DeploymentPhase::Verified),
            DeploymentPhase::Verified | DeploymentPhase::Failed => None,
        }
    }

    /// No deployment is in flight
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            DeploymentPhase::Idle | DeploymentPhase::Verified | DeploymentPhase::Failed
        )
    }
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase history of the current deployment
#[derive(Debug, Clone, Serialize)]
pub struct Deployment {
    phase: DeploymentPhase,
    /// Phase the deployment was working towards when it failed
    failed_towards: Option<DeploymentPhase>,
    error: Option<String>,
    history: Vec<(DeploymentPhase, DateTime<Utc>)>,
}

impl Default for Deployment {
    fn default() -> Self {
        Self {
            phase: DeploymentPhase::Idle,
            failed_towards: None,
            error: None,
            history: Vec::new(),
        }
    }
}

impl Deployment {
    pub fn phase(&self) -> DeploymentPhase {
        self.phase
    }

    pub fn failed_towards(&self) -> Option<DeploymentPhase> {
        self.failed_towards
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn history(&self) -> &[(DeploymentPhase, DateTime<Utc>)] {
        &self.history
    }

    /// Forget the previous deployment and start over from `Idle`
    pub fn begin(&mut self) {
        if !self.phase.is_settled() {
            tracing::warn!("Abandoning deployment in phase {}", self.phase);
        }
        *self = Self::default();
    }

    /// Move to the next phase
    pub fn advance(&mut self, to: DeploymentPhase) -> PluginResult<()> {
        if self.phase.next() != Some(to) {
            return Err(PluginError::Validation(format!(
                "deployment cannot move from {} to {}",
                self.phase, to
            )));
        }
        self.enter(to);
        Ok(())
    }

    /// Mark the deployment failed while working towards `towards`
    pub fn fail(&mut self, towards: DeploymentPhase, error: &PluginError) {
        self.record_failure(towards, error.to_string());
    }

    /// Mark the deployment failed because its work was dropped unfinished
    ///
    /// Happens when the caller's deadline or cancellation stops the phase.
    pub fn abandon(&mut self, towards: DeploymentPhase) {
        self.record_failure(towards, format!("abandoned while working towards {}", towards));
    }

    fn record_failure(&mut self, towards: DeploymentPhase, error: String) {
        tracing::error!(
            "Deployment failed in phase {} (towards {}): {}",
            self.phase,
            towards,
            error
        );
        self.failed_towards = Some(towards);
        self.error = Some(error);
        self.enter(DeploymentPhase::Failed);
    }

    /// Fail unless the deployment currently sits in `expected`
    pub fn require(&self, expected: DeploymentPhase) -> PluginResult<()> {
        if self.phase != expected {
            return Err(PluginError::Validation(format!(
                "deployment is {}, expected {}",
                self.phase, expected
            )));
        }
        Ok(())
    }

    fn enter(&mut self, phase: DeploymentPhase) {
        tracing::debug!("Deployment phase: {}", phase);
        self.phase = phase;
        self.history.push((phase, Utc::now()));
    }
}
