//! Health check infrastructure for the scheduler tester
//!
//! Tracks how recent probe cycles went so that Kubernetes liveness and
//! readiness probes can restart a tester that keeps failing to create its
//! canary.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Consecutive failed cycles after which the tester reports itself unhealthy
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Overall health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Last cycle ran
    Healthy,
    /// Recent cycles failed but below the threshold
    Degraded,
    /// Failures reached the threshold
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the tester is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Summary of the most recent cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub deployment: String,
    /// `ready`, `timeout`, `cancelled` or `create_failed`
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    pub finished_at: i64,
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub consecutive_failures: u32,
    pub completed_cycles: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<CycleSummary>,
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct HealthState {
    ready: bool,
    consecutive_failures: u32,
    completed_cycles: u64,
    last_cycle: Option<CycleSummary>,
}

/// Health registry shared by the scheduler loop and the HTTP endpoint
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
    failure_threshold: u32,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

impl HealthRegistry {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(HealthState::default())),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Set readiness status
    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    /// Record a cycle that ran to completion, whatever its outcome
    pub async fn record_completed(&self, summary: CycleSummary) {
        let mut state = self.state.write().await;
        state.consecutive_failures = 0;
        state.completed_cycles += 1;
        state.last_cycle = Some(summary);
    }

    /// Record a cycle that could not run
    pub async fn record_failure(&self, summary: CycleSummary) {
        let mut state = self.state.write().await;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_cycle = Some(summary);
    }

    /// Get health response
    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;
        let status = if state.consecutive_failures >= self.failure_threshold {
            ComponentStatus::Unhealthy
        } else if state.consecutive_failures > 0 {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        };

        HealthResponse {
            status,
            consecutive_failures: state.consecutive_failures,
            completed_cycles: state.completed_cycles,
            last_cycle: state.last_cycle.clone(),
        }
    }

    /// Get readiness response
    pub async fn readiness(&self) -> ReadinessResponse {
        if self.state.read().await.ready {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some("Leftover sweep not yet complete".to_string()),
            }
        }
    }
}
