//! Test cycle controller
//!
//! One cycle: build the canary, submit it, wait for readiness, record the
//! outcome, hold the canary for the keep-alive period, delete it. Once the
//! deployment has been created, deletion is always attempted.


use crate::canary::build_deployment;
use crate::cluster::ClusterClient;
use crate::error::ClusterError;
use crate::health::CycleSummary;
use crate::models::{CanaryIdentity, CycleOutcome, TestConfig};
use crate::observability::{StructuredLogger, TesterMetrics};
use crate::readiness::{ReadinessWatcher, WatchVerdict};
use crate::shutdown::ShutdownSignal;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How a cycle that created its deployment ended
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleResult {
    Completed(CycleOutcome),
    /// Shutdown interrupted the watch; nothing was recorded
    Cancelled { ready_replicas: i32 },
}

/// Report of one cycle that got as far as creating its deployment
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub deployment: String,
    pub result: CycleResult,
    /// Whether the delete call succeeded
    pub cleaned_up: bool,
}

impl CycleReport {
    /// Health summary of this cycle
    pub fn summary(&self) -> CycleSummary {
        let (result, duration_secs) = match self.result {
            CycleResult::Completed(CycleOutcome::Ready(d)) => ("ready", Some(d.as_secs_f64())),
            CycleResult::Completed(CycleOutcome::TimedOut(_)) => ("timeout", None),
            CycleResult::Cancelled { .. } => ("cancelled", None),
        };
        CycleSummary {
            deployment: self.deployment.clone(),
            result: result.to_string(),
            duration_secs,
            finished_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Runs probe cycles against a cluster
#[derive(Clone)]
pub struct CycleController {
    cluster: Arc<dyn ClusterClient>,
    config: Arc<TestConfig>,
    metrics: TesterMetrics,
    logger: StructuredLogger,
}

impl CycleController {
    pub fn new(cluster: Arc<dyn ClusterClient>, config: TestConfig, metrics: TesterMetrics) -> Self {
        let logger = StructuredLogger::new(config.namespace.clone());
        Self {
            cluster,
            config: Arc::new(config),
            metrics,
            logger,
        }
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    /// Run one cycle under a freshly generated identity
    ///
    /// Returns an error only when the deployment could not be created; in
    /// that case nothing was watched, recorded or deleted.
    pub async fn run_cycle(&self, shutdown: &mut ShutdownSignal) -> Result<CycleReport, ClusterError> {
        self.run_cycle_as(CanaryIdentity::generate(), shutdown).await
    }

    /// Run one cycle under the given identity
    pub async fn run_cycle_as(
        &self,
        identity: CanaryIdentity,
        shutdown: &mut ShutdownSignal,
    ) -> Result<CycleReport, ClusterError> {
        let config = &self.config;
        let deployment = build_deployment(config, &identity);

        self.logger.log_cycle_started(
            &identity.name,
            config.replicas,
            config.timeout,
            config.keep_alive,
        );

        let submitted_at = Instant::now();
        if let Err(e) = self
            .cluster
            .create_deployment(&config.namespace, &deployment)
            .await
        {
            self.logger.log_create_failed(&identity.name, &e);
            return Err(e);
        }

        let result = self.await_outcome(&identity, submitted_at, shutdown).await;

        match result {
            CycleResult::Completed(CycleOutcome::Ready(elapsed)) => {
                self.metrics.observe_ready_duration(elapsed.as_secs_f64());
                self.logger.log_ready(&identity.name, config.replicas, elapsed);
                self.keep_alive(shutdown).await;
            }
            CycleResult::Completed(CycleOutcome::TimedOut(ready)) => {
                self.metrics.inc_timeouts();
                self.logger.log_timeout(&identity.name, ready, config.replicas);
            }
            CycleResult::Cancelled { ready_replicas } => {
                self.logger.log_cancelled(&identity.name, ready_replicas);
            }
        }

        let cleaned_up = self.cleanup(&identity.name).await;

        Ok(CycleReport {
            deployment: identity.name,
            result,
            cleaned_up,
        })
    }

    async fn await_outcome(
        &self,
        identity: &CanaryIdentity,
        submitted_at: Instant,
        shutdown: &mut ShutdownSignal,
    ) -> CycleResult {
        let config = &self.config;
        let events = match self
            .cluster
            .watch_deployments(&config.namespace, &identity.selector(), config.timeout)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(deployment = %identity.name, error = %e, "Could not open watch, treating as timeout");
                return CycleResult::Completed(CycleOutcome::TimedOut(0));
            }
        };

        let watcher = ReadinessWatcher::new(config.replicas, config.timeout);
        match watcher.wait(events, submitted_at, shutdown).await {
            WatchVerdict::Resolved(outcome) => CycleResult::Completed(outcome),
            WatchVerdict::Cancelled { ready_replicas } => CycleResult::Cancelled { ready_replicas },
        }
    }

    /// Hold the ready canary so it can be inspected; shutdown cuts it short
    async fn keep_alive(&self, shutdown: &mut ShutdownSignal) {
        let keep = self.config.keep_alive;
        if keep.is_zero() {
            return;
        }
        debug!(keep_secs = keep.as_secs_f64(), "Keeping canary running");
        tokio::select! {
            _ = tokio::time::sleep(keep) => {}
            _ = shutdown.triggered() => debug!("Keep-alive interrupted by shutdown"),
        }
    }

    async fn cleanup(&self, name: &str) -> bool {
        match self
            .cluster
            .delete_deployment(&self.config.namespace, name)
            .await
        {
            Ok(()) => {
                self.logger.log_cleanup(name);
                true
            }
            Err(e) => {
                self.logger.log_cleanup_failed(name, &e);
                false
            }
        }
    }
}
