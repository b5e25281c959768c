//! Probe scheduling loop
//!
//! Starts a cycle every `interval`, measured start to start. A cycle that
//! overruns the interval is followed immediately by the next one; cycles
//! never overlap.

use crate::cycle::{CycleController, CycleReport};
use crate::error::ClusterError;
use crate::health::{CycleSummary, HealthRegistry};
use crate::shutdown::ShutdownSignal;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

/// Time left to sleep after a cycle that took `elapsed`
pub fn compensated_sleep(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Drives the cycle controller on a fixed period
pub struct ProbeScheduler {
    controller: CycleController,
    interval: Duration,
    health: HealthRegistry,
}

impl ProbeScheduler {
    pub fn new(controller: CycleController, interval: Duration, health: HealthRegistry) -> Self {
        Self {
            controller,
            interval,
            health,
        }
    }

    /// Run a single cycle and record it in the health registry
    pub async fn run_once(
        &self,
        shutdown: &mut ShutdownSignal,
    ) -> Result<CycleReport, ClusterError> {
        let result = self.controller.run_cycle(shutdown).await;
        match &result {
            Ok(report) => self.health.record_completed(report.summary()).await,
            Err(e) => {
                let deployment = match e {
                    ClusterError::Create { name, .. } => name.clone(),
                    _ => String::new(),
                };
                self.health
                    .record_failure(CycleSummary {
                        deployment,
                        result: "create_failed".to_string(),
                        duration_secs: None,
                        finished_at: chrono::Utc::now().timestamp(),
                    })
                    .await;
            }
        }
        result
    }

    /// Run cycles until shutdown; returns the number of cycles started
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> u64 {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            namespace = %self.controller.config().namespace,
            "Starting probe loop"
        );

        let mut cycles = 0u64;
        while !shutdown.is_triggered() {
            let started = Instant::now();
            cycles += 1;
            // Failures are already logged and recorded; the loop carries on
            let _ = self.run_once(&mut shutdown).await;

            let elapsed = started.elapsed();
            let pause = compensated_sleep(self.interval, elapsed);
            debug!(
                elapsed_secs = elapsed.as_secs_f64(),
                sleep_secs = pause.as_secs_f64(),
                "Cycle finished"
            );

            tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                _ = sleep(pause) => {}
            }
        }

        info!(cycles, "Probe loop stopped");
        cycles
    }
}
