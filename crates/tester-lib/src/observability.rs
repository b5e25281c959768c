//! Observability infrastructure for the scheduler tester
//!
//! Provides:
//! - Prometheus metrics (time to ready deployment, timeouts, configuration info)
//! - Structured JSON logging with tracing

use crate::models::TestConfig;
use prometheus::core::Metric;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for the time to ready deployment (in seconds); +Inf is implicit
pub const READY_BUCKETS: &[f64] = &[
    1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 12.0, 15.0, 25.0,
];

pub const TIME_TO_READY_METRIC: &str = "k8s_scheduler_tester_time_to_ready_deployment";
pub const TIMEOUTS_METRIC: &str = "k8s_scheduler_tester_timeouts_total";
pub const CONFIG_INFO_METRIC: &str = "k8s_scheduler_tester_config_info";

/// Dashboards keyed on the old misspelled `test_timout` label need updating
pub const CONFIG_INFO_HELP: &str =
    "Tester configuration (timeout label renamed test_timout -> test_timeout in 1.1.0)";

/// Tester metrics for Prometheus exposition
///
/// Owns its registry instead of using the process-global default one. Clones
/// are cheap handles onto the same underlying metrics, so the cycle
/// controller and the HTTP endpoint can share one instance.
#[derive(Clone)]
pub struct TesterMetrics {
    registry: Registry,
    time_to_ready: Histogram,
    timeouts: IntCounter,
}

impl TesterMetrics {
    /// Create and register the tester metrics
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let time_to_ready = Histogram::with_opts(
            HistogramOpts::new(
                TIME_TO_READY_METRIC,
                "Time between create deployment and all replicas in ready state",
            )
            .buckets(READY_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(time_to_ready.clone()))?;

        let timeouts = IntCounter::new(
            TIMEOUTS_METRIC,
            "Tests time out when a deployment did not get all its pods in ready state within X seconds",
        )?;
        registry.register(Box::new(timeouts.clone()))?;

        Ok(Self {
            registry,
            time_to_ready,
            timeouts,
        })
    }

    /// Record how long a canary took to become fully ready
    pub fn observe_ready_duration(&self, duration_secs: f64) {
        self.time_to_ready.observe(duration_secs);
    }

    /// Count a cycle that did not reach full readiness in time
    pub fn inc_timeouts(&self) {
        self.timeouts.inc();
    }

    /// Publish static descriptive labels; may only be called once
    pub fn set_static_info(&self, info: &BTreeMap<String, String>) -> prometheus::Result<()> {
        let labels: HashMap<String, String> = info.clone().into_iter().collect();
        let gauge = Gauge::with_opts(
            Opts::new(CONFIG_INFO_METRIC, CONFIG_INFO_HELP).const_labels(labels),
        )?;
        gauge.set(1.0);
        self.registry.register(Box::new(gauge))
    }

    /// Render all tester metrics in the Prometheus text format
    pub fn encode(&self) -> prometheus::Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    pub fn ready_observations(&self) -> u64 {
        self.time_to_ready.get_sample_count()
    }

    pub fn ready_duration_sum(&self) -> f64 {
        self.time_to_ready.get_sample_sum()
    }

    /// Cumulative count per finite bucket upper bound
    pub fn ready_buckets(&self) -> Vec<(f64, u64)> {
        self.time_to_ready
            .metric()
            .get_histogram()
            .get_bucket()
            .iter()
            .map(|b| (b.get_upper_bound(), b.get_cumulative_count()))
            .collect()
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.get()
    }
}

/// Static info labels describing how this tester is configured
pub fn static_info(config: &TestConfig, interval: Duration, version: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("replicas".to_string(), config.replicas.to_string()),
        ("test_timeout".to_string(), config.timeout.as_secs().to_string()),
        (
            "keep_running_sec".to_string(),
            config.keep_alive.as_secs().to_string(),
        ),
        ("interval_sec".to_string(), interval.as_secs().to_string()),
        ("test_image".to_string(), config.image.clone()),
        ("test_args".to_string(), config.args.join(",")),
        ("version".to_string(), version.to_string()),
    ])
}

/// Structured logger for probe events
///
/// Provides consistent JSON-formatted logging for cycle milestones so that
/// log pipelines can key on the `event` field.
#[derive(Clone)]
pub struct StructuredLogger {
    namespace: String,
}

impl StructuredLogger {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// Log tester startup
    pub fn log_startup(&self, version: &str, single: bool) {
        info!(
            event = "tester_started",
            namespace = %self.namespace,
            version = %version,
            single = single,
            "Scheduler tester started"
        );
    }

    /// Log tester shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "tester_shutdown",
            namespace = %self.namespace,
            reason = %reason,
            "Scheduler tester shutting down"
        );
    }

    pub fn log_cycle_started(&self, deployment: &str, replicas: i32, timeout: Duration, keep: Duration) {
        info!(
            event = "cycle_started",
            namespace = %self.namespace,
            deployment = %deployment,
            replicas = replicas,
            timeout_secs = timeout.as_secs(),
            keep_secs = keep.as_secs(),
            "Deploying canary"
        );
    }

    pub fn log_create_failed(&self, deployment: &str, error: &dyn std::error::Error) {
        warn!(
            event = "create_failed",
            namespace = %self.namespace,
            deployment = %deployment,
            error = %error,
            "Failed to create canary deployment, skipping cycle"
        );
    }

    pub fn log_ready(&self, deployment: &str, replicas: i32, elapsed: Duration) {
        info!(
            event = "deployment_ready",
            namespace = %self.namespace,
            deployment = %deployment,
            replicas = replicas,
            duration_secs = elapsed.as_secs_f64(),
            "All {} pods ready after {:.2}s",
            replicas,
            elapsed.as_secs_f64()
        );
    }

    pub fn log_timeout(&self, deployment: &str, ready: i32, replicas: i32) {
        warn!(
            event = "deployment_timeout",
            namespace = %self.namespace,
            deployment = %deployment,
            ready = ready,
            replicas = replicas,
            "Timeout: only {} of {} pods ready",
            ready,
            replicas
        );
    }

    pub fn log_cancelled(&self, deployment: &str, ready: i32) {
        info!(
            event = "cycle_cancelled",
            namespace = %self.namespace,
            deployment = %deployment,
            ready = ready,
            "Cycle interrupted by shutdown, cleaning up"
        );
    }

    pub fn log_cleanup(&self, deployment: &str) {
        info!(
            event = "deployment_deleted",
            namespace = %self.namespace,
            deployment = %deployment,
            "Deleted canary deployment"
        );
    }

    pub fn log_cleanup_failed(&self, deployment: &str, error: &dyn std::error::Error) {
        warn!(
            event = "delete_failed",
            namespace = %self.namespace,
            deployment = %deployment,
            error = %error,
            "Failed to delete canary deployment; it will be swept on next start"
        );
    }

    pub fn log_leftover(&self, deployment: &str) {
        info!(
            event = "leftover_deleted",
            namespace = %self.namespace,
            deployment = %deployment,
            "Cleaned up leftover deployment"
        );
    }
}
