//! Scheduler latency probe library
//!
//! This crate provides the core functionality for:
//! - Building canary deployments that must spread across nodes
//! - Watching a canary until all replicas are ready or time runs out
//! - Recording time-to-ready and timeouts as Prometheus metrics
//! - Sweeping canaries left behind by earlier runs
//! - Scheduling probe cycles on a fixed, self-compensating period

pub mod canary;
pub mod cluster;
pub mod cycle;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod readiness;
pub mod reconcile;
pub mod scheduler;
pub mod shutdown;

#[cfg(test)]
mod test_support;

pub use cluster::{ClusterClient, ConnectOptions, KubeClusterClient};
pub use cycle::{CycleController, CycleReport, CycleResult};
pub use error::{ClusterError, ConfigError};
pub use health::{ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use models::*;
pub use observability::{StructuredLogger, TesterMetrics};
pub use reconcile::{sweep_leftovers, SweepReport};
pub use scheduler::ProbeScheduler;
