//! Access to the cluster's Deployment API
//!
//! The probe only needs four verbs on Deployments plus a connectivity check.
//! They sit behind [`ClusterClient`] so the cycle logic can run against the
//! real API server or an in-memory fake.

mod kube_client;

pub use kube_client::{ConnectOptions, KubeClusterClient};

use crate::error::{ClusterError, ClusterResult};
use crate::models::{DeploymentRef, ReadyCountEvent};
use k8s_openapi::api::apps::v1::Deployment;
use std::pin::Pin;
use std::time::Duration;
use tokio_stream::Stream;

pub use async_trait::async_trait;

/// Finite stream of readiness events; ends when the server-side watch times out
pub type ReadyCountStream =
    Pin<Box<dyn Stream<Item = Result<ReadyCountEvent, ClusterError>> + Send>>;

/// Deployment operations used by the tester
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Verify the API server answers; returns its version string
    async fn ping(&self) -> ClusterResult<String>;

    /// Submit a deployment, returning the name the server stored it under
    async fn create_deployment(&self, namespace: &str, deployment: &Deployment)
        -> ClusterResult<String>;

    /// List deployments in `namespace` matching an equality label selector
    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> ClusterResult<Vec<DeploymentRef>>;

    /// Open a watch on matching deployments that the server closes after `timeout`
    async fn watch_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
        timeout: Duration,
    ) -> ClusterResult<ReadyCountStream>;

    /// Delete a deployment; deleting one that is already gone succeeds
    async fn delete_deployment(&self, namespace: &str, name: &str) -> ClusterResult<()>;
}
