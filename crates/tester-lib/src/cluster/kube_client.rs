//! [`ClusterClient`] backed by the Kubernetes API via kube-rs

use super::{async_trait, ClusterClient, ReadyCountStream};
use crate::error::{ClusterError, ClusterResult};
use crate::models::{DeploymentRef, ReadyCountEvent, MAX_TIMEOUT_SECS};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, DeleteParams, ListParams, PostParams, WatchEvent, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::PathBuf;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, info};

/// How to locate cluster credentials
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// kubeconfig context; uses the file's current context when unset
    pub context: Option<String>,
    /// Explicit kubeconfig path; standard discovery when unset
    pub kubeconfig: Option<PathBuf>,
}

impl ConnectOptions {
    fn kubeconfig_options(&self) -> KubeConfigOptions {
        KubeConfigOptions {
            context: self.context.clone(),
            cluster: None,
            user: None,
        }
    }
}

/// Deployment operations against a live API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Wrap an already configured client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from in-cluster credentials or a kubeconfig
    ///
    /// An explicit kubeconfig path or context always wins. Otherwise the
    /// in-cluster service account is tried first, then the default kubeconfig.
    pub async fn connect(options: &ConnectOptions) -> ClusterResult<Self> {
        let config = Self::load_config(options).await?;
        let client = Client::try_from(config).map_err(|e| {
            ClusterError::Connectivity(format!("failed to create Kubernetes client: {}", e))
        })?;
        Ok(Self::new(client))
    }

    async fn load_config(options: &ConnectOptions) -> ClusterResult<Config> {
        if let Some(path) = &options.kubeconfig {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                ClusterError::Connectivity(format!(
                    "failed to read kubeconfig from {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let config = Config::from_custom_kubeconfig(kubeconfig, &options.kubeconfig_options())
                .await
                .map_err(|e| {
                    ClusterError::Connectivity(format!("invalid kubeconfig: {}", e))
                })?;
            info!(path = %path.display(), context = ?options.context, "Configured Kubernetes client from kubeconfig");
            return Ok(config);
        }

        if options.context.is_none() {
            match Config::incluster() {
                Ok(config) => {
                    info!("Configured in-cluster Kubernetes client");
                    return Ok(config);
                }
                Err(e) => {
                    debug!(error = %e, "No in-cluster configuration, falling back to kubeconfig");
                }
            }
        }

        let config = Config::from_kubeconfig(&options.kubeconfig_options())
            .await
            .map_err(|e| {
                ClusterError::Connectivity(format!(
                    "no in-cluster configuration and no usable kubeconfig: {}",
                    e
                ))
            })?;
        info!(context = ?options.context, "Configured Kubernetes client from kubeconfig");
        Ok(config)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Server-side watch timeout in whole seconds, at least one
fn watch_timeout_secs(timeout: Duration) -> ClusterResult<u32> {
    let secs = timeout.as_secs().max(1);
    if secs > MAX_TIMEOUT_SECS {
        return Err(ClusterError::Watch(format!(
            "watch timeout of {}s exceeds the {}s limit",
            secs, MAX_TIMEOUT_SECS
        )));
    }
    Ok(secs as u32)
}

fn to_ready_event(event: WatchEvent<Deployment>) -> Option<Result<ReadyCountEvent, ClusterError>> {
    let (event_type, deployment) = match event {
        WatchEvent::Added(d) => ("ADDED", d),
        WatchEvent::Modified(d) => ("MODIFIED", d),
        WatchEvent::Deleted(d) => ("DELETED", d),
        WatchEvent::Bookmark(_) => return None,
        WatchEvent::Error(e) => {
            return Some(Err(ClusterError::Watch(format!(
                "{} ({}): {}",
                e.reason, e.code, e.message
            ))))
        }
    };

    Some(Ok(ReadyCountEvent {
        name: deployment.metadata.name.unwrap_or_default(),
        event_type,
        ready_replicas: deployment.status.and_then(|s| s.ready_replicas),
    }))
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn ping(&self) -> ClusterResult<String> {
        let version = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| ClusterError::Connectivity(format!("unable to ping cluster: {}", e)))?;
        Ok(version.git_version)
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> ClusterResult<String> {
        let requested = deployment.metadata.name.clone().unwrap_or_default();
        let created = self
            .deployments(namespace)
            .create(&PostParams::default(), deployment)
            .await
            .map_err(|e| ClusterError::Create {
                name: requested.clone(),
                message: e.to_string(),
            })?;
        Ok(created.metadata.name.unwrap_or(requested))
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> ClusterResult<Vec<DeploymentRef>> {
        let list = self
            .deployments(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|e| ClusterError::List {
                selector: label_selector.to_string(),
                message: e.to_string(),
            })?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|d| {
                let name = d.metadata.name?;
                Some(DeploymentRef {
                    namespace: d.metadata.namespace.unwrap_or_else(|| namespace.to_string()),
                    name,
                })
            })
            .collect())
    }

    async fn watch_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
        timeout: Duration,
    ) -> ClusterResult<ReadyCountStream> {
        let timeout_secs = watch_timeout_secs(timeout)?;
        let params = WatchParams::default()
            .labels(label_selector)
            .timeout(timeout_secs);

        let stream = self
            .deployments(namespace)
            .watch(&params, "0")
            .await
            .map_err(|e| ClusterError::Watch(e.to_string()))?;

        let events = stream.filter_map(|item| match item {
            Ok(event) => to_ready_event(event),
            Err(e) => Some(Err(ClusterError::Watch(e.to_string()))),
        });

        Ok(Box::pin(events))
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        match self
            .deployments(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(name = %name, "Deployment already deleted");
                Ok(())
            }
            Err(e) => Err(ClusterError::Delete {
                name: name.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
