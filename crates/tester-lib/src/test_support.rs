//! In-memory [`ClusterClient`] and fixtures shared by unit tests

use crate::cluster::{async_trait, ClusterClient, ReadyCountStream};
use crate::error::{ClusterError, ClusterResult};
use crate::models::{DeploymentRef, ReadyCountEvent, TestConfig};
use k8s_openapi::api::apps::v1::Deployment;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_stream::wrappers::ReceiverStream;

pub fn sample_config() -> TestConfig {
    TestConfig {
        namespace: "probe".to_string(),
        image: "busybox:1.36".to_string(),
        args: vec!["sleep".to_string(), "999".to_string()],
        replicas: 3,
        timeout: Duration::from_secs(30),
        keep_alive: Duration::from_secs(1),
        cpu_limit: "100m".to_string(),
        memory_limit: "50Mi".to_string(),
    }
}

/// One scripted step of a fake watch stream, timed from when the watch opens
#[derive(Debug, Clone)]
pub enum WatchStep {
    Ready { at: Duration, ready: Option<i32> },
    Error { at: Duration, message: String },
    /// Keep the stream open until the server-side timeout closes it
    HoldOpen,
}

impl WatchStep {
    pub fn ready(at_millis: u64, ready: Option<i32>) -> Self {
        WatchStep::Ready {
            at: Duration::from_millis(at_millis),
            ready,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredDeployment {
    namespace: String,
    name: String,
    labels: BTreeMap<String, String>,
}

#[derive(Default)]
struct FakeState {
    deployments: Vec<StoredDeployment>,
    created: Vec<(String, Instant)>,
    create_attempts: usize,
    deleted: Vec<(String, Instant)>,
    delete_attempts: usize,
    watch_selectors: Vec<String>,
    watch_scripts: VecDeque<Vec<WatchStep>>,
    default_script: Vec<WatchStep>,
    fail_creates: bool,
    fail_deletes: bool,
    fail_lists: bool,
    fail_watches: bool,
}

/// Deployment store with scripted watch streams and failure injection
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(|l| l == v).unwrap_or(false),
            None => false,
        })
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, namespace: &str, name: &str, labels: &[(&str, &str)]) {
        self.state.lock().unwrap().deployments.push(StoredDeployment {
            namespace: namespace.to_string(),
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
    }

    /// Script used by every watch without a queued script
    pub fn script_watches(&self, steps: Vec<WatchStep>) {
        self.state.lock().unwrap().default_script = steps;
    }

    /// Script for the next watch only
    pub fn push_watch(&self, steps: Vec<WatchStep>) {
        self.state.lock().unwrap().watch_scripts.push_back(steps);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.state.lock().unwrap().fail_creates = fail;
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().unwrap().fail_deletes = fail;
    }

    pub fn fail_lists(&self, fail: bool) {
        self.state.lock().unwrap().fail_lists = fail;
    }

    pub fn fail_watches(&self, fail: bool) {
        self.state.lock().unwrap().fail_watches = fail;
    }

    pub fn exists(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .deployments
            .iter()
            .any(|d| d.namespace == namespace && d.name == name)
    }

    pub fn created(&self) -> Vec<String> {
        self.state.lock().unwrap().created.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn created_at(&self) -> Vec<Instant> {
        self.state.lock().unwrap().created.iter().map(|(_, t)| *t).collect()
    }

    pub fn create_attempts(&self) -> usize {
        self.state.lock().unwrap().create_attempts
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn deleted_at(&self) -> Vec<Instant> {
        self.state.lock().unwrap().deleted.iter().map(|(_, t)| *t).collect()
    }

    pub fn delete_attempts(&self) -> usize {
        self.state.lock().unwrap().delete_attempts
    }

    pub fn watch_selectors(&self) -> Vec<String> {
        self.state.lock().unwrap().watch_selectors.clone()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn ping(&self) -> ClusterResult<String> {
        Ok("v1.28.0-fake".to_string())
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> ClusterResult<String> {
        let mut state = self.state.lock().unwrap();
        state.create_attempts += 1;

        let name = deployment.metadata.name.clone().unwrap_or_default();
        if state.fail_creates {
            return Err(ClusterError::Create {
                name,
                message: "admission webhook denied the request".to_string(),
            });
        }
        if state
            .deployments
            .iter()
            .any(|d| d.namespace == namespace && d.name == name)
        {
            return Err(ClusterError::Create {
                name,
                message: "already exists".to_string(),
            });
        }

        state.deployments.push(StoredDeployment {
            namespace: namespace.to_string(),
            name: name.clone(),
            labels: deployment.metadata.labels.clone().unwrap_or_default(),
        });
        state.created.push((name.clone(), Instant::now()));
        Ok(name)
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> ClusterResult<Vec<DeploymentRef>> {
        let state = self.state.lock().unwrap();
        if state.fail_lists {
            return Err(ClusterError::List {
                selector: label_selector.to_string(),
                message: "forbidden".to_string(),
            });
        }
        Ok(state
            .deployments
            .iter()
            .filter(|d| d.namespace == namespace && selector_matches(label_selector, &d.labels))
            .map(|d| DeploymentRef {
                namespace: d.namespace.clone(),
                name: d.name.clone(),
            })
            .collect())
    }

    async fn watch_deployments(
        &self,
        _namespace: &str,
        label_selector: &str,
        timeout: Duration,
    ) -> ClusterResult<ReadyCountStream> {
        let steps = {
            let mut state = self.state.lock().unwrap();
            state.watch_selectors.push(label_selector.to_string());
            if state.fail_watches {
                return Err(ClusterError::Watch("connection refused".to_string()));
            }
            state
                .watch_scripts
                .pop_front()
                .unwrap_or_else(|| state.default_script.clone())
        };

        let name = label_selector
            .split(',')
            .find_map(|term| term.strip_prefix("test="))
            .unwrap_or_default()
            .to_string();

        let (tx, rx) = mpsc::channel(16);
        let opened = Instant::now();
        let closes_at = opened + timeout;

        tokio::spawn(async move {
            for step in steps {
                let (at, item) = match step {
                    WatchStep::Ready { at, ready } => (
                        at,
                        Ok(ReadyCountEvent {
                            name: name.clone(),
                            event_type: "MODIFIED",
                            ready_replicas: ready,
                        }),
                    ),
                    WatchStep::Error { at, message } => (at, Err(ClusterError::Watch(message))),
                    WatchStep::HoldOpen => {
                        sleep_until(closes_at).await;
                        return;
                    }
                };
                if at >= timeout {
                    return;
                }
                sleep_until(opened + at).await;
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let mut state = self.state.lock().unwrap();
        state.delete_attempts += 1;
        if state.fail_deletes {
            return Err(ClusterError::Delete {
                name: name.to_string(),
                message: "etcd leader changed".to_string(),
            });
        }
        state
            .deployments
            .retain(|d| !(d.namespace == namespace && d.name == name));
        state.deleted.push((name.to_string(), Instant::now()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matching() {
        let labels = BTreeMap::from([
            ("app".to_string(), "scheduletester".to_string()),
            ("test".to_string(), "scheduletest-1".to_string()),
        ]);
        assert!(selector_matches("app=scheduletester", &labels));
        assert!(selector_matches("app=scheduletester,test=scheduletest-1", &labels));
        assert!(!selector_matches("app=scheduletester,test=scheduletest-2", &labels));
        assert!(!selector_matches("tier=web", &labels));
    }
}
