//! Canary deployment builder
//!
//! Turns a [`TestConfig`] and a [`CanaryIdentity`] into the Deployment that a
//! probe cycle submits. The replicas are forced onto distinct nodes through a
//! required hostname anti-affinity, so "all replicas ready" only happens once
//! the scheduler has found room on that many nodes.

use crate::models::{CanaryIdentity, TestConfig};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, PodAffinityTerm, PodAntiAffinity, PodSecurityContext, PodSpec,
    PodTemplateSpec, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use std::collections::BTreeMap;

/// Name of the single container in the canary pod
pub const CONTAINER_NAME: &str = "canary";

/// Topology key spreading replicas one per node
pub const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// UID and fsGroup the canary runs as
pub const CANARY_UID: i64 = 1000;

/// Canary pods are killed almost immediately on delete
pub const TERMINATION_GRACE_SECONDS: i64 = 1;

/// Build the Deployment for one probe cycle
pub fn build_deployment(config: &TestConfig, identity: &CanaryIdentity) -> Deployment {
    let labels = identity.labels.clone();

    let resources: BTreeMap<String, Quantity> = BTreeMap::from([
        ("cpu".to_string(), Quantity(config.cpu_limit.clone())),
        ("memory".to_string(), Quantity(config.memory_limit.clone())),
    ]);

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(config.image.clone()),
        args: Some(config.args.clone()),
        resources: Some(ResourceRequirements {
            limits: Some(resources.clone()),
            requests: Some(resources),
            ..Default::default()
        }),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        containers: vec![container],
        affinity: Some(spread_across_nodes(&labels)),
        security_context: Some(PodSecurityContext {
            run_as_user: Some(CANARY_UID),
            fs_group: Some(CANARY_UID),
            ..Default::default()
        }),
        termination_grace_period_seconds: Some(TERMINATION_GRACE_SECONDS),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(identity.name.clone()),
            namespace: Some(config.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(config.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(identity.name.clone()),
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Required anti-affinity against every pod carrying the same labels
fn spread_across_nodes(labels: &BTreeMap<String, String>) -> Affinity {
    let match_expressions = labels
        .iter()
        .map(|(key, value)| LabelSelectorRequirement {
            key: key.clone(),
            operator: "In".to_string(),
            values: Some(vec![value.clone()]),
        })
        .collect();

    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                label_selector: Some(LabelSelector {
                    match_expressions: Some(match_expressions),
                    ..Default::default()
                }),
                topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
