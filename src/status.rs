//! Status aggregation across deploy configs
//!
//! Status is rebuilt in full from the live workloads every pass, one entry
//! per deploy config in declaration order.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;

use crate::crd::{ConditionStatus, DeployConfig, DeployStatus, ShepherdAppStatus};

const AVAILABLE: &str = "Available";
const PROGRESSING: &str = "Progressing";

/// Compute the app status from its deploy configs and live workloads
///
/// `workloads` is keyed by workload name, which equals the deploy config
/// name. A missing workload yields zero replicas and unknown conditions.
pub fn compute_status(
    configs: &[DeployConfig],
    workloads: &BTreeMap<String, Deployment>,
) -> ShepherdAppStatus {
    let deploy_status: Vec<DeployStatus> = configs
        .iter()
        .map(|dc| entry_for(dc, workloads.get(&dc.name)))
        .collect();
    let available_replicas = deploy_status.iter().map(|s| s.available_replicas).sum();

    ShepherdAppStatus {
        deploy_status,
        available_replicas,
    }
}

fn entry_for(dc: &DeployConfig, workload: Option<&Deployment>) -> DeployStatus {
    let observed = workload.and_then(|w| w.status.as_ref());
    let condition = |kind: &str| {
        observed
            .and_then(|s| s.conditions.as_ref())
            .and_then(|cs| cs.iter().find(|c| c.type_ == kind))
            .map_or(ConditionStatus::Unknown, |c| ConditionStatus::from_k8s(&c.status))
    };

    DeployStatus {
        name: dc.name.clone(),
        deploy_type: dc.deploy_type.clone(),
        available_replicas: observed.and_then(|s| s.available_replicas).unwrap_or(0),
        available_status: condition(AVAILABLE),
        progressing_status: condition(PROGRESSING),
    }
}
