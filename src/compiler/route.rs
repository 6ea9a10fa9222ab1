//! Ingress synthesis and canary routing metadata

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};

use super::{prune_empty, stamp_metadata, AppInputs};
use crate::annotations::APPLIED_INGRESS_ANNOTATIONS;
use crate::crd::{DeployConfig, DeployType, ShepherdAppStatus};
use crate::rollout::canary_weight;

/// Marks an Ingress as the canary of another with the same host
pub const CANARY_ANNOTATION: &str = "nginx.ingress.kubernetes.io/canary";

/// Percentage of traffic sent to the canary Ingress
pub const CANARY_WEIGHT_ANNOTATION: &str = "nginx.ingress.kubernetes.io/canary-weight";

const ROOT_PATH: &str = "/";
const PATH_TYPE: &str = "ImplementationSpecific";

/// Build the desired Ingress for one deploy config
///
/// `status` is the status persisted earlier in this pass; the canary weight
/// is derived from it rather than from a fresh read of the workloads.
pub fn synthesize_route(
    existing: Option<&Ingress>,
    inputs: &AppInputs,
    dc: &DeployConfig,
    status: &ShepherdAppStatus,
) -> Ingress {
    let mut ingress = existing.cloned().unwrap_or_default();

    let annotations = ingress.metadata.annotations.get_or_insert_with(BTreeMap::new);
    apply_overlay(annotations, &inputs.ingress_annotations);
    apply_canary_annotations(annotations, inputs, dc, status);
    prune_empty(&mut ingress.metadata.annotations);

    let host = Some(inputs.ingress.host.clone()).filter(|h| !h.is_empty());
    let spec = ingress.spec.get_or_insert_with(IngressSpec::default);
    spec.rules = Some(vec![IngressRule {
        host,
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                path: Some(ROOT_PATH.to_string()),
                path_type: PATH_TYPE.to_string(),
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name: dc.name.clone(),
                        port: Some(ServiceBackendPort {
                            number: Some(inputs.service.port),
                            name: None,
                        }),
                    }),
                    resource: None,
                },
            }],
        }),
    }]);

    stamp_metadata(&mut ingress.metadata, &dc.name, inputs);
    ingress
}

/// Merge the overlay in order, dropping keys a previous overlay wrote
///
/// Keys set on the Ingress by anyone else are never touched.
fn apply_overlay(annotations: &mut BTreeMap<String, String>, overlay: &[(String, String)]) {
    let current: BTreeSet<&str> = overlay.iter().map(|(k, _)| k.as_str()).collect();

    if let Some(previous) = annotations.remove(APPLIED_INGRESS_ANNOTATIONS) {
        for key in previous.split(',').filter(|k| !k.is_empty()) {
            if !current.contains(key) {
                annotations.remove(key);
            }
        }
    }

    annotations.extend(overlay.iter().cloned());
    if !current.is_empty() {
        let keys: Vec<&str> = current.into_iter().collect();
        annotations.insert(APPLIED_INGRESS_ANNOTATIONS.to_string(), keys.join(","));
    }
}

fn apply_canary_annotations(
    annotations: &mut BTreeMap<String, String>,
    inputs: &AppInputs,
    dc: &DeployConfig,
    status: &ShepherdAppStatus,
) {
    if dc.kind() != Some(DeployType::Canary) {
        annotations.remove(CANARY_ANNOTATION);
        annotations.remove(CANARY_WEIGHT_ANNOTATION);
        return;
    }

    if !inputs.flags.canary_ingress {
        annotations.insert(CANARY_ANNOTATION.to_string(), "false".to_string());
        annotations.insert(CANARY_WEIGHT_ANNOTATION.to_string(), "0".to_string());
        return;
    }

    annotations.insert(CANARY_ANNOTATION.to_string(), "true".to_string());
    if inputs.flags.canary_rolling_weight {
        let canary = status.entry(&dc.name).map_or(0, |s| s.available_replicas);
        let weight = canary_weight(canary, status.available_replicas);
        annotations.insert(CANARY_WEIGHT_ANNOTATION.to_string(), weight.to_string());
    } else {
        annotations
            .entry(CANARY_WEIGHT_ANNOTATION.to_string())
            .or_insert_with(|| "0".to_string());
    }
}
