//! Deployment synthesis
//!
//! Precedence from lowest to highest: live object, global template,
//! generated labels and sidecar annotations, deployment override,
//! deploy config replicas and image.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use serde_json::{Map, Value};

use super::{prune_empty, selector_labels, stamp_metadata, AppInputs, APP_CONTAINER};
use crate::annotations::{INJECTION_ENABLED, SIDECAR_INJECTION};
use crate::crd::DeployConfig;
use crate::template::TemplateSnapshot;
use crate::Error;

/// Build the desired Deployment for one deploy config
///
/// `existing` is the live Deployment if there is one. Replicas are only
/// written when the deploy config sets them; otherwise whatever the live
/// object (or template) carries is kept.
pub fn synthesize_workload(
    existing: Option<&Deployment>,
    inputs: &AppInputs,
    dc: &DeployConfig,
    template: &TemplateSnapshot,
) -> Result<Deployment, Error> {
    let mut doc = match existing {
        Some(live) => serde_json::to_value(live)?,
        None => Value::Object(Map::new()),
    };
    if let Some(tmpl) = template.document() {
        json_patch::merge(&mut doc, tmpl);
    }
    let mut deployment = from_document(doc)?;

    apply_labels(&mut deployment, &dc.name);
    apply_sidecar_annotations(&mut deployment, &inputs.sidecar_annotations);

    if let Some(overlay) = &inputs.deployment_override {
        let mut doc = serde_json::to_value(&deployment)?;
        json_patch::merge(&mut doc, overlay);
        deployment = from_document(doc)?;
    }

    let spec = deployment.spec.get_or_insert_with(DeploymentSpec::default);
    if let Some(replicas) = dc.replicas {
        spec.replicas = Some(replicas);
    }
    ensure_app_container(spec, &dc.image);

    stamp_metadata(&mut deployment.metadata, &dc.name, inputs);
    Ok(deployment)
}

/// Image of the `app` container, if the Deployment has one
pub fn app_image(deployment: &Deployment) -> Option<&str> {
    deployment
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == APP_CONTAINER)?
        .image
        .as_deref()
}

/// Deserialize a Deployment document, filling the required skeleton first
fn from_document(mut doc: Value) -> Result<Deployment, Error> {
    ensure_skeleton(&mut doc);
    serde_json::from_value(doc).map_err(|e| Error::serialization_for("Deployment", e.to_string()))
}

/// Make sure the fields Deployment requires exist so overlays may be partial
fn ensure_skeleton(doc: &mut Value) {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    doc["apiVersion"] = Value::from("apps/v1");
    doc["kind"] = Value::from("Deployment");

    let spec = object_entry(doc, "spec");
    object_entry(spec, "selector");
    let pod_spec = object_entry(object_entry(spec, "template"), "spec");
    if !pod_spec.get("containers").is_some_and(Value::is_array) {
        pod_spec["containers"] = Value::Array(Vec::new());
    }
}

fn object_entry<'a>(value: &'a mut Value, key: &str) -> &'a mut Value {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    let slot = &mut value[key];
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    slot
}

/// Selector is exactly the generated labels; object and pod labels gain them
fn apply_labels(deployment: &mut Deployment, variant: &str) {
    let generated = selector_labels(variant);

    deployment
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(generated.clone());

    let spec = deployment.spec.get_or_insert_with(DeploymentSpec::default);
    spec.selector = LabelSelector {
        match_labels: Some(generated.clone()),
        match_expressions: None,
    };
    spec.template
        .metadata
        .get_or_insert_with(Default::default)
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(generated);
}

/// Mirror the app's sidecar annotations onto the pod template
///
/// Stale sidecar annotations from an earlier pass are removed, and the
/// injection label tracks whether any remain.
fn apply_sidecar_annotations(deployment: &mut Deployment, sidecar: &BTreeMap<String, String>) {
    let spec = deployment.spec.get_or_insert_with(DeploymentSpec::default);
    let pod_meta = spec.template.metadata.get_or_insert_with(Default::default);

    let annotations = pod_meta.annotations.get_or_insert_with(BTreeMap::new);
    annotations.retain(|k, _| !k.starts_with(SIDECAR_INJECTION) || sidecar.contains_key(k));
    annotations.extend(sidecar.iter().map(|(k, v)| (k.clone(), v.clone())));
    prune_empty(&mut pod_meta.annotations);

    let labels = pod_meta.labels.get_or_insert_with(BTreeMap::new);
    if sidecar.is_empty() {
        labels.remove(SIDECAR_INJECTION);
    } else {
        labels.insert(SIDECAR_INJECTION.to_string(), INJECTION_ENABLED.to_string());
    }
    prune_empty(&mut pod_meta.labels);
}

/// Exactly one `app` container, running `image`; other containers untouched
fn ensure_app_container(spec: &mut DeploymentSpec, image: &str) {
    let pod = spec.template.spec.get_or_insert_with(Default::default);

    let mut seen = false;
    pod.containers.retain(|c| {
        if c.name != APP_CONTAINER {
            return true;
        }
        let keep = !seen;
        seen = true;
        keep
    });

    match pod.containers.iter_mut().find(|c| c.name == APP_CONTAINER) {
        Some(container) => container.image = Some(image.to_string()),
        None => pod.containers.push(Container {
            name: APP_CONTAINER.to_string(),
            image: Some(image.to_string()),
            ..Default::default()
        }),
    }
}
