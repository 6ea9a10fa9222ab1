//! Pod mutating webhook: sidecar injection
//!
//! Pods created from a ShepherdApp workload inherit the app's
//! `shepherd.dev/sidecar-injection-containers` annotation through the pod
//! template. On CREATE the listed containers are appended to the pod spec,
//! skipping any whose name the pod already uses, and the change is returned
//! as a JSON patch.

use axum::Json;
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use tracing::{debug, error, info, instrument, warn};

use crate::annotations::sidecar_containers;
use crate::Error;

/// Handle mutating admission review for Pods
pub async fn mutate_handler(
    Json(body): Json<AdmissionReview<Pod>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<Pod> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(mutate_pod(&req).into_review())
}

#[instrument(skip(request), fields(uid = %request.uid, namespace = ?request.namespace))]
fn mutate_pod(request: &AdmissionRequest<Pod>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);

    if request.operation != Operation::Create {
        return response;
    }
    let Some(pod) = &request.object else {
        debug!("No pod object in request, allowing unchanged");
        return response;
    };

    match sidecar_patch(pod) {
        Ok(None) => response,
        Ok(Some(patch)) => {
            info!(pod = ?pod.metadata.generate_name, ops = patch.0.len(), "injecting sidecars");
            match response.with_patch(patch) {
                Ok(response) => response,
                Err(e) => {
                    error!(error = %e, "Failed to encode sidecar patch");
                    AdmissionResponse::from(request).deny(e.to_string())
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "rejecting pod with malformed sidecar annotation");
            AdmissionResponse::from(request).deny(e.to_string())
        }
    }
}

/// Pod with the annotated sidecars appended, or `None` when nothing changes
pub fn inject_sidecars(pod: &Pod) -> Result<Option<Pod>, Error> {
    let Some(annotations) = pod.metadata.annotations.as_ref() else {
        return Ok(None);
    };
    let Some(sidecars) = sidecar_containers(annotations)? else {
        return Ok(None);
    };

    let mut mutated = pod.clone();
    let spec = mutated.spec.get_or_insert_with(Default::default);
    let before = spec.containers.len();
    for sidecar in sidecars {
        if spec.containers.iter().all(|c| c.name != sidecar.name) {
            spec.containers.push(sidecar);
        }
    }

    if spec.containers.len() == before {
        return Ok(None);
    }
    Ok(Some(mutated))
}

/// RFC 6902 patch turning the pod into its injected form
pub fn sidecar_patch(pod: &Pod) -> Result<Option<json_patch::Patch>, Error> {
    let Some(mutated) = inject_sidecars(pod)? else {
        return Ok(None);
    };
    let original = serde_json::to_value(pod)?;
    let mutated = serde_json::to_value(&mutated)?;
    Ok(Some(json_patch::diff(&original, &mutated)))
}
