//! Child resource compiler for Shepherd
//!
//! Turns a ShepherdApp and one of its deploy configs into the child objects
//! that realize it:
//! - [`workload`]: the Deployment (template overlay, labels, sidecar
//!   annotations, deployment override, replicas, `app` container)
//! - [`endpoint`]: the Service selecting the workload's pods
//! - [`route`]: the Ingress, including canary routing metadata
//!
//! Every compiler starts from the live child when one exists so that
//! server-assigned fields survive an update-in-place, and returns an object
//! with `resourceVersion` stripped.
//!
//! # Usage
//!
//! ```text
//! let inputs = AppInputs::from_app(&app)?;
//! let deployment = synthesize_workload(existing.as_ref(), &inputs, &dc, &template)?;
//! let service = synthesize_endpoint(existing_svc.as_ref(), &inputs, &dc);
//! let ingress = synthesize_route(existing_ing.as_ref(), &inputs, &dc, &status);
//! ```

pub mod endpoint;
pub mod route;
pub mod workload;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use serde_json::Value;

use crate::annotations::{self, AppFlags};
use crate::crd::{IngressConfig, ServiceConfig, ShepherdApp};
use crate::Error;

pub use endpoint::synthesize_endpoint;
pub use route::synthesize_route;
pub use workload::synthesize_workload;

/// Label recording which operator created an object
pub const CREATED_BY_LABEL: &str = "app.kubernetes.io/created-by";

/// Value of [`CREATED_BY_LABEL`] on every child
pub const CREATED_BY_VALUE: &str = "shepherd";

/// Label selecting a variant's pods; value is the deploy config name
pub const APP_LABEL: &str = "app";

/// Name of the container whose image a deploy config controls
pub const APP_CONTAINER: &str = "app";

/// Everything about a ShepherdApp the compilers need, parsed once per pass
///
/// Building this up front means a malformed overlay fails the pass before
/// any child is written.
#[derive(Clone, Debug)]
pub struct AppInputs {
    /// ShepherdApp name
    pub name: String,
    /// Namespace shared by the app and all children
    pub namespace: String,
    /// Controller reference stamped on every child
    pub owner: OwnerReference,
    /// Boolean annotations
    pub flags: AppFlags,
    /// Annotations copied onto pod templates
    pub sidecar_annotations: BTreeMap<String, String>,
    /// Parsed `deployment-override` document
    pub deployment_override: Option<Value>,
    /// Parsed `ingress-annotations` entries, in order
    pub ingress_annotations: Vec<(String, String)>,
    /// Ingress settings
    pub ingress: IngressConfig,
    /// Service settings
    pub service: ServiceConfig,
}

impl AppInputs {
    /// Collect and parse compiler inputs from a ShepherdApp
    pub fn from_app(app: &ShepherdApp) -> Result<Self, Error> {
        let name = app.name_any();
        let namespace = app
            .namespace()
            .ok_or_else(|| Error::validation_for(&name, "ShepherdApp has no namespace"))?;
        let owner = app.controller_owner_ref(&()).ok_or_else(|| {
            Error::internal_with_context(
                format!("ShepherdApp {namespace}/{name} has no uid"),
                "compiler",
            )
        })?;

        // Pods inherit the container list; a bad one would fail every pod admission
        let sidecar_annotations = annotations::sidecar_annotations(&app.metadata);
        annotations::sidecar_containers(&sidecar_annotations)?;

        Ok(Self {
            name,
            namespace,
            owner,
            flags: AppFlags::from_meta(&app.metadata),
            sidecar_annotations,
            deployment_override: annotations::deployment_override(&app.metadata)?,
            ingress_annotations: annotations::ingress_annotations(&app.metadata)?,
            ingress: app.spec.ingress.clone(),
            service: app.spec.service.clone(),
        })
    }
}

/// Label selector matching every child the operator creates
pub fn child_selector() -> String {
    format!("{CREATED_BY_LABEL}={CREATED_BY_VALUE}")
}

/// Labels every variant's pods carry and its selector matches
pub fn selector_labels(variant: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (APP_LABEL.to_string(), variant.to_string()),
        (CREATED_BY_LABEL.to_string(), CREATED_BY_VALUE.to_string()),
    ])
}

/// Stamp name, namespace, created-by label and controller reference
///
/// Other owner references are kept; a previous controller reference is
/// replaced. The resource version is cleared so the caller decides which
/// version to write against.
pub(crate) fn stamp_metadata(meta: &mut ObjectMeta, name: &str, inputs: &AppInputs) {
    meta.name = Some(name.to_string());
    meta.namespace = Some(inputs.namespace.clone());
    meta.labels
        .get_or_insert_with(BTreeMap::new)
        .insert(CREATED_BY_LABEL.to_string(), CREATED_BY_VALUE.to_string());

    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.uid != inputs.owner.uid && r.controller != Some(true));
    refs.push(inputs.owner.clone());

    meta.resource_version = None;
}

/// Collapse `Some(empty)` maps to `None` as the API server would
pub(crate) fn prune_empty(map: &mut Option<BTreeMap<String, String>>) {
    if map.as_ref().is_some_and(BTreeMap::is_empty) {
        *map = None;
    }
}
