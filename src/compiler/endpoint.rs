//! Service synthesis

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{stamp_metadata, AppInputs, APP_LABEL};
use crate::crd::DeployConfig;

/// Name of the single port on every generated Service
pub const PORT_NAME: &str = "app";

/// Build the desired Service for one deploy config
///
/// Server-assigned fields on the live Service (cluster IP, IP families)
/// are carried over; selector and ports are owned outright.
pub fn synthesize_endpoint(existing: Option<&Service>, inputs: &AppInputs, dc: &DeployConfig) -> Service {
    let mut service = existing.cloned().unwrap_or_default();
    let port = inputs.service.port;

    let spec = service.spec.get_or_insert_with(ServiceSpec::default);
    spec.selector = Some(BTreeMap::from([(APP_LABEL.to_string(), dc.name.clone())]));
    spec.ports = Some(vec![ServicePort {
        name: Some(PORT_NAME.to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }]);

    stamp_metadata(&mut service.metadata, &dc.name, inputs);
    service
}
