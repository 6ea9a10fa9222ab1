//! ShepherdApp Custom Resource Definition
//!
//! A ShepherdApp declares one application as an ordered list of release
//! variants (deploy configs). The operator derives a Deployment, and
//! optionally a Service and an Ingress, for each variant.

use std::collections::HashSet;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{DeployStatus, DeployType};

/// Desired state of a ShepherdApp
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "shepherd.dev",
    version = "v1alpha1",
    kind = "ShepherdApp",
    plural = "shepherdapps",
    shortname = "sapp",
    status = "ShepherdAppStatus",
    namespaced,
    printcolumn = r#"{"name":"Available","type":"integer","jsonPath":".status.availableReplicas"}"#,
    printcolumn = r#"{"name":"Paused","type":"boolean","jsonPath":".spec.paused"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ShepherdAppSpec {
    /// Routing rule settings shared by every variant
    #[serde(default)]
    pub ingress: IngressConfig,

    /// Network endpoint settings shared by every variant
    #[serde(default)]
    pub service: ServiceConfig,

    /// Release variants, applied in declaration order
    #[serde(default)]
    pub deploy_configs: Vec<DeployConfig>,

    /// Stop reconciling children and status while true
    #[serde(default)]
    pub paused: bool,
}

/// Ingress settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    /// Create an Ingress per variant
    #[serde(default)]
    pub enable: bool,

    /// Host matched by the Ingress rule
    #[serde(default)]
    pub host: String,
}

/// Service settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Create a Service per variant
    #[serde(default)]
    pub enable: bool,

    /// Port published by the Service and targeted on the pods
    #[serde(default)]
    pub port: i32,
}

/// One named release variant
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeployConfig {
    /// Variant name; also the name of every child object
    pub name: String,

    /// Image for the `app` container
    pub image: String,

    /// Desired replicas; unset leaves the workload's current value alone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// `stable` or `canary`
    #[serde(rename = "type")]
    pub deploy_type: String,
}

impl DeployConfig {
    /// Parsed variant type, if recognised
    pub fn kind(&self) -> Option<DeployType> {
        self.deploy_type.parse().ok()
    }

    /// Whether this variant is a canary
    pub fn is_canary(&self) -> bool {
        self.kind() == Some(DeployType::Canary)
    }
}

/// Observed state of a ShepherdApp
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ShepherdAppStatus {
    /// One entry per deploy config, in declaration order
    #[serde(default)]
    pub deploy_status: Vec<DeployStatus>,

    /// Sum of `availableReplicas` across all entries
    #[serde(default)]
    pub available_replicas: i32,
}

impl ShepherdAppStatus {
    /// Status entry for the named variant
    pub fn entry(&self, name: &str) -> Option<&DeployStatus> {
        self.deploy_status.iter().find(|s| s.name == name)
    }

    /// First status entry of the given variant type
    pub fn first_of(&self, kind: DeployType) -> Option<&DeployStatus> {
        self.deploy_status.iter().find(|s| s.kind() == Some(kind))
    }
}

impl ShepherdAppSpec {
    /// Validate the desired state of an app
    ///
    /// Returns the first violation found, with the offending field path.
    pub fn validate(&self, app: &str) -> Result<(), crate::Error> {
        let mut seen = HashSet::new();
        for (i, dc) in self.deploy_configs.iter().enumerate() {
            if dc.name.is_empty() {
                return Err(crate::Error::validation_for_field(
                    app,
                    format!("spec.deployConfigs[{i}].name"),
                    "deploy config name must not be empty",
                ));
            }
            if !seen.insert(dc.name.as_str()) {
                return Err(crate::Error::validation_for_field(
                    app,
                    format!("spec.deployConfigs[{i}].name"),
                    format!("duplicate deploy config name {:?}", dc.name),
                ));
            }
            if dc.kind().is_none() {
                return Err(crate::Error::validation_for_field(
                    app,
                    format!("spec.deployConfigs[{i}].type"),
                    format!(
                        "invalid deploy type {:?}, expected one of: stable, canary",
                        dc.deploy_type
                    ),
                ));
            }
        }

        if self.service.enable && !(1..=65535).contains(&self.service.port) {
            return Err(crate::Error::validation_for_field(
                app,
                "spec.service.port",
                format!("service port {} out of range 1-65535", self.service.port),
            ));
        }

        Ok(())
    }
}
