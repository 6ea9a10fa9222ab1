//! Shared types for Shepherd CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Release variant of a deploy config
///
/// Stored on the CRD as a plain string so that the admission webhook, not the
/// schema, owns the rejection message for unknown values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeployType {
    /// Serves the bulk of traffic; may be held back by strict release
    Stable,
    /// Receives a weighted share of traffic ahead of stable
    Canary,
}

impl DeployType {
    /// Wire representation used in `spec.deployConfigs[].type`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Canary => "canary",
        }
    }
}

impl std::str::FromStr for DeployType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stable" => Ok(Self::Stable),
            "canary" => Ok(Self::Canary),
            _ => Err(crate::Error::validation(format!(
                "invalid deploy type: {s:?}, expected one of: stable, canary"
            ))),
        }
    }
}

impl std::fmt::Display for DeployType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Map a Kubernetes condition status string onto the enum
    ///
    /// Anything other than `True`/`False` reads as `Unknown`.
    pub fn from_k8s(status: &str) -> Self {
        match status {
            "True" => Self::True,
            "False" => Self::False,
            _ => Self::Unknown,
        }
    }

    /// Whether the condition is `True`
    pub fn is_true(&self) -> bool {
        matches!(self, Self::True)
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Observed state of one deploy config's workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeployStatus {
    /// Deploy config name this entry describes
    #[serde(default)]
    pub name: String,

    /// Deploy config type at the time the status was computed
    #[serde(rename = "type", default)]
    pub deploy_type: String,

    /// Available replicas reported by the workload
    #[serde(default)]
    pub available_replicas: i32,

    /// Status of the workload's `Available` condition
    #[serde(default)]
    pub available_status: ConditionStatus,

    /// Status of the workload's `Progressing` condition
    #[serde(default)]
    pub progressing_status: ConditionStatus,
}

impl DeployStatus {
    /// Parsed variant type, if recognised
    pub fn kind(&self) -> Option<DeployType> {
        self.deploy_type.parse().ok()
    }

    /// Both `Available` and `Progressing` report `True`
    pub fn is_healthy(&self) -> bool {
        self.available_status.is_true() && self.progressing_status.is_true()
    }
}
