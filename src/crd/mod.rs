//! Custom Resource Definitions for Shepherd
//!
//! This module contains the CRD definitions used by the Shepherd operator.

mod app;
mod types;

pub use app::{
    DeployConfig, IngressConfig, ServiceConfig, ShepherdApp, ShepherdAppSpec, ShepherdAppStatus,
};
pub use types::{ConditionStatus, DeployStatus, DeployType};

/// API version of the ShepherdApp kind, as written on owner references
pub const API_VERSION: &str = "shepherd.dev/v1alpha1";

/// Kind of the desired-state object, as written on owner references
pub const KIND: &str = "ShepherdApp";
