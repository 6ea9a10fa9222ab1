//! Rollout gate
//!
//! Decides per deploy config whether this pass may touch its workload, and
//! computes the canary traffic weight. Everything here is pure so the gate
//! can be tested without a cluster.

use k8s_openapi::api::apps::v1::Deployment;

use crate::annotations::AppFlags;
use crate::compiler::workload::app_image;
use crate::crd::{DeployConfig, DeployType, ShepherdAppStatus};

/// Why a variant was left alone this pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Strict release: no healthy canary yet
    CanaryNotReady,
    /// Strict update: image and replicas already match
    NoChange,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::CanaryNotReady => write!(f, "canary not ready"),
            SkipReason::NoChange => write!(f, "no image or replica change"),
        }
    }
}

/// Outcome of the gate for one variant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// Synthesize and apply the variant's children
    Apply,
    /// Leave the variant as it is
    Skip(SkipReason),
}

/// Decide whether `dc` may be updated this pass
///
/// `status` must be the status already persisted in this pass and
/// `existing` the live workload for `dc`, if any.
pub fn decide(
    flags: &AppFlags,
    dc: &DeployConfig,
    status: &ShepherdAppStatus,
    existing: Option<&Deployment>,
) -> GateDecision {
    if flags.strict_release && dc.kind() == Some(DeployType::Stable) && !canary_healthy(status) {
        return GateDecision::Skip(SkipReason::CanaryNotReady);
    }

    if flags.strict_update {
        if let Some(live) = existing {
            if unchanged(dc, live) {
                return GateDecision::Skip(SkipReason::NoChange);
            }
        }
    }

    GateDecision::Apply
}

/// The first canary entry exists and reports healthy
fn canary_healthy(status: &ShepherdAppStatus) -> bool {
    status
        .first_of(DeployType::Canary)
        .is_some_and(|s| s.is_healthy())
}

fn unchanged(dc: &DeployConfig, live: &Deployment) -> bool {
    let same_image = app_image(live) == Some(dc.image.as_str());
    let live_replicas = live.spec.as_ref().and_then(|s| s.replicas);
    let same_replicas = dc.replicas.is_none() || dc.replicas == live_replicas;
    same_image && same_replicas
}

/// Percentage of traffic for the canary, rounded to the nearest integer
///
/// No available replicas at all yields 0.
pub fn canary_weight(canary_available: i32, total_available: i32) -> u8 {
    if total_available <= 0 || canary_available <= 0 {
        return 0;
    }
    let pct = (f64::from(canary_available) / f64::from(total_available) * 100.0).round();
    pct.clamp(0.0, 100.0) as u8
}
