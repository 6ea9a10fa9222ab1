//! Shepherd - Kubernetes operator for ShepherdApp workloads with canary-gated rollouts
//!
//! A ShepherdApp lists release variants (deploy configs). For each variant the
//! operator keeps a Deployment, and optionally a Service and an Ingress, in
//! step with the app, a cluster-wide deployment template, and the app's
//! annotations. Stable variants can be held back until their canary is
//! healthy, and canary traffic weight can follow canary availability.
//!
//! # Modules
//!
//! - [`crd`] - ShepherdApp Custom Resource Definition and status types
//! - [`annotations`] - Reserved annotation keys and payload parsers
//! - [`compiler`] - Synthesis of child Deployments, Services and Ingresses
//! - [`rollout`] - Strict-update / strict-release gate and canary weight
//! - [`status`] - Status aggregation across variants
//! - [`finalizer`] - Deletion protection
//! - [`controller`] - Reconciliation loop and Kubernetes client seam
//! - [`controller_runner`] - Controller and watcher wiring
//! - [`index`] - Owner index over child objects
//! - [`template`] - Global deployment template cache
//! - [`webhook`] - Admission webhooks (validation, sidecar injection)
//! - [`retry`] - Backoff helpers
//! - [`config`] - Runtime configuration
//! - [`telemetry`] - Logging initialization
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod annotations;
pub mod compiler;
pub mod config;
pub mod controller;
pub mod controller_runner;
pub mod crd;
pub mod error;
pub mod finalizer;
pub mod index;
pub mod retry;
pub mod rollout;
pub mod status;
pub mod telemetry;
pub mod template;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name of the ShepherdApp CustomResourceDefinition
pub const CRD_NAME: &str = "shepherdapps.shepherd.dev";
