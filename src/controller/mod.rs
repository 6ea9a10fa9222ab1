//! Controller for ShepherdApp resources
//!
//! Observe the app and its children, derive the desired children, and apply
//! the difference. Cluster access goes through [`AppKubeClient`] so the whole
//! pass runs against a mock in tests.

mod app;
mod apply;
mod client;

pub use app::{error_policy, reconcile, Context};
pub use apply::{create_or_update, ApplyOutcome};
pub use client::{AppKubeClient, AppKubeClientImpl, ChildKind, ChildObject, FIELD_MANAGER};
