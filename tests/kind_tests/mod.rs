//! Integration tests for the Shepherd operator
//!
//! These tests require a Kubernetes cluster (kind) and tell the story of how
//! application teams ship through ShepherdApps.
//!
//! # Test Organization
//!
//! - `app_lifecycle`: creating an app, watching its children appear, and
//!   deleting it with and without protection
//! - `rollout`: canary-first releases, strict release holding stable back,
//!   and template edits converging on every app
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod app_lifecycle;
mod helpers;
mod rollout;
