//! Deletion protection via a finalizer
//!
//! Every live ShepherdApp carries [`FINALIZER`]. Once deletion is requested
//! the finalizer is removed unless the app is annotated protected, in which
//! case the removal is refused and the app stays until the annotation is
//! lifted.

use kube::ResourceExt;

use crate::annotations::AppFlags;
use crate::crd::ShepherdApp;

/// Finalizer token placed on every ShepherdApp
pub const FINALIZER: &str = "shepherd.dev/protection";

/// Message returned whenever a protected app would lose its finalizer
pub const DELETE_PROTECTED_MESSAGE: &str = "cannot delete protected resources";

/// What the reconciler must do about the finalizer this pass
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizerAction {
    /// Nothing to do
    None,
    /// Register the finalizer
    Add,
    /// Deletion requested and allowed: drop the finalizer
    Remove,
    /// Deletion requested but the app is protected
    Refuse,
}

/// Whether the app carries the finalizer
pub fn has_finalizer(app: &ShepherdApp) -> bool {
    app.finalizers().iter().any(|f| f == FINALIZER)
}

/// Whether deletion of the app has been requested
pub fn is_deleting(app: &ShepherdApp) -> bool {
    app.metadata.deletion_timestamp.is_some()
}

/// Decide the finalizer transition for this pass
pub fn transition(app: &ShepherdApp, flags: &AppFlags) -> FinalizerAction {
    match (is_deleting(app), has_finalizer(app)) {
        (false, false) => FinalizerAction::Add,
        (true, true) if flags.protected => FinalizerAction::Refuse,
        (true, true) => FinalizerAction::Remove,
        _ => FinalizerAction::None,
    }
}

/// Finalizer list with ours appended
pub fn with_finalizer(app: &ShepherdApp) -> Vec<String> {
    let mut finalizers = app.finalizers().to_vec();
    if !finalizers.iter().any(|f| f == FINALIZER) {
        finalizers.push(FINALIZER.to_string());
    }
    finalizers
}

/// Finalizer list with ours removed; foreign finalizers are kept
pub fn without_finalizer(app: &ShepherdApp) -> Vec<String> {
    app.finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect()
}
