//! Owner index for child resources
//!
//! Groups child objects by the ShepherdApp that controls them. Only
//! controller owner references pointing at `shepherd.dev/v1alpha1`
//! `ShepherdApp` count; anything else is invisible to the index.
//!
//! The index is rebuilt every pass from a fresh namespaced listing, so a
//! reconcile triggered by a child event always sees that event's object.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use tracing::trace;

use crate::crd::{API_VERSION, KIND};

/// Name of the ShepherdApp controlling this object, if any
pub fn controller_owner(meta: &ObjectMeta) -> Option<&str> {
    meta.owner_references
        .iter()
        .flatten()
        .find(|r| r.controller == Some(true) && r.api_version == API_VERSION && r.kind == KIND)
        .map(|r| r.name.as_str())
}

/// Owner-to-children lookup for one namespace and one child kind
#[derive(Clone, Debug)]
pub struct OwnerIndex<K> {
    by_owner: BTreeMap<String, BTreeMap<String, K>>,
}

impl<K> Default for OwnerIndex<K> {
    fn default() -> Self {
        Self {
            by_owner: BTreeMap::new(),
        }
    }
}

impl<K: Resource> OwnerIndex<K> {
    /// Build the index from a namespaced listing
    pub fn from_objects(objects: impl IntoIterator<Item = K>) -> Self {
        let mut by_owner: BTreeMap<String, BTreeMap<String, K>> = BTreeMap::new();
        for obj in objects {
            let name = obj.name_any();
            let Some(owner) = controller_owner(obj.meta()).map(str::to_string) else {
                trace!(%name, "object has no ShepherdApp controller");
                continue;
            };
            by_owner.entry(owner).or_default().insert(name, obj);
        }
        Self { by_owner }
    }

    /// Remove and return the children of `owner`, keyed by child name
    pub fn take(&mut self, owner: &str) -> BTreeMap<String, K> {
        self.by_owner.remove(owner).unwrap_or_default()
    }

    /// Total number of indexed children
    pub fn len(&self) -> usize {
        self.by_owner.values().map(BTreeMap::len).sum()
    }

    /// Whether the index holds no children
    pub fn is_empty(&self) -> bool {
        self.by_owner.is_empty()
    }
}
