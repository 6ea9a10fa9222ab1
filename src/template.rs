//! Global deployment template cache
//!
//! One ConfigMap holds a partial Deployment document (YAML) that is merged
//! under every synthesized workload. The cache has exactly one writer, the
//! ConfigMap watcher, and hands readers an immutable `Arc` snapshot so a
//! reconciliation sees one consistent template even if it is replaced
//! mid-pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::watcher::Event;
use kube::ResourceExt;
use serde_json::Value;
use tracing::{info, warn};

use crate::Error;

/// Default ConfigMap data key holding the template
pub const DEFAULT_TEMPLATE_KEY: &str = "deployment";

/// Immutable view of the template at one point in time
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TemplateSnapshot {
    document: Option<Value>,
    resource_version: Option<String>,
}

impl TemplateSnapshot {
    /// A snapshot with no template
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from an already-parsed document
    pub fn from_document(document: Value) -> Self {
        Self {
            document: Some(document),
            resource_version: None,
        }
    }

    /// Parse the template out of a ConfigMap
    ///
    /// A missing key or blank value yields an empty snapshot. The document
    /// must be a YAML mapping.
    pub fn from_config_map(cm: &ConfigMap, key: &str) -> Result<Self, Error> {
        let raw = cm.data.as_ref().and_then(|d| d.get(key));
        let document = match raw.map(|s| s.trim()) {
            None | Some("") => None,
            Some(raw) => {
                let value: Value = serde_yaml::from_str(raw).map_err(|e| {
                    Error::serialization_for("ConfigMap", format!("template {key:?}: {e}"))
                })?;
                match value {
                    Value::Null => None,
                    Value::Object(_) => Some(value),
                    _ => {
                        return Err(Error::serialization_for(
                            "ConfigMap",
                            format!("template {key:?} must be a mapping"),
                        ))
                    }
                }
            }
        };
        Ok(Self {
            document,
            resource_version: cm.resource_version(),
        })
    }

    /// The template document, if any
    pub fn document(&self) -> Option<&Value> {
        self.document.as_ref()
    }

    /// Whether there is no template to apply
    pub fn is_empty(&self) -> bool {
        self.document.is_none()
    }
}

/// Process-wide holder of the current template snapshot
pub struct TemplateCache {
    key: String,
    current: RwLock<Arc<TemplateSnapshot>>,
    /// Set when a relist saw the ConfigMap
    seen_in_relist: AtomicBool,
}

impl TemplateCache {
    /// Create an empty cache reading the given data key
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            current: RwLock::new(Arc::new(TemplateSnapshot::empty())),
            seen_in_relist: AtomicBool::new(false),
        }
    }

    /// Current snapshot; cheap to clone and never mutated
    pub fn snapshot(&self) -> Arc<TemplateSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the snapshot wholesale; returns whether the document changed
    pub fn publish(&self, snapshot: TemplateSnapshot) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let changed = current.document != snapshot.document;
        *current = Arc::new(snapshot);
        changed
    }

    /// Parse and publish a ConfigMap; a bad document keeps the previous snapshot
    pub fn apply_config_map(&self, cm: &ConfigMap) -> bool {
        match TemplateSnapshot::from_config_map(cm, &self.key) {
            Ok(snapshot) => {
                let changed = self.publish(snapshot);
                if changed {
                    info!(
                        config_map = %cm.name_any(),
                        resource_version = ?cm.resource_version(),
                        "deployment template updated"
                    );
                }
                changed
            }
            Err(e) => {
                warn!(
                    config_map = %cm.name_any(),
                    error = %e,
                    "ignoring unparseable deployment template, keeping previous"
                );
                false
            }
        }
    }

    /// Apply one watcher event for the template ConfigMap
    ///
    /// Returns true when the template changed and apps should be re-driven.
    pub fn handle_event(&self, event: Event<ConfigMap>) -> bool {
        match event {
            Event::Apply(cm) => self.apply_config_map(&cm),
            Event::InitApply(cm) => {
                self.seen_in_relist.store(true, Ordering::SeqCst);
                self.apply_config_map(&cm)
            }
            Event::Delete(cm) => {
                info!(config_map = %cm.name_any(), "deployment template removed");
                self.publish(TemplateSnapshot::empty())
            }
            Event::Init => {
                self.seen_in_relist.store(false, Ordering::SeqCst);
                false
            }
            Event::InitDone => {
                if self.seen_in_relist.load(Ordering::SeqCst) {
                    false
                } else {
                    self.publish(TemplateSnapshot::empty())
                }
            }
        }
    }
}
