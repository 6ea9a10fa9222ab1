//! Reserved annotation keys and their payload parsers
//!
//! Flags are plain `"true"` strings. The three structured payloads
//! (deployment override, sidecar containers, ingress annotations) parse into
//! `Result<_, Error::MalformedOverlay>`; a payload that fails to parse is never
//! silently dropped.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::Value;

use crate::Error;

/// Every annotation whose key starts with this is copied onto pod templates.
/// The same key doubles as the pod-template label marking injection.
pub const SIDECAR_INJECTION: &str = "shepherd.dev/sidecar-injection";

/// JSON array of containers appended to pods at admission
pub const SIDECAR_CONTAINERS: &str = "shepherd.dev/sidecar-injection-containers";

/// Refuse deletion while `"true"`
pub const PROTECTED: &str = "shepherd.dev/protected";

/// Skip workload updates that change neither image nor replicas
pub const STRICT_UPDATE: &str = "shepherd.dev/strict-update";

/// Hold stable updates until the canary is healthy
pub const STRICT_RELEASE: &str = "shepherd.dev/strict-release";

/// Partial Deployment document merged over the synthesized workload
pub const DEPLOYMENT_OVERRIDE: &str = "shepherd.dev/deployment-override";

/// Route canary traffic through the canary Ingress
pub const CANARY_INGRESS: &str = "shepherd.dev/canary-ingress";

/// Derive the canary weight from available replicas
pub const CANARY_ROLLING_WEIGHT: &str = "shepherd.dev/canary-rolling-weight";

/// JSON array of single-entry string maps merged onto every Ingress
pub const INGRESS_ANNOTATIONS: &str = "shepherd.dev/ingress-annotations";

/// Comma-separated keys the ingress overlay last wrote, kept on the Ingress
pub const APPLIED_INGRESS_ANNOTATIONS: &str = "shepherd.dev/applied-ingress-annotations";

/// The only value that turns a flag on
pub const TRUE_VALUE: &str = "true";

/// Value of the pod-template injection label
pub const INJECTION_ENABLED: &str = "true";

/// Read a boolean flag annotation
pub fn flag(meta: &ObjectMeta, key: &str) -> bool {
    meta.annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .is_some_and(|v| v == TRUE_VALUE)
}

/// Boolean annotations read once per reconciliation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AppFlags {
    /// `shepherd.dev/protected`
    pub protected: bool,
    /// `shepherd.dev/strict-update`
    pub strict_update: bool,
    /// `shepherd.dev/strict-release`
    pub strict_release: bool,
    /// `shepherd.dev/canary-ingress`
    pub canary_ingress: bool,
    /// `shepherd.dev/canary-rolling-weight`
    pub canary_rolling_weight: bool,
}

impl AppFlags {
    /// Read every flag from object metadata
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        Self {
            protected: flag(meta, PROTECTED),
            strict_update: flag(meta, STRICT_UPDATE),
            strict_release: flag(meta, STRICT_RELEASE),
            canary_ingress: flag(meta, CANARY_INGRESS),
            canary_rolling_weight: flag(meta, CANARY_ROLLING_WEIGHT),
        }
    }
}

/// Annotations carrying the sidecar-injection prefix
pub fn sidecar_annotations(meta: &ObjectMeta) -> BTreeMap<String, String> {
    meta.annotations
        .iter()
        .flatten()
        .filter(|(k, _)| k.starts_with(SIDECAR_INJECTION))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Parse the deployment-override document, if present
///
/// The payload must be a JSON object; anything else is malformed.
pub fn deployment_override(meta: &ObjectMeta) -> Result<Option<Value>, Error> {
    let Some(raw) = meta.annotations.as_ref().and_then(|a| a.get(DEPLOYMENT_OVERRIDE)) else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw)
        .map_err(|e| Error::malformed_overlay(DEPLOYMENT_OVERRIDE, e.to_string()))?;
    if !value.is_object() {
        return Err(Error::malformed_overlay(
            DEPLOYMENT_OVERRIDE,
            "expected a JSON object",
        ));
    }
    Ok(Some(value))
}

/// Parse the sidecar container list from a set of annotations, if present
pub fn sidecar_containers(
    annotations: &BTreeMap<String, String>,
) -> Result<Option<Vec<Container>>, Error> {
    let Some(raw) = annotations.get(SIDECAR_CONTAINERS) else {
        return Ok(None);
    };
    serde_json::from_str::<Vec<Container>>(raw)
        .map(Some)
        .map_err(|e| Error::malformed_overlay(SIDECAR_CONTAINERS, e.to_string()))
}

/// Parse the ingress annotation list into ordered key/value pairs
///
/// Later entries overwrite earlier ones when merged onto a map.
pub fn ingress_annotations(meta: &ObjectMeta) -> Result<Vec<(String, String)>, Error> {
    let Some(raw) = meta.annotations.as_ref().and_then(|a| a.get(INGRESS_ANNOTATIONS)) else {
        return Ok(Vec::new());
    };
    let entries: Vec<BTreeMap<String, String>> = serde_json::from_str(raw)
        .map_err(|e| Error::malformed_overlay(INGRESS_ANNOTATIONS, e.to_string()))?;
    Ok(entries.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            annotations: Some(
                pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    #[test]
    fn test_flags_require_exact_true() {
        let m = meta(&[
            (PROTECTED, "true"),
            (STRICT_UPDATE, "True"),
            (STRICT_RELEASE, "yes"),
            (CANARY_INGRESS, "true"),
        ]);
        let flags = AppFlags::from_meta(&m);
        assert!(flags.protected);
        assert!(!flags.strict_update);
        assert!(!flags.strict_release);
        assert!(flags.canary_ingress);
        assert!(!flags.canary_rolling_weight);

        assert_eq!(AppFlags::from_meta(&ObjectMeta::default()), AppFlags::default());
    }

    #[test]
    fn test_sidecar_annotations_match_prefix() {
        let m = meta(&[
            (SIDECAR_CONTAINERS, "[]"),
            ("shepherd.dev/sidecar-injection-mode", "strict"),
            (PROTECTED, "true"),
        ]);
        let copied = sidecar_annotations(&m);
        assert_eq!(copied.len(), 2);
        assert!(copied.contains_key(SIDECAR_CONTAINERS));
        assert!(!copied.contains_key(PROTECTED));
    }

    /// Story: A broken override annotation is surfaced, not ignored
    #[test]
    fn story_malformed_override_is_an_error() {
        let m = meta(&[(DEPLOYMENT_OVERRIDE, "{\"spec\": ")]);
        let err = deployment_override(&m).unwrap_err();
        assert!(matches!(err, Error::MalformedOverlay { ref annotation, .. } if annotation == DEPLOYMENT_OVERRIDE));

        let m = meta(&[(DEPLOYMENT_OVERRIDE, "[1, 2]")]);
        assert!(deployment_override(&m).is_err());
    }

    #[test]
    fn test_override_absent_and_present() {
        assert_eq!(deployment_override(&ObjectMeta::default()).unwrap(), None);

        let m = meta(&[(DEPLOYMENT_OVERRIDE, r#"{"spec":{"minReadySeconds":10}}"#)]);
        let v = deployment_override(&m).unwrap().unwrap();
        assert_eq!(v["spec"]["minReadySeconds"], 10);
    }

    #[test]
    fn test_sidecar_containers_parse() {
        let mut a = BTreeMap::new();
        assert!(sidecar_containers(&a).unwrap().is_none());

        a.insert(
            SIDECAR_CONTAINERS.to_string(),
            r#"[{"name":"proxy","image":"envoy:v1.30"}]"#.to_string(),
        );
        let containers = sidecar_containers(&a).unwrap().unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].name, "proxy");

        a.insert(SIDECAR_CONTAINERS.to_string(), r#"{"name":"proxy"}"#.to_string());
        assert!(sidecar_containers(&a).is_err());
    }

    #[test]
    fn test_ingress_annotations_keep_order() {
        let m = meta(&[(
            INGRESS_ANNOTATIONS,
            r#"[{"nginx.ingress.kubernetes.io/proxy-body-size":"8m"},{"nginx.ingress.kubernetes.io/proxy-body-size":"16m"}]"#,
        )]);
        let pairs = ingress_annotations(&m).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].1, "16m");

        let m = meta(&[(INGRESS_ANNOTATIONS, r#"{"a":"b"}"#)]);
        assert!(ingress_annotations(&m).is_err());
        assert!(ingress_annotations(&ObjectMeta::default()).unwrap().is_empty());
    }
}
