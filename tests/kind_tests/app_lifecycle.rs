//! Stories about an app's life: creation, children, and protected deletion

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;

use shepherd::annotations::{PROTECTED, SIDECAR_CONTAINERS};
use shepherd::compiler::{CREATED_BY_LABEL, CREATED_BY_VALUE};
use shepherd::crd::ShepherdApp;
use shepherd::finalizer::FINALIZER;

use super::helpers::{app, deploy_config, ensure_test_cluster, wait_for, TEST_NAMESPACE};

const TIMEOUT: Duration = Duration::from_secs(60);

async fn cleanup_app(client: &Client, name: &str) {
    let api: Api<ShepherdApp> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let _ = api
        .patch(
            name,
            &PatchParams::default(),
            &Patch::Merge(json!({"metadata": {"annotations": {PROTECTED: null}}})),
        )
        .await;
    let _ = api.delete(name, &DeleteParams::default()).await;
}

/// Story: A team creates an app and gets a Deployment and Service per variant
///
/// Expected behavior:
/// - the finalizer is attached
/// - each variant's Deployment runs the declared image with the declared replicas
/// - children carry the created-by label and point back at the app
/// - status lists one entry per variant
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_team_creates_app_and_children_appear() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let apps: Api<ShepherdApp> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let services: Api<Service> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "lifecycle-create";
    cleanup_app(&client, name).await;

    let desired = app(
        name,
        vec![
            deploy_config("lifecycle-create", "nginx:1.27", 2, "stable"),
            deploy_config("lifecycle-create-canary", "nginx:1.27", 1, "canary"),
        ],
        &[(
            SIDECAR_CONTAINERS,
            r#"[{"name":"busybox","image":"busybox:1.36","command":["sleep","3600"]}]"#,
        )],
    );
    apps.create(&PostParams::default(), &desired)
        .await
        .expect("failed to create app");

    let stable = wait_for("stable deployment", TIMEOUT, || {
        let deployments = deployments.clone();
        async move { deployments.get_opt("lifecycle-create").await.ok().flatten() }
    })
    .await;
    let spec = stable.spec.as_ref().expect("deployment spec");
    assert_eq!(spec.replicas, Some(2));
    let pod_spec = spec.template.spec.as_ref().expect("pod spec");
    assert_eq!(pod_spec.containers[0].name, "app");
    assert_eq!(pod_spec.containers[0].image.as_deref(), Some("nginx:1.27"));
    assert_eq!(
        stable
            .metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(CREATED_BY_LABEL))
            .map(String::as_str),
        Some(CREATED_BY_VALUE)
    );
    let owner = &stable.metadata.owner_references.as_ref().expect("owner")[0];
    assert_eq!(owner.kind, "ShepherdApp");
    assert_eq!(owner.name, name);

    // Sidecar annotations ride along on the pod template
    let template_annotations = spec
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.annotations.clone())
        .unwrap_or_default();
    assert!(template_annotations.contains_key(SIDECAR_CONTAINERS));

    wait_for("canary service", TIMEOUT, || {
        let services = services.clone();
        async move { services.get_opt("lifecycle-create-canary").await.ok().flatten() }
    })
    .await;

    let app = wait_for("status with two entries", TIMEOUT, || {
        let apps = apps.clone();
        async move {
            apps.get(name)
                .await
                .ok()
                .filter(|a| a.status.as_ref().is_some_and(|s| s.deploy_status.len() == 2))
        }
    })
    .await;
    assert!(app.metadata.finalizers.unwrap_or_default().iter().any(|f| f == FINALIZER));

    cleanup_app(&client, name).await;
}

/// Story: A protected app survives a delete until protection is lifted
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_protected_app_survives_delete() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let apps: Api<ShepherdApp> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "lifecycle-protected";
    cleanup_app(&client, name).await;

    let desired = app(
        name,
        vec![deploy_config(name, "nginx:1.27", 1, "stable")],
        &[(PROTECTED, "true")],
    );
    apps.create(&PostParams::default(), &desired)
        .await
        .expect("failed to create app");

    wait_for("finalizer", TIMEOUT, || {
        let apps = apps.clone();
        async move {
            apps.get(name)
                .await
                .ok()
                .filter(|a| a.finalizers().iter().any(|f| f == FINALIZER))
        }
    })
    .await;

    // Without the admission webhook the API server accepts the delete; the
    // finalizer keeps the object around
    apps.delete(name, &DeleteParams::default())
        .await
        .expect("failed to request delete");
    tokio::time::sleep(Duration::from_secs(5)).await;
    let still_there = apps.get(name).await.expect("protected app must remain");
    assert!(still_there.metadata.deletion_timestamp.is_some());

    // Lifting protection lets the finalizer go
    apps.patch(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({"metadata": {"annotations": {PROTECTED: "false"}}})),
    )
    .await
    .expect("failed to lift protection");

    wait_for("app deletion", TIMEOUT, || {
        let apps = apps.clone();
        async move {
            match apps.get_opt(name).await {
                Ok(None) => Some(()),
                _ => None,
            }
        }
    })
    .await;
}
