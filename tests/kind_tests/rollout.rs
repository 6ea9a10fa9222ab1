//! Stories about releasing new images through canaries

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;

use shepherd::annotations::{CANARY_INGRESS, CANARY_ROLLING_WEIGHT, STRICT_RELEASE};
use shepherd::compiler::route::{CANARY_ANNOTATION, CANARY_WEIGHT_ANNOTATION};
use shepherd::compiler::workload::app_image;
use shepherd::crd::ShepherdApp;

use super::helpers::{
    app, deploy_config, ensure_test_cluster, set_template, wait_for, TEST_NAMESPACE,
};

const TIMEOUT: Duration = Duration::from_secs(120);

async fn cleanup_app(client: &Client, name: &str) {
    let api: Api<ShepherdApp> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let _ = api.delete(name, &DeleteParams::default()).await;
}

async fn image_of(api: &Api<Deployment>, name: &str) -> Option<String> {
    let deployment = api.get_opt(name).await.ok().flatten()?;
    app_image(&deployment).map(str::to_string)
}

/// Story: Strict release holds the stable variant until the canary is healthy
///
/// The canary starts on an image that never pulls, so no stable workload may
/// appear. Fixing the canary lets the stable release through.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_strict_release_waits_for_canary() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let apps: Api<ShepherdApp> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "rollout-strict";
    cleanup_app(&client, name).await;

    let desired = app(
        name,
        vec![
            deploy_config("rollout-strict", "nginx:1.28", 1, "stable"),
            deploy_config("rollout-strict-canary", "nginx:does-not-exist", 1, "canary"),
        ],
        &[(STRICT_RELEASE, "true")],
    );
    apps.create(&PostParams::default(), &desired)
        .await
        .expect("failed to create app");

    wait_for("canary workload", TIMEOUT, || {
        let deployments = deployments.clone();
        async move {
            image_of(&deployments, "rollout-strict-canary")
                .await
                .filter(|image| image == "nginx:does-not-exist")
        }
    })
    .await;
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(
        image_of(&deployments, "rollout-strict").await,
        None,
        "stable must not be released while the canary is unhealthy"
    );

    // Fix the canary: stable follows
    apps.patch(
        name,
        &PatchParams::default(),
        &Patch::Merge(json!({"spec": {"deployConfigs": [
            {"name": "rollout-strict", "image": "nginx:1.28", "replicas": 1, "type": "stable"},
            {"name": "rollout-strict-canary", "image": "nginx:1.28", "replicas": 1, "type": "canary"}
        ]}})),
    )
    .await
    .expect("failed to patch app");

    wait_for("stable release", TIMEOUT, || {
        let deployments = deployments.clone();
        async move {
            image_of(&deployments, "rollout-strict")
                .await
                .filter(|image| image == "nginx:1.28")
        }
    })
    .await;

    cleanup_app(&client, name).await;
}

/// Story: Canary ingress weight follows canary availability
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_canary_weight_follows_availability() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let apps: Api<ShepherdApp> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let ingresses: Api<Ingress> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "rollout-weight";
    cleanup_app(&client, name).await;

    let mut desired = app(
        name,
        vec![
            deploy_config("rollout-weight", "nginx:1.27", 3, "stable"),
            deploy_config("rollout-weight-canary", "nginx:1.27", 1, "canary"),
        ],
        &[(CANARY_INGRESS, "true"), (CANARY_ROLLING_WEIGHT, "true")],
    );
    desired.spec.ingress.enable = true;
    desired.spec.ingress.host = "weight.example.com".to_string();
    apps.create(&PostParams::default(), &desired)
        .await
        .expect("failed to create app");

    // 1 of 4 replicas available on the canary: 25%
    let annotations = wait_for("canary weight 25", TIMEOUT, || {
        let ingresses = ingresses.clone();
        async move {
            let ingress = ingresses.get_opt("rollout-weight-canary").await.ok().flatten()?;
            let annotations = ingress.metadata.annotations?;
            (annotations.get(CANARY_WEIGHT_ANNOTATION).map(String::as_str) == Some("25"))
                .then_some(annotations)
        }
    })
    .await;
    assert_eq!(annotations.get(CANARY_ANNOTATION).map(String::as_str), Some("true"));

    let stable = ingresses
        .get("rollout-weight")
        .await
        .expect("stable ingress");
    let stable_annotations = stable.metadata.annotations.unwrap_or_default();
    assert!(!stable_annotations.contains_key(CANARY_ANNOTATION));

    cleanup_app(&client, name).await;
}

/// Story: Editing the global template converges on existing apps
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_template_edit_reaches_existing_apps() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let apps: Api<ShepherdApp> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "rollout-template";
    cleanup_app(&client, name).await;

    set_template(&client, "spec:\n  minReadySeconds: 1\n").await;
    apps.create(
        &PostParams::default(),
        &app(name, vec![deploy_config(name, "nginx:1.27", 1, "stable")], &[]),
    )
    .await
    .expect("failed to create app");

    for expected in [1, 7] {
        if expected == 7 {
            set_template(&client, "spec:\n  minReadySeconds: 7\n").await;
        }
        wait_for("template applied", TIMEOUT, || {
            let deployments = deployments.clone();
            async move {
                let deployment = deployments.get_opt(name).await.ok().flatten()?;
                (deployment.spec?.min_ready_seconds == Some(expected)).then_some(())
            }
        })
        .await;
    }

    cleanup_app(&client, name).await;
}
