//! Test helpers for integration tests
//!
//! Provides utilities for managing the kind cluster, installing the CRD, and
//! running the controller in-process against it.

use std::collections::BTreeMap;
use std::future::Future;
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

use k8s_openapi::api::core::v1::{ConfigMap, Namespace};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Config, CustomResourceExt};
use tokio::sync::OnceCell;
use tokio::time::sleep;

use shepherd::config::{ObjectKey, OperatorConfig};
use shepherd::controller::FIELD_MANAGER;
use shepherd::controller_runner;
use shepherd::crd::{DeployConfig, ShepherdApp, ShepherdAppSpec};
use shepherd::telemetry::LogFormat;
use shepherd::CRD_NAME;

/// Name of the kind cluster used for integration tests
pub const TEST_CLUSTER_NAME: &str = "shepherd-integration-test";

/// Namespace holding test apps and the template ConfigMap
pub const TEST_NAMESPACE: &str = "shepherd-test";

/// Template ConfigMap used by the in-process controller
pub const TEMPLATE_NAME: &str = "shepherd-template";

static CLUSTER_INIT: OnceLock<Result<(), String>> = OnceLock::new();
static CRD_INSTALLED: OnceCell<Result<(), String>> = OnceCell::const_new();
static CONTROLLER: OnceLock<()> = OnceLock::new();

/// Check if a kind cluster with the given name exists
pub fn kind_cluster_exists(name: &str) -> bool {
    let output = Command::new("kind")
        .args(["get", "clusters"])
        .output()
        .expect("failed to run kind");

    let clusters = String::from_utf8_lossy(&output.stdout);
    clusters.lines().any(|line| line.trim() == name)
}

/// Create a kind cluster for testing
pub fn create_kind_cluster(name: &str) -> Result<(), String> {
    if kind_cluster_exists(name) {
        println!("Kind cluster '{name}' already exists, reusing it");
        return Ok(());
    }

    println!("Creating kind cluster '{name}'...");
    let output = Command::new("kind")
        .args(["create", "cluster", "--name", name, "--wait", "60s"])
        .output()
        .map_err(|e| format!("failed to run kind: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "failed to create kind cluster: {}",
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}

/// Apply the ShepherdApp CRD and the test namespace
async fn install_crd(client: &Client) -> Result<(), kube::Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    crds.patch(
        CRD_NAME,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&ShepherdApp::crd()),
    )
    .await?;

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => {}
        Err(kube::Error::Api(e)) if e.code == 409 => {}
        Err(e) => return Err(e),
    }

    // Wait for CRD to be established
    sleep(Duration::from_secs(2)).await;
    Ok(())
}

/// Create a Kubernetes client connected to the test cluster
pub async fn create_test_client() -> Result<Client, String> {
    let context_name = format!("kind-{TEST_CLUSTER_NAME}");

    let config = Config::from_kubeconfig(&kube::config::KubeConfigOptions {
        context: Some(context_name),
        ..Default::default()
    })
    .await
    .map_err(|e| format!("failed to load kubeconfig: {e}"))?;

    Client::try_from(config).map_err(|e| format!("failed to create client: {e}"))
}

/// Ensure the test cluster is ready and the controller is running
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    CLUSTER_INIT
        .get_or_init(|| create_kind_cluster(TEST_CLUSTER_NAME))
        .clone()?;

    CRD_INSTALLED
        .get_or_init(|| async {
            let client = create_test_client().await?;
            install_crd(&client)
                .await
                .map_err(|e| format!("failed to install CRD: {e}"))
        })
        .await
        .clone()?;

    CONTROLLER.get_or_init(spawn_controller);

    create_test_client().await
}

/// Run the controller on its own thread so it outlives any single test runtime
fn spawn_controller() {
    std::thread::spawn(|| {
        let runtime = tokio::runtime::Runtime::new().expect("failed to build controller runtime");
        runtime.block_on(async {
            let client = create_test_client()
                .await
                .expect("failed to create controller client");
            let config = OperatorConfig {
                template_config: ObjectKey {
                    namespace: TEST_NAMESPACE.to_string(),
                    name: TEMPLATE_NAME.to_string(),
                },
                template_key: "deployment".to_string(),
                webhook_addr: "127.0.0.1:0".parse().expect("valid addr"),
                tls_cert: None,
                tls_key: None,
                log_format: LogFormat::Text,
                requeue_max_secs: 10,
            };
            controller_runner::run(client, &config).await;
        });
    });
}

/// Build a ShepherdApp in the test namespace
pub fn app(name: &str, configs: Vec<DeployConfig>, annotations: &[(&str, &str)]) -> ShepherdApp {
    let mut app = ShepherdApp::new(
        name,
        ShepherdAppSpec {
            deploy_configs: configs,
            ..Default::default()
        },
    );
    app.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    app.metadata.annotations = Some(
        annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
    );
    app.spec.service.enable = true;
    app.spec.service.port = 80;
    app
}

/// A deploy config entry
pub fn deploy_config(name: &str, image: &str, replicas: i32, deploy_type: &str) -> DeployConfig {
    DeployConfig {
        name: name.to_string(),
        image: image.to_string(),
        replicas: Some(replicas),
        deploy_type: deploy_type.to_string(),
    }
}

/// Publish the template document
pub async fn set_template(client: &Client, document: &str) {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some(TEMPLATE_NAME.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "deployment".to_string(),
            document.to_string(),
        )])),
        ..Default::default()
    };
    api.patch(
        TEMPLATE_NAME,
        &PatchParams::apply("shepherd-tests").force(),
        &Patch::Apply(&cm),
    )
    .await
    .expect("failed to apply template");
}

/// Poll until `check` yields a value or the timeout passes
pub async fn wait_for<T, F, Fut>(what: &str, timeout: Duration, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = check().await {
            return value;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(500)).await;
    }
}
