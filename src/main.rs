//! Shepherd Operator - ShepherdApp reconciliation and canary rollouts

use clap::{Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};
use tracing::{error, info};

use shepherd::config::OperatorConfig;
use shepherd::controller::FIELD_MANAGER;
use shepherd::controller_runner;
use shepherd::crd::ShepherdApp;
use shepherd::retry::{retry_with_backoff, RetryConfig};
use shepherd::telemetry::{init_telemetry, TelemetryConfig};
use shepherd::{webhook, CRD_NAME};

/// Shepherd - Kubernetes operator for ShepherdApp workloads
#[derive(Parser, Debug)]
#[command(name = "shepherd", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Reconciles ShepherdApps and, when a certificate and key are
    /// configured, serves the admission webhooks.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&ShepherdApp::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        format: cli.config.log_format,
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
    }
}

/// Install the CRD, start the webhook server, and run the controller
async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    if let Some((cert, key)) = config.webhook_tls() {
        let (addr, cert, key) = (config.webhook_addr, cert.clone(), key.clone());
        tokio::spawn(async move {
            if let Err(e) = webhook::serve(addr, &cert, &key).await {
                error!(error = %e, "admission webhook server stopped");
            }
        });
    } else {
        info!("no webhook certificate configured, admission webhooks disabled");
    }

    controller_runner::run(client, &config).await;
    info!("shutting down");
    Ok(())
}

/// Apply the ShepherdApp CRD with server-side apply
///
/// Retries while the API server is still coming up.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();
    let crd = ShepherdApp::crd();
    let patch = Patch::Apply(&crd);

    info!(crd = CRD_NAME, "Installing ShepherdApp CRD...");
    retry_with_backoff(&RetryConfig::with_max_attempts(5), "install_crd", || {
        crds.patch(CRD_NAME, &params, &patch)
    })
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install ShepherdApp CRD: {}", e))?;

    info!("ShepherdApp CRD installed/updated");
    Ok(())
}
