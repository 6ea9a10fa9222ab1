//! Wiring of the ShepherdApp controller and its supporting watchers
//!
//! Two long-running tasks share one context: the kube-rs `Controller` for
//! ShepherdApp, owning Deployment, Service and Ingress, and a ConfigMap
//! watcher feeding the template cache and re-driving every app when the
//! template changes. The reconciler lists child workloads itself, so no
//! separate child cache can lag behind the controller's own watches.

use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::controller::{Config as ControllerConfig, Controller};
use kube::runtime::watcher::{self, Config as WatcherConfig, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use tracing::{debug, error, info, warn};

use crate::compiler::child_selector;
use crate::config::{ObjectKey, OperatorConfig};
use crate::controller::{error_policy, reconcile, Context};
use crate::crd::ShepherdApp;
use crate::retry::{RequeueBackoff, RetryConfig};
use crate::template::TemplateCache;

/// Server-side watch timeout, kept under the default client read timeout
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Window in which bursts of events for one app collapse into one pass
pub const RECONCILE_DEBOUNCE: Duration = Duration::from_secs(1);

fn child_watch_config() -> WatcherConfig {
    WatcherConfig::default()
        .labels(&child_selector())
        .timeout(WATCH_TIMEOUT_SECS)
}

/// Run the controller and its watchers until shutdown
pub async fn run(client: Client, config: &OperatorConfig) {
    let template = Arc::new(TemplateCache::new(config.template_key.clone()));
    let backoff = RequeueBackoff::new(RetryConfig::requeue(config.requeue_max()));
    let ctx = Arc::new(Context::from_client(client.clone(), template.clone(), backoff));

    // One slot: a queued reconcile-all covers any number of template edits
    let (trigger_tx, trigger_rx) = mpsc::channel(0);

    info!(
        template = %config.template_config,
        template_key = %config.template_key,
        "starting ShepherdApp controller"
    );

    tokio::select! {
        _ = run_app_controller(client.clone(), ctx, trigger_rx) => {
            info!("ShepherdApp controller stopped");
        }
        _ = run_template_watcher(client, config.template_config.clone(), template, trigger_tx) => {
            warn!("template watch ended");
        }
    }
}

/// Drive the ShepherdApp controller
pub async fn run_app_controller(
    client: Client,
    ctx: Arc<Context>,
    reconcile_all: mpsc::Receiver<()>,
) {
    let apps: Api<ShepherdApp> = Api::all(client.clone());
    Controller::new(apps, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .owns(Api::<Deployment>::all(client.clone()), child_watch_config())
        .owns(Api::<Service>::all(client.clone()), child_watch_config())
        .owns(Api::<Ingress>::all(client), child_watch_config())
        .with_config(ControllerConfig::default().debounce(RECONCILE_DEBOUNCE))
        .reconcile_all_on(reconcile_all)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((app, action)) => {
                    debug!(app = %app, ?action, "ShepherdApp reconciliation completed");
                }
                Err(e) => {
                    error!(error = ?e, "ShepherdApp reconciliation error");
                }
            }
        })
        .await;
}

/// Keep the template cache in step with its ConfigMap
pub async fn run_template_watcher(
    client: Client,
    key: ObjectKey,
    cache: Arc<TemplateCache>,
    mut reconcile_all: mpsc::Sender<()>,
) {
    let api: Api<ConfigMap> = Api::namespaced(client, &key.namespace);
    let config = WatcherConfig::default()
        .fields(&format!("metadata.name={}", key.name))
        .timeout(WATCH_TIMEOUT_SECS);
    let mut events = watcher::watcher(api, config).default_backoff().boxed();

    while let Some(event) = events.next().await {
        match event {
            Ok(event) => {
                if !on_template_event(&cache, event, &mut reconcile_all) {
                    return;
                }
            }
            Err(e) => warn!(template = %key, error = %e, "template watch error"),
        }
    }
}

/// Apply one template event; returns false once the controller is gone
fn on_template_event(
    cache: &TemplateCache,
    event: Event<ConfigMap>,
    reconcile_all: &mut mpsc::Sender<()>,
) -> bool {
    if !cache.handle_event(event) {
        return true;
    }
    match reconcile_all.try_send(()) {
        Ok(()) => {
            info!("template changed, reconciling all apps");
            true
        }
        // A reconcile-all is already queued
        Err(e) if e.is_full() => true,
        Err(_) => false,
    }
}
