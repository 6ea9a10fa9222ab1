//! ShepherdApp controller implementation
//!
//! One pass: load the app, settle its finalizer, recompute and persist status,
//! then walk the deploy configs in order, letting the rollout gate decide
//! which variants get their children synthesized and applied.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::apply::{create_or_update, ApplyOutcome};
use super::client::{AppKubeClient, AppKubeClientImpl, ChildKind, ChildObject};
use crate::annotations::AppFlags;
use crate::compiler::{synthesize_endpoint, synthesize_route, synthesize_workload, AppInputs};
use crate::crd::{DeployConfig, ShepherdApp, ShepherdAppStatus};
use crate::finalizer::{self, FinalizerAction, DELETE_PROTECTED_MESSAGE};
use crate::index::OwnerIndex;
use crate::retry::RequeueBackoff;
use crate::rollout::{self, GateDecision};
use crate::status::compute_status;
use crate::template::{TemplateCache, TemplateSnapshot};
use crate::Error;

/// Shared state handed to every reconciliation
pub struct Context {
    /// Cluster access (trait object for testability)
    pub kube: Arc<dyn AppKubeClient>,
    /// Global deployment template
    pub template: Arc<TemplateCache>,
    /// Per-app failure streaks for requeue delays
    pub backoff: RequeueBackoff,
}

impl Context {
    /// Create a context from its parts
    pub fn new(
        kube: Arc<dyn AppKubeClient>,
        template: Arc<TemplateCache>,
        backoff: RequeueBackoff,
    ) -> Self {
        Self {
            kube,
            template,
            backoff,
        }
    }

    /// Create a context talking to a live cluster
    pub fn from_client(client: Client, template: Arc<TemplateCache>, backoff: RequeueBackoff) -> Self {
        Self::new(
            Arc::new(AppKubeClientImpl::new(client)),
            template,
            backoff,
        )
    }

    /// Create a context for unit tests around a mock client
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn AppKubeClient>) -> Self {
        Self::new(
            kube,
            Arc::new(TemplateCache::new(crate::template::DEFAULT_TEMPLATE_KEY)),
            RequeueBackoff::default(),
        )
    }
}

fn app_key(app: &ShepherdApp) -> String {
    format!("{}/{}", app.namespace().unwrap_or_default(), app.name_any())
}

/// Reconcile a ShepherdApp
///
/// Returns `await_change`: convergence is driven by watch events on the app,
/// its children, and the template, not by periodic requeues. Errors are
/// routed through [`error_policy`].
#[instrument(skip(app, ctx), fields(app = %app_key(&app)))]
pub async fn reconcile(app: Arc<ShepherdApp>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = app.name_any();
    let namespace = app
        .namespace()
        .ok_or_else(|| Error::validation_for(&name, "ShepherdApp has no namespace"))?;
    let key = app_key(&app);

    let Some(app) = ctx.kube.get_app(&name, &namespace).await? else {
        debug!("app no longer exists");
        ctx.backoff.reset(&key);
        return Ok(Action::await_change());
    };

    let flags = AppFlags::from_meta(&app.metadata);
    match finalizer::transition(&app, &flags) {
        FinalizerAction::Add => {
            ctx.kube
                .patch_app_finalizers(&app, finalizer::with_finalizer(&app))
                .await?;
            info!("registered finalizer");
        }
        FinalizerAction::Remove => {
            ctx.kube
                .patch_app_finalizers(&app, finalizer::without_finalizer(&app))
                .await?;
            info!("removed finalizer, children follow by garbage collection");
            ctx.backoff.reset(&key);
            return Ok(Action::await_change());
        }
        FinalizerAction::Refuse => {
            warn!("deletion requested on protected app");
            return Err(Error::validation_for(&name, DELETE_PROTECTED_MESSAGE));
        }
        FinalizerAction::None => {}
    }

    if finalizer::is_deleting(&app) {
        return Ok(Action::await_change());
    }

    if app.spec.paused {
        info!("app paused, leaving children as they are");
        return Ok(Action::await_change());
    }

    let listed = ctx.kube.list_workloads(&namespace).await?;
    let workloads = OwnerIndex::from_objects(listed).take(&name);
    let status = compute_status(&app.spec.deploy_configs, &workloads);
    if app.status.as_ref() != Some(&status) {
        ctx.kube.patch_app_status(&name, &namespace, &status).await?;
        debug!(available = status.available_replicas, "status updated");
    }

    let inputs = AppInputs::from_app(&app)?;
    let template = ctx.template.snapshot();

    for dc in &app.spec.deploy_configs {
        match rollout::decide(&inputs.flags, dc, &status, workloads.get(&dc.name)) {
            GateDecision::Apply => {}
            GateDecision::Skip(reason) => {
                info!(variant = %dc.name, %reason, "holding variant");
                continue;
            }
        }
        apply_variant(ctx.kube.as_ref(), &inputs, dc, &template, &status).await?;
    }

    ctx.backoff.reset(&key);
    Ok(Action::await_change())
}

/// Apply the workload, then the endpoint and route side by side
async fn apply_variant(
    kube: &dyn AppKubeClient,
    inputs: &AppInputs,
    dc: &DeployConfig,
    template: &TemplateSnapshot,
    status: &ShepherdAppStatus,
) -> Result<(), Error> {
    let ns = inputs.namespace.as_str();

    let workload = create_or_update(kube, ChildKind::Workload, ns, &dc.name, |current| {
        synthesize_workload(current.and_then(ChildObject::as_workload), inputs, dc, template)
            .map(ChildObject::Workload)
    })
    .await;
    settle(workload, ChildKind::Workload, dc)?;

    let endpoint = async {
        if !inputs.service.enable {
            return Ok(());
        }
        let result = create_or_update(kube, ChildKind::Endpoint, ns, &dc.name, |current| {
            Ok(ChildObject::Endpoint(synthesize_endpoint(
                current.and_then(ChildObject::as_endpoint),
                inputs,
                dc,
            )))
        })
        .await;
        settle(result, ChildKind::Endpoint, dc)
    };

    let route = async {
        if !inputs.ingress.enable {
            return Ok(());
        }
        let result = create_or_update(kube, ChildKind::Route, ns, &dc.name, |current| {
            Ok(ChildObject::Route(synthesize_route(
                current.and_then(ChildObject::as_route),
                inputs,
                dc,
                status,
            )))
        })
        .await;
        settle(result, ChildKind::Route, dc)
    };

    futures::future::try_join(endpoint, route).await?;
    Ok(())
}

/// Log an apply outcome; swallow errors the next trigger will fix
fn settle(
    result: Result<ApplyOutcome, Error>,
    kind: ChildKind,
    dc: &DeployConfig,
) -> Result<(), Error> {
    match result {
        Ok(ApplyOutcome::Unchanged) => {
            debug!(%kind, variant = %dc.name, "unchanged");
            Ok(())
        }
        Ok(outcome) => {
            info!(%kind, variant = %dc.name, %outcome, "applied");
            Ok(())
        }
        Err(e) if e.is_not_found() || e.is_conflict() => {
            warn!(%kind, variant = %dc.name, error = %e, "transient apply failure, waiting for next trigger");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Decide what to do after a failed reconciliation
///
/// Retryable errors requeue with a per-app exponential backoff; policy
/// rejections wait for the app to change.
pub fn error_policy(app: Arc<ShepherdApp>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = app_key(&app);
    let retryable = error.is_retryable();
    error!(?error, app = %key, retryable, "reconciliation failed");

    if retryable {
        Action::requeue(ctx.backoff.next_delay(&key))
    } else {
        Action::await_change()
    }
}
