//! Kubernetes access for the ShepherdApp controller
//!
//! The reconciler only talks to the cluster through [`AppKubeClient`] so that
//! every step of a pass can be driven by a mock in tests.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use crate::compiler::child_selector;
use crate::crd::{ShepherdApp, ShepherdAppStatus};
use crate::Error;

/// Field manager used for every write the operator makes
pub const FIELD_MANAGER: &str = "shepherd-controller";

/// Kinds of child object a deploy config owns
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChildKind {
    /// `apps/v1` Deployment
    Workload,
    /// `v1` Service
    Endpoint,
    /// `networking.k8s.io/v1` Ingress
    Route,
}

impl std::fmt::Display for ChildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChildKind::Workload => write!(f, "Deployment"),
            ChildKind::Endpoint => write!(f, "Service"),
            ChildKind::Route => write!(f, "Ingress"),
        }
    }
}

/// A child object of any kind
#[derive(Clone, Debug, PartialEq)]
pub enum ChildObject {
    /// Deployment
    Workload(Deployment),
    /// Service
    Endpoint(Service),
    /// Ingress
    Route(Ingress),
}

impl ChildObject {
    /// Kind of this child
    pub fn kind(&self) -> ChildKind {
        match self {
            ChildObject::Workload(_) => ChildKind::Workload,
            ChildObject::Endpoint(_) => ChildKind::Endpoint,
            ChildObject::Route(_) => ChildKind::Route,
        }
    }

    /// Object name
    pub fn name(&self) -> String {
        match self {
            ChildObject::Workload(o) => o.name_any(),
            ChildObject::Endpoint(o) => o.name_any(),
            ChildObject::Route(o) => o.name_any(),
        }
    }

    /// Object namespace
    pub fn namespace(&self) -> Option<String> {
        match self {
            ChildObject::Workload(o) => o.namespace(),
            ChildObject::Endpoint(o) => o.namespace(),
            ChildObject::Route(o) => o.namespace(),
        }
    }

    /// Server-assigned version token
    pub fn resource_version(&self) -> Option<String> {
        match self {
            ChildObject::Workload(o) => o.resource_version(),
            ChildObject::Endpoint(o) => o.resource_version(),
            ChildObject::Route(o) => o.resource_version(),
        }
    }

    /// Overwrite the version token
    pub fn set_resource_version(&mut self, version: Option<String>) {
        let meta = match self {
            ChildObject::Workload(o) => &mut o.metadata,
            ChildObject::Endpoint(o) => &mut o.metadata,
            ChildObject::Route(o) => &mut o.metadata,
        };
        meta.resource_version = version;
    }

    /// The Deployment, if this is one
    pub fn as_workload(&self) -> Option<&Deployment> {
        match self {
            ChildObject::Workload(d) => Some(d),
            _ => None,
        }
    }

    /// The Service, if this is one
    pub fn as_endpoint(&self) -> Option<&Service> {
        match self {
            ChildObject::Endpoint(s) => Some(s),
            _ => None,
        }
    }

    /// The Ingress, if this is one
    pub fn as_route(&self) -> Option<&Ingress> {
        match self {
            ChildObject::Route(i) => Some(i),
            _ => None,
        }
    }
}

/// Cluster operations the ShepherdApp controller needs
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AppKubeClient: Send + Sync {
    /// Fetch a ShepherdApp; `None` when it no longer exists
    async fn get_app(&self, name: &str, namespace: &str) -> Result<Option<ShepherdApp>, Error>;

    /// Replace the app's finalizer list
    ///
    /// The write is guarded by the app's resource version so a concurrent
    /// edit surfaces as a conflict.
    async fn patch_app_finalizers(
        &self,
        app: &ShepherdApp,
        finalizers: Vec<String>,
    ) -> Result<(), Error>;

    /// Overwrite the app's status subresource
    async fn patch_app_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ShepherdAppStatus,
    ) -> Result<(), Error>;

    /// List the operator-created Deployments in a namespace
    ///
    /// Read straight from the API server, so the result is never older than
    /// the event that triggered the pass.
    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Deployment>, Error>;

    /// Fetch a child object; `None` when absent
    async fn get_child(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ChildObject>, Error>;

    /// Create a child object
    async fn create_child(&self, child: &ChildObject) -> Result<(), Error>;

    /// Replace a child object; its resource version must be current
    async fn replace_child(&self, child: &ChildObject) -> Result<(), Error>;
}

/// [`AppKubeClient`] backed by a live cluster
pub struct AppKubeClientImpl {
    client: Client,
}

impl AppKubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn get_opt<K>(api: Api<K>, name: &str) -> Result<Option<K>, Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?)
}

async fn create<K>(api: Api<K>, obj: &K) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    api.create(&params, obj).await?;
    Ok(())
}

async fn replace<K>(api: Api<K>, obj: &K) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    api.replace(&obj.name_any(), &params, obj).await?;
    Ok(())
}

fn namespace_of(child: &ChildObject) -> Result<String, Error> {
    child.namespace().ok_or_else(|| {
        Error::internal_with_context(
            format!("{} {} has no namespace", child.kind(), child.name()),
            "kube client",
        )
    })
}

#[async_trait]
impl AppKubeClient for AppKubeClientImpl {
    async fn get_app(&self, name: &str, namespace: &str) -> Result<Option<ShepherdApp>, Error> {
        get_opt(self.api::<ShepherdApp>(namespace), name).await
    }

    async fn patch_app_finalizers(
        &self,
        app: &ShepherdApp,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let namespace = app
            .namespace()
            .ok_or_else(|| Error::validation_for(app.name_any(), "ShepherdApp has no namespace"))?;
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": app.resource_version(),
            }
        });
        self.api::<ShepherdApp>(&namespace)
            .patch(
                &app.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    async fn patch_app_status(
        &self,
        name: &str,
        namespace: &str,
        status: &ShepherdAppStatus,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "status": status });
        self.api::<ShepherdApp>(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Deployment>, Error> {
        let params = ListParams::default().labels(&child_selector());
        let list = self.api::<Deployment>(namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn get_child(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ChildObject>, Error> {
        Ok(match kind {
            ChildKind::Workload => get_opt(self.api(namespace), name)
                .await?
                .map(ChildObject::Workload),
            ChildKind::Endpoint => get_opt(self.api(namespace), name)
                .await?
                .map(ChildObject::Endpoint),
            ChildKind::Route => get_opt(self.api(namespace), name)
                .await?
                .map(ChildObject::Route),
        })
    }

    async fn create_child(&self, child: &ChildObject) -> Result<(), Error> {
        let namespace = namespace_of(child)?;
        match child {
            ChildObject::Workload(o) => create(self.api(&namespace), o).await,
            ChildObject::Endpoint(o) => create(self.api(&namespace), o).await,
            ChildObject::Route(o) => create(self.api(&namespace), o).await,
        }
    }

    async fn replace_child(&self, child: &ChildObject) -> Result<(), Error> {
        let namespace = namespace_of(child)?;
        match child {
            ChildObject::Workload(o) => replace(self.api(&namespace), o).await,
            ChildObject::Endpoint(o) => replace(self.api(&namespace), o).await,
            ChildObject::Route(o) => replace(self.api(&namespace), o).await,
        }
    }
}
