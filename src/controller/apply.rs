//! Idempotent create-or-update of child objects

use tracing::{debug, warn};

use super::client::{AppKubeClient, ChildKind, ChildObject};
use crate::Error;

/// What a create-or-update call did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object did not exist and was created
    Created,
    /// The object existed and was replaced
    Updated,
    /// The object already matched; nothing was written
    Unchanged,
}

impl std::fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyOutcome::Created => write!(f, "created"),
            ApplyOutcome::Updated => write!(f, "updated"),
            ApplyOutcome::Unchanged => write!(f, "unchanged"),
        }
    }
}

const MAX_ATTEMPTS: u32 = 2;

/// Fetch the current object, run `mutate` over it, and write the result
///
/// `mutate` receives the live object (or `None`) and returns the desired
/// object without a resource version. Nothing is written when the desired
/// object equals the live one. A conflicting concurrent write is retried
/// once from a fresh read; a second conflict is returned to the caller.
pub async fn create_or_update<F>(
    kube: &dyn AppKubeClient,
    kind: ChildKind,
    namespace: &str,
    name: &str,
    mut mutate: F,
) -> Result<ApplyOutcome, Error>
where
    F: FnMut(Option<&ChildObject>) -> Result<ChildObject, Error> + Send,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = apply_once(kube, kind, namespace, name, &mut mutate).await;
        match result {
            Err(e) if e.is_conflict() && attempt < MAX_ATTEMPTS => {
                warn!(%kind, namespace, name, attempt, "conflicting write, retrying from fresh read");
            }
            other => return other,
        }
    }
}

async fn apply_once<F>(
    kube: &dyn AppKubeClient,
    kind: ChildKind,
    namespace: &str,
    name: &str,
    mutate: &mut F,
) -> Result<ApplyOutcome, Error>
where
    F: FnMut(Option<&ChildObject>) -> Result<ChildObject, Error> + Send,
{
    let current = kube.get_child(kind, namespace, name).await?;
    let mut desired = mutate(current.as_ref())?;

    let Some(current) = current else {
        kube.create_child(&desired).await?;
        return Ok(ApplyOutcome::Created);
    };

    let version = current.resource_version();
    let mut baseline = current;
    baseline.set_resource_version(None);
    if baseline == desired {
        debug!(%kind, namespace, name, "child already converged");
        return Ok(ApplyOutcome::Unchanged);
    }

    desired.set_resource_version(version);
    kube.replace_child(&desired).await?;
    Ok(ApplyOutcome::Updated)
}
