//! ShepherdApp validating webhook

use axum::Json;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument};

use crate::annotations::AppFlags;
use crate::crd::ShepherdApp;
use crate::finalizer::{has_finalizer, DELETE_PROTECTED_MESSAGE};

/// Handle validating admission review for ShepherdApps
pub async fn validate_handler(
    Json(body): Json<AdmissionReview<ShepherdApp>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<ShepherdApp> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(validate_app(&req).into_review())
}

#[instrument(skip(request), fields(uid = %request.uid, app = %request.name, op = ?request.operation))]
fn validate_app(request: &AdmissionRequest<ShepherdApp>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);

    match check(request) {
        Ok(()) => {
            debug!("ShepherdApp admitted");
            response
        }
        Err(reason) => {
            info!(reason = %reason, "ShepherdApp rejected");
            response.deny(reason)
        }
    }
}

/// Rejection reason for the request, if any
fn check(request: &AdmissionRequest<ShepherdApp>) -> Result<(), String> {
    match request.operation {
        Operation::Create | Operation::Update => {
            let Some(app) = &request.object else {
                return Ok(());
            };
            app.spec
                .validate(&request.name)
                .map_err(|e| e.to_string())?;

            if request.operation == Operation::Update {
                if let Some(old) = &request.old_object {
                    check_protection_kept(old, app)?;
                }
            }
            Ok(())
        }
        Operation::Delete => match &request.old_object {
            Some(old) if AppFlags::from_meta(&old.metadata).protected => {
                Err(DELETE_PROTECTED_MESSAGE.to_string())
            }
            _ => Ok(()),
        },
        Operation::Connect => Ok(()),
    }
}

/// The finalizer may only be dropped once protection is lifted
fn check_protection_kept(old: &ShepherdApp, new: &ShepherdApp) -> Result<(), String> {
    let dropped = has_finalizer(old) && !has_finalizer(new);
    if dropped && AppFlags::from_meta(&new.metadata).protected {
        debug!(app = %new.name_any(), "refusing finalizer removal");
        return Err(DELETE_PROTECTED_MESSAGE.to_string());
    }
    Ok(())
}
