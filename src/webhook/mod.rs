//! Admission webhooks for Shepherd
//!
//! - `POST /validate/shepherdapps`: rejects ShepherdApps with invalid deploy
//!   configs, and refuses to drop deletion protection while `protected=true`
//! - `POST /mutate/pods`: appends the containers listed in a pod's
//!   `shepherd.dev/sidecar-injection-containers` annotation
//! - `GET /healthz`
//!
//! Handlers are stateless; the server runs over TLS with certificates
//! mounted from files.

pub mod app;
pub mod pod;

use std::net::SocketAddr;
use std::path::Path;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

/// Error type for webhook operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The admission review request was invalid or malformed
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    /// An error occurred during JSON serialization/deserialization
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Certificate or key could not be loaded
    #[error("TLS config error: {0}")]
    Tls(String),

    /// The HTTP server stopped with an error
    #[error("server error: {0}")]
    Server(String),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::InvalidReview(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({"error": self.to_string()}))).into_response()
    }
}

/// Router with every admission endpoint
pub fn webhook_router() -> Router {
    Router::new()
        .route("/validate/shepherdapps", post(app::validate_handler))
        .route("/mutate/pods", post(pod::mutate_handler))
        .route("/healthz", get(|| async { "ok" }))
}

/// Serve the webhook router over TLS until the process exits
pub async fn serve(addr: SocketAddr, cert: &Path, key: &Path) -> Result<(), WebhookError> {
    let tls_config = RustlsConfig::from_pem_file(cert, key)
        .await
        .map_err(|e| WebhookError::Tls(format!("{}: {e}", cert.display())))?;

    info!(%addr, "starting admission webhook server");

    axum_server::bind_rustls(addr, tls_config)
        .serve(webhook_router().into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))
}
