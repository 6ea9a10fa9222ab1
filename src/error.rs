//! Error types for the Shepherd operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries enough context (app name, annotation key, call site)
//! to explain a stalled reconciliation from the log line alone.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Shepherd operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Policy rejection (invalid spec, protected deletion)
    #[error("validation error for {app}: {message}")]
    Validation {
        /// Name of the ShepherdApp that was rejected
        app: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.deployConfigs[0].type")
        field: Option<String>,
    },

    /// A structured annotation payload failed to parse
    #[error("malformed overlay in annotation {annotation}: {message}")]
    MalformedOverlay {
        /// The annotation key carrying the payload
        annotation: String,
        /// Parser message
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "index", "webhook")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    ///
    /// For simple validation errors without app context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            app: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with app context
    pub fn validation_for(app: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            app: app.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with app context and field path
    pub fn validation_for_field(
        app: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            app: app.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a malformed-overlay error for an annotation payload
    pub fn malformed_overlay(annotation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::MalformedOverlay {
            annotation: annotation.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific resource kind
    pub fn serialization_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(msg: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// HTTP status code of the underlying API error, if any
    fn api_code(&self) -> Option<u16> {
        match self {
            Self::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }

    /// The object (or one of its dependencies) no longer exists
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// A concurrent writer changed the object between read and write
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// Returns true if this error is transient and the operation should be retried
    ///
    /// Policy rejections need a spec change, so retrying only burns API calls.
    /// Client-side API errors are permanent except conflicts and throttling.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kube { source } => match source {
                kube::Error::Api(ae) => {
                    !(400..500).contains(&ae.code) || ae.code == 409 || ae.code == 429
                }
                _ => true,
            },
            Self::Validation { .. } => false,
            Self::MalformedOverlay { .. } => true,
            Self::Serialization { .. } => true,
            Self::Internal { .. } => true,
        }
    }

    /// Returns the app name if this error is associated with a specific ShepherdApp
    pub fn app(&self) -> Option<&str> {
        match self {
            Self::Validation { app, .. } if app != UNKNOWN_CONTEXT => Some(app),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
