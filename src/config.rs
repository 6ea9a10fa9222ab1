//! Operator runtime configuration
//!
//! Everything here is parsed from the command line (with environment
//! fallbacks) by `main` and handed to the runner and webhook server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Args;

use crate::telemetry::LogFormat;
use crate::template::DEFAULT_TEMPLATE_KEY;
use crate::Error;

/// Default template ConfigMap location
pub const DEFAULT_TEMPLATE_CONFIG: &str = "shepherd-system/shepherd-template";

/// Default webhook listener
pub const DEFAULT_WEBHOOK_ADDR: &str = "0.0.0.0:9443";

/// A namespaced object reference written as `namespace/name`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectKey {
    /// Namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Parse `namespace/name`; both halves must be non-empty
    pub fn parse(raw: &str) -> Result<Self, Error> {
        match raw.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self {
                    namespace: ns.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(Error::validation(format!(
                "expected <namespace>/<name>, got {raw:?}"
            ))),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Controller and webhook settings
#[derive(Args, Clone, Debug)]
pub struct OperatorConfig {
    /// ConfigMap holding the global deployment template, as namespace/name
    #[arg(
        long,
        env = "SHEPHERD_TEMPLATE_CONFIG",
        default_value = DEFAULT_TEMPLATE_CONFIG
    )]
    pub template_config: ObjectKey,

    /// Data key within the template ConfigMap
    #[arg(long, env = "SHEPHERD_TEMPLATE_KEY", default_value = DEFAULT_TEMPLATE_KEY)]
    pub template_key: String,

    /// Listen address for the admission webhook server
    #[arg(long, env = "SHEPHERD_WEBHOOK_ADDR", default_value = DEFAULT_WEBHOOK_ADDR)]
    pub webhook_addr: SocketAddr,

    /// PEM certificate for the webhook server; the server is off without it
    #[arg(long, env = "SHEPHERD_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for the webhook server
    #[arg(long, env = "SHEPHERD_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Log line format
    #[arg(long, env = "SHEPHERD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,

    /// Upper bound on the requeue delay after failed reconciliations, in seconds
    #[arg(long, env = "SHEPHERD_REQUEUE_MAX_SECS", default_value_t = 300)]
    pub requeue_max_secs: u64,
}

impl OperatorConfig {
    /// Certificate and key paths when both are configured
    pub fn webhook_tls(&self) -> Option<(&PathBuf, &PathBuf)> {
        self.tls_cert.as_ref().zip(self.tls_key.as_ref())
    }

    /// Upper bound on the requeue delay
    pub fn requeue_max(&self) -> Duration {
        Duration::from_secs(self.requeue_max_secs)
    }
}
