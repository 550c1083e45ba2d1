//! Operator configuration read from the environment

use tracing::warn;

/// Namespace used when neither namespace variable is set
pub const DEFAULT_DEPLOYMENTS_NAMESPACE: &str = "kubewarden";

/// Default path of the admission server certificate
pub const DEFAULT_WEBHOOK_CERT_PATH: &str = "/etc/webhook/certs/tls.crt";

/// Default path of the admission server private key
pub const DEFAULT_WEBHOOK_KEY_PATH: &str = "/etc/webhook/certs/tls.key";

const DEPLOYMENTS_NAMESPACE_ENV: &str = "DEPLOYMENTS_NAMESPACE";
const POD_NAMESPACE_ENV: &str = "POD_NAMESPACE";
const ENABLE_METRICS_ENV: &str = "KUBEWARDEN_ENABLE_METRICS";
const WEBHOOK_CERT_PATH_ENV: &str = "WEBHOOK_CERT_PATH";
const WEBHOOK_KEY_PATH_ENV: &str = "WEBHOOK_KEY_PATH";

/// Runtime settings shared by the controllers and the servers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace holding every policy server workload and the root CA
    pub deployments_namespace: String,
    /// Whether policy servers expose their metrics port
    pub metrics_enabled: bool,
    pub webhook_cert_path: String,
    pub webhook_key_path: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            deployments_namespace: DEFAULT_DEPLOYMENTS_NAMESPACE.to_string(),
            metrics_enabled: false,
            webhook_cert_path: DEFAULT_WEBHOOK_CERT_PATH.to_string(),
            webhook_key_path: DEFAULT_WEBHOOK_KEY_PATH.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Load the configuration from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let deployments_namespace = non_empty(DEPLOYMENTS_NAMESPACE_ENV)
            .or_else(|| non_empty(POD_NAMESPACE_ENV))
            .unwrap_or_else(|| {
                warn!(
                    "{} and {} not set, using '{}'",
                    DEPLOYMENTS_NAMESPACE_ENV, POD_NAMESPACE_ENV, DEFAULT_DEPLOYMENTS_NAMESPACE
                );
                DEFAULT_DEPLOYMENTS_NAMESPACE.to_string()
            });

        // Presence alone enables metrics, whatever the value.
        let metrics_enabled = lookup(ENABLE_METRICS_ENV).is_some();

        Self {
            deployments_namespace,
            metrics_enabled,
            webhook_cert_path: non_empty(WEBHOOK_CERT_PATH_ENV)
                .unwrap_or_else(|| DEFAULT_WEBHOOK_CERT_PATH.to_string()),
            webhook_key_path: non_empty(WEBHOOK_KEY_PATH_ENV)
                .unwrap_or_else(|| DEFAULT_WEBHOOK_KEY_PATH.to_string()),
        }
    }
}
