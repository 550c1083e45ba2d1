use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::OperatorConfig;
use crate::controller::error::BackoffConfig;
use crate::controller::store::ClusterStore;
use crate::health::HealthState;
use crate::resources::certificate::CertificateGenerator;

/// Consecutive reconcile failures per object, cleared on success
#[derive(Default)]
pub struct RetryCounter {
    attempts: Mutex<HashMap<String, u32>>,
}

impl RetryCounter {
    /// Count a failure of `key` and return its zero-based attempt number
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = attempts.entry(key.to_string()).or_insert(0);
        let attempt = *count;
        *count = count.saturating_add(1);
        attempt
    }

    pub fn reset(&self, key: &str) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

/// Shared context for the controllers
#[derive(Clone)]
pub struct Context {
    /// Object store the reconcilers read and write through
    pub store: Arc<dyn ClusterStore>,
    /// Strategy used to mint CA and serving certificates
    pub certificates: Arc<dyn CertificateGenerator>,
    pub config: OperatorConfig,
    /// Metrics sink, absent in tests
    pub health_state: Option<Arc<HealthState>>,
    /// Requeue delays for failed reconciles
    pub backoff: BackoffConfig,
    pub retries: Arc<RetryCounter>,
}

impl Context {
    pub fn new(
        store: Arc<dyn ClusterStore>,
        certificates: Arc<dyn CertificateGenerator>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            store,
            certificates,
            config,
            health_state: None,
            backoff: BackoffConfig::default(),
            retries: Arc::new(RetryCounter::default()),
        }
    }

    pub fn with_health_state(mut self, health_state: Arc<HealthState>) -> Self {
        self.health_state = Some(health_state);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Namespace holding the policy server workloads
    pub fn namespace(&self) -> &str {
        &self.config.deployments_namespace
    }
}
